//! Schedule trigger ingress.
//!
//! Registers a cron job (UTC) for every workflow with a schedule trigger
//! binding; each tick constructs trigger data and starts a run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::engine::{Runner, Services};
use crate::error::{Error, Result};
use crate::workflow::{parse_workflow, TriggerBinding, Workflow};

/// Manages scheduled workflow runs.
pub struct Scheduler {
    job_scheduler: Arc<Mutex<JobScheduler>>,
    /// Map of workflow name to job UUIDs for tracking
    jobs: Arc<RwLock<HashMap<String, Vec<uuid::Uuid>>>>,
    services: Arc<Services>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub async fn new(services: Arc<Services>) -> Result<Self> {
        let job_scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            job_scheduler: Arc::new(Mutex::new(job_scheduler)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            services,
        })
    }

    /// Start the scheduler and register all schedule triggers.
    pub async fn start(&self) -> Result<()> {
        info!("Starting workflow scheduler...");

        let workflows = self.services.storage.list_workflows().await?;
        let mut scheduled_count = 0;

        for stored in workflows {
            if !stored.enabled {
                continue;
            }

            match parse_workflow(&stored.definition) {
                Ok(workflow) => match self.register_workflow(&workflow).await {
                    Ok(count) => scheduled_count += count,
                    Err(e) => {
                        warn!(
                            "Failed to register schedule for workflow '{}': {}",
                            workflow.name, e
                        );
                    }
                },
                Err(e) => {
                    warn!("Failed to parse workflow '{}': {}", stored.name, e);
                }
            }
        }

        {
            let sched = self.job_scheduler.lock().await;
            sched
                .start()
                .await
                .map_err(|e| Error::Internal(format!("Failed to start scheduler: {}", e)))?;
        }

        info!("Scheduler started with {} cron job(s)", scheduled_count);
        Ok(())
    }

    /// Register a workflow's schedule triggers. Returns how many were added.
    async fn register_workflow(&self, workflow: &Workflow) -> Result<usize> {
        let mut count = 0;

        for trigger in &workflow.triggers {
            let TriggerBinding::Schedule { cron } = trigger else {
                continue;
            };

            let services = self.services.clone();
            let workflow_name = workflow.name.clone();
            let cron_expr = cron.clone();

            let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let services = services.clone();
                let workflow_name = workflow_name.clone();
                let cron_expr = cron_expr.clone();
                Box::pin(async move {
                    run_scheduled(services, &workflow_name, &cron_expr).await;
                })
            })
            .map_err(|e| {
                Error::Configuration(format!(
                    "invalid cron expression '{}' on workflow '{}': {}",
                    cron, workflow.name, e
                ))
            })?;

            let job_id = {
                let sched = self.job_scheduler.lock().await;
                sched
                    .add(job)
                    .await
                    .map_err(|e| Error::Internal(format!("Failed to add cron job: {}", e)))?
            };

            self.jobs
                .write()
                .await
                .entry(workflow.name.clone())
                .or_default()
                .push(job_id);

            info!(
                "Scheduled workflow '{}' with cron '{}'",
                workflow.name, cron
            );
            count += 1;
        }

        Ok(count)
    }

    /// Stop the scheduler gracefully.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping workflow scheduler...");
        let mut sched = self.job_scheduler.lock().await;
        sched
            .shutdown()
            .await
            .map_err(|e| Error::Internal(format!("Failed to stop scheduler: {}", e)))?;
        info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_scheduled(services: Arc<Services>, workflow_name: &str, cron: &str) {
    let stored = match services.storage.get_workflow(workflow_name).await {
        Ok(Some(w)) if w.enabled => w,
        Ok(_) => {
            warn!(
                "Scheduled workflow '{}' missing or disabled, skipping tick",
                workflow_name
            );
            return;
        }
        Err(e) => {
            error!("Failed to load scheduled workflow '{}': {}", workflow_name, e);
            return;
        }
    };

    let trigger_data = json!({
        "scheduledAt": Utc::now().to_rfc3339(),
        "cron": cron,
    });

    match Runner::new(services).start(&stored, "schedule", trigger_data).await {
        Ok(run) => {
            info!(
                "Scheduled run {} of '{}' finished advance with status {}",
                run.id, workflow_name, run.status
            );
        }
        Err(e) => {
            error!("Scheduled run of '{}' failed: {}", workflow_name, e);
        }
    }
}
