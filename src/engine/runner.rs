//! Workflow orchestrator.
//!
//! Drives one run at a time through its node graph: render/dispatch each
//! node, apply branch outcomes, persist cursor and context after every
//! node, retry transient failures with bounded exponential backoff, park
//! the run WAITING at durable sleeps, and record failure details when a
//! node exhausts its options. Many runs advance concurrently across the
//! system; within a run, nodes execute strictly sequentially.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::engine::Services;
use crate::error::{Error, FailureDetail, Result};
use crate::nodes::{run_executor, ExecEnv};
use crate::steps::StepRunner;
use crate::storage::{Run, RunStatus, StoredWorkflow};
use crate::workflow::parse_workflow;

/// Registry that tracks per-run cancel signals.
///
/// The cancel API endpoint signals a running orchestrator loop to stop
/// between node executions. A result returned by an in-flight node after
/// cancellation is discarded, never applied to the run's context.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    signals: Arc<tokio::sync::Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its cancel signal.
    pub async fn register(&self, run_id: &str) -> Arc<AtomicBool> {
        let signal = Arc::new(AtomicBool::new(false));
        self.signals
            .lock()
            .await
            .insert(run_id.to_string(), signal.clone());
        signal
    }

    /// Request cancellation of a run. Returns false if the run is not
    /// currently advancing.
    pub async fn request_cancel(&self, run_id: &str) -> bool {
        if let Some(signal) = self.signals.lock().await.get(run_id) {
            signal.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Unregister a run (called when its advance returns).
    pub async fn unregister(&self, run_id: &str) {
        self.signals.lock().await.remove(run_id);
    }
}

/// Workflow orchestrator bound to the shared engine services.
pub struct Runner {
    services: Arc<Services>,
}

impl Runner {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Create and immediately advance a run for a triggering event.
    pub async fn start(
        &self,
        stored: &StoredWorkflow,
        trigger_kind: &str,
        trigger_data: Value,
    ) -> Result<Run> {
        let run = self
            .create_run(
                stored,
                trigger_kind,
                ExecutionContext::seeded(trigger_data),
                None,
            )
            .await?;
        self.advance(run).await
    }

    /// Create a run record without advancing it.
    ///
    /// Nested-run executors call this inside a durable step so that
    /// re-entry reuses the same child run instead of spawning another.
    pub async fn create_run(
        &self,
        stored: &StoredWorkflow,
        trigger_kind: &str,
        seed: ExecutionContext,
        parent_run_id: Option<&str>,
    ) -> Result<Run> {
        if !stored.enabled {
            return Err(Error::Configuration(format!(
                "workflow '{}' is disabled",
                stored.name
            )));
        }

        let workflow = parse_workflow(&stored.definition)?;
        let entry = workflow.entry_node().ok_or_else(|| {
            Error::Configuration(format!("workflow '{}' has no nodes", stored.name))
        })?;

        let run = Run {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: stored.id.clone(),
            workflow_name: stored.name.clone(),
            user_id: stored.user_id.clone(),
            status: RunStatus::Pending,
            trigger_kind: trigger_kind.to_string(),
            context: seed.to_value(),
            cursor: Some(entry.id.clone()),
            resume_at: None,
            parent_run_id: parent_run_id.map(|s| s.to_string()),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.services.storage.save_run(&run).await?;

        info!(
            run_id = %run.id,
            workflow_name = %run.workflow_name,
            trigger_kind,
            "Run created"
        );
        Ok(run)
    }

    /// Load a run and advance it. Terminal runs are returned unchanged.
    pub async fn resume(&self, run_id: &str) -> Result<Run> {
        let run = self
            .services
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::Workflow(format!("Run not found: {}", run_id)))?;

        if run.status.is_terminal() {
            return Ok(run);
        }
        self.advance(run).await
    }

    /// Advance a run until it suspends or reaches a terminal state.
    #[instrument(
        name = "run.advance",
        skip(self, run),
        fields(
            run_id = %run.id,
            workflow_name = %run.workflow_name,
            trigger_kind = %run.trigger_kind,
        )
    )]
    pub async fn advance(&self, run: Run) -> Result<Run> {
        let run_id = run.id.clone();
        let cancel_signal = self.services.cancels.register(&run_id).await;
        let result = self.advance_inner(run, cancel_signal).await;
        self.services.cancels.unregister(&run_id).await;
        result
    }

    async fn advance_inner(&self, mut run: Run, cancel_signal: Arc<AtomicBool>) -> Result<Run> {
        let stored = self
            .services
            .storage
            .get_workflow_by_id(&run.workflow_id)
            .await?
            .ok_or_else(|| {
                Error::Workflow(format!("Workflow not found for run {}", run.id))
            })?;
        let workflow = parse_workflow(&stored.definition)?;
        let settings = workflow.settings.clone();

        run.status = RunStatus::Running;
        run.resume_at = None;
        self.services.storage.save_run(&run).await?;

        let mut ctx = ExecutionContext::from_value(run.context.clone());
        let steps = StepRunner::new(&run.id, self.services.step_log());
        let deadline =
            Instant::now() + std::time::Duration::from_secs(settings.timeout_seconds.max(1));

        loop {
            let Some(cursor) = run.cursor.clone() else {
                return self.succeed(run, &ctx).await;
            };

            if cancel_signal.load(Ordering::SeqCst) {
                return self.fail(run, &cursor, &Error::Cancelled).await;
            }

            if self
                .services
                .shutdown
                .as_ref()
                .map(|s| s.is_shutdown_requested())
                .unwrap_or(false)
            {
                info!(run_id = %run.id, "Parking run for shutdown");
                return self.park(run, &ctx, Utc::now()).await;
            }

            if Instant::now() >= deadline {
                let detail = FailureDetail {
                    node_id: cursor.clone(),
                    kind: "timeout".to_string(),
                    message: format!("run exceeded {} seconds", settings.timeout_seconds),
                };
                return self.fail_with_detail(run, detail).await;
            }

            let Some(node) = workflow.get_node(&cursor) else {
                let err = Error::Configuration(format!("node '{}' not found in workflow", cursor));
                return self.fail(run, &cursor, &err).await;
            };

            // Validation guarantees the kind resolves; a miss here means the
            // definition changed under a live run.
            let Some(executor) = self.services.registry.get(&node.kind) else {
                let err = Error::Configuration(format!("unknown node kind: {}", node.kind));
                return self.fail(run, &cursor, &err).await;
            };

            info!(run_id = %run.id, node_id = %cursor, kind = %node.kind, "Executing node");

            let publisher = self.services.hub.scoped(&node.kind);
            let env = ExecEnv {
                run_id: &run.id,
                user_id: &run.user_id,
                steps: &steps,
                publisher: &publisher,
                services: &self.services,
                settings: &settings,
            };

            let max_attempts = settings.retry.max_attempts.max(1);
            let mut attempt = 1u32;
            let outcome = loop {
                match run_executor(executor.as_ref(), node, ctx.clone(), &env).await {
                    Ok(outcome) => break Ok(outcome),
                    Err(err @ Error::Suspended { .. }) => break Err(err),
                    Err(err) if err.is_retriable() && attempt < max_attempts => {
                        let delay = settings.retry.backoff_delay(attempt);
                        warn!(
                            run_id = %run.id,
                            node_id = %cursor,
                            attempt,
                            max_attempts,
                            "Node failed with retriable error: {}. Retrying in {:?}",
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => break Err(err),
                }
            };

            match outcome {
                Ok(outcome) => {
                    // The run may have been cancelled while the node was in
                    // flight; its result must not be applied.
                    if cancel_signal.load(Ordering::SeqCst) {
                        return self.fail(run, &cursor, &Error::Cancelled).await;
                    }

                    ctx = outcome.context;

                    if outcome.halt {
                        run.cursor = None;
                        return self.succeed(run, &ctx).await;
                    }

                    let next = workflow
                        .next_node(&cursor, outcome.branch.as_deref())
                        .map(|s| s.to_string());

                    // Durable progress: context and cursor persist before
                    // the next node runs.
                    run.context = ctx.to_value();
                    run.cursor = next.clone();
                    self.services.storage.save_run(&run).await?;

                    if next.is_none() {
                        return self.succeed(run, &ctx).await;
                    }
                }
                Err(Error::Suspended { resume_at }) => {
                    return self.park(run, &ctx, resume_at).await;
                }
                Err(err) => {
                    return self.fail(run, &cursor, &err).await;
                }
            }
        }
    }

    async fn succeed(&self, mut run: Run, ctx: &ExecutionContext) -> Result<Run> {
        run.status = RunStatus::Succeeded;
        run.context = ctx.to_value();
        run.cursor = None;
        run.resume_at = None;
        run.finished_at = Some(Utc::now());
        self.services.storage.save_run(&run).await?;
        info!(run_id = %run.id, "Run succeeded");
        Ok(run)
    }

    /// Park the run WAITING; the resumer (or the parent run) re-enters it
    /// at `resume_at`.
    async fn park(
        &self,
        mut run: Run,
        ctx: &ExecutionContext,
        resume_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Run> {
        run.status = RunStatus::Waiting;
        run.context = ctx.to_value();
        run.resume_at = Some(resume_at);
        self.services.storage.save_run(&run).await?;
        info!(run_id = %run.id, %resume_at, "Run suspended");
        Ok(run)
    }

    async fn fail(&self, run: Run, node_id: &str, err: &Error) -> Result<Run> {
        self.fail_with_detail(run, FailureDetail::new(node_id, err))
            .await
    }

    async fn fail_with_detail(&self, mut run: Run, detail: FailureDetail) -> Result<Run> {
        error!(
            run_id = %run.id,
            node_id = %detail.node_id,
            kind = %detail.kind,
            "Run failed: {}",
            detail.message
        );
        run.status = RunStatus::Failed;
        run.resume_at = None;
        run.finished_at = Some(Utc::now());
        run.error = Some(detail);
        self.services.storage.save_run(&run).await?;
        Ok(run)
    }

    /// Request cancellation of an advancing run.
    pub async fn cancel(&self, run_id: &str) -> Result<bool> {
        info!(run_id, "Cancellation requested");
        Ok(self.services.cancels.request_cancel(run_id).await)
    }
}
