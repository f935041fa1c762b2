//! Background resumption of suspended runs.
//!
//! Runs parked WAITING carry a wake time. This poller scans storage on a
//! timer and re-enters top-level runs whose wake time has passed; nested
//! runs are driven by their parent and are never picked up here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::engine::{Runner, Services};
use crate::error::Result;

/// Poll interval for checking due runs (in milliseconds).
const POLL_INTERVAL_MS: u64 = 1000;

/// Maximum due runs fetched per poll.
const POLL_BATCH: usize = 50;

/// Polls storage for due WAITING runs and resumes them.
pub struct Resumer {
    services: Arc<Services>,
    poll_interval_ms: u64,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Resumer {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            poll_interval_ms: POLL_INTERVAL_MS,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Set custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Start the background polling task.
    pub fn start(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let services = self.services.clone();
        let poll_interval = self.poll_interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(poll_interval));
            info!("Run resumer started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = resume_due_runs(&services).await {
                            error!("Resumer poll failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Run resumer stopping");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
    }

    /// Stop the background task.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn resume_due_runs(services: &Arc<Services>) -> Result<()> {
    let due = services
        .storage
        .due_waiting_runs(Utc::now(), POLL_BATCH)
        .await?;

    if due.is_empty() {
        return Ok(());
    }

    debug!("Resuming {} due run(s)", due.len());
    let runner = Runner::new(services.clone());

    for run in due {
        let run_id = run.id.clone();
        match runner.advance(run).await {
            Ok(resumed) => {
                debug!(run_id = %run_id, status = %resumed.status, "Run resumed");
            }
            Err(e) => {
                error!(run_id = %run_id, "Failed to resume run: {}", e);
            }
        }
    }

    Ok(())
}
