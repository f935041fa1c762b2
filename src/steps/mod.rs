//! Durable step runner.
//!
//! Every externally visible side effect and every timed wait in a run goes
//! through this runner, keyed by a stable step key derived from the node id
//! and the step's purpose. The runner records each completed step in a
//! per-run step log; when a run is re-entered after a crash or a timed
//! suspension, completed steps replay their recorded result instead of
//! re-invoking the effect, and already-elapsed sleeps resume immediately.
//! This is what makes multi-day waits and retried runs safe against
//! double-charging, double-sending and double-deleting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// One recorded step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_key: String,
    /// Recorded result for effect steps; `None` for sleeps.
    pub result: Option<Value>,
    /// Wake deadline for sleep steps.
    pub wake_at: Option<DateTime<Utc>>,
    /// Set once the step has executed (or the sleep has elapsed).
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Persistence seam for the step log. Implemented by the SQLite storage in
/// production and by [`MemoryStepLog`] in tests.
#[async_trait]
pub trait StepLog: Send + Sync {
    async fn load_step(&self, run_id: &str, step_key: &str) -> Result<Option<StepRecord>>;
    async fn save_step(&self, run_id: &str, record: &StepRecord) -> Result<()>;
}

/// In-memory step log for tests.
#[derive(Default)]
pub struct MemoryStepLog {
    steps: Mutex<HashMap<(String, String), StepRecord>>,
}

impl MemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepLog for MemoryStepLog {
    async fn load_step(&self, run_id: &str, step_key: &str) -> Result<Option<StepRecord>> {
        let steps = self.steps.lock().await;
        Ok(steps
            .get(&(run_id.to_string(), step_key.to_string()))
            .cloned())
    }

    async fn save_step(&self, run_id: &str, record: &StepRecord) -> Result<()> {
        let mut steps = self.steps.lock().await;
        steps.insert((run_id.to_string(), record.step_key.clone()), record.clone());
        Ok(())
    }
}

/// Step runner bound to one run.
#[derive(Clone)]
pub struct StepRunner {
    run_id: String,
    log: Arc<dyn StepLog>,
}

impl StepRunner {
    pub fn new(run_id: &str, log: Arc<dyn StepLog>) -> Self {
        Self {
            run_id: run_id.to_string(),
            log,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execute `effect` at most once for this run and step key.
    ///
    /// A completed step replays its recorded result without invoking
    /// `effect` again. The result must serialize, since it is what replays
    /// after a restart.
    pub async fn run<T, F, Fut>(&self, step_key: &str, effect: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(record) = self.log.load_step(&self.run_id, step_key).await? {
            if record.is_completed() {
                debug!(
                    run_id = %self.run_id,
                    step_key,
                    "Replaying recorded step result"
                );
                let result = record.result.unwrap_or(Value::Null);
                return Ok(serde_json::from_value(result)?);
            }
        }

        let value = effect().await?;

        let record = StepRecord {
            step_key: step_key.to_string(),
            result: Some(serde_json::to_value(&value)?),
            wake_at: None,
            completed_at: Some(Utc::now()),
        };
        self.log.save_step(&self.run_id, &record).await?;

        Ok(value)
    }

    /// Wait `duration_ms` exactly once for this run and step key.
    ///
    /// The first entry records the wake deadline and suspends the run
    /// (`Error::Suspended`); re-entry after the deadline marks the sleep
    /// complete and returns the completion timestamp. A sleep that already
    /// completed returns its recorded timestamp immediately.
    pub async fn sleep(&self, step_key: &str, duration_ms: u64) -> Result<DateTime<Utc>> {
        let existing = self.log.load_step(&self.run_id, step_key).await?;

        let wake_at = match existing {
            Some(record) => {
                if let Some(completed_at) = record.completed_at {
                    return Ok(completed_at);
                }
                record.wake_at.ok_or_else(|| {
                    Error::Internal(format!("sleep step '{}' has no wake deadline", step_key))
                })?
            }
            None => {
                let wake_at = Utc::now() + Duration::milliseconds(duration_ms as i64);
                let record = StepRecord {
                    step_key: step_key.to_string(),
                    result: None,
                    wake_at: Some(wake_at),
                    completed_at: None,
                };
                self.log.save_step(&self.run_id, &record).await?;
                wake_at
            }
        };

        let now = Utc::now();
        if now < wake_at {
            debug!(
                run_id = %self.run_id,
                step_key,
                %wake_at,
                "Suspending run for durable sleep"
            );
            return Err(Error::Suspended { resume_at: wake_at });
        }

        let record = StepRecord {
            step_key: step_key.to_string(),
            result: None,
            wake_at: Some(wake_at),
            completed_at: Some(now),
        };
        self.log.save_step(&self.run_id, &record).await?;
        Ok(now)
    }
}
