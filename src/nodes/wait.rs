//! Wait node - durably pause the run for a duration.
//!
//! Unlike an in-process sleep, the wait goes through the durable step
//! runner: the run is parked WAITING with a wake time and survives process
//! restarts; re-entry after the deadline completes immediately.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::types::{ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::NodeDef;

/// Wait node executor.
pub struct WaitExecutor;

impl WaitExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WaitConfig {
    duration: u64,
    unit: String,
}

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "seconds" => Some(1_000),
        "minutes" => Some(60_000),
        "hours" => Some(3_600_000),
        "days" => Some(86_400_000),
        _ => None,
    }
}

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn kind(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause the run for a configured duration"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        let config: WaitConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| Error::Configuration(format!("invalid wait config: {}", e)))?;

        if config.duration == 0 {
            return Err(Error::Configuration(
                "wait duration must be greater than zero".to_string(),
            ));
        }

        let unit_ms = unit_millis(&config.unit).ok_or_else(|| {
            Error::Configuration(format!(
                "invalid wait unit '{}', expected seconds|minutes|hours|days",
                config.unit
            ))
        })?;

        // Downstream nodes observe wait completion through the output
        // variable, so a binding is mandatory.
        let output = node.output.clone().ok_or_else(|| {
            Error::Configuration("wait node requires an output variable".to_string())
        })?;

        let duration_ms = config.duration.saturating_mul(unit_ms);

        info!(
            run_id = env.run_id,
            node_id = %node.id,
            duration_ms,
            "Wait node entering durable sleep"
        );

        let waited_until = env
            .steps
            .sleep(&format!("{}:wait", node.id), duration_ms)
            .await?;

        let result = json!({
            "duration": config.duration,
            "unit": config.unit,
            "durationMs": duration_ms,
            "waitedUntil": waited_until.to_rfc3339(),
        });

        Ok(NodeOutcome::advance(ctx.with_var(output, result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::status::NullPublisher;
    use crate::steps::{MemoryStepLog, StepRunner};
    use crate::workflow::WorkflowSettings;
    use chrono::Utc;
    use std::sync::Arc;

    fn node(config: serde_json::Value, output: Option<&str>) -> NodeDef {
        NodeDef {
            id: "wait-1".to_string(),
            kind: "wait".to_string(),
            config,
            output: output.map(|s| s.to_string()),
        }
    }

    async fn execute(
        steps: &StepRunner,
        node: &NodeDef,
        ctx: ExecutionContext,
    ) -> Result<NodeOutcome> {
        let services = Arc::new(Services::for_tests());
        let settings = WorkflowSettings::default();
        let env = ExecEnv {
            run_id: "run-1",
            user_id: "user-1",
            steps,
            publisher: &NullPublisher,
            services: &services,
            settings: &settings,
        };
        WaitExecutor::new().execute(node, ctx, &env).await
    }

    #[tokio::test]
    async fn test_five_minutes_suspends_for_300000_ms() {
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let node = node(json!({"duration": 5, "unit": "minutes"}), Some("waited"));

        let before = Utc::now();
        let err = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap_err();

        let Error::Suspended { resume_at } = err else {
            panic!("expected suspension, got {err:?}");
        };
        let expected = before + chrono::Duration::milliseconds(300_000);
        let slack = chrono::Duration::milliseconds(250);
        assert!(resume_at >= expected - slack && resume_at <= expected + slack);
    }

    #[tokio::test]
    async fn test_resumption_records_wait_result() {
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let node = node(json!({"duration": 1, "unit": "seconds"}), Some("waited"));

        // First entry suspends with the wake deadline.
        let err = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap_err();
        let Error::Suspended { resume_at } = err else {
            panic!("expected suspension");
        };

        tokio::time::sleep(std::time::Duration::from_millis(1050)).await;

        // Re-entry past the deadline completes and binds the result.
        let outcome = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap();
        let waited = outcome.context.get("waited").unwrap();
        assert_eq!(waited["duration"], 1);
        assert_eq!(waited["unit"], "seconds");
        assert_eq!(waited["durationMs"], 1000);

        let waited_until =
            chrono::DateTime::parse_from_rfc3339(waited["waitedUntil"].as_str().unwrap()).unwrap();
        assert!(waited_until >= resume_at.fixed_offset());
    }

    #[tokio::test]
    async fn test_zero_duration_is_configuration_error() {
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let node = node(json!({"duration": 0, "unit": "seconds"}), Some("waited"));

        let err = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_bad_unit_is_configuration_error() {
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let node = node(json!({"duration": 2, "unit": "fortnights"}), Some("waited"));

        let err = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_missing_output_is_configuration_error() {
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let node = node(json!({"duration": 2, "unit": "seconds"}), None);

        let err = execute(&steps, &node, ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
