//! Branch node - conditional edge selection.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::types::{ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::workflow::NodeDef;

/// Branch node executor: evaluates conditions against the context and
/// follows the outgoing edge labelled with the outcome.
pub struct BranchExecutor;

impl BranchExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BranchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct BranchConfig {
    conditions: Vec<Condition>,
    #[serde(default = "default_match_mode")]
    match_mode: String, // "all" | "any"
}

#[derive(Debug, Deserialize)]
struct Condition {
    /// Dotted context path of the left-hand value
    field: String,
    operator: String,
    #[serde(default)]
    value: Value,
}

fn default_match_mode() -> String {
    "all".to_string()
}

#[async_trait]
impl NodeExecutor for BranchExecutor {
    fn kind(&self) -> &str {
        "branch"
    }

    fn description(&self) -> &str {
        "Evaluate conditions and follow the true or false edge"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        _env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        let config: BranchConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| Error::Configuration(format!("invalid branch config: {}", e)))?;

        if config.conditions.is_empty() {
            return Err(Error::Configuration(
                "branch node requires at least one condition".to_string(),
            ));
        }

        let match_mode = config.match_mode.to_lowercase();
        if match_mode != "all" && match_mode != "any" {
            return Err(Error::Configuration(format!(
                "invalid match_mode '{}', expected 'all' or 'any'",
                config.match_mode
            )));
        }

        let mut results = Vec::with_capacity(config.conditions.len());
        for condition in &config.conditions {
            let left = ctx.get_path(&condition.field).cloned().unwrap_or(Value::Null);
            results.push(evaluate(&left, &condition.operator, &condition.value)?);
        }

        let outcome = if match_mode == "any" {
            results.iter().any(|r| *r)
        } else {
            results.iter().all(|r| *r)
        };

        let label = if outcome { "true" } else { "false" };
        Ok(NodeOutcome::branch(ctx, label))
    }
}

fn evaluate(left: &Value, operator: &str, right: &Value) -> Result<bool> {
    match operator {
        "equals" => Ok(left == right),
        "not_equals" => Ok(left != right),
        "contains" => match left {
            Value::String(s) => Ok(right
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false)),
            Value::Array(items) => Ok(items.contains(right)),
            Value::Object(map) => Ok(right.as_str().map(|k| map.contains_key(k)).unwrap_or(false)),
            _ => Ok(false),
        },
        "exists" => Ok(!left.is_null()),
        "is_empty" => Ok(match left {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }),
        "gt" | "lt" | "gte" | "lte" => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return Ok(false);
            };
            Ok(match operator {
                "gt" => l > r,
                "lt" => l < r,
                "gte" => l >= r,
                _ => l <= r,
            })
        }
        other => Err(Error::Configuration(format!(
            "unknown branch operator '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::status::NullPublisher;
    use crate::steps::{MemoryStepLog, StepRunner};
    use crate::workflow::WorkflowSettings;
    use serde_json::json;
    use std::sync::Arc;

    async fn run_branch(config: serde_json::Value, ctx: ExecutionContext) -> Result<NodeOutcome> {
        let services = Arc::new(Services::for_tests());
        let steps = StepRunner::new("run-1", Arc::new(MemoryStepLog::new()));
        let settings = WorkflowSettings::default();
        let env = ExecEnv {
            run_id: "run-1",
            user_id: "user-1",
            steps: &steps,
            publisher: &NullPublisher,
            services: &services,
            settings: &settings,
        };
        let node = NodeDef {
            id: "branch-1".to_string(),
            kind: "branch".to_string(),
            config,
            output: None,
        };
        BranchExecutor::new().execute(&node, ctx, &env).await
    }

    #[tokio::test]
    async fn test_true_branch_selected() {
        let ctx = ExecutionContext::new().with_var("newContact", json!({"tier": "vip"}));
        let outcome = run_branch(
            json!({
                "conditions": [
                    {"field": "newContact.tier", "operator": "equals", "value": "vip"}
                ]
            }),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(outcome.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_false_branch_selected() {
        let ctx = ExecutionContext::new().with_var("newContact", json!({"tier": "basic"}));
        let outcome = run_branch(
            json!({
                "conditions": [
                    {"field": "newContact.tier", "operator": "equals", "value": "vip"}
                ]
            }),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(outcome.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_any_mode() {
        let ctx = ExecutionContext::new().with_var("invoice", json!({"total": 250}));
        let outcome = run_branch(
            json!({
                "match_mode": "any",
                "conditions": [
                    {"field": "invoice.total", "operator": "gt", "value": 1000},
                    {"field": "invoice.total", "operator": "gte", "value": 200}
                ]
            }),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(outcome.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_missing_field_compares_as_null() {
        let outcome = run_branch(
            json!({
                "conditions": [
                    {"field": "ghost.value", "operator": "exists"}
                ]
            }),
            ExecutionContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_no_conditions_is_configuration_error() {
        let err = run_branch(json!({"conditions": []}), ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[tokio::test]
    async fn test_unknown_operator_is_configuration_error() {
        let err = run_branch(
            json!({
                "conditions": [
                    {"field": "a", "operator": "resembles", "value": 1}
                ]
            }),
            ExecutionContext::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
