//! Node executor contract and shared execution preamble.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::engine::Services;
use crate::error::{Error, Result};
use crate::status::{StatusEvent, StatusPublisher};
use crate::steps::StepRunner;
use crate::workflow::{NodeDef, WorkflowSettings};

/// What a node hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// Context extended with the node's result
    pub context: ExecutionContext,
    /// Branch outcome selecting a labelled outgoing edge
    pub branch: Option<String>,
    /// Stop the run immediately (SUCCEEDED) without visiting further nodes
    pub halt: bool,
}

impl NodeOutcome {
    /// Follow the single unlabelled outgoing edge.
    pub fn advance(context: ExecutionContext) -> Self {
        Self {
            context,
            branch: None,
            halt: false,
        }
    }

    /// Follow the outgoing edge labelled with `branch`.
    pub fn branch(context: ExecutionContext, branch: impl Into<String>) -> Self {
        Self {
            context,
            branch: Some(branch.into()),
            halt: false,
        }
    }

    /// End the run successfully without visiting remaining nodes.
    pub fn halt(context: ExecutionContext) -> Self {
        Self {
            context,
            branch: None,
            halt: true,
        }
    }
}

/// Capabilities handed to a node executor for one node execution.
pub struct ExecEnv<'a> {
    pub run_id: &'a str,
    pub user_id: &'a str,
    /// Durable step runner; all side effects and waits go through it
    pub steps: &'a StepRunner,
    /// Status broadcast bound to this node's kind topic
    pub publisher: &'a dyn StatusPublisher,
    /// Shared engine services (storage, registry, domain operations)
    pub services: &'a std::sync::Arc<Services>,
    pub settings: &'a WorkflowSettings,
}

/// Trait that all node kinds implement.
///
/// Executors perform their effect and extend the context; they never decide
/// retry policy. Failures are published as an error status and re-raised for
/// the orchestrator to classify.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node kind this executor handles (e.g. "send_message", "wait").
    fn kind(&self) -> &str;

    /// Execute the node against the current context.
    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome>;

    /// Get a description of this node kind.
    fn description(&self) -> &str {
        "A workflow node"
    }

    /// Whether this executor publishes its own terminal error event.
    ///
    /// Bundle nodes attach iteration progress to their last error event;
    /// the shared preamble must not publish a second, plain one after it.
    fn owns_error_status(&self) -> bool {
        false
    }
}

/// Shared execution preamble applied to every node kind.
///
/// Publishes `loading` before any effect, `success` after a normal return
/// and `error` on failure. A suspension is not a failure: the node is still
/// in progress, so no terminal status is published for it.
pub async fn run_executor(
    executor: &dyn NodeExecutor,
    node: &NodeDef,
    ctx: ExecutionContext,
    env: &ExecEnv<'_>,
) -> Result<NodeOutcome> {
    env.publisher
        .publish(StatusEvent::loading(&node.id).with_run(env.run_id));

    match executor.execute(node, ctx, env).await {
        Ok(outcome) => {
            env.publisher
                .publish(StatusEvent::success(&node.id).with_run(env.run_id));
            Ok(outcome)
        }
        Err(err @ Error::Suspended { .. }) => Err(err),
        Err(err) => {
            if !executor.owns_error_status() {
                env.publisher
                    .publish(StatusEvent::error(&node.id).with_run(env.run_id));
            }
            Err(err)
        }
    }
}

/// Fetch a required string field from node configuration.
///
/// Missing, non-string or empty fields are Configuration errors that fail
/// the run without consuming retry budget.
pub fn required_str(config: &Value, field: &str) -> Result<String> {
    match config.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(Error::Configuration(format!(
            "required field '{}' is empty",
            field
        ))),
        Some(_) => Err(Error::Configuration(format!(
            "required field '{}' must be a string",
            field
        ))),
        None => Err(Error::Configuration(format!(
            "missing required field '{}'",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_str_present() {
        let config = json!({"contactId": "c-1"});
        assert_eq!(required_str(&config, "contactId").unwrap(), "c-1");
    }

    #[test]
    fn test_required_str_missing_is_configuration() {
        let config = json!({});
        let err = required_str(&config, "contactId").unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_required_str_empty_is_configuration() {
        let config = json!({"contactId": "  "});
        assert!(required_str(&config, "contactId").is_err());
    }

    #[test]
    fn test_required_str_wrong_type_is_configuration() {
        let config = json!({"contactId": 42});
        assert!(required_str(&config, "contactId").is_err());
    }
}
