//! Execute-workflow node - run another workflow as a nested run.
//!
//! The nested run is seeded with the parent's current context and the
//! parent node blocks until it reaches a terminal state. Spawning goes
//! through the durable step runner, so re-entry after a crash or a
//! suspension reattaches to the same child run instead of starting a
//! second one. A suspended child suspends the parent node (the parent run
//! parks WAITING with the child's wake time), never the whole engine.

use async_trait::async_trait;
use tracing::info;

use super::types::{required_str, ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::engine::Runner;
use crate::error::{Error, Result};
use crate::storage::{Run, RunStatus};
use crate::template;
use crate::workflow::NodeDef;

/// Execute-workflow node executor.
pub struct SubflowExecutor;

impl SubflowExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubflowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for SubflowExecutor {
    fn kind(&self) -> &str {
        "execute_workflow"
    }

    fn description(&self) -> &str {
        "Execute another workflow as a nested run"
    }

    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        let name_raw = required_str(&node.config, "workflow")?;
        let name = template::render(&name_raw, &ctx)?;

        let stored = env
            .services
            .storage
            .get_workflow(&name)
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!("sub-workflow '{}' not found", name))
            })?;

        info!(
            run_id = env.run_id,
            node_id = %node.id,
            child_workflow = %name,
            "Spawning nested run"
        );

        // Durable spawn: the recorded child run id survives crashes and
        // suspensions, so this node always drives the same child.
        let services = env.services.clone();
        let seed = ctx.clone();
        let parent_run_id = env.run_id.to_string();
        let child_id: String = env
            .steps
            .run(&format!("{}:spawn", node.id), || async move {
                let child = Runner::new(services)
                    .create_run(&stored, "subflow", seed, Some(&parent_run_id))
                    .await?;
                Ok(child.id)
            })
            .await?;

        let child = drive_child(env, &child_id).await?;

        match child.status {
            RunStatus::Succeeded => {
                let ctx = match &node.output {
                    Some(var) => ctx.with_var(var.clone(), child.context),
                    None => ctx,
                };
                Ok(NodeOutcome::advance(ctx))
            }
            RunStatus::Failed => {
                let detail = child
                    .error
                    .map(|e| format!("{} (node '{}')", e.message, e.node_id))
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(Error::Workflow(format!(
                    "sub-workflow '{}' failed: {}",
                    name, detail
                )))
            }
            other => Err(Error::Internal(format!(
                "nested run '{}' ended advance in state {}",
                child_id, other
            ))),
        }
    }
}

/// Advance a nested run owned by this node.
///
/// Terminal children return as-is; an advanceable child is advanced now;
/// a child still waiting afterwards suspends the parent until the child's
/// wake time.
async fn drive_child(env: &ExecEnv<'_>, child_id: &str) -> Result<Run> {
    let child = env
        .services
        .storage
        .get_run(child_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("nested run '{}' not found", child_id)))?;

    if child.status.is_terminal() {
        return Ok(child);
    }

    if child.status == RunStatus::Waiting {
        if let Some(resume_at) = child.resume_at {
            if resume_at > chrono::Utc::now() {
                return Err(Error::Suspended { resume_at });
            }
        }
    }

    let child = Runner::new(env.services.clone()).advance(child).await?;

    if child.status == RunStatus::Waiting {
        let resume_at = child.resume_at.unwrap_or_else(chrono::Utc::now);
        return Err(Error::Suspended { resume_at });
    }

    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::nodes::{DomainClient, ExecutorRegistry, RecordingDomainClient};
    use crate::status::StatusHub;
    use crate::storage::{SqliteStorage, StoredWorkflow};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        domain: Arc<RecordingDomainClient>,
        services: Arc<Services>,
    }

    impl Harness {
        fn new() -> Self {
            let domain = Arc::new(RecordingDomainClient::new());
            let services = Arc::new(Services::new(
                SqliteStorage::open_in_memory().unwrap(),
                ExecutorRegistry::new(),
                StatusHub::new(),
                domain.clone() as Arc<dyn DomainClient>,
            ));
            Self { domain, services }
        }

        async fn store(&self, name: &str, yaml: &str) -> StoredWorkflow {
            let now = Utc::now();
            let stored = StoredWorkflow {
                id: format!("wf-{}", name),
                name: name.to_string(),
                user_id: "user-1".to_string(),
                definition: yaml.to_string(),
                enabled: true,
                created_at: now,
                updated_at: now,
            };
            self.services.storage.save_workflow(&stored).await.unwrap();
            stored
        }
    }

    const PARENT_YAML: &str = r#"
name: parent
nodes:
  - id: trigger
    type: contact_created
  - id: nested
    type: execute_workflow
    output: childResult
    config:
      workflow: child
edges:
  - from: trigger
    to: nested
"#;

    const CHILD_YAML: &str = r#"
name: child
nodes:
  - id: tag
    type: add_tag
    output: tagged
    config:
      contactId: "{{newContact.id}}"
      tag: from-child
"#;

    #[tokio::test]
    async fn test_nested_run_seeds_parent_context_and_merges_output() {
        let harness = Harness::new();
        let parent = harness.store("parent", PARENT_YAML).await;
        harness.store("child", CHILD_YAML).await;

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", json!({"id": "c-1"}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);

        // The child saw the parent's context (trigger data reached its
        // action through the seed).
        assert_eq!(harness.domain.calls()[0].1["contactId"], "c-1");

        // The child's final context came back under the output binding.
        assert!(run.context["childResult"]["tagged"].is_object());

        // The nested run is linked to its parent.
        let runs = harness.services.storage.list_runs(None, 10).await.unwrap();
        let child_run = runs.iter().find(|r| r.workflow_name == "child").unwrap();
        assert_eq!(child_run.parent_run_id.as_deref(), Some(run.id.as_str()));
        assert_eq!(child_run.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_child_failure_fails_parent_node() {
        let harness = Harness::new();
        let parent = harness.store("parent", PARENT_YAML).await;
        // Child with a broken action: missing required contactId.
        harness
            .store(
                "child",
                r#"
name: child
nodes:
  - id: tag
    type: add_tag
    config:
      tag: from-child
"#,
            )
            .await;

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", json!({"id": "c-1"}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let detail = run.error.unwrap();
        assert_eq!(detail.node_id, "nested");
        assert!(detail.message.contains("child"));
    }

    #[tokio::test]
    async fn test_missing_child_workflow_is_configuration_error() {
        let harness = Harness::new();
        let parent = harness.store("parent", PARENT_YAML).await;
        // No "child" workflow stored.

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", json!({}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, "configuration");
        assert_eq!(harness.domain.call_count(), 0);
    }

    #[tokio::test]
    async fn test_suspended_child_suspends_parent_and_resumes() {
        let harness = Harness::new();
        let parent = harness.store("parent", PARENT_YAML).await;
        harness
            .store(
                "child",
                r#"
name: child
nodes:
  - id: pause
    type: wait
    output: waited
    config:
      duration: 1
      unit: seconds
  - id: tag
    type: add_tag
    config:
      contactId: "{{newContact.id}}"
      tag: after-wait
edges:
  - from: pause
    to: tag
"#,
            )
            .await;

        let runner = Runner::new(harness.services.clone());
        let run = runner
            .start(&parent, "manual", json!({"id": "c-1"}))
            .await
            .unwrap();

        // Child's wait suspended the parent node, not the engine.
        assert_eq!(run.status, RunStatus::Waiting);
        assert!(run.resume_at.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let resumed = runner.resume(&run.id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Succeeded);
        assert_eq!(harness.domain.call_count(), 1);

        // Exactly one child run was spawned across the suspension.
        let runs = harness.services.storage.list_runs(None, 50).await.unwrap();
        let children: Vec<_> = runs.iter().filter(|r| r.workflow_name == "child").collect();
        assert_eq!(children.len(), 1);
    }
}
