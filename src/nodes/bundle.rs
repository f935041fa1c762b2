//! Bundle node - run a workflow once per item of a sequence.
//!
//! Each item gets its own nested run, seeded with the parent context plus
//! the item under a configurable variable. Progress is broadcast per item
//! as `{currentIndex, totalIterations}` (1-based). The failure policy is
//! an explicit, required `mode` field:
//!
//! - `fail_fast`: items run sequentially and the first failure aborts the
//!   bundle before later items start.
//! - `best_effort`: items fan out up to the workflow's bundle fan-out
//!   limit; failures are recorded and iteration continues.
//!
//! Item spawns are durable steps keyed by item position, so re-entry after
//! a suspension or crash reattaches to the existing child runs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::info;

use super::types::{ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::engine::{Runner, Services};
use crate::error::{Error, Result};
use crate::status::{StatusEvent, StatusPublisher};
use crate::steps::StepRunner;
use crate::storage::{Run, RunStatus, StoredWorkflow};
use crate::template;
use crate::workflow::NodeDef;

/// Bundle node executor.
pub struct BundleExecutor;

impl BundleExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BundleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure policy for bundle iteration. Required; never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BundleMode {
    FailFast,
    BestEffort,
}

#[derive(Debug, Deserialize)]
struct BundleConfig {
    /// Workflow executed once per item
    workflow: String,
    /// Item sequence: an inline array (templates allowed) or a context path
    items: Value,
    mode: BundleMode,
    /// Variable each child sees its item under
    #[serde(default = "default_item_var")]
    item_var: String,
}

fn default_item_var() -> String {
    "item".to_string()
}

#[async_trait]
impl NodeExecutor for BundleExecutor {
    fn kind(&self) -> &str {
        "bundle"
    }

    fn description(&self) -> &str {
        "Run a workflow once per item of a sequence"
    }

    // The bundle's terminal error event carries iteration progress; the
    // shared preamble must not follow it with a plain one.
    fn owns_error_status(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        match self.execute_inner(node, ctx, env).await {
            Ok(outcome) => Ok(outcome),
            Err(err @ Error::Suspended { .. }) => Err(err),
            Err(err) => {
                // Config/resolution failures have no item position yet;
                // publish the plain error the preamble is skipping for us.
                if !matches!(err, Error::Workflow(_)) {
                    env.publisher
                        .publish(StatusEvent::error(&node.id).with_run(env.run_id));
                }
                Err(err)
            }
        }
    }
}

impl BundleExecutor {
    async fn execute_inner(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        let config: BundleConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| Error::Configuration(format!("invalid bundle config: {}", e)))?;

        let workflow_name = template::render(&config.workflow, &ctx)?;
        let stored = env
            .services
            .storage
            .get_workflow(&workflow_name)
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!("bundle workflow '{}' not found", workflow_name))
            })?;

        let items = resolve_items(&config.items, &ctx)?;
        let total = items.len();

        info!(
            run_id = env.run_id,
            node_id = %node.id,
            total,
            mode = ?config.mode,
            "Bundle iterating {} item(s)",
            total
        );

        let summary = match config.mode {
            BundleMode::FailFast => {
                self.run_fail_fast(node, &ctx, env, &stored, &config.item_var, items)
                    .await?
            }
            BundleMode::BestEffort => {
                self.run_best_effort(node, &ctx, env, &stored, &config.item_var, items)
                    .await?
            }
        };

        let ctx = match &node.output {
            Some(var) => ctx.with_var(var.clone(), summary),
            None => ctx,
        };
        Ok(NodeOutcome::advance(ctx))
    }

    /// Sequential iteration; the first failing item halts the bundle
    /// before any later item starts.
    async fn run_fail_fast(
        &self,
        node: &NodeDef,
        ctx: &ExecutionContext,
        env: &ExecEnv<'_>,
        stored: &StoredWorkflow,
        item_var: &str,
        items: Vec<Value>,
    ) -> Result<Value> {
        let total = items.len();
        let mut child_runs = Vec::with_capacity(total);

        for (i, item) in items.into_iter().enumerate() {
            let index = i + 1;
            env.publisher.publish(
                StatusEvent::loading(&node.id)
                    .with_run(env.run_id)
                    .with_progress(index, total),
            );

            let child = run_item(
                env.services.clone(),
                env.steps.clone(),
                env.run_id,
                &node.id,
                stored,
                ctx,
                item_var,
                item,
                i,
            )
            .await?;

            match child.status {
                RunStatus::Succeeded => {
                    env.publisher.publish(
                        StatusEvent::success(&node.id)
                            .with_run(env.run_id)
                            .with_progress(index, total),
                    );
                    child_runs.push(child.id);
                }
                RunStatus::Failed => {
                    env.publisher.publish(
                        StatusEvent::error(&node.id)
                            .with_run(env.run_id)
                            .with_progress(index, total),
                    );
                    let message = child
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(Error::Workflow(format!(
                        "bundle item {}/{} failed: {}",
                        index, total, message
                    )));
                }
                other => {
                    return Err(Error::Internal(format!(
                        "bundle child run ended advance in state {}",
                        other
                    )));
                }
            }
        }

        Ok(json!({
            "totalIterations": total,
            "succeeded": child_runs.len(),
            "failed": 0,
            "failures": [],
            "runs": child_runs,
        }))
    }

    /// Bounded fan-out; failures are recorded per item and iteration
    /// continues through the rest.
    async fn run_best_effort(
        &self,
        node: &NodeDef,
        ctx: &ExecutionContext,
        env: &ExecEnv<'_>,
        stored: &StoredWorkflow,
        item_var: &str,
        items: Vec<Value>,
    ) -> Result<Value> {
        let total = items.len();
        let fanout = env.settings.bundle_fanout.max(1);

        let mut join_set: JoinSet<(usize, Result<Run>)> = JoinSet::new();
        let mut pending = items.into_iter().enumerate();
        let mut outcomes: Vec<Option<Result<Run>>> = (0..total).map(|_| None).collect();

        loop {
            while join_set.len() < fanout {
                let Some((i, item)) = pending.next() else {
                    break;
                };
                let services = env.services.clone();
                let steps = env.steps.clone();
                let run_id = env.run_id.to_string();
                let node_id = node.id.clone();
                let stored = stored.clone();
                let seed_ctx = ctx.clone();
                let item_var = item_var.to_string();
                let publisher = env.services.hub.scoped(&node.kind);

                join_set.spawn(async move {
                    publisher.publish(
                        StatusEvent::loading(&node_id)
                            .with_run(&run_id)
                            .with_progress(i + 1, total),
                    );

                    let result = run_item(
                        services, steps, &run_id, &node_id, &stored, &seed_ctx, &item_var, item, i,
                    )
                    .await;

                    match &result {
                        Ok(child) if child.status == RunStatus::Succeeded => {
                            publisher.publish(
                                StatusEvent::success(&node_id)
                                    .with_run(&run_id)
                                    .with_progress(i + 1, total),
                            );
                        }
                        Ok(child) if child.status == RunStatus::Failed => {
                            publisher.publish(
                                StatusEvent::error(&node_id)
                                    .with_run(&run_id)
                                    .with_progress(i + 1, total),
                            );
                        }
                        // Suspensions are not terminal; no status yet.
                        _ => {}
                    }

                    (i, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (i, result) =
                joined.map_err(|e| Error::Internal(format!("bundle task panicked: {}", e)))?;
            outcomes[i] = Some(result);
        }

        // A child still waiting suspends the whole bundle node until the
        // earliest wake time; completed children replay on re-entry.
        let mut earliest_wake: Option<chrono::DateTime<chrono::Utc>> = None;
        let mut succeeded = Vec::new();
        let mut failures = Vec::new();

        for (i, outcome) in outcomes.into_iter().enumerate() {
            let index = i + 1;
            match outcome {
                Some(Ok(child)) => match child.status {
                    RunStatus::Succeeded => succeeded.push(child.id),
                    RunStatus::Failed => {
                        let message = child
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "unknown error".to_string());
                        failures.push(json!({"index": index, "message": message}));
                    }
                    other => {
                        return Err(Error::Internal(format!(
                            "bundle child run ended advance in state {}",
                            other
                        )));
                    }
                },
                Some(Err(Error::Suspended { resume_at })) => {
                    earliest_wake = Some(match earliest_wake {
                        Some(current) => current.min(resume_at),
                        None => resume_at,
                    });
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(Error::Internal(
                        "bundle item produced no outcome".to_string(),
                    ));
                }
            }
        }

        if let Some(resume_at) = earliest_wake {
            return Err(Error::Suspended { resume_at });
        }

        Ok(json!({
            "totalIterations": total,
            "succeeded": succeeded.len(),
            "failed": failures.len(),
            "failures": failures,
            "runs": succeeded,
        }))
    }
}

/// Resolve the configured item sequence against the context.
fn resolve_items(items: &Value, ctx: &ExecutionContext) -> Result<Vec<Value>> {
    match items {
        // A string is a context path to an array accumulated upstream.
        Value::String(path) => match ctx.get_path(path) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(Error::Configuration(format!(
                "bundle items path '{}' does not resolve to a sequence",
                path
            ))),
            None => Err(Error::Configuration(format!(
                "bundle items path '{}' not found in context",
                path
            ))),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| template::render_config(item, ctx))
            .collect(),
        _ => Err(Error::Configuration(
            "bundle items must be a sequence or a context path".to_string(),
        )),
    }
}

/// Spawn (durably) and drive one item's child run.
#[allow(clippy::too_many_arguments)]
async fn run_item(
    services: std::sync::Arc<Services>,
    steps: StepRunner,
    run_id: &str,
    node_id: &str,
    stored: &StoredWorkflow,
    ctx: &ExecutionContext,
    item_var: &str,
    item: Value,
    index: usize,
) -> Result<Run> {
    let seed = ctx
        .clone()
        .with_var(item_var.to_string(), item)
        .with_var("itemIndex", json!(index + 1));

    let spawn_services = services.clone();
    let stored = stored.clone();
    let parent_run_id = run_id.to_string();
    let child_id: String = steps
        .run(&format!("{}:item:{}:spawn", node_id, index), || async move {
            let child = Runner::new(spawn_services)
                .create_run(&stored, "bundle", seed, Some(&parent_run_id))
                .await?;
            Ok(child.id)
        })
        .await?;

    let child = services
        .storage
        .get_run(&child_id)
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

    let child = Runner::new(services).advance(child).await?;
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
    use crate::status::{NodeStatus, StatusHub};
    use crate::storage::SqliteStorage;
    use chrono::Utc;
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

        fn drain_events(
            rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>,
        ) -> Vec<StatusEvent> {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn parent_yaml(mode: &str) -> String {
        format!(
            r#"
name: blast
nodes:
  - id: trigger
    type: contact_created
  - id: fanout
    type: bundle
    output: bundleResult
    config:
      workflow: per-contact
      mode: {mode}
      items:
        - {{ "id": "c-1" }}
        - {{ "id": "" }}
        - {{ "id": "c-3" }}
edges:
  - from: trigger
    to: fanout
"#
        )
    }

    // The child fails on the second item: its required contactId renders
    // empty.
    const CHILD_YAML: &str = r#"
name: per-contact
nodes:
  - id: notify
    type: send_message
    config:
      contactId: "{{item.id}}"
      message: "Hello {{itemIndex}}"
"#;

    #[tokio::test]
    async fn test_fail_fast_halts_before_later_items() {
        let harness = Harness::new();
        let parent = harness.store("blast", &parent_yaml("fail_fast")).await;
        harness.store("per-contact", CHILD_YAML).await;

        let mut rx = harness.services.hub.subscribe("bundle");

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().unwrap().node_id, "fanout");

        // Item 3 never ran.
        assert_eq!(harness.domain.call_count(), 1);

        // The last error event reports the failing iteration.
        let events = Harness::drain_events(&mut rx);
        let last_error = events
            .iter()
            .rev()
            .find(|e| e.status == NodeStatus::Error)
            .unwrap();
        assert_eq!(last_error.current_index, Some(2));
        assert_eq!(last_error.total_iterations, Some(3));
    }

    #[tokio::test]
    async fn test_best_effort_processes_remaining_items() {
        let harness = Harness::new();
        let parent = harness.store("blast", &parent_yaml("best_effort")).await;
        harness.store("per-contact", CHILD_YAML).await;

        let mut rx = harness.services.hub.subscribe("bundle");

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", serde_json::json!({}))
            .await
            .unwrap();

        // The bundle records the failure and the run still succeeds.
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(harness.domain.call_count(), 2); // items 1 and 3

        let summary = &run.context["bundleResult"];
        assert_eq!(summary["totalIterations"], 3);
        assert_eq!(summary["succeeded"], 2);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["failures"][0]["index"], 2);

        // Success events were published for items 1 and 3.
        let events = Harness::drain_events(&mut rx);
        let successes: Vec<usize> = events
            .iter()
            .filter(|e| e.status == NodeStatus::Success && e.current_index.is_some())
            .map(|e| e.current_index.unwrap())
            .collect();
        assert!(successes.contains(&1));
        assert!(successes.contains(&3));

        let errors: Vec<usize> = events
            .iter()
            .filter(|e| e.status == NodeStatus::Error)
            .map(|e| e.current_index.unwrap())
            .collect();
        assert_eq!(errors, vec![2]);
    }

    #[tokio::test]
    async fn test_missing_mode_is_configuration_error() {
        let yaml = r#"
name: no-mode
nodes:
  - id: trigger
    type: contact_created
  - id: fanout
    type: bundle
    config:
      workflow: per-contact
      items: []
edges:
  - from: trigger
    to: fanout
"#;
        let harness = Harness::new();
        let parent = harness.store("no-mode", yaml).await;
        harness.store("per-contact", CHILD_YAML).await;

        let run = Runner::new(harness.services.clone())
            .start(&parent, "manual", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let detail = run.error.unwrap();
        assert_eq!(detail.kind, "configuration");
        assert!(detail.message.contains("mode"));
    }

    #[tokio::test]
    async fn test_items_from_context_path() {
        let yaml = r#"
name: from-path
nodes:
  - id: trigger
    type: contact_created
    output: payload
  - id: fanout
    type: bundle
    output: bundleResult
    config:
      workflow: per-contact
      mode: fail_fast
      items: payload.contacts
edges:
  - from: trigger
    to: fanout
"#;
        let harness = Harness::new();
        let parent = harness.store("from-path", yaml).await;
        harness.store("per-contact", CHILD_YAML).await;

        let run = Runner::new(harness.services.clone())
            .start(
                &parent,
                "manual",
                serde_json::json!({"contacts": [{"id": "a"}, {"id": "b"}]}),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(harness.domain.call_count(), 2);
        assert_eq!(run.context["bundleResult"]["succeeded"], 2);
    }
}
