//! Workflow definition types.
//!
//! A workflow is a directed graph of trigger and action nodes authored in
//! the visual editor and stored as YAML. The engine only reads these
//! definitions; authoring and persistence of drafts live elsewhere.

use serde::{Deserialize, Serialize};

/// A complete workflow definition.
///
/// # Example YAML
///
/// ```yaml
/// name: welcome-sequence
/// description: Greet new contacts, wait a day, then follow up
///
/// triggers:
///   - type: webhook
///     path: /hooks/welcome-sequence
///
/// nodes:
///   - id: trigger
///     type: contact_created
///     output: newContact
///   - id: greet
///     type: send_message
///     config:
///       contactId: "{{newContact.id}}"
///       message: "Welcome, {{newContact.name}}!"
///   - id: pause
///     type: wait
///     output: waited
///     config:
///       duration: 1
///       unit: days
///
/// edges:
///   - from: trigger
///     to: greet
///   - from: greet
///     to: pause
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow name (used as identifier)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Version number (for tracking changes)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Ingress bindings that start this workflow
    #[serde(default)]
    pub triggers: Vec<TriggerBinding>,

    /// Nodes (steps) in the workflow graph
    pub nodes: Vec<NodeDef>,

    /// Directed edges between nodes; branch nodes label their outgoing
    /// edges with the branch outcome they follow
    #[serde(default)]
    pub edges: Vec<Edge>,

    /// Entry node id; defaults to the first node
    #[serde(default)]
    pub entry: Option<String>,

    /// Global workflow settings
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_version() -> u32 {
    1
}

/// A node (step) in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique node ID within this workflow
    pub id: String,

    /// Node kind (contact_created, send_message, wait, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Node-specific configuration; string fields may contain
    /// `{{path}}` templates rendered against the execution context
    #[serde(default)]
    pub config: serde_json::Value,

    /// Variable name the node's result is bound to in the context
    #[serde(default)]
    pub output: Option<String>,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,

    /// Branch label; edges out of a branch node carry the outcome
    /// ("true" / "false") that selects them
    #[serde(default)]
    pub branch: Option<String>,
}

/// Ingress binding that starts this workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerBinding {
    /// HTTP callback (default path: /hooks/{workflow_name})
    Webhook {
        #[serde(default)]
        path: Option<String>,
    },
    /// Cron schedule (UTC)
    Schedule { cron: String },
    /// Manual invocation via API/CLI
    Manual,
}

/// Retry configuration for transient node failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per node (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Cap on the exponential backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for the given attempt (1-based), capped.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        std::time::Duration::from_millis(ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Global workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Retry policy for transient node failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Maximum wall-clock time a run may stay RUNNING, in seconds.
    /// Time spent WAITING does not count.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Concurrent child runs a best-effort bundle node may have in flight
    #[serde(default = "default_bundle_fanout")]
    pub bundle_fanout: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout_seconds: default_timeout(),
            bundle_fanout: default_bundle_fanout(),
        }
    }
}

fn default_timeout() -> u64 {
    3600
}

fn default_bundle_fanout() -> usize {
    4
}

impl Workflow {
    /// Get a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The node a run starts at: the explicit entry, or the first node.
    pub fn entry_node(&self) -> Option<&NodeDef> {
        match &self.entry {
            Some(id) => self.get_node(id),
            None => self.nodes.first(),
        }
    }

    /// All edges leaving a node.
    pub fn outgoing(&self, from: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == from).collect()
    }

    /// The node to visit after `from`, given the branch outcome the node
    /// reported. A branch outcome selects the edge with the matching label;
    /// no outcome follows the single unlabelled edge. `None` means the run
    /// has reached a terminal node.
    pub fn next_node(&self, from: &str, branch: Option<&str>) -> Option<&str> {
        let outgoing = self.outgoing(from);
        let edge = match branch {
            Some(label) => outgoing
                .iter()
                .find(|e| e.branch.as_deref() == Some(label)),
            None => outgoing.iter().find(|e| e.branch.is_none()),
        };
        edge.map(|e| e.to.as_str())
    }

    /// All node kinds used in this workflow.
    pub fn node_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.nodes.iter().map(|n| n.kind.as_str()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow() -> Workflow {
        Workflow {
            name: "test".to_string(),
            description: String::new(),
            version: 1,
            triggers: vec![],
            nodes: vec![
                NodeDef {
                    id: "a".to_string(),
                    kind: "contact_created".to_string(),
                    config: json!({}),
                    output: None,
                },
                NodeDef {
                    id: "b".to_string(),
                    kind: "branch".to_string(),
                    config: json!({}),
                    output: None,
                },
                NodeDef {
                    id: "c".to_string(),
                    kind: "send_message".to_string(),
                    config: json!({}),
                    output: None,
                },
            ],
            edges: vec![
                Edge {
                    from: "a".to_string(),
                    to: "b".to_string(),
                    branch: None,
                },
                Edge {
                    from: "b".to_string(),
                    to: "c".to_string(),
                    branch: Some("true".to_string()),
                },
            ],
            entry: None,
            settings: WorkflowSettings::default(),
        }
    }

    #[test]
    fn test_entry_defaults_to_first_node() {
        assert_eq!(workflow().entry_node().unwrap().id, "a");
    }

    #[test]
    fn test_next_node_unlabelled_edge() {
        let wf = workflow();
        assert_eq!(wf.next_node("a", None), Some("b"));
    }

    #[test]
    fn test_next_node_branch_label() {
        let wf = workflow();
        assert_eq!(wf.next_node("b", Some("true")), Some("c"));
        // Missing edge for the chosen branch terminates the run.
        assert_eq!(wf.next_node("b", Some("false")), None);
    }

    #[test]
    fn test_terminal_node_has_no_next() {
        let wf = workflow();
        assert_eq!(wf.next_node("c", None), None);
    }

    #[test]
    fn test_backoff_delay_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            delay_ms: 500,
            max_delay_ms: 2_000,
        };
        assert_eq!(retry.backoff_delay(1).as_millis(), 500);
        assert_eq!(retry.backoff_delay(2).as_millis(), 1000);
        assert_eq!(retry.backoff_delay(3).as_millis(), 2000);
        assert_eq!(retry.backoff_delay(8).as_millis(), 2000);
    }
}
