//! Live node status broadcast.
//!
//! Every node execution reports its lifecycle (loading → success | error) on
//! a broadcast topic named after the node kind, which the editor UI consumes
//! to light up the canvas. Status events are advisory and never persisted:
//! observers that disconnect simply miss events, and run-state authority
//! lives only in the stored run record.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Maximum number of events buffered per topic before slow subscribers lag.
const BROADCAST_CAPACITY: usize = 1024;

/// Node lifecycle status as shown in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Loading,
    Success,
    Error,
}

/// A single status report for one node of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// 1-based position of the item a bundle node is processing.
    #[serde(rename = "currentIndex", skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
    #[serde(rename = "totalIterations", skip_serializing_if = "Option::is_none")]
    pub total_iterations: Option<usize>,
}

impl StatusEvent {
    pub fn new(node_id: &str, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.to_string(),
            status,
            run_id: None,
            current_index: None,
            total_iterations: None,
        }
    }

    pub fn loading(node_id: &str) -> Self {
        Self::new(node_id, NodeStatus::Loading)
    }

    pub fn success(node_id: &str) -> Self {
        Self::new(node_id, NodeStatus::Success)
    }

    pub fn error(node_id: &str) -> Self {
        Self::new(node_id, NodeStatus::Error)
    }

    pub fn with_run(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    /// Attach bundle iteration progress (1-based index).
    pub fn with_progress(mut self, current_index: usize, total_iterations: usize) -> Self {
        self.current_index = Some(current_index);
        self.total_iterations = Some(total_iterations);
        self
    }
}

/// Capability handed to node executors for reporting status.
///
/// Injected rather than reached for globally so executors stay testable
/// without a live broker.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Publisher that drops every event. Used where no observer exists.
pub struct NullPublisher;

impl StatusPublisher for NullPublisher {
    fn publish(&self, _event: StatusEvent) {}
}

/// Fan-out hub holding one broadcast channel per node kind.
#[derive(Clone, Default)]
pub struct StatusHub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<StatusEvent>>>>,
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, kind: &str) -> broadcast::Sender<StatusEvent> {
        if let Some(tx) = self.topics.read().expect("status topics lock").get(kind) {
            return tx.clone();
        }
        let mut topics = self.topics.write().expect("status topics lock");
        topics
            .entry(kind.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    /// Subscribe to the topic for one node kind.
    pub fn subscribe(&self, kind: &str) -> broadcast::Receiver<StatusEvent> {
        self.sender(kind).subscribe()
    }

    /// Publish an event on a kind's topic. Send errors (no subscribers)
    /// are ignored.
    pub fn publish(&self, kind: &str, event: StatusEvent) {
        let _ = self.sender(kind).send(event);
    }

    /// A publisher bound to one node kind's topic.
    pub fn scoped(&self, kind: &str) -> ScopedPublisher {
        ScopedPublisher {
            hub: self.clone(),
            kind: kind.to_string(),
        }
    }
}

/// [`StatusPublisher`] bound to a single node-kind topic.
pub struct ScopedPublisher {
    hub: StatusHub,
    kind: String,
}

impl StatusPublisher for ScopedPublisher {
    fn publish(&self, event: StatusEvent) {
        self.hub.publish(&self.kind, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_kind_subscribers() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe("send_message");

        hub.publish("send_message", StatusEvent::loading("node-1").with_run("run-1"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.node_id, "node-1");
        assert_eq!(event.status, NodeStatus::Loading);
        assert_eq!(event.run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_topics_are_isolated_by_kind() {
        let hub = StatusHub::new();
        let mut wait_rx = hub.subscribe("wait");
        let mut msg_rx = hub.subscribe("send_message");

        hub.publish("wait", StatusEvent::success("w-1"));

        assert!(wait_rx.try_recv().is_ok());
        assert!(msg_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = StatusHub::new();
        // Must not panic or error.
        hub.publish("wait", StatusEvent::error("w-1"));
    }

    #[test]
    fn test_scoped_publisher_routes_to_its_topic() {
        let hub = StatusHub::new();
        let mut rx = hub.subscribe("bundle");
        let publisher = hub.scoped("bundle");

        publisher.publish(StatusEvent::error("b-1").with_progress(2, 3));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.current_index, Some(2));
        assert_eq!(event.total_iterations, Some(3));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = StatusEvent::loading("n-1").with_run("r-1").with_progress(1, 5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["nodeId"], "n-1");
        assert_eq!(json["status"], "loading");
        assert_eq!(json["runId"], "r-1");
        assert_eq!(json["currentIndex"], 1);
        assert_eq!(json["totalIterations"], 5);
    }
}
