//! Executor registry - resolves node kinds to executors.

use std::collections::HashMap;
use std::sync::Arc;

use super::actions::{ActionExecutor, ACTION_SPECS};
use super::branch::BranchExecutor;
use super::bundle::BundleExecutor;
use super::stop::StopExecutor;
use super::subflow::SubflowExecutor;
use super::triggers::{TriggerExecutor, TRIGGER_SPECS};
use super::types::NodeExecutor;
use super::wait::WaitExecutor;

/// Registry of available node kinds.
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Create a registry with the full built-in catalog.
    pub fn new() -> Self {
        let mut registry = Self {
            executors: HashMap::new(),
        };

        for spec in TRIGGER_SPECS {
            registry.register(Arc::new(TriggerExecutor::new(spec)));
        }
        for spec in ACTION_SPECS {
            registry.register(Arc::new(ActionExecutor::new(spec)));
        }
        registry.register(Arc::new(WaitExecutor::new()));
        registry.register(Arc::new(BranchExecutor::new()));
        registry.register(Arc::new(StopExecutor::new()));
        registry.register(Arc::new(SubflowExecutor::new()));
        registry.register(Arc::new(BundleExecutor::new()));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its kind.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.kind().to_string(), executor);
    }

    /// Resolve a node kind to its executor.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }

    /// Check if a node kind is registered.
    pub fn has(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// List all registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        kinds.sort();
        kinds
    }

    /// Get descriptions of all registered kinds.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        self.executors
            .iter()
            .map(|(kind, executor)| (kind.as_str(), executor.description()))
            .collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_catalog() {
        let registry = ExecutorRegistry::new();

        // Triggers
        assert!(registry.has("contact_created"));
        assert!(registry.has("form_submitted"));
        assert!(registry.has("invoice_paid"));
        assert!(registry.has("file_deleted"));

        // Actions
        assert!(registry.has("send_message"));
        assert!(registry.has("cancel_appointment"));
        assert!(registry.has("refund_payment"));
        assert!(registry.has("generate_document"));

        // Control nodes
        assert!(registry.has("wait"));
        assert!(registry.has("branch"));
        assert!(registry.has("stop"));
        assert!(registry.has("execute_workflow"));
        assert!(registry.has("bundle"));

        assert!(!registry.has("nonexistent"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ExecutorRegistry::empty();
        assert!(!registry.has("wait"));
        assert!(registry.kinds().is_empty());
    }

    #[test]
    fn test_kinds_sorted_and_unique() {
        let registry = ExecutorRegistry::new();
        let kinds = registry.kinds();
        let mut sorted = kinds.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(kinds, sorted);
    }
}
