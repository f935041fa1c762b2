//! Execution context threaded through a run.
//!
//! The context is an append-only variable map: once a node writes a variable,
//! every later node observes it. Writes go through [`ExecutionContext::with_var`],
//! which produces a new context value rather than mutating in place, so a
//! node failure can never corrupt the snapshot the orchestrator already
//! persisted. Each run owns its context exclusively.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Variable name under which trigger adapters inject the triggering event's
/// payload before the run starts.
pub const TRIGGER_DATA_VAR: &str = "triggerData";

/// Append-only key/value store available to downstream nodes of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ExecutionContext {
    vars: Map<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with the trigger payload.
    pub fn seeded(trigger_data: Value) -> Self {
        Self::new().with_var(TRIGGER_DATA_VAR, trigger_data)
    }

    /// Return a new context with `name` bound to `value`.
    ///
    /// A later write to the same key supersedes the earlier value; nothing
    /// is ever removed.
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// Look up a top-level variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The trigger payload injected by the trigger adapter, if any.
    pub fn trigger_data(&self) -> Option<&Value> {
        self.get(TRIGGER_DATA_VAR)
    }

    /// Resolve a dotted path (`contact.address.city`, `items.0.id`) against
    /// the context. Returns `None` when any segment is missing.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.vars.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(obj) => obj.get(segment)?,
                Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Snapshot the context as a JSON object for persistence.
    pub fn to_value(&self) -> Value {
        Value::Object(self.vars.clone())
    }

    /// Restore a context from a persisted snapshot. Non-object values
    /// restore as an empty context.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(vars) => Self { vars },
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_var_appends() {
        let ctx = ExecutionContext::new()
            .with_var("a", json!(1))
            .with_var("b", json!("two"));

        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.get("b"), Some(&json!("two")));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_later_write_supersedes() {
        let ctx = ExecutionContext::new()
            .with_var("a", json!(1))
            .with_var("a", json!(2));

        assert_eq!(ctx.get("a"), Some(&json!(2)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_with_var_leaves_original_intact() {
        let base = ExecutionContext::new().with_var("a", json!(1));
        let extended = base.clone().with_var("a", json!(2));

        assert_eq!(base.get("a"), Some(&json!(1)));
        assert_eq!(extended.get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_get_path_nested() {
        let ctx = ExecutionContext::new()
            .with_var("contact", json!({"address": {"city": "Oslo"}}));

        assert_eq!(ctx.get_path("contact.address.city"), Some(&json!("Oslo")));
        assert_eq!(ctx.get_path("contact.address.zip"), None);
    }

    #[test]
    fn test_get_path_array_index() {
        let ctx = ExecutionContext::new().with_var("items", json!([{"id": 7}, {"id": 9}]));

        assert_eq!(ctx.get_path("items.1.id"), Some(&json!(9)));
        assert_eq!(ctx.get_path("items.5.id"), None);
        assert_eq!(ctx.get_path("items.x"), None);
    }

    #[test]
    fn test_seeded_injects_trigger_data() {
        let ctx = ExecutionContext::seeded(json!({"contactId": "c-1"}));
        assert_eq!(ctx.trigger_data(), Some(&json!({"contactId": "c-1"})));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let ctx = ExecutionContext::new().with_var("n", json!({"x": [1, 2]}));
        let restored = ExecutionContext::from_value(ctx.to_value());
        assert_eq!(restored, ctx);
    }
}
