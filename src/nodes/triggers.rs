//! Trigger executors.
//!
//! Triggers are passive: the trigger adapter has already injected the
//! observed event under `triggerData` before the run starts, and the
//! trigger node's only job is to re-expose that payload under a normalized
//! variable name downstream nodes reference. When the author has not
//! configured a name, or the configured name is not a valid identifier,
//! the kind's fixed default applies; an invalid name silently falls back
//! rather than failing the run.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::workflow::NodeDef;

/// One entry in the trigger catalog.
pub struct TriggerSpec {
    pub kind: &'static str,
    /// Variable the payload is exposed under when none is configured.
    pub default_var: &'static str,
    pub description: &'static str,
}

/// The trigger catalog. Each kind differs only in its default variable
/// name; the execution preamble is shared.
pub const TRIGGER_SPECS: &[TriggerSpec] = &[
    TriggerSpec {
        kind: "contact_created",
        default_var: "newContact",
        description: "Fires when a contact is created in the CRM",
    },
    TriggerSpec {
        kind: "contact_updated",
        default_var: "updatedContact",
        description: "Fires when a contact record changes",
    },
    TriggerSpec {
        kind: "form_submitted",
        default_var: "formSubmission",
        description: "Fires when a funnel form is submitted",
    },
    TriggerSpec {
        kind: "appointment_booked",
        default_var: "newAppointment",
        description: "Fires when an appointment is booked",
    },
    TriggerSpec {
        kind: "invoice_paid",
        default_var: "paidInvoice",
        description: "Fires when an invoice is paid",
    },
    TriggerSpec {
        kind: "payment_failed",
        default_var: "failedPayment",
        description: "Fires when a payment attempt fails",
    },
    TriggerSpec {
        kind: "file_deleted",
        default_var: "deletedFile",
        description: "Fires when a file is removed from the media library",
    },
    TriggerSpec {
        kind: "schedule_tick",
        default_var: "scheduledTick",
        description: "Fires on the workflow's cron schedule",
    },
];

/// Whether `name` is a valid context variable identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Executor shared by every trigger kind.
pub struct TriggerExecutor {
    spec: &'static TriggerSpec,
}

impl TriggerExecutor {
    pub fn new(spec: &'static TriggerSpec) -> Self {
        Self { spec }
    }

    fn output_var<'a>(&self, node: &'a NodeDef) -> &'a str {
        match &node.output {
            Some(name) if is_valid_identifier(name) => name,
            _ => self.spec.default_var,
        }
    }
}

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn kind(&self) -> &str {
        self.spec.kind
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    async fn execute(
        &self,
        node: &NodeDef,
        ctx: ExecutionContext,
        _env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        let payload = ctx.trigger_data().cloned().unwrap_or(Value::Null);
        let var = self.output_var(node).to_string();
        Ok(NodeOutcome::advance(ctx.with_var(var, payload)))
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

    fn spec(kind: &str) -> &'static TriggerSpec {
        TRIGGER_SPECS.iter().find(|s| s.kind == kind).unwrap()
    }

    fn node(kind: &str, output: Option<&str>) -> NodeDef {
        NodeDef {
            id: "trigger-1".to_string(),
            kind: kind.to_string(),
            config: json!({}),
            output: output.map(|s| s.to_string()),
        }
    }

    async fn execute(kind: &str, output: Option<&str>, ctx: ExecutionContext) -> ExecutionContext {
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

        TriggerExecutor::new(spec(kind))
            .execute(&node(kind, output), ctx, &env)
            .await
            .unwrap()
            .context
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("newContact"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("$ref"));
        assert!(is_valid_identifier("a1"));

        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("dash-ed"));
        assert!(!is_valid_identifier("dot.ted"));
    }

    #[tokio::test]
    async fn test_configured_name_used() {
        let ctx = ExecutionContext::seeded(json!({"id": "c-1"}));
        let out = execute("contact_created", Some("freshContact"), ctx).await;
        assert_eq!(out.get("freshContact"), Some(&json!({"id": "c-1"})));
    }

    #[tokio::test]
    async fn test_missing_name_falls_back_to_default() {
        let ctx = ExecutionContext::seeded(json!({"id": "c-1"}));
        let out = execute("contact_created", None, ctx).await;
        assert_eq!(out.get("newContact"), Some(&json!({"id": "c-1"})));
    }

    #[tokio::test]
    async fn test_invalid_name_falls_back_silently() {
        let ctx = ExecutionContext::seeded(json!({"path": "/old.pdf"}));
        let out = execute("file_deleted", Some("not a name!"), ctx).await;
        assert_eq!(out.get("deletedFile"), Some(&json!({"path": "/old.pdf"})));
        assert!(!out.contains("not a name!"));
    }

    #[tokio::test]
    async fn test_every_kind_has_valid_default() {
        for spec in TRIGGER_SPECS {
            assert!(
                is_valid_identifier(spec.default_var),
                "default for {} must be a valid identifier",
                spec.kind
            );
        }
    }

    #[tokio::test]
    async fn test_absent_trigger_data_exposes_null() {
        let out = execute("form_submitted", None, ExecutionContext::new()).await;
        assert_eq!(out.get("formSubmission"), Some(&Value::Null));
    }
}
