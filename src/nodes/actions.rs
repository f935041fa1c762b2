//! Action executors.
//!
//! Actions call out to the platform's domain operations (CRM, messaging,
//! invoicing, payments). The catalog is table-driven: every action shares
//! the same preamble (validate the required field, render the configured
//! payload, perform the operation through the durable step runner) and
//! differs only in its operation name, required field and step purpose.
//! Actions whose backing operation is unbuilt fail deterministically with
//! a NotImplemented error instead of silently succeeding.

use async_trait::async_trait;

use super::types::{required_str, ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::template;
use crate::workflow::NodeDef;

/// One entry in the action catalog.
pub struct ActionSpec {
    pub kind: &'static str,
    pub description: &'static str,
    /// Reference id or payload field the action cannot run without.
    pub required_field: &'static str,
    /// Step-key suffix and domain operation name. Stable across retries
    /// of the same node instance.
    pub purpose: &'static str,
    /// Whether a backing domain operation exists yet.
    pub implemented: bool,
}

/// The action catalog.
pub const ACTION_SPECS: &[ActionSpec] = &[
    ActionSpec {
        kind: "send_message",
        description: "Send an SMS/chat message to a contact",
        required_field: "contactId",
        purpose: "send_message",
        implemented: true,
    },
    ActionSpec {
        kind: "send_email",
        description: "Send an email to a contact",
        required_field: "to",
        purpose: "send_email",
        implemented: true,
    },
    ActionSpec {
        kind: "create_contact",
        description: "Create a contact in the CRM",
        required_field: "name",
        purpose: "create_contact",
        implemented: true,
    },
    ActionSpec {
        kind: "lookup_contact",
        description: "Look up a contact by id",
        required_field: "contactId",
        purpose: "lookup_contact",
        implemented: true,
    },
    ActionSpec {
        kind: "add_tag",
        description: "Add a tag to a contact",
        required_field: "contactId",
        purpose: "add_tag",
        implemented: true,
    },
    ActionSpec {
        kind: "cancel_appointment",
        description: "Cancel a booked appointment",
        required_field: "appointmentId",
        purpose: "cancel_appointment",
        implemented: true,
    },
    ActionSpec {
        kind: "create_invoice",
        description: "Create an invoice for a contact",
        required_field: "contactId",
        purpose: "create_invoice",
        implemented: true,
    },
    ActionSpec {
        kind: "void_invoice",
        description: "Void an open invoice",
        required_field: "invoiceId",
        purpose: "void_invoice",
        implemented: true,
    },
    ActionSpec {
        kind: "refund_payment",
        description: "Refund a settled payment",
        required_field: "paymentId",
        purpose: "refund_payment",
        implemented: true,
    },
    ActionSpec {
        kind: "generate_document",
        description: "Generate a document from a template",
        required_field: "templateId",
        purpose: "generate_document",
        implemented: false,
    },
    ActionSpec {
        kind: "update_payroll",
        description: "Update a payroll entry",
        required_field: "employeeId",
        purpose: "update_payroll",
        implemented: false,
    },
];

/// Executor shared by every action kind.
pub struct ActionExecutor {
    spec: &'static ActionSpec,
}

impl ActionExecutor {
    pub fn new(spec: &'static ActionSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl NodeExecutor for ActionExecutor {
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
        env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        required_str(&node.config, self.spec.required_field)?;

        let payload = template::render_config(&node.config, &ctx)?;

        // The required reference must still be non-empty after rendering:
        // a template that resolves to nothing is as broken as a missing one.
        required_str(&payload, self.spec.required_field)?;

        if !self.spec.implemented {
            return Err(Error::NotImplemented(format!(
                "action '{}' has no backing domain operation",
                self.spec.kind
            )));
        }

        let step_key = format!("{}:{}", node.id, self.spec.purpose);
        let purpose = self.spec.purpose;
        let services = env.services.clone();
        let user_id = env.user_id.to_string();
        let result = env
            .steps
            .run(&step_key, || async move {
                services.domain.invoke(purpose, &payload, &user_id).await
            })
            .await?;

        let ctx = match &node.output {
            Some(var) => ctx.with_var(var.clone(), result),
            None => ctx,
        };
        Ok(NodeOutcome::advance(ctx))
    }
}
