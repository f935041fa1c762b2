//! opsflow - workflow execution engine for business-operations automation
//!
//! opsflow runs user-authored automations: directed graphs of trigger and
//! action nodes built in the platform's visual editor. It guarantees
//! durable, at-most-once progress across process restarts, supports timed
//! waits that suspend a run for days without holding a worker, isolates
//! per-node failures behind a retriable/non-retriable error taxonomy, and
//! broadcasts live node status to the editor.
//!
//! ## Example workflow
//!
//! ```yaml
//! name: welcome-sequence
//! description: Greet new contacts, wait a day, then follow up
//!
//! triggers:
//!   - type: webhook
//!     path: /hooks/welcome-sequence
//!
//! nodes:
//!   - id: trigger
//!     type: contact_created
//!     output: newContact
//!   - id: greet
//!     type: send_message
//!     config:
//!       contactId: "{{newContact.id}}"
//!       message: "Welcome, {{newContact.name}}!"
//!   - id: pause
//!     type: wait
//!     output: waited
//!     config:
//!       duration: 1
//!       unit: days
//!   - id: follow-up
//!     type: send_email
//!     config:
//!       to: "{{newContact.email}}"
//!       subject: "Still there?"
//!
//! edges:
//!   - from: trigger
//!     to: greet
//!   - from: greet
//!     to: pause
//!   - from: pause
//!     to: follow-up
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod nodes;
pub mod shutdown;
pub mod status;
pub mod steps;
pub mod storage;
pub mod telemetry;
pub mod template;
pub mod triggers;
pub mod workflow;

pub use context::ExecutionContext;
pub use error::{Error, FailureDetail, Result};
