//! Trigger ingress adapters.
//!
//! Each adapter authenticates an externally observed event, shapes it into
//! trigger data and starts a run. Manual invocation lives on the API
//! surface.

mod scheduler;
mod webhook;

pub use scheduler::Scheduler;
pub use webhook::{create_webhook_routes, SIGNATURE_HEADER};
