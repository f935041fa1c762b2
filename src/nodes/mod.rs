//! Node executors.
//!
//! Nodes are the building blocks of workflows. Every kind - trigger,
//! action or control node - implements the same executor contract and is
//! resolved through the registry.

mod actions;
mod branch;
mod bundle;
mod domain;
mod registry;
mod stop;
mod subflow;
mod triggers;
mod types;
mod wait;

pub use actions::{ActionExecutor, ActionSpec, ACTION_SPECS};
pub use branch::BranchExecutor;
pub use bundle::BundleExecutor;
pub use domain::{DomainClient, HttpDomainClient, RecordingDomainClient};
pub use registry::ExecutorRegistry;
pub use stop::StopExecutor;
pub use subflow::SubflowExecutor;
pub use triggers::{is_valid_identifier, TriggerExecutor, TriggerSpec, TRIGGER_SPECS};
pub use types::{required_str, run_executor, ExecEnv, NodeExecutor, NodeOutcome};
pub use wait::WaitExecutor;
