//! Workflow execution engine.

mod resumer;
mod runner;

pub use resumer::Resumer;
pub use runner::{CancelRegistry, Runner};

use std::sync::Arc;

use crate::nodes::{DomainClient, ExecutorRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::status::StatusHub;
use crate::steps::StepLog;
use crate::storage::SqliteStorage;

/// Shared engine services threaded into every run.
///
/// Bundling them keeps the executor environment small and lets nested-run
/// executors (subflow, bundle) construct child runners without reaching
/// for globals.
pub struct Services {
    pub storage: SqliteStorage,
    pub registry: ExecutorRegistry,
    pub hub: StatusHub,
    pub domain: Arc<dyn DomainClient>,
    pub cancels: CancelRegistry,
    pub shutdown: Option<Arc<ShutdownCoordinator>>,
}

impl Services {
    pub fn new(
        storage: SqliteStorage,
        registry: ExecutorRegistry,
        hub: StatusHub,
        domain: Arc<dyn DomainClient>,
    ) -> Self {
        Self {
            storage,
            registry,
            hub,
            domain,
            cancels: CancelRegistry::new(),
            shutdown: None,
        }
    }

    /// Attach a shutdown coordinator so in-flight runs park instead of
    /// being lost on SIGTERM.
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Replace the domain-operations client.
    pub fn with_domain(mut self, domain: Arc<dyn DomainClient>) -> Self {
        self.domain = domain;
        self
    }

    /// The step log backing durable step runners for this deployment.
    pub fn step_log(&self) -> Arc<dyn StepLog> {
        Arc::new(self.storage.clone())
    }

    /// In-memory services wired with test doubles.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new(
            SqliteStorage::open_in_memory().expect("in-memory storage"),
            ExecutorRegistry::new(),
            StatusHub::new(),
            Arc::new(crate::nodes::RecordingDomainClient::new()),
        )
    }
}
