//! Error types for opsflow.
//!
//! The engine classifies every failure into a small taxonomy so the
//! orchestrator can decide, uniformly, whether a failed node is worth
//! retrying. Executors never make that decision themselves.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for opsflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// opsflow error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Required field missing/invalid, unknown node kind, malformed template.
    /// Never retried and never consumes retry budget.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The node kind is recognized but its backing effect is unbuilt.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// An external call failed for a reason expected to clear (timeout,
    /// rate limit, 5xx). Retried with backoff up to the run's budget.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The external system rejected the request for a reason that will not
    /// change on retry (not found, permission denied).
    #[error("Domain error: {0}")]
    Domain(String),

    /// Control-flow signal: a durable sleep has not yet elapsed. The
    /// orchestrator parks the run WAITING and reschedules it.
    #[error("Run suspended until {resume_at}")]
    Suspended {
        resume_at: chrono::DateTime<chrono::Utc>,
    },

    /// The run was cancelled while a node was in flight.
    #[error("Run cancelled")]
    Cancelled,

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-parseable error kind, recorded in run failure details.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::NotImplemented(_) => "not_implemented",
            Error::Transient(_) => "transient",
            Error::Domain(_) => "domain",
            Error::Suspended { .. } => "suspended",
            Error::Cancelled => "cancelled",
            Error::Workflow(_) => "workflow",
            Error::Storage(_) => "storage",
            Error::Internal(_) => "internal",
            Error::Http(_) => "http",
            Error::Database(_) => "database",
            Error::Yaml(_) => "yaml",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }

    /// Whether the orchestrator may retry a node that failed with this error.
    ///
    /// Only failures expected to clear on their own qualify. Configuration,
    /// NotImplemented and Domain failures terminate the run immediately
    /// without consuming any retry budget.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408
                } else {
                    e.is_timeout() || e.is_connect()
                }
            }
            _ => false,
        }
    }

    /// Get a sanitized error message safe for external consumers.
    ///
    /// Hides internal details (paths, SQL) that could leak sensitive
    /// information.
    pub fn external_message(&self) -> String {
        match self {
            Error::Configuration(msg) => format!("Configuration error: {}", msg),
            Error::NotImplemented(msg) => format!("Not implemented: {}", msg),
            Error::Transient(msg) => format!("Transient error: {}", msg),
            Error::Domain(msg) => format!("Domain error: {}", msg),
            Error::Workflow(msg) => format!("Workflow error: {}", msg),
            Error::Suspended { resume_at } => format!("Run suspended until {}", resume_at),
            Error::Cancelled => "Run cancelled".to_string(),

            Error::Storage(_) => "A storage error occurred".to_string(),
            Error::Internal(_) => "An internal error occurred".to_string(),
            Error::Database(_) => "A database error occurred".to_string(),
            Error::Io(_) => "An I/O error occurred".to_string(),

            Error::Http(e) => {
                if let Some(status) = e.status() {
                    format!("HTTP request failed with status {}", status.as_u16())
                } else if e.is_timeout() {
                    "HTTP request timed out".to_string()
                } else if e.is_connect() {
                    "Failed to connect to remote server".to_string()
                } else {
                    "HTTP request failed".to_string()
                }
            }

            Error::Yaml(_) => "Invalid YAML format".to_string(),
            Error::Json(_) => "Invalid JSON format".to_string(),
        }
    }
}

/// Failure record attached to a FAILED run: the failing node, the error
/// kind from the taxonomy, and a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDetail {
    pub node_id: String,
    pub kind: String,
    pub message: String,
}

impl FailureDetail {
    pub fn new(node_id: &str, error: &Error) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: error.kind().to_string(),
            message: error.external_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_not_retriable() {
        let err = Error::Configuration("missing field 'contactId'".to_string());
        assert!(!err.is_retriable());
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_transient_retriable() {
        let err = Error::Transient("upstream timeout".to_string());
        assert!(err.is_retriable());
    }

    #[test]
    fn test_domain_not_retriable() {
        let err = Error::Domain("contact not found".to_string());
        assert!(!err.is_retriable());
        assert_eq!(err.kind(), "domain");
    }

    #[test]
    fn test_failure_detail_carries_node_id() {
        let err = Error::NotImplemented("generate_document".to_string());
        let detail = FailureDetail::new("node-7", &err);
        assert_eq!(detail.node_id, "node-7");
        assert_eq!(detail.kind, "not_implemented");
    }

    #[test]
    fn test_internal_message_sanitized() {
        let err = Error::Storage("/var/lib/opsflow/runs.db is locked".to_string());
        assert_eq!(err.external_message(), "A storage error occurred");
    }
}
