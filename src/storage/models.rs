//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureDetail;

/// Stored workflow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub id: String,
    pub name: String,
    /// Owning tenant user
    pub user_id: String,
    pub definition: String, // YAML
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Durably suspended at a timed wait; resumed at `resume_at`.
    Waiting,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting" => Ok(Self::Waiting),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// One execution of a workflow for one triggering event.
///
/// The run record is the durable authority on run state: the orchestrator
/// persists the cursor and context after every node, so a restart resumes
/// from the last completed node rather than the beginning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub user_id: String,
    pub status: RunStatus,
    /// What started this run (webhook, schedule, manual, subflow, bundle)
    pub trigger_kind: String,
    /// Snapshot of the execution context as of the last persisted node
    pub context: serde_json::Value,
    /// Node the run will execute next; `None` once terminal
    pub cursor: Option<String>,
    /// Wake time while WAITING
    pub resume_at: Option<DateTime<Utc>>,
    /// Parent run for nested (subflow/bundle) runs
    pub parent_run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<FailureDetail>,
}
