//! Stop node - end the run without visiting remaining nodes.

use async_trait::async_trait;

use super::types::{ExecEnv, NodeExecutor, NodeOutcome};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::workflow::NodeDef;

/// Control node that transitions the run to SUCCEEDED immediately.
pub struct StopExecutor;

impl StopExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StopExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for StopExecutor {
    fn kind(&self) -> &str {
        "stop"
    }

    fn description(&self) -> &str {
        "Stop the workflow run successfully"
    }

    async fn execute(
        &self,
        _node: &NodeDef,
        ctx: ExecutionContext,
        _env: &ExecEnv<'_>,
    ) -> Result<NodeOutcome> {
        Ok(NodeOutcome::halt(ctx))
    }
}
