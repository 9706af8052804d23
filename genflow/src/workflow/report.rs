//! Run reports.

use crate::core::{ExecutionId, ResourceId, StageOutcome};
use serde::Serialize;

/// Result of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// Config id used as the completion key.
    pub config: ResourceId,
    /// Whether the stage was reused or executed.
    pub outcome: StageOutcome,
    /// The activity making the stage complete.
    pub activity: ResourceId,
    /// The stage output.
    pub generated: ResourceId,
    /// Wall time spent on the stage.
    pub duration_ms: u64,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    /// The workflow execution id.
    pub execution: ExecutionId,
    /// The requested stage.
    pub target: String,
    /// The model-building config.
    pub model_config: ResourceId,
    /// Per-stage results in execution order.
    pub stages: Vec<StageReport>,
}

impl WorkflowReport {
    /// The target's generated resource.
    #[must_use]
    pub fn output(&self) -> Option<&ResourceId> {
        self.stages.last().map(|s| &s.generated)
    }

    /// Report for one stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Names of stages that executed.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.with_outcome(StageOutcome::Executed)
    }

    /// Names of stages whose output was reused.
    #[must_use]
    pub fn reused(&self) -> Vec<&str> {
        self.with_outcome(StageOutcome::Reused)
    }

    fn with_outcome(&self, outcome: StageOutcome) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.outcome == outcome)
            .map(|s| s.stage.as_str())
            .collect()
    }
}
