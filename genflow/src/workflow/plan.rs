//! Resolved workflow plans.

use crate::core::{ResourceId, StageKind};
use crate::generators::PlannedStage;
use serde::Serialize;

/// Every stage needed for a target, in execution order, with configs and
/// variants resolved.
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    /// The model-building config the plan was resolved from.
    pub model_config: ResourceId,
    /// The requested stage.
    pub target: String,
    /// Stages in execution order; the target is last.
    pub stages: Vec<PlannedStage>,
}

impl WorkflowPlan {
    /// Number of planned stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if nothing is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|p| p.stage.name.as_str()).collect()
    }
}

/// Dry-run view of one planned stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePreview {
    /// Stage name.
    pub stage: String,
    /// Stage kind.
    pub kind: StageKind,
    /// Resolved config id.
    pub config: ResourceId,
    /// Selected variant instances, empty for relays.
    pub selections: Vec<String>,
    /// Output that would be reused, if the stage is complete.
    pub reusable: Option<ResourceId>,
}

impl StagePreview {
    /// Returns true if the stage would execute.
    #[must_use]
    pub fn would_execute(&self) -> bool {
        self.reusable.is_none()
    }
}
