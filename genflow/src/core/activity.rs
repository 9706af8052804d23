//! Provenance activities.

use super::{ExecutionId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a recorded activity. Only successful runs are ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivityStatus {
    /// The generator finished and its output was registered.
    #[default]
    Done,
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Immutable provenance record linking a generated resource to the config
/// that produced it and to the generator that ran.
///
/// `(generator_id, used_config)` is the completion key: at most one
/// non-deprecated activity exists per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorTaskActivity {
    /// Activity id.
    pub id: ResourceId,
    /// Name of the generator stage that ran.
    pub generator_id: String,
    /// Config resource consumed.
    pub used_config: ResourceId,
    /// Output resource produced.
    pub generated: ResourceId,
    /// Workflow execution that recorded the activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_influenced_by: Option<ExecutionId>,
    /// Activity status.
    #[serde(default)]
    pub status: ActivityStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether the activity was superseded.
    #[serde(default)]
    pub deprecated: bool,
}

impl GeneratorTaskActivity {
    /// Materializes a new activity under `id`.
    #[must_use]
    pub fn from_new(id: ResourceId, new: NewActivity) -> Self {
        Self {
            id,
            generator_id: new.generator_id,
            used_config: new.used_config,
            generated: new.generated,
            was_influenced_by: new.was_influenced_by,
            status: ActivityStatus::Done,
            created_at: Utc::now(),
            deprecated: false,
        }
    }

    /// Returns true if the activity is keyed by `(generator_id, used_config)`.
    #[must_use]
    pub fn is_for(&self, generator_id: &str, used_config: &ResourceId) -> bool {
        self.generator_id == generator_id && &self.used_config == used_config
    }
}

/// An activity about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    /// Name of the generator stage.
    pub generator_id: String,
    /// Config resource consumed.
    pub used_config: ResourceId,
    /// Output resource produced.
    pub generated: ResourceId,
    /// Workflow execution recording the activity.
    pub was_influenced_by: Option<ExecutionId>,
}
