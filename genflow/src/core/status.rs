//! Stage kind and outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a generator stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Re-registers its config under a new identity, no computation.
    Relay,
    /// Scatters one sub-task per selected variant and merges their outputs.
    MultiVariant,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay => write!(f, "relay"),
            Self::MultiVariant => write!(f, "multi_variant"),
        }
    }
}

/// What happened to a stage during a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// A valid activity already existed; its output was reused.
    Reused,
    /// The stage ran and a new activity was recorded.
    Executed,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => write!(f, "reused"),
            Self::Executed => write!(f, "executed"),
        }
    }
}
