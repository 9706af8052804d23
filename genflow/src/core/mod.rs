//! Core domain model types for genflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Resource and execution identifiers
//! - Registry resources and provenance activities
//! - Stage kinds and outcomes

mod activity;
mod ids;
mod resource;
mod status;

pub use activity::{ActivityStatus, GeneratorTaskActivity, NewActivity};
pub use ids::{ExecutionId, ResourceId};
pub use resource::{kinds, Attributes, NewResource, Resource, DERIVED_FROM_ATTRIBUTE};
pub use status::{StageKind, StageOutcome};
