//! Generator DAG definition and dependency resolution.
//!
//! This module provides:
//! - [`GeneratorStage`]: a node of the build DAG keyed by a config entry
//! - [`GeneratorDag`]: the stage set with topological `resolve`
//! - [`DagBuilder`] / [`DagDefinition`]: validated construction from code or data
//! - Retry utilities shared by the registry and executor layers

mod builder;
mod circuit;
mod dag;
pub mod retry;
mod spec;

pub use builder::{DagBuilder, DagDefinition};
pub use circuit::{circuit_building_dag, DEFAULT_TARGET};
pub use dag::GeneratorDag;
pub use retry::{with_retry, with_retry_when, BackoffStrategy, JitterStrategy, RetryConfig};
pub use spec::{GeneratorStage, Upstream, DEFAULT_INPUT};
