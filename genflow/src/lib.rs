//! # Genflow
//!
//! A generator dependency and completion engine for provenance-tracked
//! circuit building.
//!
//! A workflow is a DAG of generator stages. Each stage consumes a config
//! resource named by a model-building config and produces a registry
//! resource. Genflow provides:
//!
//! - **Dependency resolution**: explicit DAG data with a deterministic
//!   topological resolve
//! - **Completion checking**: a stage whose provenance activity matches its
//!   config and upstream outputs is skipped
//! - **Variant scatter/merge**: multi-variant stages fan out one sub-task per
//!   selected variant and merge the partial outputs
//! - **Activity recording**: exactly one live activity per
//!   `(generator, config)` pair
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//!
//! let registry = Arc::new(FileRegistry::open("registry.json").await?);
//! let workflow = GenerationWorkflow::new(
//!     GeneratorDag::circuit_building()?,
//!     registry,
//!     VariantCatalog::from_file("variants.json")?,
//!     settings.build_executor(),
//! )
//! .with_settings(settings);
//!
//! let report = workflow.run(&model_config_id, DEFAULT_TARGET).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod generators;
pub mod pipeline;
pub mod provenance;
pub mod registry;
pub mod settings;
pub mod telemetry;
pub mod testing;
pub mod variants;
pub mod workflow;

pub use telemetry::init_tracing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ModelBuildingConfig, StageConfig, VariantSelection};
    pub use crate::core::{
        ExecutionId, GeneratorTaskActivity, NewResource, Resource, ResourceId, StageKind,
        StageOutcome,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, GenflowError, PipelineValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{Executor, LocalExecutor, SlurmExecutor, SubTask, SubTaskOutput};
    pub use crate::generators::{MergeRegistry, MergeSpec, MergeStrategy};
    pub use crate::pipeline::{
        DagBuilder, DagDefinition, GeneratorDag, GeneratorStage, RetryConfig, DEFAULT_TARGET,
    };
    pub use crate::provenance::{ActivityRecorder, CompletionChecker};
    pub use crate::registry::{FileRegistry, InMemoryRegistry, ResourceRegistry};
    pub use crate::settings::EngineSettings;
    pub use crate::variants::{Variant, VariantCatalog};
    pub use crate::workflow::{GenerationWorkflow, WorkflowReport};
}
