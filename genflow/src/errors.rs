//! Error types for the genflow engine.
//!
//! Configuration-time errors (unknown stage, cycle, missing config, invalid
//! variant) abort a workflow before anything is executed. Execution-time errors
//! are wrapped in [`GenflowError::StageFailed`] so the driver can report which
//! generator broke and why.

use crate::core::ResourceId;
use crate::executor::ExecutionError;
use crate::registry::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for genflow operations.
#[derive(Debug, Error)]
pub enum GenflowError {
    /// The requested stage is not part of the DAG.
    #[error("Unknown generator stage: '{name}'")]
    UnknownStage {
        /// The missing stage name.
        name: String,
    },

    /// A cycle was found while walking the DAG.
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// The DAG definition itself is malformed.
    #[error("{0}")]
    InvalidDag(#[from] PipelineValidationError),

    /// The model-building config has no entry for a stage on the path.
    #[error("Missing config '{config_key}' for stage '{stage}' in {model_config}")]
    MissingConfig {
        /// The stage that needed the config.
        stage: String,
        /// The key looked up in the model-building config.
        config_key: String,
        /// The model-building config id.
        model_config: ResourceId,
    },

    /// A config resource referenced by the model-building config does not exist.
    #[error("Config resource {id} was not found in the registry")]
    ConfigNotFound {
        /// The id that could not be resolved.
        id: ResourceId,
    },

    /// A stage config could not be interpreted.
    #[error("Invalid config {config} for stage '{stage}': {message}")]
    InvalidStageConfig {
        /// The stage name.
        stage: String,
        /// The config resource id.
        config: ResourceId,
        /// What was wrong with it.
        message: String,
    },

    /// A selected variant is not registered or its parameters do not fit.
    #[error("Invalid variant {variant} for stage '{stage}': {reason}")]
    InvalidVariant {
        /// The stage name.
        stage: String,
        /// The variant triplet, formatted as `generator/variant@version`.
        variant: String,
        /// Why the variant was rejected.
        reason: String,
    },

    /// A scattered sub-task failed after exhausting the executor's retries.
    #[error("Variant '{selection}' of stage '{stage}' failed: {source}")]
    SubTaskExecution {
        /// The stage name.
        stage: String,
        /// The selection (variant instance) name.
        selection: String,
        /// The executor failure.
        #[source]
        source: ExecutionError,
    },

    /// The registry could not be reached or refused the operation.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(#[source] RegistryError),

    /// A stage failed during execution.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// The failing stage.
        stage: String,
        /// The underlying cause.
        #[source]
        source: Box<GenflowError>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenflowError {
    /// Creates an unknown stage error.
    #[must_use]
    pub fn unknown_stage(name: impl Into<String>) -> Self {
        Self::UnknownStage { name: name.into() }
    }

    /// Creates an invalid variant error.
    #[must_use]
    pub fn invalid_variant(
        stage: impl Into<String>,
        variant: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidVariant {
            stage: stage.into(),
            variant: variant.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid stage config error.
    #[must_use]
    pub fn invalid_stage_config(
        stage: impl Into<String>,
        config: ResourceId,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidStageConfig {
            stage: stage.into(),
            config,
            message: message.into(),
        }
    }

    /// Wraps an error as the failure of `stage`.
    #[must_use]
    pub fn stage_failed(stage: impl Into<String>, source: Self) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for errors detected before any stage is executed.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::UnknownStage { .. }
            | Self::Cycle(_)
            | Self::InvalidDag(_)
            | Self::MissingConfig { .. }
            | Self::ConfigNotFound { .. }
            | Self::InvalidStageConfig { .. }
            | Self::InvalidVariant { .. } => true,
            Self::StageFailed { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }

    /// Returns true when re-running the same workflow may succeed unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RegistryUnavailable(err) => err.is_transient(),
            Self::StageFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns the name of the stage that failed, if any.
    #[must_use]
    pub fn failing_stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. }
            | Self::SubTaskExecution { stage, .. }
            | Self::InvalidVariant { stage, .. }
            | Self::InvalidStageConfig { stage, .. }
            | Self::MissingConfig { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Returns the contract error info for configuration errors.
    #[must_use]
    pub fn error_info(&self) -> Option<ContractErrorInfo> {
        match self {
            Self::UnknownStage { name } => Some(
                ContractErrorInfo::new(
                    "GENFLOW-001-UNKNOWN_STAGE",
                    format!("Stage '{name}' is not declared in the DAG"),
                )
                .with_fix_hint("Check the target name against the DAG definition."),
            ),
            Self::Cycle(err) => Some(err.error_info.clone()),
            Self::InvalidDag(err) => err.error_info.clone(),
            Self::MissingConfig { stage, config_key, .. } => Some(
                ContractErrorInfo::new(
                    "GENFLOW-003-MISSING_CONFIG",
                    format!("No '{config_key}' entry for stage '{stage}'"),
                )
                .with_fix_hint("Add the sub-config to the model-building config."),
            ),
            Self::InvalidVariant { stage, variant, .. } => Some(
                ContractErrorInfo::new(
                    "GENFLOW-004-INVALID_VARIANT",
                    format!("Variant {variant} cannot be used by stage '{stage}'"),
                )
                .with_context_entry("variant", variant.clone()),
            ),
            Self::StageFailed { source, .. } => source.error_info(),
            _ => None,
        }
    }
}

impl From<RegistryError> for GenflowError {
    fn from(err: RegistryError) -> Self {
        Self::RegistryUnavailable(err)
    }
}

impl From<serde_json::Error> for GenflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GENFLOW-002-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a DAG definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when a cycle is detected in the generator graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in generator DAG: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GENFLOW-002-CYCLE",
            format!("DAG contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the upstream edges in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}
