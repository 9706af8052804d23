//! Generator stage specifications.

use crate::core::StageKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::generators::MergeSpec;
use serde::{Deserialize, Serialize};

/// Input name used when an upstream edge does not name one.
pub const DEFAULT_INPUT: &str = "circuit";

fn default_input() -> String {
    DEFAULT_INPUT.to_string()
}

/// A non-owning edge to an upstream stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    /// Name of the upstream stage.
    pub stage: String,
    /// Input name under which the upstream output is handed to this stage.
    #[serde(default = "default_input")]
    pub input: String,
}

impl Upstream {
    /// Creates an edge using the default input name.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            input: default_input(),
        }
    }

    /// Creates an edge bound to a named input.
    #[must_use]
    pub fn as_input(stage: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            input: input.into(),
        }
    }
}

/// Specification for a single generator stage in the DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorStage {
    /// Unique name of the stage; also the activity `generator_id`.
    pub name: String,
    /// Key of the model-building config entry this stage consumes.
    pub config_key: String,
    /// Upstream edges, in declaration order.
    #[serde(default)]
    pub upstream: Vec<Upstream>,
    /// The kind of stage.
    pub kind: StageKind,
    /// Merge step override; the default is last-writer-wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeSpec>,
}

impl GeneratorStage {
    /// Creates a relay stage.
    #[must_use]
    pub fn relay(name: impl Into<String>, config_key: impl Into<String>) -> Self {
        Self::new(name, config_key, StageKind::Relay)
    }

    /// Creates a multi-variant stage.
    #[must_use]
    pub fn multi_variant(name: impl Into<String>, config_key: impl Into<String>) -> Self {
        Self::new(name, config_key, StageKind::MultiVariant)
    }

    fn new(name: impl Into<String>, config_key: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            config_key: config_key.into(),
            upstream: Vec::new(),
            kind,
            merge: None,
        }
    }

    /// Adds an upstream edge using the default input name.
    #[must_use]
    pub fn with_upstream(mut self, stage: impl Into<String>) -> Self {
        self.upstream.push(Upstream::new(stage));
        self
    }

    /// Adds an upstream edge bound to a named input.
    #[must_use]
    pub fn with_upstream_as(mut self, stage: impl Into<String>, input: impl Into<String>) -> Self {
        self.upstream.push(Upstream::as_input(stage, input));
        self
    }

    /// Sets the merge step.
    #[must_use]
    pub fn with_merge(mut self, merge: MergeSpec) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Returns the upstream stage names in declaration order.
    pub fn upstream_names(&self) -> impl Iterator<Item = &str> {
        self.upstream.iter().map(|u| u.stage.as_str())
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage has no name or config key, depends on
    /// itself, binds two edges to the same input, or is a relay without
    /// exactly one upstream.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let invalid = |message: String| {
            PipelineValidationError::new(message.clone())
                .with_stages(vec![self.name.clone()])
                .with_error_info(ContractErrorInfo::new("GENFLOW-005-INVALID_DAG", message))
        };

        if self.name.trim().is_empty() {
            return Err(invalid("Stage name cannot be empty".to_string()));
        }
        if self.config_key.trim().is_empty() {
            return Err(invalid(format!("Stage '{}' has no config key", self.name)));
        }
        if self.upstream_names().any(|u| u == self.name) {
            return Err(invalid(format!("Stage '{}' cannot depend on itself", self.name)));
        }

        let mut inputs: Vec<&str> = self.upstream.iter().map(|u| u.input.as_str()).collect();
        inputs.sort_unstable();
        if inputs.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid(format!(
                "Stage '{}' binds two upstream edges to the same input",
                self.name
            )));
        }

        if self.kind == StageKind::Relay && self.upstream.len() != 1 {
            return Err(invalid(format!(
                "Relay stage '{}' must have exactly one upstream, found {}",
                self.name,
                self.upstream.len()
            )));
        }
        Ok(())
    }
}
