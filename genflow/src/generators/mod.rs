//! Stage execution.
//!
//! A stage is either a relay (re-register the config under a new identity)
//! or a multi-variant scatter/merge. [`StageRunner`] dispatches on the closed
//! [`StageWork`] set; recording the activity is left to the caller.

mod dispatcher;
mod merge;
mod relay;

pub use dispatcher::VariantDispatcher;
pub use merge::{
    Concatenate, LastWriterWins, MergeConflict, MergeOutcome, MergeRegistry, MergeSpec,
    MergeStrategy, OutputFields,
};
pub use relay::RelayGenerator;

use crate::core::{Resource, ResourceId};
use crate::errors::GenflowError;
use crate::pipeline::GeneratorStage;
use crate::variants::ResolvedVariant;
use std::collections::BTreeMap;

/// What executing a planned stage involves.
#[derive(Debug, Clone)]
pub enum StageWork {
    /// Clone the config resource.
    Relay,
    /// Scatter one sub-task per resolved variant, then merge.
    Scatter(Vec<ResolvedVariant>),
}

/// A stage with its config resolved and interpreted.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    /// The stage.
    pub stage: GeneratorStage,
    /// The config id, the completion key.
    pub config_id: ResourceId,
    /// The loaded config resource.
    pub config: Resource,
    /// The work to do if the stage is not complete.
    pub work: StageWork,
}

impl PlannedStage {
    /// Returns the selection names, empty for relay stages.
    #[must_use]
    pub fn selections(&self) -> Vec<&str> {
        match &self.work {
            StageWork::Relay => Vec::new(),
            StageWork::Scatter(variants) => variants
                .iter()
                .map(|v| v.selection.name.as_str())
                .collect(),
        }
    }
}

/// Executes planned stages.
#[derive(Debug, Clone)]
pub struct StageRunner {
    relay: RelayGenerator,
    dispatcher: VariantDispatcher,
}

impl StageRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(relay: RelayGenerator, dispatcher: VariantDispatcher) -> Self {
        Self { relay, dispatcher }
    }

    /// Executes `planned` against the given upstream outputs and returns the
    /// id of the generated resource.
    ///
    /// # Errors
    ///
    /// Returns the relay or dispatcher failure.
    pub async fn execute(
        &self,
        planned: &PlannedStage,
        upstream: &BTreeMap<String, ResourceId>,
    ) -> Result<ResourceId, GenflowError> {
        match &planned.work {
            StageWork::Relay => {
                self.relay
                    .execute(&planned.stage, &planned.config, upstream)
                    .await
            }
            StageWork::Scatter(variants) => {
                self.dispatcher
                    .execute(&planned.stage, &planned.config_id, variants, upstream)
                    .await
            }
        }
    }
}
