//! The built-in circuit-building DAG.

use super::{DagBuilder, GeneratorDag, GeneratorStage};
use crate::errors::GenflowError;
use crate::generators::MergeSpec;

/// Default target of the circuit-building workflow.
pub const DEFAULT_TARGET: &str = "connectome_filtering";

/// Builds the circuit-building DAG:
///
/// ```text
/// cell_composition -> cell_position -> mmodel -> memodel -> macro
///                                                   |         |
///                                                   +--> connectome -> connectome_filtering
/// ```
///
/// # Errors
///
/// Never fails for the built-in stage list; the builder result is forwarded
/// so the definition stays validated.
pub fn circuit_building_dag() -> Result<GeneratorDag, GenflowError> {
    DagBuilder::new("circuit_building")
        .stage(GeneratorStage::multi_variant(
            "cell_composition",
            "cellCompositionConfig",
        ))?
        .stage(
            GeneratorStage::multi_variant("cell_position", "cellPositionConfig")
                .with_upstream_as("cell_composition", "cell_composition"),
        )?
        .stage(
            GeneratorStage::multi_variant("mmodel", "morphologyAssignmentConfig")
                .with_upstream("cell_position"),
        )?
        .stage(GeneratorStage::multi_variant("memodel", "meModelConfig").with_upstream("mmodel"))?
        .stage(GeneratorStage::relay("macro", "macroConnectomeConfig").with_upstream("memodel"))?
        .stage(
            GeneratorStage::multi_variant("connectome", "microConnectomeConfig")
                .with_upstream("memodel")
                .with_upstream_as("macro", "macro_connectome_config"),
        )?
        .stage(
            GeneratorStage::multi_variant("connectome_filtering", "synapseConfig")
                .with_upstream("connectome")
                .with_merge(MergeSpec::concatenate(["edge_populations"])),
        )?
        .build()
}

impl GeneratorDag {
    /// Returns the built-in circuit-building DAG.
    ///
    /// # Errors
    ///
    /// See [`circuit_building_dag`].
    pub fn circuit_building() -> Result<Self, GenflowError> {
        circuit_building_dag()
    }
}
