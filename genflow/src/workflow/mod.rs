//! The generation workflow driver.
//!
//! A run has two phases. Planning resolves the target's stages, their
//! configs and variants, so configuration errors surface before anything
//! executes. Execution then walks the plan in dependency order, reusing
//! complete stages and running the rest, threading each stage's generated
//! resource into its dependents.

mod plan;
mod report;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use plan::{StagePreview, WorkflowPlan};
pub use report::{StageReport, WorkflowReport};
pub use runner::GenerationWorkflow;
