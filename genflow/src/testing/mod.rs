//! Testing utilities for genflow workflows.
//!
//! This module provides:
//! - A scripted executor standing in for real sub-task commands
//! - Registry fixtures seeding model and stage configs

pub mod fixtures;
mod mocks;

pub use mocks::ScriptedExecutor;
