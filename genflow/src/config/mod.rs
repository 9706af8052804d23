//! Config resolution.
//!
//! A [`ModelBuildingConfig`] maps config keys to stage config resources. Each
//! stage config is then interpreted according to the stage kind: multi-variant
//! stages yield an ordered list of [`VariantSelection`]s, relay stages yield
//! the document they forward.

mod model;
mod stage_config;

pub use model::ModelBuildingConfig;
pub use stage_config::{deep_merge, relay_content, StageConfig, VariantSelection};
