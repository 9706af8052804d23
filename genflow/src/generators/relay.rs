//! Relay stages.

use crate::config::relay_content;
use crate::core::{ExecutionId, NewResource, Resource, ResourceId};
use crate::errors::GenflowError;
use crate::pipeline::GeneratorStage;
use crate::registry::ResourceRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Attribute naming the config a relay clone was made from.
pub const CLONED_FROM_ATTRIBUTE: &str = "clonedFrom";

/// Re-registers a stage config under a new identity without computation.
#[derive(Clone)]
pub struct RelayGenerator {
    registry: Arc<dyn ResourceRegistry>,
    execution: ExecutionId,
}

impl std::fmt::Debug for RelayGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayGenerator")
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

impl RelayGenerator {
    /// Creates a relay generator.
    #[must_use]
    pub fn new(registry: Arc<dyn ResourceRegistry>, execution: ExecutionId) -> Self {
        Self {
            registry,
            execution,
        }
    }

    /// Clones `config` into a new resource attached to the upstream output.
    ///
    /// The clone keeps the original payload. When the config carries
    /// `initial`/`overrides`, their deep merge is added under `resolved`.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::RegistryUnavailable`] if the clone cannot be
    /// created.
    pub async fn execute(
        &self,
        stage: &GeneratorStage,
        config: &Resource,
        upstream: &BTreeMap<String, ResourceId>,
    ) -> Result<ResourceId, GenflowError> {
        let mut payload = config.payload.clone();
        if let Value::Object(map) = &mut payload {
            if map.contains_key("initial") || map.contains_key("overrides") {
                map.insert("resolved".to_string(), relay_content(&config.payload));
            }
        }

        let clone = NewResource::new(config.kind.clone(), payload)
            .with_attribute(CLONED_FROM_ATTRIBUTE, Value::String(config.id.to_string()))
            .derived_from(upstream)
            .generated_by(self.execution);
        let id = self.registry.create_resource(clone).await?;

        info!(stage = %stage.name, config = %config.id, clone = %id, "Relayed config");
        Ok(id)
    }
}
