//! The model-building config.

use crate::core::{kinds, Resource, ResourceId};
use crate::errors::GenflowError;
use crate::pipeline::GeneratorStage;
use crate::registry::ResourceRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Mapping from config keys to stage config resource ids.
///
/// Created externally and read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBuildingConfig {
    /// Id of the model-building config resource.
    pub id: ResourceId,
    /// Config key to config resource id.
    pub configs: BTreeMap<String, ResourceId>,
}

impl ModelBuildingConfig {
    /// Interprets a registry resource as a model-building config.
    ///
    /// Entries live under `configs` (or at the top level) and are either a
    /// plain id string or an object carrying `id` / `@id`. Null entries count
    /// as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object.
    pub fn from_resource(resource: &Resource) -> Result<Self, GenflowError> {
        if resource.kind != kinds::MODEL_BUILDING_CONFIG {
            debug!(id = %resource.id, kind = %resource.kind, "Reading model config from unexpected kind");
        }

        let entries = resource
            .payload
            .get("configs")
            .unwrap_or(&resource.payload)
            .as_object()
            .ok_or_else(|| {
                GenflowError::invalid_stage_config(
                    "model",
                    resource.id.clone(),
                    "model-building config must be a JSON object",
                )
            })?;

        let configs = entries
            .iter()
            .filter_map(|(key, value)| entry_id(value).map(|id| (key.clone(), id)))
            .collect();

        Ok(Self {
            id: resource.id.clone(),
            configs,
        })
    }

    /// Loads and interprets the model-building config `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::ConfigNotFound`] if the resource does not exist.
    pub async fn load(registry: &dyn ResourceRegistry, id: &ResourceId) -> Result<Self, GenflowError> {
        let resource = registry
            .get_resource(id)
            .await?
            .ok_or_else(|| GenflowError::ConfigNotFound { id: id.clone() })?;
        Self::from_resource(&resource)
    }

    /// Returns the config id for `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::MissingConfig`] if the entry is absent.
    pub fn resolve_config(&self, stage: &GeneratorStage) -> Result<ResourceId, GenflowError> {
        self.configs
            .get(&stage.config_key)
            .cloned()
            .ok_or_else(|| GenflowError::MissingConfig {
                stage: stage.name.clone(),
                config_key: stage.config_key.clone(),
                model_config: self.id.clone(),
            })
    }
}

fn entry_id(value: &Value) -> Option<ResourceId> {
    match value {
        Value::String(id) if !id.is_empty() => Some(ResourceId::new(id.as_str())),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("@id"))
            .and_then(Value::as_str)
            .map(ResourceId::from),
        _ => None,
    }
}
