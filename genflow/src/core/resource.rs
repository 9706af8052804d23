//! Registry resources.

use super::{ExecutionId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Queryable attributes attached to a resource.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Attribute recording which upstream outputs a generated resource was built from.
pub const DERIVED_FROM_ATTRIBUTE: &str = "derivedFrom";

/// Well-known resource kinds.
pub mod kinds {
    /// Top-level mapping from config keys to stage config ids.
    pub const MODEL_BUILDING_CONFIG: &str = "ModelBuildingConfig";
    /// A stage (generator) configuration.
    pub const GENERATOR_TASK_CONFIG: &str = "GeneratorTaskConfig";
    /// Content-addressed parameterization of one variant sub-task.
    pub const VARIANT_TASK_PARAMETERIZATION: &str = "VariantTaskParameterization";
    /// Accumulating circuit produced by multi-variant stages.
    pub const DETAILED_CIRCUIT: &str = "DetailedCircuit";
}

/// A versioned resource stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Registry identifier.
    pub id: ResourceId,
    /// Resource kind (see [`kinds`]).
    pub kind: String,
    /// Resource content.
    pub payload: serde_json::Value,
    /// Queryable attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Whether the resource was deprecated.
    #[serde(default)]
    pub deprecated: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Execution that generated the resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_generated_by: Option<ExecutionId>,
}

impl Resource {
    /// Materializes a new resource under `id`.
    #[must_use]
    pub fn from_new(id: ResourceId, new: NewResource) -> Self {
        Self {
            id,
            kind: new.kind,
            payload: new.payload,
            attributes: new.attributes,
            deprecated: false,
            created_at: Utc::now(),
            was_generated_by: new.was_generated_by,
        }
    }

    /// Returns true if every given attribute is present with an equal value.
    #[must_use]
    pub fn matches(&self, kind: &str, attributes: &Attributes) -> bool {
        self.kind == kind
            && attributes
                .iter()
                .all(|(key, value)| self.attributes.get(key) == Some(value))
    }

    /// Returns the upstream resource ids this resource was derived from.
    #[must_use]
    pub fn derived_from(&self) -> BTreeMap<String, ResourceId> {
        self.attributes
            .get(DERIVED_FROM_ATTRIBUTE)
            .and_then(serde_json::Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(input, id)| {
                        id.as_str().map(|id| (input.clone(), ResourceId::new(id)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A resource about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    /// Resource kind.
    pub kind: String,
    /// Resource content.
    pub payload: serde_json::Value,
    /// Queryable attributes.
    pub attributes: Attributes,
    /// Execution that generated the resource.
    pub was_generated_by: Option<ExecutionId>,
}

impl NewResource {
    /// Creates a new resource description.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            attributes: Attributes::new(),
            was_generated_by: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Records the upstream outputs this resource derives from.
    #[must_use]
    pub fn derived_from(self, upstream: &BTreeMap<String, ResourceId>) -> Self {
        let map: serde_json::Map<String, serde_json::Value> = upstream
            .iter()
            .map(|(input, id)| (input.clone(), serde_json::Value::String(id.to_string())))
            .collect();
        self.with_attribute(DERIVED_FROM_ATTRIBUTE, serde_json::Value::Object(map))
    }

    /// Sets the generating execution.
    #[must_use]
    pub fn generated_by(mut self, execution: ExecutionId) -> Self {
        self.was_generated_by = Some(execution);
        self
    }
}
