//! Stage config interpretation.

use crate::core::ResourceId;
use crate::errors::GenflowError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// One variant instance selected by a multi-variant stage config.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSelection {
    /// Instance label, unique within the stage.
    pub name: String,
    /// Variant (algorithm) name.
    pub algorithm: String,
    /// Variant version.
    pub version: String,
    /// Parameter overrides.
    pub overrides: BTreeMap<String, Value>,
    /// Additional inputs handed to the sub-task (e.g. `region_id`).
    pub extra_inputs: BTreeMap<String, Value>,
}

impl VariantSelection {
    /// Creates a selection without overrides.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        algorithm: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            algorithm: algorithm.into(),
            version: version.into(),
            overrides: BTreeMap::new(),
            extra_inputs: BTreeMap::new(),
        }
    }

    /// Adds a parameter override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}

/// A parsed multi-variant stage config.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    /// Selections in declaration order.
    pub selections: Vec<VariantSelection>,
    /// Stage-level parameterization (`configuration` block).
    pub configuration: Map<String, Value>,
}

impl StageConfig {
    /// Parses a multi-variant stage config.
    ///
    /// Recognized forms, first match wins: a `variants` list or object, a
    /// single `variantDefinition`, or an object whose entries each carry a
    /// `variantDefinition` (one selection per entry, keyed as `region_id`).
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::InvalidStageConfig`] if no form matches, a
    /// selection lacks an algorithm or version, or a selection name is not a
    /// single path component.
    pub fn parse_multi_variant(
        stage: &str,
        config: &ResourceId,
        payload: &Value,
    ) -> Result<Self, GenflowError> {
        let invalid = |message: String| GenflowError::invalid_stage_config(stage, config.clone(), message);

        let root = payload
            .as_object()
            .ok_or_else(|| invalid("stage config must be a JSON object".to_string()))?;
        let configuration = root
            .get("configuration")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let selections = if let Some(variants) = root.get("variants") {
            parse_variants(variants).map_err(invalid)?
        } else if let Some(definition) = root.get("variantDefinition") {
            let (algorithm, version) = definition_pair(definition).map_err(invalid)?;
            vec![VariantSelection::new(algorithm.clone(), algorithm, version)]
        } else if let Some(regions) = find_distribution(root) {
            parse_distribution(regions).map_err(invalid)?
        } else {
            return Err(invalid("no variant selection found".to_string()));
        };

        if selections.is_empty() {
            return Err(invalid("stage config selects no variants".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = selections.iter().find(|s| !seen.insert(s.name.as_str())) {
            return Err(invalid(format!("selection '{}' is declared twice", dup.name)));
        }
        if let Some(bad) = selections.iter().find(|s| !is_plain_component(&s.name)) {
            return Err(invalid(format!(
                "selection name '{}' must be a single path component",
                bad.name
            )));
        }

        Ok(Self {
            selections,
            configuration,
        })
    }
}

/// Selection names become working directory names.
fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn definition_pair(definition: &Value) -> Result<(String, String), String> {
    let algorithm = definition
        .get("algorithm")
        .and_then(Value::as_str)
        .ok_or_else(|| "variant definition has no 'algorithm'".to_string())?;
    let version = match definition.get("version") {
        Some(Value::String(v)) => v.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(format!("variant '{algorithm}' has no 'version'")),
    };
    Ok((algorithm.to_string(), version))
}

fn object_entries(value: Option<&Value>) -> BTreeMap<String, Value> {
    value
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn parse_variants(variants: &Value) -> Result<Vec<VariantSelection>, String> {
    match variants {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let (algorithm, version) = definition_pair(item)?;
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or_else(|| algorithm.clone(), str::to_string);
                let mut selection = VariantSelection::new(name, algorithm, version);
                selection.overrides = object_entries(item.get("overrides"));
                Ok(selection)
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, item)| {
                let (algorithm, version) = definition_pair(item)?;
                let mut selection = VariantSelection::new(name.clone(), algorithm, version);
                selection.overrides = object_entries(item.get("params").or_else(|| item.get("overrides")));
                Ok(selection)
            })
            .collect(),
        _ => Err("'variants' must be a list or an object".to_string()),
    }
}

fn find_distribution(root: &Map<String, Value>) -> Option<&Map<String, Value>> {
    root.values().filter_map(Value::as_object).find(|candidate| {
        !candidate.is_empty()
            && candidate
                .values()
                .all(|entry| entry.get("variantDefinition").is_some())
    })
}

fn parse_distribution(regions: &Map<String, Value>) -> Result<Vec<VariantSelection>, String> {
    regions
        .iter()
        .map(|(region, entry)| {
            let definition = entry
                .get("variantDefinition")
                .ok_or_else(|| format!("region '{region}' has no variantDefinition"))?;
            let (algorithm, version) = definition_pair(definition)?;
            let mut selection = VariantSelection::new(region.clone(), algorithm, version);
            selection.overrides = object_entries(entry.get("overrides").or_else(|| entry.get("params")));
            selection
                .extra_inputs
                .insert("region_id".to_string(), Value::String(region.clone()));
            Ok(selection)
        })
        .collect()
}

/// Recursively merges `overrides` onto `base`; objects merge key by key and
/// any other override value replaces the base value.
#[must_use]
pub fn deep_merge(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                let next = merged
                    .get(key)
                    .map_or_else(|| value.clone(), |existing| deep_merge(existing, value));
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, overrides) => overrides.clone(),
    }
}

/// Returns the document a relay stage forwards: `initial` deep-merged with
/// `overrides` when either is present, otherwise the payload itself.
#[must_use]
pub fn relay_content(payload: &Value) -> Value {
    let initial = payload.get("initial");
    let overrides = payload.get("overrides");
    if initial.is_none() && overrides.is_none() {
        return payload.clone();
    }
    let empty = Value::Object(Map::new());
    deep_merge(initial.unwrap_or(&empty), overrides.unwrap_or(&empty))
}
