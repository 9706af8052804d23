use crate::config::{StageConfig, VariantSelection};
use crate::errors::GenflowError;
use crate::executor::ResourceRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Declared type of a variant parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// A JSON string.
    String,
    /// A whole number.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// Anything.
    #[default]
    Any,
}

impl ParameterType {
    /// Returns true if `value` is of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Schema entry of one variant parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared type.
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    /// Physical unit, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Default value; parameters without one must be supplied by the config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// How to invoke a variant's executable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Executable and fixed leading arguments.
    pub base_command: Vec<String>,
    /// Flag to input name, e.g. `"--output-dir" -> "output_dir"`.
    #[serde(default)]
    pub named_arguments: BTreeMap<String, String>,
    /// `(position, input name)` pairs, rendered sorted by position.
    #[serde(default)]
    pub positional_arguments: Vec<(usize, String)>,
}

/// Identity triplet of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    /// Generator (stage) name.
    pub generator: String,
    /// Variant (algorithm) name.
    pub variant: String,
    /// Version.
    pub version: String,
}

impl VariantKey {
    /// Creates a key.
    #[must_use]
    pub fn new(
        generator: impl Into<String>,
        variant: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            generator: generator.into(),
            variant: variant.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.generator, self.variant, self.version)
    }
}

/// A registered variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Generator (stage) name.
    pub generator_name: String,
    /// Variant name.
    pub variant_name: String,
    /// Version.
    pub version: String,
    /// Parameter schema.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    /// Command template.
    pub command: CommandTemplate,
    /// Default resource request.
    #[serde(default)]
    pub resources: ResourceRequest,
}

impl Variant {
    /// Returns the identity triplet.
    #[must_use]
    pub fn key(&self) -> VariantKey {
        VariantKey::new(&self.generator_name, &self.variant_name, &self.version)
    }

    /// Resolves parameter values: declared default, then the stage
    /// `configuration` block, then the selection overrides.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::InvalidVariant`] for an override naming an
    /// undeclared parameter, a value of the wrong type, or a parameter left
    /// without a value.
    pub fn resolve_parameters(
        &self,
        configuration: &Map<String, Value>,
        selection: &VariantSelection,
    ) -> Result<BTreeMap<String, Value>, GenflowError> {
        let reject = |reason: String| {
            GenflowError::invalid_variant(&self.generator_name, self.key().to_string(), reason)
        };

        if let Some(unknown) = selection
            .overrides
            .keys()
            .find(|key| !self.parameters.contains_key(*key))
        {
            return Err(reject(format!(
                "selection '{}' overrides undeclared parameter '{unknown}'",
                selection.name
            )));
        }

        let mut resolved = BTreeMap::new();
        for (name, spec) in &self.parameters {
            let value = selection
                .overrides
                .get(name)
                .or_else(|| configuration.get(name))
                .or(spec.default.as_ref())
                .ok_or_else(|| reject(format!("parameter '{name}' has no value")))?;

            if !spec.kind.accepts(value) {
                return Err(reject(format!(
                    "parameter '{name}' expects {:?}, got {value}",
                    spec.kind
                )));
            }
            resolved.insert(name.clone(), value.clone());
        }
        Ok(resolved)
    }
}

/// A selection bound to its registered variant and resolved parameters.
#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    /// The selection from the stage config.
    pub selection: VariantSelection,
    /// The registered variant.
    pub variant: Arc<Variant>,
    /// Resolved parameter values.
    pub parameters: BTreeMap<String, Value>,
}

/// Registry of available variants.
#[derive(Debug, Clone, Default)]
pub struct VariantCatalog {
    variants: HashMap<VariantKey, Arc<Variant>>,
}

impl VariantCatalog {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variant, replacing any previous one with the same key.
    pub fn register(&mut self, variant: Variant) {
        self.variants.insert(variant.key(), Arc::new(variant));
    }

    /// Registers a variant, builder style.
    #[must_use]
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.register(variant);
        self
    }

    /// Loads a catalogue from a JSON list of variant definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenflowError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let variants: Vec<Variant> = serde_json::from_str(&content)?;
        debug!(path = %path.as_ref().display(), count = variants.len(), "Loaded variant catalog");
        Ok(variants.into_iter().fold(Self::new(), Self::with_variant))
    }

    /// Looks up a variant.
    #[must_use]
    pub fn lookup(&self, key: &VariantKey) -> Option<Arc<Variant>> {
        self.variants.get(key).cloned()
    }

    /// Returns the number of registered variants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Resolves every selection of a stage config, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::InvalidVariant`] if a selected variant is not
    /// registered or its parameters do not fit.
    pub fn resolve(&self, stage: &str, config: &StageConfig) -> Result<Vec<ResolvedVariant>, GenflowError> {
        config
            .selections
            .iter()
            .map(|selection| {
                let key = VariantKey::new(stage, &selection.algorithm, &selection.version);
                let variant = self.lookup(&key).ok_or_else(|| {
                    GenflowError::invalid_variant(stage, key.to_string(), "variant is not registered")
                })?;
                let parameters = variant.resolve_parameters(&config.configuration, selection)?;
                Ok(ResolvedVariant {
                    selection: selection.clone(),
                    variant,
                    parameters,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant() -> Variant {
        serde_json::from_value(json!({
            "generator_name": "connectome",
            "variant_name": "placeholder",
            "version": "v2",
            "parameters": {
                "seed": {"type": "integer", "default": 0},
                "density": {"type": "number", "unit": "um^-3"},
                "mode": {"type": "string", "default": "fast"}
            },
            "command": {"base_command": ["connectome-placeholder"]},
            "resources": {"partition": "prod", "nodes": 1}
        }))
        .unwrap()
    }

    fn stage_config(selection: VariantSelection, configuration: Value) -> StageConfig {
        StageConfig {
            selections: vec![selection],
            configuration: configuration.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(variant().key().to_string(), "connectome/placeholder@v2");
    }

    #[test]
    fn test_parameter_precedence() {
        let catalog = VariantCatalog::new().with_variant(variant());
        let config = stage_config(
            VariantSelection::new("p", "placeholder", "v2").with_override("seed", json!(42)),
            json!({"density": 0.5, "seed": 1, "unrelated": true}),
        );

        let resolved = catalog.resolve("connectome", &config).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].parameters,
            BTreeMap::from([
                ("density".to_string(), json!(0.5)),
                ("mode".to_string(), json!("fast")),
                ("seed".to_string(), json!(42)),
            ])
        );
    }

    #[test]
    fn test_unregistered_variant_rejected() {
        let catalog = VariantCatalog::new().with_variant(variant());
        let config = stage_config(VariantSelection::new("p", "placeholder", "v9"), json!({}));

        let err = catalog.resolve("connectome", &config).unwrap_err();
        assert!(matches!(err, GenflowError::InvalidVariant { ref variant, .. } if variant == "connectome/placeholder@v9"));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let catalog = VariantCatalog::new().with_variant(variant());
        let config = stage_config(
            VariantSelection::new("p", "placeholder", "v2").with_override("bogus", json!(1)),
            json!({"density": 0.5}),
        );
        assert!(catalog.resolve("connectome", &config).is_err());
    }

    #[test]
    fn test_type_mismatch_and_missing_value_rejected() {
        let catalog = VariantCatalog::new().with_variant(variant());

        let wrong_type = stage_config(VariantSelection::new("p", "placeholder", "v2"), json!({"density": "dense"}));
        assert!(catalog.resolve("connectome", &wrong_type).is_err());

        let missing = stage_config(VariantSelection::new("p", "placeholder", "v2"), json!({}));
        assert!(catalog.resolve("connectome", &missing).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.json");
        std::fs::write(&path, serde_json::to_string(&vec![variant()]).unwrap()).unwrap();

        let catalog = VariantCatalog::from_file(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.lookup(&VariantKey::new("connectome", "placeholder", "v2")).is_some());
    }
}
