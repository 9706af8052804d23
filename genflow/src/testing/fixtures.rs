//! Registry fixtures for workflow tests.

use serde_json::{json, Value};

use crate::core::{kinds, NewResource, ResourceId, StageKind};
use crate::pipeline::GeneratorDag;
use crate::registry::InMemoryRegistry;
use crate::variants::{CommandTemplate, ParameterSpec, ParameterType, Variant, VariantCatalog};

/// Version used by every fixture variant.
pub const FIXTURE_VERSION: &str = "v1";

/// A variant with one integer `seed` parameter (default 42) and a command
/// writing to the declared output file.
#[must_use]
pub fn variant(generator: &str, name: &str) -> Variant {
    Variant {
        generator_name: generator.to_string(),
        variant_name: name.to_string(),
        version: FIXTURE_VERSION.to_string(),
        parameters: [(
            "seed".to_string(),
            ParameterSpec {
                kind: ParameterType::Integer,
                unit: None,
                default: Some(json!(42)),
            },
        )]
        .into_iter()
        .collect(),
        command: CommandTemplate {
            base_command: vec![format!("{generator}-{name}")],
            named_arguments: [("--output".to_string(), "output_file".to_string())]
                .into_iter()
                .collect(),
            positional_arguments: Vec::new(),
        },
        resources: crate::executor::ResourceRequest::default(),
    }
}

/// Seeds a model-building config mapping each config key to its id.
pub fn model_config(
    registry: &InMemoryRegistry,
    id: &str,
    configs: &[(&str, &ResourceId)],
) -> ResourceId {
    let entries: serde_json::Map<String, Value> = configs
        .iter()
        .map(|(key, config)| ((*key).to_string(), json!({ "id": config.as_str() })))
        .collect();
    registry.seed(
        id,
        NewResource::new(kinds::MODEL_BUILDING_CONFIG, json!({ "configs": entries })),
    )
}

/// Seeds a multi-variant stage config selecting `variants` at
/// [`FIXTURE_VERSION`].
pub fn multi_variant_config(registry: &InMemoryRegistry, id: &str, variants: &[&str]) -> ResourceId {
    let list: Vec<Value> = variants
        .iter()
        .map(|v| json!({ "algorithm": v, "version": FIXTURE_VERSION }))
        .collect();
    registry.seed(
        id,
        NewResource::new(kinds::GENERATOR_TASK_CONFIG, json!({ "variants": list })),
    )
}

/// Seeds a relay stage config.
pub fn relay_config(registry: &InMemoryRegistry, id: &str, payload: Value) -> ResourceId {
    registry.seed(id, NewResource::new(kinds::GENERATOR_TASK_CONFIG, payload))
}

/// Registers a `placeholder` variant for every multi-variant stage of `dag`.
#[must_use]
pub fn placeholder_catalog(dag: &GeneratorDag) -> VariantCatalog {
    dag.stages()
        .filter(|s| s.kind == StageKind::MultiVariant)
        .fold(VariantCatalog::new(), |catalog, stage| {
            catalog.with_variant(variant(&stage.name, "placeholder"))
        })
}

/// Seeds one config per stage of `dag` (a single `placeholder` selection for
/// multi-variant stages) and the model-building config referencing them.
/// Returns the model-building config id.
pub fn seed_dag(registry: &InMemoryRegistry, dag: &GeneratorDag) -> ResourceId {
    let configs: Vec<(String, ResourceId)> = dag
        .stages()
        .map(|stage| {
            let id = format!("cfg-{}", stage.name);
            let config = match stage.kind {
                StageKind::Relay => relay_config(
                    registry,
                    &id,
                    json!({ "initial": { "connection_strength": 1.0 }, "overrides": {} }),
                ),
                StageKind::MultiVariant => multi_variant_config(registry, &id, &["placeholder"]),
            };
            (stage.config_key.clone(), config)
        })
        .collect();
    let refs: Vec<(&str, &ResourceId)> = configs.iter().map(|(k, v)| (k.as_str(), v)).collect();
    model_config(registry, "model-config", &refs)
}
