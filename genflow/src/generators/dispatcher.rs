//! Multi-variant scatter/merge.

use super::MergeRegistry;
use crate::core::{kinds, ExecutionId, NewResource, ResourceId};
use crate::errors::GenflowError;
use crate::events::{names, EventSink};
use crate::executor::{Executor, SubTask, SubTaskOutput, OUTPUT_FILE};
use crate::pipeline::GeneratorStage;
use crate::registry::{create_or_find, ResourceRegistry};
use crate::variants::ResolvedVariant;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Expands a multi-variant stage into sub-tasks, runs them and merges the
/// partial outputs into one resource.
#[derive(Clone)]
pub struct VariantDispatcher {
    registry: Arc<dyn ResourceRegistry>,
    executor: Arc<dyn Executor>,
    merges: MergeRegistry,
    events: Arc<dyn EventSink>,
    output_dir: PathBuf,
    max_concurrent: usize,
    execution: ExecutionId,
}

impl std::fmt::Debug for VariantDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantDispatcher")
            .field("executor", &self.executor.name())
            .field("output_dir", &self.output_dir)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl VariantDispatcher {
    /// Creates a dispatcher writing sub-task directories under `output_dir`.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        executor: Arc<dyn Executor>,
        events: Arc<dyn EventSink>,
        output_dir: impl Into<PathBuf>,
        execution: ExecutionId,
    ) -> Self {
        Self {
            registry,
            executor,
            merges: MergeRegistry::new(),
            events,
            output_dir: output_dir.into(),
            max_concurrent: 8,
            execution,
        }
    }

    /// Sets the merge strategies.
    #[must_use]
    pub fn with_merges(mut self, merges: MergeRegistry) -> Self {
        self.merges = merges;
        self
    }

    /// Sets the number of sub-tasks in flight at once.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Runs the resolve/scatter/merge steps and registers the merged output.
    ///
    /// All sub-tasks are awaited before anything is merged. If any of them
    /// failed, nothing is registered and the first failure in declaration
    /// order is returned.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::SubTaskExecution`] for a failed sub-task and
    /// [`GenflowError::RegistryUnavailable`] for registry failures.
    pub async fn execute(
        &self,
        stage: &GeneratorStage,
        config_id: &ResourceId,
        variants: &[ResolvedVariant],
        upstream: &BTreeMap<String, ResourceId>,
    ) -> Result<ResourceId, GenflowError> {
        let mut tasks = Vec::with_capacity(variants.len());
        for resolved in variants {
            tasks.push(self.prepare(stage, resolved, upstream).await?);
        }

        info!(stage = %stage.name, sub_tasks = tasks.len(), "Scattering variants");
        let results: Vec<Result<SubTaskOutput, _>> = stream::iter(tasks.iter())
            .map(|task| self.executor.submit(task))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_failure = None;
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    error!(stage = %stage.name, selection = %task.selection, variant = %task.variant, error = %err, "Sub-task failed");
                    self.events.try_emit(
                        names::VARIANT_FAILED,
                        Some(json!({
                            "stage": stage.name,
                            "selection": task.selection,
                            "variant": task.variant.to_string(),
                            "error": err.to_string(),
                        })),
                    );
                    if first_failure.is_none() {
                        first_failure = Some(GenflowError::SubTaskExecution {
                            stage: stage.name.clone(),
                            selection: task.selection.clone(),
                            source: err,
                        });
                    }
                }
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        let strategy = self.merges.strategy_for(stage);
        let outcome = strategy.merge(&outputs);
        for conflict in &outcome.conflicts {
            warn!(stage = %stage.name, strategy = strategy.name(), %conflict, "Merge conflict resolved by last writer");
            self.events.try_emit(
                names::MERGE_CONFLICT,
                Some(json!({
                    "stage": stage.name,
                    "field": conflict.field,
                    "overridden": conflict.overridden,
                    "winner": conflict.winner,
                })),
            );
        }

        let merged = NewResource::new(kinds::DETAILED_CIRCUIT, outcome.to_value())
            .with_attribute("generator", Value::String(stage.name.clone()))
            .with_attribute("config", Value::String(config_id.to_string()))
            .derived_from(upstream)
            .generated_by(self.execution);
        let id = self.registry.create_resource(merged).await?;
        info!(stage = %stage.name, generated = %id, variants = outputs.len(), "Merged variant outputs");
        Ok(id)
    }

    async fn prepare(
        &self,
        stage: &GeneratorStage,
        resolved: &ResolvedVariant,
        upstream: &BTreeMap<String, ResourceId>,
    ) -> Result<SubTask, GenflowError> {
        let selection = &resolved.selection;
        let key = resolved.variant.key();

        let parameterization = NewResource::new(
            kinds::VARIANT_TASK_PARAMETERIZATION,
            json!({
                "variant": key.to_string(),
                "parameters": resolved.parameters,
                "inputs": selection.extra_inputs,
            }),
        )
        .with_attribute("generator", Value::String(stage.name.clone()));
        let parameterization = create_or_find(self.registry.as_ref(), parameterization).await?;

        let work_dir = self.output_dir.join(&stage.name).join(&selection.name);
        tokio::fs::create_dir_all(&work_dir).await?;

        let mut inputs: BTreeMap<String, Value> = upstream
            .iter()
            .map(|(input, id)| (input.clone(), Value::String(id.to_string())))
            .collect();
        inputs.extend(selection.extra_inputs.clone());
        inputs.insert("config".to_string(), Value::String(parameterization.to_string()));
        inputs.insert("variant".to_string(), Value::String(key.to_string()));
        inputs.insert("parameters".to_string(), json!(resolved.parameters));
        inputs.insert(
            "output_dir".to_string(),
            Value::String(work_dir.display().to_string()),
        );
        inputs.insert(
            "output_file".to_string(),
            Value::String(work_dir.join(OUTPUT_FILE).display().to_string()),
        );

        let env = BTreeMap::from([
            ("GENFLOW_STAGE".to_string(), stage.name.clone()),
            ("GENFLOW_SELECTION".to_string(), selection.name.clone()),
        ]);

        Ok(SubTask {
            stage: stage.name.clone(),
            selection: selection.name.clone(),
            variant: key,
            command: resolved.variant.command.clone(),
            inputs,
            resources: resolved.variant.resources.clone(),
            env,
            work_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageConfig, VariantSelection};
    use crate::events::CollectingEventSink;
    use crate::generators::MergeSpec;
    use crate::registry::InMemoryRegistry;
    use crate::testing::{fixtures, ScriptedExecutor};
    use crate::variants::VariantCatalog;
    use pretty_assertions::assert_eq;

    struct Harness {
        registry: Arc<InMemoryRegistry>,
        executor: Arc<ScriptedExecutor>,
        events: Arc<CollectingEventSink>,
        dispatcher: VariantDispatcher,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(InMemoryRegistry::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let events = Arc::new(CollectingEventSink::new());
        let dispatcher = VariantDispatcher::new(
            registry.clone(),
            executor.clone(),
            events.clone(),
            dir.path(),
            ExecutionId::new(),
        );
        Harness {
            registry,
            executor,
            events,
            dispatcher,
            _dir: dir,
        }
    }

    fn resolve(stage: &str, selections: &[&str]) -> Vec<ResolvedVariant> {
        let catalog = selections
            .iter()
            .fold(VariantCatalog::new(), |c, n| c.with_variant(fixtures::variant(stage, n)));
        let config = StageConfig {
            selections: selections.iter().map(|n| VariantSelection::new(*n, *n, "v1")).collect(),
            configuration: serde_json::Map::new(),
        };
        catalog.resolve(stage, &config).unwrap()
    }

    #[tokio::test]
    async fn test_scatter_and_merge() {
        let h = harness();
        h.executor.succeed("connectome", "a", json!({"nodes": "n.h5"}));
        h.executor.succeed("connectome", "b", json!({"edges": "e.h5"}));
        let stage = GeneratorStage::multi_variant("connectome", "microConnectomeConfig");
        let upstream = BTreeMap::from([("circuit".to_string(), ResourceId::new("r-me"))]);

        let id = h
            .dispatcher
            .execute(&stage, &ResourceId::new("cfg"), &resolve("connectome", &["a", "b"]), &upstream)
            .await
            .unwrap();

        let merged = h.registry.get_resource(&id).await.unwrap().unwrap();
        assert_eq!(merged.payload, json!({"nodes": "n.h5", "edges": "e.h5"}));
        assert_eq!(merged.derived_from(), upstream);

        let submitted = h.executor.submissions();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].inputs["circuit"], json!("r-me"));
        assert!(submitted[1].work_dir.ends_with("connectome/b"));
    }

    #[tokio::test]
    async fn test_failed_sub_task_registers_nothing() {
        let h = harness();
        h.executor.succeed("connectome", "a", json!({"nodes": "n.h5"}));
        h.executor.fail("connectome", "b");
        let stage = GeneratorStage::multi_variant("connectome", "microConnectomeConfig");

        let err = h
            .dispatcher
            .execute(&stage, &ResourceId::new("cfg"), &resolve("connectome", &["a", "b"]), &BTreeMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GenflowError::SubTaskExecution { ref selection, .. } if selection == "b"));
        assert_eq!(h.executor.submissions().len(), 2);
        assert!(h
            .registry
            .snapshot()
            .resources
            .iter()
            .all(|r| r.kind != kinds::DETAILED_CIRCUIT));
        assert_eq!(h.events.of_type(names::VARIANT_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_overlap_emits_conflict_and_concatenate_does_not() {
        let h = harness();
        h.executor.succeed("connectome", "a", json!({"edge_populations": ["p1"]}));
        h.executor.succeed("connectome", "b", json!({"edge_populations": ["p2"]}));
        let variants = resolve("connectome", &["a", "b"]);

        let plain = GeneratorStage::multi_variant("connectome", "microConnectomeConfig");
        let id = h
            .dispatcher
            .execute(&plain, &ResourceId::new("cfg"), &variants, &BTreeMap::new())
            .await
            .unwrap();
        let merged = h.registry.get_resource(&id).await.unwrap().unwrap();
        assert_eq!(merged.payload, json!({"edge_populations": ["p2"]}));
        assert_eq!(h.events.of_type(names::MERGE_CONFLICT).len(), 1);

        let concat = plain.with_merge(MergeSpec::concatenate(["edge_populations"]));
        let id = h
            .dispatcher
            .execute(&concat, &ResourceId::new("cfg"), &variants, &BTreeMap::new())
            .await
            .unwrap();
        let merged = h.registry.get_resource(&id).await.unwrap().unwrap();
        assert_eq!(merged.payload, json!({"edge_populations": ["p1", "p2"]}));
        assert_eq!(h.events.of_type(names::MERGE_CONFLICT).len(), 1);
    }

    #[tokio::test]
    async fn test_parameterization_is_reused_across_runs() {
        let h = harness();
        h.executor.succeed("connectome", "a", json!({}));
        let stage = GeneratorStage::multi_variant("connectome", "microConnectomeConfig");
        let variants = resolve("connectome", &["a"]);

        for _ in 0..2 {
            h.dispatcher
                .execute(&stage, &ResourceId::new("cfg"), &variants, &BTreeMap::new())
                .await
                .unwrap();
        }

        let submitted = h.executor.submissions();
        assert_eq!(submitted[0].inputs["config"], submitted[1].inputs["config"]);
        let parameterizations = h
            .registry
            .snapshot()
            .resources
            .iter()
            .filter(|r| r.kind == kinds::VARIANT_TASK_PARAMETERIZATION)
            .count();
        assert_eq!(parameterizations, 1);
    }
}
