//! Workflow-level scenarios: reuse, invalidation, failure safety.

use super::*;
use crate::core::{kinds, NewResource, ResourceId, StageOutcome};
use crate::errors::GenflowError;
use crate::events::{names, CollectingEventSink};
use crate::pipeline::{
    retry::RetryConfig, DagBuilder, GeneratorDag, GeneratorStage, DEFAULT_TARGET,
};
use crate::registry::{
    FileRegistry, InMemoryRegistry, MockResourceRegistry, RegistryError, ResourceRegistry,
};
use crate::settings::EngineSettings;
use crate::testing::{fixtures, ScriptedExecutor};
use crate::variants::VariantCatalog;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct Env {
    registry: Arc<InMemoryRegistry>,
    executor: Arc<ScriptedExecutor>,
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            registry: Arc::new(InMemoryRegistry::new()),
            executor: Arc::new(ScriptedExecutor::new()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn settings(&self) -> EngineSettings {
        EngineSettings::default()
            .with_output_dir(self.dir.path())
            .with_registry_retry(RetryConfig::no_retry())
    }

    fn workflow(&self, dag: GeneratorDag, catalog: VariantCatalog) -> GenerationWorkflow {
        GenerationWorkflow::new(dag, self.registry.clone(), catalog, self.executor.clone())
            .with_settings(self.settings())
    }

    fn live_activities(&self, stage: &str) -> usize {
        self.registry
            .all_activities()
            .iter()
            .filter(|a| a.generator_id == stage && !a.deprecated)
            .count()
    }
}

/// `a -> b -> c`, one `placeholder` selection per stage unless told otherwise.
fn chain() -> GeneratorDag {
    DagBuilder::new("chain")
        .stage(GeneratorStage::multi_variant("a", "aConfig"))
        .unwrap()
        .stage(GeneratorStage::multi_variant("b", "bConfig").with_upstream("a"))
        .unwrap()
        .stage(GeneratorStage::multi_variant("c", "cConfig").with_upstream("b"))
        .unwrap()
        .build()
        .unwrap()
}

fn chain_catalog() -> VariantCatalog {
    fixtures::placeholder_catalog(&chain())
}

fn seed_chain(env: &Env) -> ResourceId {
    let a = fixtures::multi_variant_config(&env.registry, "cfgA1", &["placeholder"]);
    let b = fixtures::multi_variant_config(&env.registry, "cfgB1", &["placeholder"]);
    let c = fixtures::multi_variant_config(&env.registry, "cfgC1", &["placeholder"]);
    fixtures::model_config(
        &env.registry,
        "model-1",
        &[("aConfig", &a), ("bConfig", &b), ("cConfig", &c)],
    )
}

#[tokio::test]
async fn test_second_run_makes_no_writes() {
    let env = Env::new();
    let dag = GeneratorDag::circuit_building().unwrap();
    let model = fixtures::seed_dag(&env.registry, &dag);
    let catalog = fixtures::placeholder_catalog(&dag);

    let first = env
        .workflow(dag.clone(), catalog.clone())
        .run(&model, DEFAULT_TARGET)
        .await
        .unwrap();
    assert_eq!(first.executed().len(), 7);
    let writes = env.registry.mutation_count();
    let submissions = env.executor.submission_count();

    let second = env.workflow(dag, catalog).run(&model, DEFAULT_TARGET).await.unwrap();

    assert_eq!(second.reused().len(), 7);
    assert!(second.executed().is_empty());
    assert_eq!(env.registry.mutation_count(), writes);
    assert_eq!(env.executor.submission_count(), submissions);
    assert_eq!(second.output(), first.output());
}

#[tokio::test]
async fn test_changed_config_reruns_stage_and_dependents() {
    let env = Env::new();
    let model_1 = seed_chain(&env);

    let first = env.workflow(chain(), chain_catalog()).run(&model_1, "c").await.unwrap();
    let r_a1 = first.stage("a").unwrap().generated.clone();
    let r_b1 = first.stage("b").unwrap().generated.clone();

    let writes = env.registry.mutation_count();
    let second = env.workflow(chain(), chain_catalog()).run(&model_1, "c").await.unwrap();
    assert_eq!(second.reused(), vec!["a", "b", "c"]);
    assert_eq!(env.registry.mutation_count(), writes);

    let b_2 = fixtures::multi_variant_config(&env.registry, "cfgB2", &["placeholder"]);
    let model_2 = fixtures::model_config(
        &env.registry,
        "model-2",
        &[
            ("aConfig", &ResourceId::new("cfgA1")),
            ("bConfig", &b_2),
            ("cConfig", &ResourceId::new("cfgC1")),
        ],
    );
    env.executor.reset();
    let third = env.workflow(chain(), chain_catalog()).run(&model_2, "c").await.unwrap();

    assert_eq!(third.reused(), vec!["a"]);
    assert_eq!(third.executed(), vec!["b", "c"]);
    assert_eq!(third.stage("a").unwrap().generated, r_a1);
    assert_ne!(third.stage("b").unwrap().generated, r_b1);
    assert_eq!(third.stage("b").unwrap().config, ResourceId::new("cfgB2"));

    let b_task = &env.executor.submissions_for("b")[0];
    assert_eq!(b_task.inputs["circuit"], json!(r_a1.as_str()));

    let r_b2 = env
        .registry
        .get_resource(&third.stage("b").unwrap().generated)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r_b2.derived_from()["circuit"], r_a1);

    assert_eq!(env.live_activities("a"), 1);
    assert_eq!(env.live_activities("c"), 1);
    // (b, cfgB1) stays live next to (b, cfgB2); only c had a superseded record.
    assert_eq!(env.live_activities("b"), 2);
}

/// `a -> b`, `a -> c`, `d <- b, c`.
fn diamond() -> GeneratorDag {
    DagBuilder::new("diamond")
        .stage(GeneratorStage::multi_variant("a", "aConfig"))
        .unwrap()
        .stage(GeneratorStage::multi_variant("b", "bConfig").with_upstream("a"))
        .unwrap()
        .stage(GeneratorStage::multi_variant("c", "cConfig").with_upstream("a"))
        .unwrap()
        .stage(
            GeneratorStage::multi_variant("d", "dConfig")
                .with_upstream_as("b", "left")
                .with_upstream_as("c", "right"),
        )
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_changed_config_leaves_sibling_branch_untouched() {
    let env = Env::new();
    let catalog = fixtures::placeholder_catalog(&diamond());
    let configs: Vec<ResourceId> = ["cfgA1", "cfgB1", "cfgC1", "cfgD1"]
        .into_iter()
        .map(|id| fixtures::multi_variant_config(&env.registry, id, &["placeholder"]))
        .collect();
    let keys = ["aConfig", "bConfig", "cConfig", "dConfig"];
    let bindings: Vec<(&str, &ResourceId)> = keys.into_iter().zip(configs.iter()).collect();
    let model_1 = fixtures::model_config(&env.registry, "model-1", &bindings);

    let first = env.workflow(diamond(), catalog.clone()).run(&model_1, "d").await.unwrap();
    assert_eq!(first.executed(), vec!["a", "b", "c", "d"]);
    let r_c1 = first.stage("c").unwrap().generated.clone();
    let r_d1 = first.stage("d").unwrap().generated.clone();

    let b_2 = fixtures::multi_variant_config(&env.registry, "cfgB2", &["placeholder"]);
    let mut changed = bindings.clone();
    changed[1] = ("bConfig", &b_2);
    let model_2 = fixtures::model_config(&env.registry, "model-2", &changed);
    env.executor.reset();

    let second = env.workflow(diamond(), catalog).run(&model_2, "d").await.unwrap();

    assert_eq!(second.reused(), vec!["a", "c"]);
    assert_eq!(second.executed(), vec!["b", "d"]);
    assert_eq!(second.stage("c").unwrap().generated, r_c1);
    assert_ne!(second.stage("d").unwrap().generated, r_d1);
    assert!(env.executor.submissions_for("c").is_empty());
    assert_eq!(
        env.registry.all_activities().iter().filter(|a| a.generator_id == "c").count(),
        1
    );

    let d_task = &env.executor.submissions_for("d")[0];
    assert_eq!(d_task.inputs["right"], json!(r_c1.as_str()));
    assert_eq!(
        d_task.inputs["left"],
        json!(second.stage("b").unwrap().generated.as_str())
    );
}

#[tokio::test]
async fn test_failed_sub_task_records_nothing_and_retry_rescatters() {
    let env = Env::new();
    let dag = DagBuilder::new("single")
        .stage(GeneratorStage::multi_variant("a", "aConfig"))
        .unwrap()
        .build()
        .unwrap();
    let catalog = VariantCatalog::new()
        .with_variant(fixtures::variant("a", "left"))
        .with_variant(fixtures::variant("a", "right"));
    let config = fixtures::multi_variant_config(&env.registry, "cfgA1", &["left", "right"]);
    let model = fixtures::model_config(&env.registry, "model", &[("aConfig", &config)]);

    env.executor.fail("a", "right");
    let err = env
        .workflow(dag.clone(), catalog.clone())
        .run(&model, "a")
        .await
        .unwrap_err();

    assert_eq!(err.failing_stage(), Some("a"));
    match &err {
        GenflowError::StageFailed { source, .. } => {
            assert!(matches!(
                &**source,
                GenflowError::SubTaskExecution { selection, .. } if selection == "right"
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(env.live_activities("a"), 0);
    assert!(env
        .registry
        .snapshot()
        .resources
        .iter()
        .all(|r| r.kind != kinds::DETAILED_CIRCUIT));

    env.executor.clear_scripts();
    env.executor.reset();
    let report = env.workflow(dag, catalog).run(&model, "a").await.unwrap();

    assert_eq!(report.executed(), vec!["a"]);
    let selections: Vec<String> = env
        .executor
        .submissions_for("a")
        .into_iter()
        .map(|t| t.selection)
        .collect();
    assert_eq!(selections, vec!["left", "right"]);
    assert_eq!(env.live_activities("a"), 1);
}

#[tokio::test]
async fn test_merge_output_is_identical_across_runs() {
    async fn merged_payload() -> String {
        let env = Env::new();
        let dag = DagBuilder::new("single")
            .stage(GeneratorStage::multi_variant("a", "aConfig"))
            .unwrap()
            .build()
            .unwrap();
        let catalog = VariantCatalog::new()
            .with_variant(fixtures::variant("a", "left"))
            .with_variant(fixtures::variant("a", "right"));
        let config = fixtures::multi_variant_config(&env.registry, "cfgA1", &["left", "right"]);
        let model = fixtures::model_config(&env.registry, "model", &[("aConfig", &config)]);
        env.executor
            .succeed("a", "left", json!({"zeta": 1, "shared": "left", "alpha": [1]}));
        env.executor
            .succeed("a", "right", json!({"beta": true, "shared": "right"}));

        let report = env.workflow(dag, catalog).run(&model, "a").await.unwrap();
        let merged = env
            .registry
            .get_resource(report.output().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.payload["shared"], json!("right"));
        serde_json::to_string(&merged.payload).unwrap()
    }

    let first = merged_payload().await;
    let second = merged_payload().await;
    assert_eq!(first, second);
    assert_eq!(
        first,
        r#"{"alpha":[1],"beta":true,"shared":"right","zeta":1}"#
    );
}

#[tokio::test]
async fn test_merge_conflict_is_reported() {
    let env = Env::new();
    let events = Arc::new(CollectingEventSink::new());
    let dag = DagBuilder::new("single")
        .stage(GeneratorStage::multi_variant("a", "aConfig"))
        .unwrap()
        .build()
        .unwrap();
    let catalog = VariantCatalog::new()
        .with_variant(fixtures::variant("a", "left"))
        .with_variant(fixtures::variant("a", "right"));
    let config = fixtures::multi_variant_config(&env.registry, "cfgA1", &["left", "right"]);
    let model = fixtures::model_config(&env.registry, "model", &[("aConfig", &config)]);
    env.executor.succeed("a", "left", json!({"nodes": "l.h5"}));
    env.executor.succeed("a", "right", json!({"nodes": "r.h5"}));

    env.workflow(dag, catalog)
        .with_event_sink(events.clone())
        .run(&model, "a")
        .await
        .unwrap();

    let conflicts = events.of_type(names::MERGE_CONFLICT);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].data,
        Some(json!({"stage": "a", "field": "nodes", "overridden": "left", "winner": "right"}))
    );
}

#[tokio::test]
async fn test_configuration_errors_fail_before_any_execution() {
    let env = Env::new();
    let model = seed_chain(&env);

    let unknown = env
        .workflow(chain(), chain_catalog())
        .run(&model, "d")
        .await
        .unwrap_err();
    assert!(matches!(unknown, GenflowError::UnknownStage { .. }));

    let partial = fixtures::model_config(
        &env.registry,
        "model-partial",
        &[("aConfig", &ResourceId::new("cfgA1")), ("cConfig", &ResourceId::new("cfgC1"))],
    );
    let missing = env
        .workflow(chain(), chain_catalog())
        .run(&partial, "c")
        .await
        .unwrap_err();
    assert!(matches!(missing, GenflowError::MissingConfig { ref stage, .. } if stage == "b"));

    let ghost = fixtures::multi_variant_config(&env.registry, "cfgC-ghost", &["ghost"]);
    let bad_variant = fixtures::model_config(
        &env.registry,
        "model-ghost",
        &[
            ("aConfig", &ResourceId::new("cfgA1")),
            ("bConfig", &ResourceId::new("cfgB1")),
            ("cConfig", &ghost),
        ],
    );
    let invalid = env
        .workflow(chain(), chain_catalog())
        .run(&bad_variant, "c")
        .await
        .unwrap_err();
    assert!(matches!(invalid, GenflowError::InvalidVariant { .. }));

    let cyclic = GeneratorDag::new(
        "cyclic",
        vec![
            GeneratorStage::multi_variant("a", "aConfig").with_upstream("c"),
            GeneratorStage::multi_variant("b", "bConfig").with_upstream("a"),
            GeneratorStage::multi_variant("c", "cConfig").with_upstream("b"),
        ],
    );
    let cycle = env
        .workflow(cyclic, chain_catalog())
        .run(&model, "c")
        .await
        .unwrap_err();
    assert!(matches!(cycle, GenflowError::Cycle(_)));

    for err in [&unknown, &missing, &invalid, &cycle] {
        assert!(err.is_configuration_error(), "{err}");
    }
    assert_eq!(env.executor.submission_count(), 0);
    assert_eq!(env.registry.mutation_count(), 0);
}

#[tokio::test]
async fn test_escaping_selection_name_creates_nothing() {
    let env = Env::new();
    let dag = DagBuilder::new("single")
        .stage(GeneratorStage::multi_variant("a", "aConfig"))
        .unwrap()
        .build()
        .unwrap();
    let config = env.registry.seed(
        "cfgA-escape",
        NewResource::new(
            kinds::GENERATOR_TASK_CONFIG,
            json!({"variants": [{"name": "../../escaped", "algorithm": "placeholder", "version": "v1"}]}),
        ),
    );
    let model = fixtures::model_config(&env.registry, "model", &[("aConfig", &config)]);

    let err = env
        .workflow(dag.clone(), fixtures::placeholder_catalog(&dag))
        .run(&model, "a")
        .await
        .unwrap_err();

    assert!(matches!(err, GenflowError::InvalidStageConfig { .. }), "{err}");
    assert_eq!(env.executor.submission_count(), 0);
    assert_eq!(env.registry.mutation_count(), 0);
    assert!(std::fs::read_dir(env.dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_isolated_run_ignores_other_executions() {
    let env = Env::new();
    let model = seed_chain(&env);
    env.workflow(chain(), chain_catalog()).run(&model, "c").await.unwrap();

    let isolated = env
        .workflow(chain(), chain_catalog())
        .with_settings(env.settings().with_isolated(true));
    let report = isolated.run(&model, "c").await.unwrap();

    assert_eq!(report.executed(), vec!["a", "b", "c"]);
    for stage in ["a", "b", "c"] {
        assert_eq!(env.live_activities(stage), 1);
    }

    let again = isolated.run(&model, "c").await.unwrap();
    assert_eq!(again.reused(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_relay_output_feeds_connectome() {
    let env = Env::new();
    let dag = GeneratorDag::circuit_building().unwrap();
    let model = fixtures::seed_dag(&env.registry, &dag);

    let report = env
        .workflow(dag.clone(), fixtures::placeholder_catalog(&dag))
        .run(&model, "connectome")
        .await
        .unwrap();

    let relayed = &report.stage("macro").unwrap().generated;
    assert_ne!(relayed, &ResourceId::new("cfg-macro"));
    let clone = env.registry.get_resource(relayed).await.unwrap().unwrap();
    assert_eq!(clone.payload["resolved"], json!({"connection_strength": 1.0}));

    let task = &env.executor.submissions_for("connectome")[0];
    assert_eq!(task.inputs["macro_connectome_config"], json!(relayed.as_str()));
    assert_eq!(
        task.inputs["circuit"],
        json!(report.stage("memodel").unwrap().generated.as_str())
    );
    assert_eq!(
        env.registry.all_activities().iter().find(|a| a.generator_id == "macro").unwrap().used_config,
        ResourceId::new("cfg-macro")
    );
}

#[tokio::test]
async fn test_events_follow_stage_decisions() {
    let env = Env::new();
    let model = seed_chain(&env);
    let events = Arc::new(CollectingEventSink::new());

    env.workflow(chain(), chain_catalog())
        .with_event_sink(events.clone())
        .run(&model, "a")
        .await
        .unwrap();
    env.workflow(chain(), chain_catalog())
        .with_event_sink(events.clone())
        .run(&model, "a")
        .await
        .unwrap();

    assert_eq!(
        events.names(),
        vec![
            names::WORKFLOW_STARTED,
            names::GENERATOR_STARTED,
            names::GENERATOR_COMPLETED,
            names::WORKFLOW_COMPLETED,
            names::WORKFLOW_STARTED,
            names::GENERATOR_SKIPPED,
            names::WORKFLOW_COMPLETED,
        ]
    );
}

#[tokio::test]
async fn test_preview_marks_completed_prefix() {
    let env = Env::new();
    let model = seed_chain(&env);
    let workflow = env.workflow(chain(), chain_catalog());

    workflow.run(&model, "b").await.unwrap();
    let writes = env.registry.mutation_count();
    let preview = workflow.preview(&model, "c").await.unwrap();

    let would_execute: Vec<(&str, bool)> = preview
        .iter()
        .map(|p| (p.stage.as_str(), p.would_execute()))
        .collect();
    assert_eq!(would_execute, vec![("a", false), ("b", false), ("c", true)]);
    assert_eq!(preview[2].selections, vec!["placeholder"]);
    assert_eq!(env.registry.mutation_count(), writes);
}

#[tokio::test]
async fn test_registry_outage_fails_without_executing() {
    let env = Env::new();
    let mut registry = MockResourceRegistry::new();
    registry
        .expect_get_resource()
        .returning(|_| Err(RegistryError::unavailable("registry offline")));

    let workflow = GenerationWorkflow::new(
        chain(),
        Arc::new(registry),
        chain_catalog(),
        env.executor.clone(),
    )
    .with_settings(env.settings());
    let err = workflow
        .run(&ResourceId::new("model-1"), "c")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err, GenflowError::RegistryUnavailable(_)));
    assert_eq!(env.executor.submission_count(), 0);
}

#[tokio::test]
async fn test_file_registry_resumes_across_processes() {
    let env = Env::new();
    let path = env.dir.path().join("registry.json");

    let model = {
        let registry = FileRegistry::open(&path).await.unwrap();
        let mut configs = Vec::new();
        for key in ["aConfig", "bConfig", "cConfig"] {
            let id = registry
                .create_resource(NewResource::new(
                    kinds::GENERATOR_TASK_CONFIG,
                    json!({"variants": [{"algorithm": "placeholder", "version": fixtures::FIXTURE_VERSION}]}),
                ))
                .await
                .unwrap();
            configs.push((key, id));
        }
        let entries: serde_json::Map<String, serde_json::Value> = configs
            .iter()
            .map(|(k, id)| ((*k).to_string(), json!(id.as_str())))
            .collect();
        registry
            .create_resource(NewResource::new(
                kinds::MODEL_BUILDING_CONFIG,
                json!({ "configs": entries }),
            ))
            .await
            .unwrap()
    };

    let run = |registry: FileRegistry| {
        GenerationWorkflow::new(chain(), Arc::new(registry), chain_catalog(), env.executor.clone())
            .with_settings(env.settings())
    };

    let first = run(FileRegistry::open(&path).await.unwrap())
        .run(&model, "c")
        .await
        .unwrap();
    assert_eq!(first.executed().len(), 3);

    let second = run(FileRegistry::open(&path).await.unwrap())
        .run(&model, "c")
        .await
        .unwrap();
    assert_eq!(second.reused().len(), 3);
    assert!(second
        .stages
        .iter()
        .all(|s| s.outcome == StageOutcome::Reused));
}
