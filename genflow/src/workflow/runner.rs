//! Workflow execution.

use super::{StagePreview, StageReport, WorkflowPlan, WorkflowReport};
use crate::config::{ModelBuildingConfig, StageConfig};
use crate::core::{ExecutionId, Resource, ResourceId, StageKind, StageOutcome};
use crate::errors::GenflowError;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::executor::Executor;
use crate::generators::{
    MergeRegistry, PlannedStage, RelayGenerator, StageRunner, StageWork, VariantDispatcher,
};
use crate::pipeline::retry::with_retry_when;
use crate::pipeline::{GeneratorDag, GeneratorStage};
use crate::provenance::{ActivityRecorder, CompletionChecker};
use crate::registry::{RegistryError, ResourceRegistry};
use crate::settings::EngineSettings;
use crate::variants::VariantCatalog;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Drives a generator DAG towards a target stage.
///
/// Stages run one at a time in resolved order. A stage whose activity is
/// found by the completion check is skipped and its recorded output is
/// handed downstream; any other stage executes and records a new activity.
/// Re-running after a failure resumes at the first incomplete stage.
pub struct GenerationWorkflow {
    dag: Arc<GeneratorDag>,
    registry: Arc<dyn ResourceRegistry>,
    catalog: Arc<VariantCatalog>,
    executor: Arc<dyn Executor>,
    settings: EngineSettings,
    merges: MergeRegistry,
    events: Arc<dyn EventSink>,
    execution: ExecutionId,
}

impl std::fmt::Debug for GenerationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationWorkflow")
            .field("dag", &self.dag.name())
            .field("executor", &self.executor.name())
            .field("execution", &self.execution)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl GenerationWorkflow {
    /// Creates a workflow with default settings and a fresh execution id.
    #[must_use]
    pub fn new(
        dag: GeneratorDag,
        registry: Arc<dyn ResourceRegistry>,
        catalog: VariantCatalog,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            dag: Arc::new(dag),
            registry,
            catalog: Arc::new(catalog),
            executor,
            settings: EngineSettings::default(),
            merges: MergeRegistry::new(),
            events: Arc::new(NoOpEventSink),
            execution: ExecutionId::new(),
        }
    }

    /// Sets the engine settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets per-stage merge strategy overrides.
    #[must_use]
    pub fn with_merges(mut self, merges: MergeRegistry) -> Self {
        self.merges = merges;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the execution id recorded on activities.
    #[must_use]
    pub fn with_execution_id(mut self, execution: ExecutionId) -> Self {
        self.execution = execution;
        self
    }

    /// Returns the execution id.
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution
    }

    /// Returns the DAG.
    #[must_use]
    pub fn dag(&self) -> &GeneratorDag {
        &self.dag
    }

    /// Resolves every stage needed for `target`: dependency order, config
    /// ids, config contents and variants. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage`, `Cycle`, `ConfigNotFound`, `MissingConfig`,
    /// `InvalidStageConfig` or `InvalidVariant` for configuration problems,
    /// and `RegistryUnavailable` if configs cannot be read.
    pub async fn plan(
        &self,
        model_config_id: &ResourceId,
        target: &str,
    ) -> Result<WorkflowPlan, GenflowError> {
        let stages = self.dag.resolve(target)?;
        let model = ModelBuildingConfig::load(self.registry.as_ref(), model_config_id).await?;

        let mut planned = Vec::with_capacity(stages.len());
        for stage in stages {
            let config_id = model.resolve_config(stage)?;
            let config = self.load_config(stage, &config_id).await?;
            let work = match stage.kind {
                StageKind::Relay => StageWork::Relay,
                StageKind::MultiVariant => {
                    let parsed =
                        StageConfig::parse_multi_variant(&stage.name, &config_id, &config.payload)?;
                    StageWork::Scatter(self.catalog.resolve(&stage.name, &parsed)?)
                }
            };
            planned.push(PlannedStage {
                stage: stage.clone(),
                config_id,
                config,
                work,
            });
        }

        Ok(WorkflowPlan {
            model_config: model_config_id.clone(),
            target: target.to_string(),
            stages: planned,
        })
    }

    /// Plans `target` and reports which stages are already complete.
    ///
    /// A stage downstream of an incomplete one is always reported as
    /// executing, since its inputs do not exist yet.
    ///
    /// # Errors
    ///
    /// See [`Self::plan`].
    pub async fn preview(
        &self,
        model_config_id: &ResourceId,
        target: &str,
    ) -> Result<Vec<StagePreview>, GenflowError> {
        let plan = self.plan(model_config_id, target).await?;
        let checker = self.completion_checker();

        let mut outputs: HashMap<String, ResourceId> = HashMap::new();
        let mut previews = Vec::with_capacity(plan.len());
        for planned in &plan.stages {
            let reusable = match upstream_inputs(&planned.stage, &outputs) {
                Some(upstream) => checker
                    .is_complete(&planned.stage, &planned.config_id, &upstream)
                    .await?
                    .map(|activity| activity.generated),
                None => None,
            };
            if let Some(generated) = &reusable {
                outputs.insert(planned.stage.name.clone(), generated.clone());
            }
            previews.push(StagePreview {
                stage: planned.stage.name.clone(),
                kind: planned.stage.kind,
                config: planned.config_id.clone(),
                selections: planned.selections().into_iter().map(str::to_string).collect(),
                reusable,
            });
        }
        Ok(previews)
    }

    /// Runs the workflow up to `target`.
    ///
    /// # Errors
    ///
    /// Configuration errors are returned as-is before anything executes.
    /// Failures while running a stage are wrapped in
    /// [`GenflowError::StageFailed`]; stages completed before it keep their
    /// activities.
    pub async fn run(
        &self,
        model_config_id: &ResourceId,
        target: &str,
    ) -> Result<WorkflowReport, GenflowError> {
        let plan = self.plan(model_config_id, target).await?;
        info!(
            execution = %self.execution,
            target,
            config = %model_config_id,
            stages = ?plan.stage_names(),
            "Starting generation workflow"
        );
        self.events
            .emit(
                names::WORKFLOW_STARTED,
                Some(json!({
                    "execution": self.execution,
                    "target": target,
                    "model_config": model_config_id,
                    "stages": plan.stage_names(),
                })),
            )
            .await;

        let checker = self.completion_checker();
        let recorder = ActivityRecorder::new(self.registry.clone(), self.execution)
            .with_retry(self.settings.registry_retry.clone());
        let runner = self.stage_runner();

        let mut outputs: HashMap<String, ResourceId> = HashMap::new();
        let mut reports = Vec::with_capacity(plan.len());
        for planned in &plan.stages {
            let name = planned.stage.name.clone();
            match self
                .run_stage(&checker, &runner, &recorder, planned, &outputs)
                .await
            {
                Ok(report) => {
                    outputs.insert(name, report.generated.clone());
                    reports.push(report);
                }
                Err(err) => {
                    error!(stage = %name, config = %planned.config_id, error = %err, "Stage failed");
                    self.events
                        .emit(
                            names::GENERATOR_FAILED,
                            Some(json!({
                                "stage": name,
                                "config": planned.config_id,
                                "error": err.to_string(),
                            })),
                        )
                        .await;
                    return Err(GenflowError::stage_failed(name, err));
                }
            }
        }

        let report = WorkflowReport {
            execution: self.execution,
            target: target.to_string(),
            model_config: model_config_id.clone(),
            stages: reports,
        };
        info!(
            execution = %self.execution,
            target,
            executed = report.executed().len(),
            reused = report.reused().len(),
            "Generation workflow completed"
        );
        self.events
            .emit(
                names::WORKFLOW_COMPLETED,
                Some(json!({
                    "execution": self.execution,
                    "target": target,
                    "output": report.output(),
                    "executed": report.executed(),
                    "reused": report.reused(),
                })),
            )
            .await;
        Ok(report)
    }

    async fn run_stage(
        &self,
        checker: &CompletionChecker,
        runner: &StageRunner,
        recorder: &ActivityRecorder,
        planned: &PlannedStage,
        outputs: &HashMap<String, ResourceId>,
    ) -> Result<StageReport, GenflowError> {
        let started = Instant::now();
        let stage = &planned.stage;
        let upstream = upstream_inputs(stage, outputs).ok_or_else(|| {
            GenflowError::unknown_stage(
                stage
                    .upstream_names()
                    .find(|u| !outputs.contains_key(*u))
                    .unwrap_or_default(),
            )
        })?;

        if let Some(activity) = checker
            .is_complete(stage, &planned.config_id, &upstream)
            .await?
        {
            info!(
                stage = %stage.name,
                config = %planned.config_id,
                activity = %activity.id,
                generated = %activity.generated,
                "Stage already complete, reusing output"
            );
            self.events
                .emit(
                    names::GENERATOR_SKIPPED,
                    Some(json!({
                        "stage": stage.name,
                        "config": planned.config_id,
                        "activity": activity.id,
                        "generated": activity.generated,
                    })),
                )
                .await;
            return Ok(StageReport {
                stage: stage.name.clone(),
                config: planned.config_id.clone(),
                outcome: StageOutcome::Reused,
                activity: activity.id,
                generated: activity.generated,
                duration_ms: elapsed_ms(started),
            });
        }

        info!(
            stage = %stage.name,
            kind = %stage.kind,
            config = %planned.config_id,
            variants = ?planned.selections(),
            "Executing stage"
        );
        self.events
            .emit(
                names::GENERATOR_STARTED,
                Some(json!({
                    "stage": stage.name,
                    "kind": stage.kind,
                    "config": planned.config_id,
                    "selections": planned.selections(),
                })),
            )
            .await;

        let generated = runner.execute(planned, &upstream).await?;
        let activity = recorder
            .record(stage, &planned.config_id, &generated)
            .await?;

        info!(
            stage = %stage.name,
            activity = %activity.id,
            generated = %generated,
            "Stage executed"
        );
        self.events
            .emit(
                names::GENERATOR_COMPLETED,
                Some(json!({
                    "stage": stage.name,
                    "config": planned.config_id,
                    "activity": activity.id,
                    "generated": generated,
                })),
            )
            .await;

        Ok(StageReport {
            stage: stage.name.clone(),
            config: planned.config_id.clone(),
            outcome: StageOutcome::Executed,
            activity: activity.id,
            generated,
            duration_ms: elapsed_ms(started),
        })
    }

    async fn load_config(
        &self,
        stage: &GeneratorStage,
        config_id: &ResourceId,
    ) -> Result<Resource, GenflowError> {
        with_retry_when(
            &self.settings.registry_retry,
            &stage.name,
            RegistryError::is_transient,
            || self.registry.get_resource(config_id),
        )
        .await?
        .ok_or_else(|| GenflowError::ConfigNotFound {
            id: config_id.clone(),
        })
    }

    fn completion_checker(&self) -> CompletionChecker {
        let checker = CompletionChecker::new(self.registry.clone())
            .with_lookup_policy(self.settings.activity_lookup)
            .with_retry(self.settings.registry_retry.clone());
        if self.settings.isolated {
            checker.isolated_to(self.execution)
        } else {
            checker
        }
    }

    fn stage_runner(&self) -> StageRunner {
        let relay = RelayGenerator::new(self.registry.clone(), self.execution);
        let dispatcher = VariantDispatcher::new(
            self.registry.clone(),
            self.executor.clone(),
            self.events.clone(),
            self.settings.output_dir.clone(),
            self.execution,
        )
        .with_merges(self.merges.clone())
        .with_max_concurrent(self.settings.executor.max_concurrent);
        StageRunner::new(relay, dispatcher)
    }
}

/// Maps each upstream edge of `stage` to the output recorded for it, or
/// `None` if some upstream stage has no output yet.
fn upstream_inputs(
    stage: &GeneratorStage,
    outputs: &HashMap<String, ResourceId>,
) -> Option<BTreeMap<String, ResourceId>> {
    stage
        .upstream
        .iter()
        .map(|edge| {
            outputs
                .get(&edge.stage)
                .map(|id| (edge.input.clone(), id.clone()))
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
