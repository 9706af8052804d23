//! Mock executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use crate::executor::{ExecutionError, Executor, SubTask, SubTaskOutput};

#[derive(Debug, Clone)]
enum Script {
    Succeed(Value),
    Fail(ExecutionError),
}

/// An executor that answers each `(stage, selection)` with a scripted
/// output or failure and records every submission.
///
/// Unscripted sub-tasks succeed with a single field named after the
/// selection, holding `"<stage>/<selection>"`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<(String, String), Script>>,
    submissions: Mutex<Vec<SubTask>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a successful output. `fields` must be a JSON object.
    pub fn succeed(&self, stage: &str, selection: &str, fields: Value) {
        self.script(stage, selection, Script::Succeed(fields));
    }

    /// Scripts a non-zero exit.
    pub fn fail(&self, stage: &str, selection: &str) {
        self.script(
            stage,
            selection,
            Script::Fail(ExecutionError::NonZeroExit {
                code: Some(1),
                log: format!("{stage}__{selection}.log").into(),
            }),
        );
    }

    /// Scripts an arbitrary failure.
    pub fn fail_with(&self, stage: &str, selection: &str, error: ExecutionError) {
        self.script(stage, selection, Script::Fail(error));
    }

    /// Removes every script.
    pub fn clear_scripts(&self) {
        self.scripts.lock().clear();
    }

    /// Returns all submissions in arrival order.
    #[must_use]
    pub fn submissions(&self) -> Vec<SubTask> {
        self.submissions.lock().clone()
    }

    /// Returns the submissions for one stage.
    #[must_use]
    pub fn submissions_for(&self, stage: &str) -> Vec<SubTask> {
        self.submissions
            .lock()
            .iter()
            .filter(|t| t.stage == stage)
            .cloned()
            .collect()
    }

    /// Number of submissions so far.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Forgets recorded submissions.
    pub fn reset(&self) {
        self.submissions.lock().clear();
    }

    fn script(&self, stage: &str, selection: &str, script: Script) {
        self.scripts
            .lock()
            .insert((stage.to_string(), selection.to_string()), script);
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, task: &SubTask) -> Result<SubTaskOutput, ExecutionError> {
        self.submissions.lock().push(task.clone());
        let script = self
            .scripts
            .lock()
            .get(&(task.stage.clone(), task.selection.clone()))
            .cloned();

        let fields = match script {
            Some(Script::Fail(error)) => return Err(error),
            Some(Script::Succeed(Value::Object(map))) => map.into_iter().collect(),
            Some(Script::Succeed(other)) => {
                return Err(ExecutionError::InvalidOutput {
                    path: task.output_file(),
                    message: format!("scripted output is not an object: {other}"),
                })
            }
            None => [(
                task.selection.clone(),
                Value::String(format!("{}/{}", task.stage, task.selection)),
            )]
            .into_iter()
            .collect(),
        };

        Ok(SubTaskOutput {
            selection: task.selection.clone(),
            variant: task.variant.clone(),
            fields,
        })
    }
}
