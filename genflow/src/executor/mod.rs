//! External executor interface.
//!
//! Scattered sub-tasks are handed to an [`Executor`], which owns the retry
//! budget for a single sub-task. The engine only sees the final success (with
//! the parsed output file) or failure.

mod command;
mod process;

pub use command::{
    mask_secrets, render_core_command, render_exports, runtime_env, shell_quote, slurm_params,
    wrap_salloc, CommandBuilder, DEFAULT_ENV_VARS, MASKED_ENV_VARS,
};
pub use process::{LocalExecutor, SlurmExecutor};

use crate::variants::{CommandTemplate, VariantKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the output file every sub-task writes into its working directory.
pub const OUTPUT_FILE: &str = "output.json";

/// Scheduler resources requested for a sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    /// SLURM partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Number of nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    /// Number of tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntasks: Option<u32>,
    /// Wall time, e.g. `"8:00:00"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Memory, e.g. `"0"` or `"64G"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Whether nodes are allocated exclusively.
    pub exclusive: bool,
    /// Node constraint, e.g. `"cpu"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Account to charge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl ResourceRequest {
    /// Returns `self` with unset fields filled from `defaults`.
    #[must_use]
    pub fn or(&self, defaults: &Self) -> Self {
        Self {
            partition: self.partition.clone().or_else(|| defaults.partition.clone()),
            nodes: self.nodes.or(defaults.nodes),
            ntasks: self.ntasks.or(defaults.ntasks),
            time: self.time.clone().or_else(|| defaults.time.clone()),
            memory: self.memory.clone().or_else(|| defaults.memory.clone()),
            exclusive: self.exclusive || defaults.exclusive,
            constraint: self.constraint.clone().or_else(|| defaults.constraint.clone()),
            account: self.account.clone().or_else(|| defaults.account.clone()),
        }
    }
}

/// One scattered execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubTask {
    /// Stage name.
    pub stage: String,
    /// Selection (variant instance) name.
    pub selection: String,
    /// Variant identity.
    pub variant: VariantKey,
    /// Command template of the variant.
    pub command: CommandTemplate,
    /// Named inputs referenced by the command template.
    pub inputs: BTreeMap<String, Value>,
    /// Resource request.
    pub resources: ResourceRequest,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Isolated working directory.
    pub work_dir: PathBuf,
}

impl SubTask {
    /// Path of the declared output file.
    #[must_use]
    pub fn output_file(&self) -> PathBuf {
        self.work_dir.join(OUTPUT_FILE)
    }

    /// Path of the sub-task log file.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.work_dir
            .join("logs")
            .join(format!("{}__{}.log", self.stage, self.selection))
    }
}

/// Partial output of one successful sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskOutput {
    /// Selection name.
    pub selection: String,
    /// Variant identity.
    pub variant: VariantKey,
    /// Declared output fields.
    pub fields: BTreeMap<String, Value>,
}

impl SubTaskOutput {
    /// Reads the output file written by a sub-task. The file must hold a JSON
    /// object; its entries become the output fields.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::InvalidOutput`] if the file is missing or not
    /// a JSON object.
    pub async fn read(task: &SubTask, path: &Path) -> Result<Self, ExecutionError> {
        let invalid = |message: String| ExecutionError::InvalidOutput {
            path: path.to_path_buf(),
            message,
        };
        let bytes = tokio::fs::read(path).await.map_err(|e| invalid(e.to_string()))?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(invalid("output is not a JSON object".to_string()));
        };

        Ok(Self {
            selection: task.selection.clone(),
            variant: task.variant.clone(),
            fields: map.into_iter().collect(),
        })
    }

    /// Returns the registered resource id carried by the output (`id` or
    /// JSON-LD `@id`), if any.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.fields
            .get("id")
            .or_else(|| self.fields.get("@id"))
            .and_then(Value::as_str)
    }
}

/// Errors raised by executors.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The command exited unsuccessfully.
    #[error("command exited with {}, see {}", exit_label(.code), .log.display())]
    NonZeroExit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Log file holding the command output.
        log: PathBuf,
    },

    /// The process could not be started.
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    /// The command ran past its deadline.
    #[error("command timed out after {secs} seconds")]
    Timeout {
        /// The configured timeout.
        secs: u64,
    },

    /// The output file is missing or malformed.
    #[error("invalid output file {}: {message}", .path.display())]
    InvalidOutput {
        /// The output file.
        path: PathBuf,
        /// What was wrong.
        message: String,
    },

    /// The command could not be rendered.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Filesystem failure while preparing the sub-task.
    #[error("io error: {0}")]
    Io(String),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Runs sub-tasks.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executor name, for logs.
    fn name(&self) -> &str;

    /// Runs `task` to completion, applying the executor's own retry budget.
    async fn submit(&self, task: &SubTask) -> Result<SubTaskOutput, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(work_dir: &Path) -> SubTask {
        SubTask {
            stage: "connectome".to_string(),
            selection: "placeholder".to_string(),
            variant: VariantKey::new("connectome", "placeholder", "v1"),
            command: CommandTemplate::default(),
            inputs: BTreeMap::new(),
            resources: ResourceRequest::default(),
            env: BTreeMap::new(),
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[test]
    fn test_resource_request_fills_defaults() {
        let defaults = ResourceRequest {
            partition: Some("prod".to_string()),
            nodes: Some(1),
            constraint: Some("cpu".to_string()),
            ..ResourceRequest::default()
        };
        let request = ResourceRequest {
            nodes: Some(4),
            exclusive: true,
            ..ResourceRequest::default()
        };

        let merged = request.or(&defaults);
        assert_eq!(merged.partition.as_deref(), Some("prod"));
        assert_eq!(merged.nodes, Some(4));
        assert!(merged.exclusive);
    }

    #[tokio::test]
    async fn test_read_output_accepts_jsonld_id() {
        let dir = tempfile::tempdir().unwrap();
        let task = task(dir.path());
        std::fs::write(task.output_file(), json!({"@id": "r1", "edges": "e.h5"}).to_string()).unwrap();

        let output = SubTaskOutput::read(&task, &task.output_file()).await.unwrap();
        assert_eq!(output.resource_id(), Some("r1"));
        assert_eq!(output.fields["edges"], json!("e.h5"));
    }

    #[tokio::test]
    async fn test_read_output_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let task = task(dir.path());
        std::fs::write(task.output_file(), "[1, 2]").unwrap();

        let err = SubTaskOutput::read(&task, &task.output_file()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOutput { .. }));

        let missing = SubTaskOutput::read(&task, &dir.path().join("nope.json")).await;
        assert!(missing.is_err());
    }

    #[test]
    fn test_log_file_location() {
        let task = task(Path::new("/tmp/out/connectome/placeholder"));
        assert_eq!(
            task.log_file(),
            PathBuf::from("/tmp/out/connectome/placeholder/logs/connectome__placeholder.log")
        );
    }
}
