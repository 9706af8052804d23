//! Engine settings.
//!
//! Settings are plain serde structs with defaults for every field, so a
//! settings file only needs to name what it changes. CLI flags are applied on
//! top through the `with_*` builders.

use crate::errors::GenflowError;
use crate::executor::{Executor, LocalExecutor, ResourceRequest, SlurmExecutor, DEFAULT_ENV_VARS};
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How many times an activity lookup is attempted before concluding "absent".
///
/// Some registries index writes asynchronously; polling covers that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupPolicy {
    /// Number of lookups, at least one.
    pub attempts: usize,
    /// Pause between lookups in milliseconds.
    pub interval_ms: u64,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            interval_ms: 1000,
        }
    }
}

impl LookupPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(attempts: usize, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    /// Returns the pause between lookups.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Where sub-tasks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Local shell processes.
    #[default]
    Local,
    /// `salloc`/`srun` allocations.
    Slurm,
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Launch mode.
    pub kind: LaunchMode,
    /// Retry budget for one sub-task.
    pub retry: RetryConfig,
    /// Resources used when a variant does not request them.
    pub default_resources: ResourceRequest,
    /// Environment variables forwarded to sub-tasks.
    pub env_passthrough: Vec<String>,
    /// Per-attempt timeout in seconds; zero disables it.
    pub timeout_secs: u64,
    /// Maximum number of sub-tasks of one stage in flight at once.
    pub max_concurrent: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            kind: LaunchMode::Local,
            retry: RetryConfig::default().with_max_attempts(2),
            default_resources: ResourceRequest::default(),
            env_passthrough: DEFAULT_ENV_VARS.iter().map(|s| (*s).to_string()).collect(),
            timeout_secs: 0,
            max_concurrent: 8,
        }
    }
}

impl ExecutorSettings {
    /// Sets the launch mode.
    #[must_use]
    pub fn with_kind(mut self, kind: LaunchMode) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default resources.
    #[must_use]
    pub fn with_default_resources(mut self, resources: ResourceRequest) -> Self {
        self.default_resources = resources;
        self
    }

    /// Sets the forwarded environment variables.
    #[must_use]
    pub fn with_env_passthrough(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.env_passthrough = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the scatter width.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Root of the per-stage working directories.
    pub output_dir: PathBuf,
    /// Account charged by SLURM allocations.
    pub account: Option<String>,
    /// Only accept activities recorded by the current workflow execution.
    pub isolated: bool,
    /// Retry policy for transient registry failures.
    pub registry_retry: RetryConfig,
    /// Activity lookup polling.
    pub activity_lookup: LookupPolicy,
    /// Executor settings.
    pub executor: ExecutorSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("genflow-output"),
            account: None,
            isolated: false,
            registry_retry: RetryConfig::default(),
            activity_lookup: LookupPolicy::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Reads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenflowError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the SLURM account.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Enables or disables isolated mode.
    #[must_use]
    pub fn with_isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Sets the registry retry policy.
    #[must_use]
    pub fn with_registry_retry(mut self, retry: RetryConfig) -> Self {
        self.registry_retry = retry;
        self
    }

    /// Sets the activity lookup policy.
    #[must_use]
    pub fn with_activity_lookup(mut self, policy: LookupPolicy) -> Self {
        self.activity_lookup = policy;
        self
    }

    /// Sets the executor settings.
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorSettings) -> Self {
        self.executor = executor;
        self
    }

    /// Instantiates the configured executor.
    #[must_use]
    pub fn build_executor(&self) -> Arc<dyn Executor> {
        match self.executor.kind {
            LaunchMode::Local => Arc::new(LocalExecutor::new(self.executor.clone())),
            LaunchMode::Slurm => Arc::new(SlurmExecutor::new(
                self.executor.clone(),
                self.account.clone(),
            )),
        }
    }
}
