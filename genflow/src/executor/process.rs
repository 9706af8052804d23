//! Executors running sub-tasks as local shell processes.

use super::{
    mask_secrets, runtime_env, CommandBuilder, ExecutionError, Executor, SubTask, SubTaskOutput,
};
use crate::pipeline::with_retry;
use crate::settings::ExecutorSettings;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs sub-tasks with `sh -c` on the local machine.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    settings: ExecutorSettings,
}

impl LocalExecutor {
    /// Creates a local executor.
    #[must_use]
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, task: &SubTask) -> Result<SubTaskOutput, ExecutionError> {
        let env = runtime_env(&self.settings.env_passthrough, &task.env);
        let command = CommandBuilder::new(&task.command, &task.inputs)
            .with_env(env)
            .build()?;
        run_with_budget(&self.settings, task, &command).await
    }
}

/// Runs sub-tasks inside a `salloc`/`srun` allocation.
#[derive(Debug, Clone)]
pub struct SlurmExecutor {
    settings: ExecutorSettings,
    account: Option<String>,
}

impl SlurmExecutor {
    /// Creates a SLURM executor charging `account` unless the request names one.
    #[must_use]
    pub fn new(settings: ExecutorSettings, account: Option<String>) -> Self {
        Self { settings, account }
    }
}

#[async_trait]
impl Executor for SlurmExecutor {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn submit(&self, task: &SubTask) -> Result<SubTaskOutput, ExecutionError> {
        let mut request = task.resources.or(&self.settings.default_resources);
        if request.account.is_none() {
            request.account.clone_from(&self.account);
        }
        let env = runtime_env(&self.settings.env_passthrough, &task.env);
        let command = CommandBuilder::new(&task.command, &task.inputs)
            .with_env(env)
            .with_allocation(request)
            .build()?;
        run_with_budget(&self.settings, task, &command).await
    }
}

async fn run_with_budget(
    settings: &ExecutorSettings,
    task: &SubTask,
    command: &str,
) -> Result<SubTaskOutput, ExecutionError> {
    let key = format!("{}/{}", task.stage, task.selection);
    info!(
        stage = %task.stage,
        variant = %task.variant,
        command = %mask_secrets(command),
        "Submitting sub-task"
    );

    let result = with_retry(&settings.retry, &key, || {
        run_once(task, command, settings.timeout_secs)
    })
    .await;

    if let Err(err) = &result {
        warn!(stage = %task.stage, selection = %task.selection, error = %err, "Sub-task exhausted its retry budget");
    }
    result
}

async fn run_once(
    task: &SubTask,
    command: &str,
    timeout_secs: u64,
) -> Result<SubTaskOutput, ExecutionError> {
    let start = Instant::now();
    let log_path = task.log_file();
    if let Some(logs) = log_path.parent() {
        tokio::fs::create_dir_all(logs).await?;
    }

    let output_file = task.output_file();
    match tokio::fs::remove_file(&output_file).await {
        Ok(()) => debug!(path = %output_file.display(), "Removed stale output file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await?;
    log.write_all(format!("COMMAND:\n{}\n\n", mask_secrets(command)).as_bytes())
        .await?;
    log.flush().await?;
    let log = log.into_std().await;
    let stderr = log.try_clone()?;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(format!("set -e && {command}"))
        .current_dir(&task.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

    let status = if timeout_secs > 0 {
        tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait())
            .await
            .map_err(|_| ExecutionError::Timeout { secs: timeout_secs })??
    } else {
        child.wait().await?
    };

    debug!(
        stage = %task.stage,
        selection = %task.selection,
        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        code = ?status.code(),
        "Sub-task process finished"
    );

    if !status.success() {
        return Err(ExecutionError::NonZeroExit {
            code: status.code(),
            log: log_path,
        });
    }
    SubTaskOutput::read(task, &output_file).await
}
