//! Activity recorder.

use crate::core::{ExecutionId, GeneratorTaskActivity, NewActivity, ResourceId};
use crate::errors::GenflowError;
use crate::pipeline::{with_retry_when, GeneratorStage, RetryConfig};
use crate::registry::{RegistryError, ResourceRegistry};
use std::sync::Arc;
use tracing::debug;

/// Writes the provenance activity of a successful stage execution.
#[derive(Clone)]
pub struct ActivityRecorder {
    registry: Arc<dyn ResourceRegistry>,
    execution: ExecutionId,
    retry: RetryConfig,
}

impl std::fmt::Debug for ActivityRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRecorder")
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

impl ActivityRecorder {
    /// Creates a recorder attributing activities to `execution`.
    #[must_use]
    pub fn new(registry: Arc<dyn ResourceRegistry>, execution: ExecutionId) -> Self {
        Self {
            registry,
            execution,
            retry: RetryConfig::no_retry(),
        }
    }

    /// Sets the retry policy for the idempotent lookups and deprecations.
    /// Creation is never retried.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Deprecates any live activity for `(stage.name, used_config)` and
    /// creates the new one.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::RegistryUnavailable`] on registry failure.
    pub async fn record(
        &self,
        stage: &GeneratorStage,
        used_config: &ResourceId,
        generated: &ResourceId,
    ) -> Result<GeneratorTaskActivity, GenflowError> {
        let prior = with_retry_when(&self.retry, &stage.name, RegistryError::is_transient, || {
            self.registry.find_activities(&stage.name, used_config)
        })
        .await?;

        for old in &prior {
            debug!(stage = %stage.name, activity = %old.id, "Deprecating superseded activity");
            with_retry_when(&self.retry, &stage.name, RegistryError::is_transient, || {
                self.registry.deprecate(&old.id)
            })
            .await?;
        }

        let new = NewActivity {
            generator_id: stage.name.clone(),
            used_config: used_config.clone(),
            generated: generated.clone(),
            was_influenced_by: Some(self.execution),
        };
        let id = self.registry.create_activity(new.clone()).await?;

        debug!(
            activity = %id,
            generator = %stage.name,
            used_config = %used_config,
            generated = %generated,
            execution = %self.execution,
            "Registered generator task activity"
        );
        Ok(GeneratorTaskActivity::from_new(id, new))
    }
}
