//! Completion checker.
//!
//! A stage is complete when a non-deprecated activity exists for
//! `(stage name, config id)`. On top of that key, the activity's generated
//! resource must still exist and must have been derived from the same upstream
//! outputs the stage would consume now; otherwise a changed upstream stage
//! would leave its dependents looking complete.

use crate::core::{ExecutionId, GeneratorTaskActivity, ResourceId};
use crate::errors::GenflowError;
use crate::pipeline::{with_retry_when, GeneratorStage, RetryConfig};
use crate::registry::{RegistryError, ResourceRegistry};
use crate::settings::LookupPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Decides whether a stage's output already exists and is valid.
#[derive(Clone)]
pub struct CompletionChecker {
    registry: Arc<dyn ResourceRegistry>,
    lookup: LookupPolicy,
    retry: RetryConfig,
    isolated_to: Option<ExecutionId>,
}

impl std::fmt::Debug for CompletionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionChecker")
            .field("lookup", &self.lookup)
            .field("isolated_to", &self.isolated_to)
            .finish_non_exhaustive()
    }
}

impl CompletionChecker {
    /// Creates a checker with a single lookup and no retries.
    #[must_use]
    pub fn new(registry: Arc<dyn ResourceRegistry>) -> Self {
        Self {
            registry,
            lookup: LookupPolicy::default(),
            retry: RetryConfig::no_retry(),
            isolated_to: None,
        }
    }

    /// Sets the lookup polling policy.
    #[must_use]
    pub fn with_lookup_policy(mut self, lookup: LookupPolicy) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets the retry policy for transient registry failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Only accepts activities recorded by `execution`.
    #[must_use]
    pub fn isolated_to(mut self, execution: ExecutionId) -> Self {
        self.isolated_to = Some(execution);
        self
    }

    /// Returns the most recent non-deprecated activity for the pair, polling
    /// up to the lookup policy's attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::RegistryUnavailable`] if the registry keeps
    /// failing past the retry policy.
    pub async fn find_activity(
        &self,
        generator_id: &str,
        config: &ResourceId,
    ) -> Result<Option<GeneratorTaskActivity>, GenflowError> {
        let attempts = self.lookup.attempts.max(1);
        for attempt in 1..=attempts {
            let activities = with_retry_when(
                &self.retry,
                generator_id,
                RegistryError::is_transient,
                || self.registry.find_activities(generator_id, config),
            )
            .await?;

            let found = activities
                .into_iter()
                .filter(|a| self.isolated_to.map_or(true, |id| a.was_influenced_by == Some(id)))
                .last();
            if found.is_some() {
                return Ok(found);
            }
            if attempt < attempts {
                debug!(generator_id, %config, attempt, "Activity not found yet, polling again");
                tokio::time::sleep(self.lookup.interval()).await;
            }
        }
        Ok(None)
    }

    /// Returns the activity that makes `stage` complete for `config` given
    /// the upstream outputs it would consume, or `None` if it must execute.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::RegistryUnavailable`] on registry failure.
    pub async fn is_complete(
        &self,
        stage: &GeneratorStage,
        config: &ResourceId,
        upstream: &BTreeMap<String, ResourceId>,
    ) -> Result<Option<GeneratorTaskActivity>, GenflowError> {
        let Some(activity) = self.find_activity(&stage.name, config).await? else {
            return Ok(None);
        };

        let generated = with_retry_when(
            &self.retry,
            &stage.name,
            RegistryError::is_transient,
            || self.registry.get_resource(&activity.generated),
        )
        .await?;

        match generated {
            Some(resource) if !resource.deprecated && resource.derived_from() == *upstream => {
                Ok(Some(activity))
            }
            Some(resource) if !resource.deprecated => {
                debug!(
                    stage = %stage.name,
                    %config,
                    activity = %activity.id,
                    "Activity was derived from different upstream outputs"
                );
                Ok(None)
            }
            _ => {
                debug!(
                    stage = %stage.name,
                    activity = %activity.id,
                    generated = %activity.generated,
                    "Generated resource is missing or deprecated"
                );
                Ok(None)
            }
        }
    }
}
