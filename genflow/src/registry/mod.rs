//! Resource registry abstraction.
//!
//! The registry is the only shared state of the engine. It stores versioned
//! resources and the provenance activities linking them. Writes are creations;
//! the one exception, deprecation, is idempotent.

mod dedup;
mod file;
mod memory;

pub use dedup::{content_digest, create_or_find, DIGEST_ATTRIBUTE};
pub use file::FileRegistry;
pub use memory::{InMemoryRegistry, RegistryState};

use crate::core::{Attributes, GeneratorTaskActivity, NewActivity, NewResource, Resource, ResourceId};
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by registry implementations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The backend could not be reached. Safe to retry.
    #[error("registry backend unavailable: {0}")]
    Unavailable(String),

    /// The referenced resource or activity does not exist.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// The backend failed to persist or decode its state.
    #[error("registry storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if the failure is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Protocol for a key/value resource registry with query-by-attribute.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Fetches a resource by id.
    async fn get_resource(&self, id: &ResourceId) -> RegistryResult<Option<Resource>>;

    /// Finds the first non-deprecated resource of `kind` carrying `attributes`.
    async fn find_resource_by_attributes(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> RegistryResult<Option<Resource>>;

    /// Creates a resource and returns its id.
    async fn create_resource(&self, resource: NewResource) -> RegistryResult<ResourceId>;

    /// Lists non-deprecated activities for the pair, oldest first.
    async fn find_activities(
        &self,
        generator_id: &str,
        used_config: &ResourceId,
    ) -> RegistryResult<Vec<GeneratorTaskActivity>>;

    /// Creates an activity and returns its id.
    async fn create_activity(&self, activity: NewActivity) -> RegistryResult<ResourceId>;

    /// Deprecates a resource or activity. Deprecating twice is a no-op.
    async fn deprecate(&self, id: &ResourceId) -> RegistryResult<()>;

    /// Returns the most recent non-deprecated activity for the pair.
    async fn find_activity(
        &self,
        generator_id: &str,
        used_config: &ResourceId,
    ) -> RegistryResult<Option<GeneratorTaskActivity>> {
        Ok(self.find_activities(generator_id, used_config).await?.pop())
    }
}
