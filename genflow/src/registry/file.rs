//! JSON-file-backed registry.
//!
//! The whole registry document is rewritten on every mutation (temp file and
//! rename), so an interrupted write never leaves a half-written registry and a
//! later process resumes from the last completed stage.

use super::{RegistryError, RegistryResult, RegistryState, ResourceRegistry};
use crate::core::{
    Attributes, GeneratorTaskActivity, NewActivity, NewResource, Resource, ResourceId,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Registry persisted to a single JSON document.
///
/// Mutations apply to a copy of the state that replaces the live one only
/// once the document is on disk; a failed write leaves nothing visible.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    state: Mutex<RegistryState>,
}

impl FileRegistry {
    /// Opens the registry at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RegistryError::Storage(format!("cannot decode {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => {
                return Err(RegistryError::Unavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), resources = state.resources.len(), "Opened file registry");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &RegistryState) -> RegistryResult<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
            }
        }
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ResourceRegistry for FileRegistry {
    async fn get_resource(&self, id: &ResourceId) -> RegistryResult<Option<Resource>> {
        Ok(self.state.lock().await.get_resource(id))
    }

    async fn find_resource_by_attributes(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> RegistryResult<Option<Resource>> {
        Ok(self.state.lock().await.find_resource(kind, attributes))
    }

    async fn create_resource(&self, resource: NewResource) -> RegistryResult<ResourceId> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let id = next.insert_resource(resource);
        self.persist(&next).await?;
        *state = next;
        Ok(id)
    }

    async fn find_activities(
        &self,
        generator_id: &str,
        used_config: &ResourceId,
    ) -> RegistryResult<Vec<GeneratorTaskActivity>> {
        Ok(self
            .state
            .lock()
            .await
            .find_activities(generator_id, used_config))
    }

    async fn create_activity(&self, activity: NewActivity) -> RegistryResult<ResourceId> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let id = next.insert_activity(activity);
        self.persist(&next).await?;
        *state = next;
        Ok(id)
    }

    async fn deprecate(&self, id: &ResourceId) -> RegistryResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if next.deprecate(id)? {
            self.persist(&next).await?;
            *state = next;
        }
        Ok(())
    }
}
