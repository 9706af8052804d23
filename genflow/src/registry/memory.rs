//! In-memory registry.

use super::{RegistryError, RegistryResult, ResourceRegistry};
use crate::core::{
    Attributes, GeneratorTaskActivity, NewActivity, NewResource, Resource, ResourceId,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Serializable registry contents shared by the in-memory and file backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryState {
    /// Resources in creation order.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Activities in creation order.
    #[serde(default)]
    pub activities: Vec<GeneratorTaskActivity>,
}

impl RegistryState {
    pub(crate) fn get_resource(&self, id: &ResourceId) -> Option<Resource> {
        self.resources.iter().find(|r| &r.id == id).cloned()
    }

    pub(crate) fn find_resource(&self, kind: &str, attributes: &Attributes) -> Option<Resource> {
        self.resources
            .iter()
            .find(|r| !r.deprecated && r.matches(kind, attributes))
            .cloned()
    }

    pub(crate) fn insert_resource(&mut self, new: NewResource) -> ResourceId {
        let id = ResourceId::generate();
        self.resources.push(Resource::from_new(id.clone(), new));
        id
    }

    pub(crate) fn find_activities(
        &self,
        generator_id: &str,
        used_config: &ResourceId,
    ) -> Vec<GeneratorTaskActivity> {
        self.activities
            .iter()
            .filter(|a| !a.deprecated && a.is_for(generator_id, used_config))
            .cloned()
            .collect()
    }

    pub(crate) fn insert_activity(&mut self, new: NewActivity) -> ResourceId {
        let id = ResourceId::generate();
        self.activities
            .push(GeneratorTaskActivity::from_new(id.clone(), new));
        id
    }

    /// Marks `id` deprecated. Returns whether anything changed.
    pub(crate) fn deprecate(&mut self, id: &ResourceId) -> RegistryResult<bool> {
        if let Some(activity) = self.activities.iter_mut().find(|a| &a.id == id) {
            let changed = !activity.deprecated;
            activity.deprecated = true;
            return Ok(changed);
        }
        if let Some(resource) = self.resources.iter_mut().find(|r| &r.id == id) {
            let changed = !resource.deprecated;
            resource.deprecated = true;
            return Ok(changed);
        }
        Err(RegistryError::NotFound(id.clone()))
    }
}

/// Thread-safe in-memory registry.
///
/// Counts effective mutations (creations and deprecations that changed
/// something) so callers can verify that a re-run wrote nothing.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
    mutations: AtomicUsize,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with `state`.
    #[must_use]
    pub fn from_state(state: RegistryState) -> Self {
        Self {
            state: Mutex::new(state),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Returns the number of effective mutations so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> RegistryState {
        self.state.lock().clone()
    }

    /// Returns every activity, deprecated ones included.
    #[must_use]
    pub fn all_activities(&self) -> Vec<GeneratorTaskActivity> {
        self.state.lock().activities.clone()
    }

    /// Inserts a resource under a caller-chosen id, bypassing the mutation counter.
    pub fn seed(&self, id: impl Into<ResourceId>, new: NewResource) -> ResourceId {
        let id = id.into();
        self.state
            .lock()
            .resources
            .push(Resource::from_new(id.clone(), new));
        id
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryRegistry {
    async fn get_resource(&self, id: &ResourceId) -> RegistryResult<Option<Resource>> {
        Ok(self.state.lock().get_resource(id))
    }

    async fn find_resource_by_attributes(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> RegistryResult<Option<Resource>> {
        Ok(self.state.lock().find_resource(kind, attributes))
    }

    async fn create_resource(&self, resource: NewResource) -> RegistryResult<ResourceId> {
        let id = self.state.lock().insert_resource(resource);
        self.bump();
        Ok(id)
    }

    async fn find_activities(
        &self,
        generator_id: &str,
        used_config: &ResourceId,
    ) -> RegistryResult<Vec<GeneratorTaskActivity>> {
        Ok(self.state.lock().find_activities(generator_id, used_config))
    }

    async fn create_activity(&self, activity: NewActivity) -> RegistryResult<ResourceId> {
        let id = self.state.lock().insert_activity(activity);
        self.bump();
        Ok(id)
    }

    async fn deprecate(&self, id: &ResourceId) -> RegistryResult<()> {
        if self.state.lock().deprecate(id)? {
            self.bump();
        }
        Ok(())
    }
}
