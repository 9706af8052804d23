//! The generator DAG and its topological resolution.

use super::GeneratorStage;
use crate::errors::{CycleDetectedError, GenflowError};
use std::collections::{HashMap, HashSet};

/// A directed acyclic graph of generator stages.
///
/// The DAG owns every stage; edges are stage names. Graphs are usually built
/// through [`super::DagBuilder`], but [`GeneratorDag::resolve`] re-checks for
/// unknown stages and cycles on every call since graphs may be assembled from
/// data.
#[derive(Debug, Clone)]
pub struct GeneratorDag {
    name: String,
    stages: HashMap<String, GeneratorStage>,
    /// Declaration order.
    order: Vec<String>,
}

impl GeneratorDag {
    /// Creates a DAG without validation. A later stage with a duplicate name
    /// replaces the earlier one.
    #[must_use]
    pub fn new(name: impl Into<String>, stages: Vec<GeneratorStage>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for stage in stages {
            if !map.contains_key(&stage.name) {
                order.push(stage.name.clone());
            }
            map.insert(stage.name.clone(), stage);
        }
        Self {
            name: name.into(),
            stages: map,
            order,
        }
    }

    /// Returns the DAG name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the DAG has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&GeneratorStage> {
        self.stages.get(name)
    }

    /// Returns the stages in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &GeneratorStage> {
        self.order.iter().filter_map(|name| self.stages.get(name))
    }

    /// Returns `target` and all of its transitive upstream stages, every
    /// upstream stage before its dependents. Ties are broken by the
    /// declaration order of upstream edges, left to right.
    ///
    /// # Errors
    ///
    /// Returns [`GenflowError::UnknownStage`] if `target` or any referenced
    /// upstream stage is absent, and [`GenflowError::Cycle`] if the walk
    /// revisits a stage already on the current path.
    pub fn resolve(&self, target: &str) -> Result<Vec<&GeneratorStage>, GenflowError> {
        let mut result = Vec::new();
        let mut done = HashSet::new();
        let mut path = Vec::new();
        self.visit(target, &mut done, &mut path, &mut result)?;
        Ok(result)
    }

    fn visit<'a>(
        &'a self,
        node: &str,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        result: &mut Vec<&'a GeneratorStage>,
    ) -> Result<(), GenflowError> {
        let stage = self
            .stages
            .get(node)
            .ok_or_else(|| GenflowError::unknown_stage(node))?;
        let name = stage.name.as_str();

        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(name.to_string());
            return Err(CycleDetectedError::new(cycle).into());
        }

        path.push(name);
        for upstream in stage.upstream_names() {
            self.visit(upstream, done, path, result)?;
        }
        path.pop();

        done.insert(name);
        result.push(stage);
        Ok(())
    }
}
