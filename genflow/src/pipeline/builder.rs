//! DAG builder with validation.

use super::{GeneratorDag, GeneratorStage};
use crate::errors::{ContractErrorInfo, CycleDetectedError, GenflowError, PipelineValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Builder for creating validated generator DAGs.
#[derive(Debug, Clone)]
pub struct DagBuilder {
    name: String,
    stages: HashMap<String, GeneratorStage>,
    stage_order: Vec<String>,
}

impl DagBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Adds a stage.
    ///
    /// Upstream stages may be declared later; dangling edges are reported by
    /// [`DagBuilder::build`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid on its own or its name is
    /// already taken.
    pub fn stage(mut self, stage: GeneratorStage) -> Result<Self, PipelineValidationError> {
        self.add_stage(stage)?;
        Ok(self)
    }

    /// Adds a stage in place.
    ///
    /// # Errors
    ///
    /// See [`DagBuilder::stage`].
    pub fn add_stage(&mut self, stage: GeneratorStage) -> Result<(), PipelineValidationError> {
        stage.validate()?;

        if self.stages.contains_key(&stage.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is declared twice",
                stage.name
            ))
            .with_stages(vec![stage.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "GENFLOW-005-INVALID_DAG",
                    format!("Duplicate stage '{}'", stage.name),
                )
                .with_fix_hint("Stage names must be unique within a DAG."),
            ));
        }

        self.stage_order.push(stage.name.clone());
        self.stages.insert(stage.name.clone(), stage);
        Ok(())
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the DAG.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is empty, an upstream edge points to an
    /// undeclared stage, or the edges form a cycle.
    pub fn build(self) -> Result<GeneratorDag, GenflowError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("DAG has no stages")
                .with_error_info(
                    ContractErrorInfo::new("GENFLOW-005-INVALID_DAG", "Cannot build an empty DAG")
                        .with_fix_hint("Declare at least one generator stage."),
                )
                .into());
        }

        for name in &self.stage_order {
            let stage = &self.stages[name];
            if let Some(missing) = stage.upstream_names().find(|u| !self.stages.contains_key(*u)) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' depends on unknown stage '{missing}'",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone(), missing.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "GENFLOW-005-INVALID_DAG",
                        format!("Upstream stage '{missing}' not found"),
                    )
                    .with_context_entry("stage", stage.name.clone()),
                )
                .into());
            }
        }

        self.detect_cycles()?;

        let stages = self
            .stage_order
            .iter()
            .filter_map(|name| self.stages.get(name).cloned())
            .collect();
        Ok(GeneratorDag::new(self.name, stages))
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut on_path, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_path.insert(node);
        path.push(node);

        if let Some(stage) = self.stages.get(node) {
            for upstream in stage.upstream_names() {
                if !visited.contains(upstream) {
                    if let Some(cycle) = self.dfs_cycle(upstream, visited, on_path, path) {
                        return Some(cycle);
                    }
                } else if on_path.contains(upstream) {
                    let start = path.iter().position(|n| *n == upstream).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                    cycle.push(upstream.to_string());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }
}

/// Serializable DAG definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagDefinition {
    /// DAG name.
    pub name: String,
    /// Stages in declaration order.
    pub stages: Vec<GeneratorStage>,
}

impl DagDefinition {
    /// Reads a definition from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GenflowError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Validates the definition and builds the DAG.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn into_dag(self) -> Result<GeneratorDag, GenflowError> {
        let mut builder = DagBuilder::new(self.name);
        for stage in self.stages {
            builder.add_stage(stage)?;
        }
        builder.build()
    }
}

impl From<&GeneratorDag> for DagDefinition {
    fn from(dag: &GeneratorDag) -> Self {
        Self {
            name: dag.name().to_string(),
            stages: dag.stages().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_accepts_forward_references() {
        let dag = DagBuilder::new("test")
            .stage(GeneratorStage::multi_variant("b", "bConfig").with_upstream("a"))
            .unwrap()
            .stage(GeneratorStage::multi_variant("a", "aConfig"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(dag.len(), 2);
        assert_eq!(dag.name(), "test");
    }

    #[test]
    fn test_build_rejects_dangling_upstream() {
        let err = DagBuilder::new("test")
            .stage(GeneratorStage::multi_variant("b", "bConfig").with_upstream("missing"))
            .unwrap()
            .build()
            .unwrap_err();

        assert!(err.is_configuration_error());
        assert_eq!(err.error_info().unwrap().code, "GENFLOW-005-INVALID_DAG");
    }

    #[test]
    fn test_build_rejects_cycle() {
        let err = DagBuilder::new("test")
            .stage(GeneratorStage::multi_variant("a", "aConfig").with_upstream("b"))
            .unwrap()
            .stage(GeneratorStage::multi_variant("b", "bConfig").with_upstream("a"))
            .unwrap()
            .build()
            .unwrap_err();

        assert!(matches!(err, GenflowError::Cycle(_)));
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(DagBuilder::new("empty").build().is_err());
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = DagBuilder::new("test")
            .stage(GeneratorStage::multi_variant("a", "aConfig"))
            .unwrap()
            .stage(GeneratorStage::multi_variant("a", "otherConfig"));
        assert!(result.is_err());
    }

    #[test]
    fn test_definition_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dag.json");
        std::fs::write(
            &path,
            r#"{"name": "two", "stages": [
                {"name": "a", "config_key": "aConfig", "kind": "multi_variant"},
                {"name": "b", "config_key": "bConfig", "kind": "relay", "upstream": [{"stage": "a"}]}
            ]}"#,
        )
        .unwrap();

        let dag = DagDefinition::from_file(&path).unwrap().into_dag().unwrap();
        assert_eq!(dag.resolve("b").unwrap().len(), 2);
    }
}
