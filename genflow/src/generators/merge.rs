//! Merge strategies combining per-variant partial outputs into one stage output.
//!
//! Outputs are keyed by declared field name. Merging always walks the partial
//! outputs in declaration order and collects fields into a `BTreeMap`, so the
//! same inputs produce byte-identical JSON.

use crate::executor::SubTaskOutput;
use crate::pipeline::GeneratorStage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Merged output fields.
pub type OutputFields = BTreeMap<String, Value>;

/// A field produced by more than one variant and resolved by overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// The overlapping field.
    pub field: String,
    /// Selection whose value was discarded.
    pub overridden: String,
    /// Selection whose value was kept.
    pub winner: String,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field '{}' from '{}' overwritten by '{}'",
            self.field, self.overridden, self.winner
        )
    }
}

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// The merged fields.
    pub fields: OutputFields,
    /// Overlaps resolved by last-writer-wins.
    pub conflicts: Vec<MergeConflict>,
}

impl MergeOutcome {
    /// Returns the merged fields as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone().into_iter().collect())
    }
}

/// A pluggable merge step.
pub trait MergeStrategy: Send + Sync + fmt::Debug {
    /// Strategy name, for logs.
    fn name(&self) -> &str;

    /// Combines the partial outputs, given in declaration order.
    fn merge(&self, outputs: &[SubTaskOutput]) -> MergeOutcome;
}

/// Union of fields; on overlap the later variant wins and a conflict is noted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl MergeStrategy for LastWriterWins {
    fn name(&self) -> &str {
        "last_writer_wins"
    }

    fn merge(&self, outputs: &[SubTaskOutput]) -> MergeOutcome {
        merge_fields(outputs, &[])
    }
}

/// Concatenates the listed array fields across variants. Other fields fall
/// back to last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct Concatenate {
    fields: Vec<String>,
}

impl Concatenate {
    /// Creates a strategy concatenating `fields`.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl MergeStrategy for Concatenate {
    fn name(&self) -> &str {
        "concatenate"
    }

    fn merge(&self, outputs: &[SubTaskOutput]) -> MergeOutcome {
        merge_fields(outputs, &self.fields)
    }
}

fn merge_fields(outputs: &[SubTaskOutput], concatenated: &[String]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut writers: HashMap<&str, &str> = HashMap::new();

    for output in outputs {
        for (field, value) in &output.fields {
            if concatenated.iter().any(|c| c == field) {
                let slot = outcome
                    .fields
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = slot {
                    match value {
                        Value::Array(values) => items.extend(values.iter().cloned()),
                        other => items.push(other.clone()),
                    }
                }
                continue;
            }

            if let Some(previous) = writers.insert(field.as_str(), output.selection.as_str()) {
                outcome.conflicts.push(MergeConflict {
                    field: field.clone(),
                    overridden: previous.to_string(),
                    winner: output.selection.clone(),
                });
            }
            outcome.fields.insert(field.clone(), value.clone());
        }
    }
    outcome
}

/// Declarative merge step attached to a stage definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MergeSpec {
    /// Last-writer-wins over declared output fields.
    LastWriterWins,
    /// Concatenation of the listed array fields.
    Concatenate {
        /// Fields to concatenate.
        fields: Vec<String>,
    },
}

impl MergeSpec {
    /// Creates a concatenation spec.
    #[must_use]
    pub fn concatenate(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Concatenate {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Instantiates the strategy.
    #[must_use]
    pub fn strategy(&self) -> Arc<dyn MergeStrategy> {
        match self {
            Self::LastWriterWins => Arc::new(LastWriterWins),
            Self::Concatenate { fields } => Arc::new(Concatenate::new(fields.iter().cloned())),
        }
    }
}

/// Merge strategies keyed by stage name.
///
/// A registered override beats the stage's declared [`MergeSpec`], which
/// beats the last-writer-wins default.
#[derive(Debug, Clone, Default)]
pub struct MergeRegistry {
    overrides: HashMap<String, Arc<dyn MergeStrategy>>,
}

impl MergeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy for `stage`.
    #[must_use]
    pub fn with_strategy(mut self, stage: impl Into<String>, strategy: Arc<dyn MergeStrategy>) -> Self {
        self.overrides.insert(stage.into(), strategy);
        self
    }

    /// Returns the strategy to use for `stage`.
    #[must_use]
    pub fn strategy_for(&self, stage: &GeneratorStage) -> Arc<dyn MergeStrategy> {
        if let Some(strategy) = self.overrides.get(&stage.name) {
            return strategy.clone();
        }
        stage
            .merge
            .as_ref()
            .map_or_else(|| Arc::new(LastWriterWins) as Arc<dyn MergeStrategy>, MergeSpec::strategy)
    }
}
