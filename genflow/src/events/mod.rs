//! Workflow event sinks.
//!
//! The workflow reports its progress as named events with an optional JSON
//! payload. Sinks decide what to do with them: drop them, log them through
//! `tracing`, or keep them for inspection in tests.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// Event names emitted by the workflow.
pub mod names {
    /// A workflow run started.
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    /// A workflow run finished successfully.
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    /// A stage was complete and its output reused.
    pub const GENERATOR_SKIPPED: &str = "generator.skipped";
    /// A stage started executing.
    pub const GENERATOR_STARTED: &str = "generator.started";
    /// A stage executed and recorded its activity.
    pub const GENERATOR_COMPLETED: &str = "generator.completed";
    /// A stage failed.
    pub const GENERATOR_FAILED: &str = "generator.failed";
    /// A scattered sub-task failed.
    pub const VARIANT_FAILED: &str = "variant.failed";
    /// Overlapping output fields were resolved by last-writer-wins.
    pub const MERGE_CONFLICT: &str = "merge.conflict";
}
