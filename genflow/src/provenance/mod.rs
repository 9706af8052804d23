//! Completion checking and activity recording.

mod completion;
mod recorder;

pub use completion::CompletionChecker;
pub use recorder::ActivityRecorder;
