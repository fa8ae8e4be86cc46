//! Conversion pipeline: stage sequencing, progress and cleanup

pub mod cleanup;
pub mod progress;
pub mod sequencer;

pub use cleanup::{delete_all, CleanupOutcome, CleanupReport, FileRemover, FsRemover};
pub use progress::{
    format_token, JobContext, MemorySink, ProgressReporter, ProgressSink, ProgressStage,
    TracingSink,
};
pub use sequencer::{PipelineOutcome, Sequencer, Stage};
