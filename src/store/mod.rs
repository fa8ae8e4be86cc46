//! Recording store
//!
//! Filesystem-derived state of a room: naming conventions, the directory
//! scanner and the readiness barrier used between stages.

pub mod naming;
pub mod ready;
pub mod scanner;
pub mod types;

pub use ready::wait_for_artifact;
pub use scanner::RecordingStore;
pub use types::{
    ConvertedFile, DeletableFile, DiscoveryError, FilePair, FinalArtifact, Fragment, MediaType,
    MixedFile, ParseError, Record, ScanCategory,
};
