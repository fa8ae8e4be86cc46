//! Error types and handling
//!
//! Crate-level error for a conversion job, plus the shape handed to the
//! dispatcher's failure channel.

use crate::store::DiscoveryError;
use crate::transcoder::TranscodeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal error that terminates a conversion job
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("no-converted-files: nothing to merge for room {0}")]
    NoConvertedFiles(String),

    #[error("Artifact not ready after {polls} polls: {path:?}")]
    ArtifactNotReady { path: PathBuf, polls: u32 },
}

impl PipelineError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Io(_) => "IO_ERROR",
            PipelineError::Discovery(_) => "DISCOVERY_ERROR",
            PipelineError::Transcode(TranscodeError::Probe { .. }) => "PROBE_ERROR",
            PipelineError::Transcode(_) => "TRANSCODE_ERROR",
            PipelineError::NoConvertedFiles(_) => "NO_CONVERTED_FILES",
            PipelineError::ArtifactNotReady { .. } => "ARTIFACT_NOT_READY",
        }
    }
}

/// Failure reason reported back to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(error: &PipelineError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<PipelineError> for ErrorResponse {
    fn from(error: PipelineError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_converted_files_reason() {
        let error = PipelineError::NoConvertedFiles("abc".to_string());
        let response = ErrorResponse::from(&error);
        assert_eq!(response.code, "NO_CONVERTED_FILES");
        assert!(response.message.contains("no-converted-files"));
    }

    #[test]
    fn test_probe_error_code() {
        let error = PipelineError::from(TranscodeError::Probe {
            path: PathBuf::from("/tmp/x"),
            message: "invalid data".to_string(),
        });
        assert_eq!(error.code(), "PROBE_ERROR");
    }
}
