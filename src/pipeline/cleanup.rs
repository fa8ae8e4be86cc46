//! Removal of intermediate artifacts after a successful merge
//!
//! Every deletion is attempted independently. Failures are logged and
//! reported but never fail the job.

use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Removes one file
#[async_trait]
pub trait FileRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Deletes from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

#[async_trait]
impl FileRemover for FsRemover {
    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Result of one deletion attempt
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanupOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a cleanup pass
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
}

impl CleanupReport {
    pub fn deleted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.deleted()
    }
}

/// Delete every path, continuing past failures
pub async fn delete_all(paths: &[PathBuf], remover: &dyn FileRemover) -> CleanupReport {
    let mut report = CleanupReport::default();

    for path in paths {
        let error = match remover.remove(path).await {
            Ok(()) => {
                tracing::debug!("Deleted {:?}", path);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to delete {:?}: {}", path, e);
                Some(e.to_string())
            }
        };
        report.outcomes.push(CleanupOutcome {
            path: path.clone(),
            error,
        });
    }

    report
}
