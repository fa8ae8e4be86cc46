//! Artifact readiness barrier
//!
//! A stage may only scan for the outputs of the previous stage once those
//! outputs are on disk, non-empty, openable and no longer growing.

use crate::config::ReadinessConfig;
use crate::utils::error::{PipelineError, PipelineResult};
use std::path::Path;

/// Poll until `path` is a closed, readable file
pub async fn wait_for_artifact(path: &Path, config: &ReadinessConfig) -> PipelineResult<u64> {
    let mut last_len: Option<u64> = None;
    let mut stable = 0u32;

    for poll in 1..=config.max_polls {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                let len = meta.len();
                stable = if last_len == Some(len) { stable + 1 } else { 1 };
                last_len = Some(len);

                if stable >= config.stable_polls && tokio::fs::File::open(path).await.is_ok() {
                    tracing::debug!("Artifact ready after {} polls: {:?} ({} bytes)", poll, path, len);
                    return Ok(len);
                }
            }
            Ok(_) => {
                stable = 0;
                last_len = None;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                stable = 0;
                last_len = None;
            }
            Err(e) => return Err(e.into()),
        }

        if poll < config.max_polls {
            tokio::time::sleep(config.poll_interval()).await;
        }
    }

    Err(PipelineError::ArtifactNotReady {
        path: path.to_path_buf(),
        polls: config.max_polls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast(stable_polls: u32, max_polls: u32) -> ReadinessConfig {
        ReadinessConfig {
            poll_interval_ms: 1,
            stable_polls,
            max_polls,
        }
    }

    #[tokio::test]
    async fn test_existing_file_is_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        std::fs::write(&path, b"0123456789").unwrap();

        let len = wait_for_artifact(&path, &fast(2, 10)).await.unwrap();
        assert_eq!(len, 10);
    }

    #[tokio::test]
    async fn test_missing_file_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.mkv");

        let result = wait_for_artifact(&path, &fast(1, 3)).await;
        assert!(matches!(
            result,
            Err(PipelineError::ArtifactNotReady { polls: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_file_is_not_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mkv");
        std::fs::write(&path, b"").unwrap();

        assert!(wait_for_artifact(&path, &fast(1, 3)).await.is_err());
    }

    #[tokio::test]
    async fn test_file_appearing_later() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.mkv");
        let writer_path = path.clone();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tokio::fs::write(&writer_path, b"done").await.unwrap();
        });

        let config = ReadinessConfig {
            poll_interval_ms: 5,
            stable_polls: 2,
            max_polls: 200,
        };
        assert_eq!(wait_for_artifact(&path, &config).await.unwrap(), 4);
        writer.await.unwrap();
    }
}
