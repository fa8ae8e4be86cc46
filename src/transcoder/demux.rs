//! External demux step
//!
//! Turns the recorder's raw capture containers into per-stream leaf files.
//! This runs outside the transcoder contract, usually as a shell script.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Placeholder substituted with the room id
pub const ROOM_PLACEHOLDER: &str = "{room}";

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Failed to start demux command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Demux command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Produces leaf files for a room
#[async_trait]
pub trait Demuxer: Send + Sync {
    async fn demux(&self, room_id: &str) -> Result<(), DemuxError>;
}

/// Runs a configured shell template, e.g. `bash ./convert-mjr.sh {room}`
#[derive(Debug, Clone)]
pub struct ShellDemuxer {
    template: String,
    working_dir: PathBuf,
}

impl ShellDemuxer {
    pub fn new(template: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Command line for `room_id`; the id is appended when the template has no placeholder
    pub fn command_line(&self, room_id: &str) -> String {
        if self.template.contains(ROOM_PLACEHOLDER) {
            self.template.replace(ROOM_PLACEHOLDER, room_id)
        } else {
            format!("{} {}", self.template, room_id)
        }
    }

    fn shell(command_line: &str) -> Command {
        #[cfg(windows)]
        {
            let mut command = Command::new("cmd");
            command.args(["/C", command_line]);
            command
        }

        #[cfg(not(windows))]
        {
            let mut command = Command::new("sh");
            command.args(["-c", command_line]);
            command
        }
    }
}

#[async_trait]
impl Demuxer for ShellDemuxer {
    async fn demux(&self, room_id: &str) -> Result<(), DemuxError> {
        let command_line = self.command_line(room_id);
        tracing::info!("Running demux command in {:?}: {}", self.working_dir, command_line);

        let output = Self::shell(&command_line)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(DemuxError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Demuxer for deployments whose recorder already writes leaf files
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDemuxer;

#[async_trait]
impl Demuxer for NoopDemuxer {
    async fn demux(&self, room_id: &str) -> Result<(), DemuxError> {
        tracing::debug!("No demux command configured, skipping room {}", room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_command_line_substitution() {
        let demuxer = ShellDemuxer::new("bash ./convert-mjr.sh {room}", "/storage/recordings");
        assert_eq!(demuxer.command_line("abc"), "bash ./convert-mjr.sh abc");

        let demuxer = ShellDemuxer::new("bash ./convert-mjr.sh", "/storage/recordings");
        assert_eq!(demuxer.command_line("abc"), "bash ./convert-mjr.sh abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        let demuxer = ShellDemuxer::new("touch {room}.done", dir.path());
        demuxer.demux("abc").await.unwrap();
        assert!(dir.path().join("abc.done").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_is_reported() {
        let dir = tempdir().unwrap();
        let demuxer = ShellDemuxer::new("exit 3 # {room}", dir.path());
        let result = demuxer.demux("abc").await;
        assert!(matches!(result, Err(DemuxError::Failed { .. })));
    }
}
