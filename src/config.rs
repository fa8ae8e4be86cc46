//! Process-wide configuration
//!
//! Resolved once at startup and passed by value into the sequencer and the
//! transcoder. Nothing in the core reads the environment on its own.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Polling parameters for the "artifact available and closed" check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConfig {
    /// Delay between two metadata polls (milliseconds)
    pub poll_interval_ms: u64,
    /// Consecutive polls with an unchanged, non-zero size required
    pub stable_polls: u32,
    /// Give up after this many polls; only bounds the check that runs
    /// once a transcoder call has already returned
    pub max_polls: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            stable_polls: 2,
            max_polls: 240,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Converter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per room
    pub videos_base_dir: PathBuf,
    /// ffmpeg executable
    pub ffmpeg_path: PathBuf,
    /// ffprobe executable (derived from `ffmpeg_path` when unset)
    pub ffprobe_path: Option<PathBuf>,
    /// Thread budget passed to every ffmpeg invocation
    pub ffmpeg_threads: u32,
    /// Shell template for the demux step, `{room}` is substituted
    pub demux_command: Option<String>,
    pub readiness: ReadinessConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            videos_base_dir: PathBuf::from("/storage/recordings/"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: None,
            ffmpeg_threads: 4,
            demux_command: None,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ffmpeg_threads == 0 {
            return Err(ConfigError::Invalid(
                "ffmpegThreads must be at least 1".to_string(),
            ));
        }
        if self.readiness.stable_polls == 0 {
            return Err(ConfigError::Invalid(
                "readiness.stablePolls must be at least 1".to_string(),
            ));
        }
        if self.readiness.max_polls < self.readiness.stable_polls {
            return Err(ConfigError::Invalid(
                "readiness.maxPolls must not be lower than readiness.stablePolls".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved ffprobe executable
    ///
    /// Falls back to an `ffprobe` sitting next to the configured ffmpeg
    /// binary, or to `ffprobe` on the PATH when ffmpeg is a bare name.
    pub fn ffprobe(&self) -> PathBuf {
        if let Some(ref path) = self.ffprobe_path {
            return path.clone();
        }

        let probe_name = match self.ffmpeg_path.extension() {
            Some(ext) => format!("ffprobe.{}", ext.to_string_lossy()),
            None => "ffprobe".to_string(),
        };

        match self.ffmpeg_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(probe_name),
            _ => PathBuf::from(probe_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "videosBaseDir": "/data/rec", "ffmpegThreads": 2, "demuxCommand": "bash ./convert-mjr.sh {room}" }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.videos_base_dir, PathBuf::from("/data/rec"));
        assert_eq!(config.ffmpeg_threads, 2);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.readiness.stable_polls, 2);
        assert_eq!(
            config.demux_command.as_deref(),
            Some("bash ./convert-mjr.sh {room}")
        );
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = PipelineConfig {
            ffmpeg_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_ffprobe_next_to_ffmpeg() {
        let config = PipelineConfig {
            ffmpeg_path: PathBuf::from("/usr/bin/ffmpeg"),
            ..Default::default()
        };
        assert_eq!(config.ffprobe(), PathBuf::from("/usr/bin/ffprobe"));

        let config = PipelineConfig::default();
        assert_eq!(config.ffprobe(), PathBuf::from("ffprobe"));

        let config = PipelineConfig {
            ffprobe_path: Some(PathBuf::from("/opt/probe")),
            ..Default::default()
        };
        assert_eq!(config.ffprobe(), PathBuf::from("/opt/probe"));
    }
}
