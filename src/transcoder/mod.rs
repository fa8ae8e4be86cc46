//! Transcoder adapter
//!
//! Boundary to the external media engine. Every stage after demux goes
//! through the [`Transcoder`] trait, so the sequencer can be exercised
//! against a fake engine.

pub mod demux;
pub mod ffmpeg;

pub use demux::{DemuxError, Demuxer, NoopDemuxer, ShellDemuxer};
pub use ffmpeg::FfmpegTranscoder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Receives percent (0-100, fractional) while a call is running
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Transcoder errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Cannot probe {path:?}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Transcoder failed for {output:?}: {message}")]
    Transcode { output: PathBuf, message: String },

    #[error("Failed to start {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Media properties needed by the normalize stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
}

/// H.264 encoder speed/size trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Veryfast,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Veryfast => "veryfast",
        }
    }
}

/// Re-encode options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeOptions {
    /// Output height, width follows the source aspect ratio
    pub height: u32,
    pub video_codec: String,
    pub crf: u8,
    pub preset: Preset,
}

impl TranscodeOptions {
    /// Per-user normalization: 240p H.264, CRF 21, veryfast
    pub fn normalize() -> Self {
        Self {
            height: 240,
            video_codec: "libx264".to_string(),
            crf: 21,
            preset: Preset::Veryfast,
        }
    }

    /// Video filter for the height change
    ///
    /// `-2` keeps the aspect ratio while rounding the width to an even
    /// number, which libx264 requires.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height)
    }
}

/// How several per-user files are combined into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeMode {
    /// Videos side by side, audio channels merged (one channel per input)
    HstackAmerge,
}

impl MergeMode {
    /// filter_complex for `inputs` streams, `None` when no graph is needed
    pub fn filter_complex(&self, inputs: usize) -> Option<String> {
        match self {
            MergeMode::HstackAmerge if inputs > 1 => Some(format!(
                "hstack=inputs={};amerge=inputs={}",
                inputs, inputs
            )),
            MergeMode::HstackAmerge => None,
        }
    }

    /// Audio channel count of the merged output
    pub fn audio_channels(&self, inputs: usize) -> usize {
        match self {
            MergeMode::HstackAmerge => inputs.max(1),
        }
    }
}

/// External media engine
///
/// Calls report progress through `progress` and resolve to the written
/// output path. Implementations apply one fixed thread budget to every call.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read duration and video dimensions
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;

    /// Combine streams without re-encoding
    async fn mux(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError>;

    /// Re-encode a single input
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &TranscodeOptions,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError>;

    /// Spatial/audio merge of several inputs
    async fn merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mode: MergeMode,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError>;
}
