//! FFmpeg-backed transcoder
//!
//! Spawns `ffmpeg`/`ffprobe` as child processes. Progress is read from
//! `-progress pipe:1` on stdout while stderr is drained in the background
//! and kept for error reporting.

use super::{MediaInfo, MergeMode, ProgressFn, TranscodeError, TranscodeOptions, Transcoder};
use crate::config::PipelineConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Transcoder driving the ffmpeg command line tools
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    threads: u32,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, threads: u32) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            threads,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.ffprobe(), config.ffmpeg_threads)
    }

    /// Run ffprobe and return its JSON output
    async fn probe_json(&self, path: &Path, video_only: bool) -> Result<ProbeOutput, TranscodeError> {
        let output = Command::new(&self.ffprobe)
            .args(probe_args(path, video_only))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffprobe.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::Probe {
                path: path.to_path_buf(),
                message: format!("ffprobe failed: {}", stderr.trim()),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| TranscodeError::Probe {
            path: path.to_path_buf(),
            message: format!("Unexpected ffprobe output: {}", e),
        })
    }

    /// Longest duration among `inputs`, used as the progress reference
    ///
    /// Inputs that cannot be probed are ignored; with none left, progress
    /// events carry no percent.
    async fn reference_duration(&self, inputs: &[PathBuf]) -> Option<f64> {
        let mut longest: Option<f64> = None;
        for input in inputs {
            match self.probe_json(input, false).await {
                Ok(probe) => {
                    if let Some(duration) = probe.duration_seconds() {
                        longest = Some(longest.map_or(duration, |d: f64| d.max(duration)));
                    }
                }
                Err(e) => tracing::debug!("No duration for {:?}: {}", input, e),
            }
        }
        longest.filter(|d| *d > 0.0)
    }

    /// Spawn ffmpeg with `args` and forward progress until it exits
    async fn run(
        &self,
        label: &str,
        args: Vec<String>,
        output: &Path,
        duration_seconds: Option<f64>,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError> {
        tracing::info!("FFMPEG | {} | {:?} {}", label, self.ffmpeg, args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffmpeg.clone(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let tracker = ProgressTracker::new(duration_seconds);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = tracker.percent(&line) {
                    progress(percent);
                }
            }
        }

        let status = child.wait().await.map_err(|e| TranscodeError::Transcode {
            output: output.to_path_buf(),
            message: format!("Failed to wait for ffmpeg: {}", e),
        })?;

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(TranscodeError::Transcode {
                output: output.to_path_buf(),
                message: format!("ffmpeg exited with {}: {}", status, stderr_tail),
            });
        }

        tracing::info!("FFMPEG | {} | finished {:?}", label, output);
        Ok(output.to_path_buf())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let probe = self.probe_json(path, true).await?;
        probe.media_info().ok_or_else(|| TranscodeError::Probe {
            path: path.to_path_buf(),
            message: "No video stream".to_string(),
        })
    }

    async fn mux(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError> {
        let duration = self.reference_duration(inputs).await;
        let args = mux_args(inputs, output, self.threads);
        self.run("MUX", args, output, duration, progress).await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        options: &TranscodeOptions,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError> {
        let duration = self.reference_duration(&[input.to_path_buf()]).await;
        let args = transcode_args(input, output, options, self.threads);
        self.run("TRANSCODE", args, output, duration, progress).await
    }

    async fn merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mode: MergeMode,
        progress: ProgressFn<'_>,
    ) -> Result<PathBuf, TranscodeError> {
        let duration = self.reference_duration(inputs).await;
        let args = merge_args(inputs, output, mode, self.threads);
        self.run("MERGE", args, output, duration, progress).await
    }
}

/// Subset of `ffprobe -of json`
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeOutput {
    fn duration_seconds(&self) -> Option<f64> {
        self.format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.trim().parse().ok())
    }

    fn media_info(&self) -> Option<MediaInfo> {
        let stream = self.streams.first()?;
        Some(MediaInfo {
            duration_seconds: self.duration_seconds().unwrap_or(0.0),
            width: stream.width?,
            height: stream.height?,
        })
    }
}

/// Converts `-progress` key/value lines into percentages
struct ProgressTracker {
    duration_us: Option<f64>,
}

impl ProgressTracker {
    fn new(duration_seconds: Option<f64>) -> Self {
        Self {
            duration_us: duration_seconds.map(|d| d * 1_000_000.0),
        }
    }

    fn percent(&self, line: &str) -> Option<f64> {
        let total = self.duration_us?;
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // out_time_ms is in microseconds as well, kept for older ffmpeg builds
            "out_time_us" | "out_time_ms" => {
                let elapsed: f64 = value.parse().ok()?;
                Some((elapsed / total * 100.0).clamp(0.0, 100.0))
            }
            "progress" if value == "end" => Some(100.0),
            _ => None,
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn probe_args(path: &Path, video_only: bool) -> Vec<String> {
    let mut args = vec!["-v".to_string(), "error".to_string()];
    if video_only {
        args.extend([
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height:format=duration".to_string(),
        ]);
    } else {
        args.extend(["-show_entries".to_string(), "format=duration".to_string()]);
    }
    args.extend(["-of".to_string(), "json".to_string(), path_arg(path)]);
    args
}

fn input_args(inputs: &[PathBuf]) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    for input in inputs {
        args.extend(["-i".to_string(), path_arg(input)]);
    }
    args
}

fn tail_args(output: &Path, threads: u32) -> Vec<String> {
    let mut args = vec![
        "-threads".to_string(),
        threads.to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
    ];
    if output.extension().is_none() {
        args.extend(["-f".to_string(), "matroska".to_string()]);
    }
    args.push(path_arg(output));
    args
}

fn h264_args(options: &TranscodeOptions) -> Vec<String> {
    vec![
        "-vcodec".to_string(),
        options.video_codec.clone(),
        "-crf".to_string(),
        options.crf.to_string(),
        "-preset".to_string(),
        options.preset.as_str().to_string(),
    ]
}

fn mux_args(inputs: &[PathBuf], output: &Path, threads: u32) -> Vec<String> {
    let mut args = input_args(inputs);
    args.extend(["-codec".to_string(), "copy".to_string()]);
    args.extend(tail_args(output, threads));
    args
}

fn transcode_args(
    input: &Path,
    output: &Path,
    options: &TranscodeOptions,
    threads: u32,
) -> Vec<String> {
    let mut args = input_args(&[input.to_path_buf()]);
    args.extend(["-filter:v".to_string(), options.scale_filter()]);
    args.extend(h264_args(options));
    args.extend(tail_args(output, threads));
    args
}

fn merge_args(inputs: &[PathBuf], output: &Path, mode: MergeMode, threads: u32) -> Vec<String> {
    let mut args = input_args(inputs);
    if let Some(filter) = mode.filter_complex(inputs.len()) {
        args.extend(["-filter_complex".to_string(), filter]);
    }
    args.extend([
        "-ac".to_string(),
        mode.audio_channels(inputs.len()).to_string(),
    ]);
    args.extend(h264_args(&TranscodeOptions::normalize()));
    args.extend(tail_args(output, threads));
    args
}
