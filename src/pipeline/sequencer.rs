//! Stage sequencer
//!
//! Drives one room through
//! `IdempotencyCheck -> DemuxConvert -> Mixing -> Normalize -> Merge -> Cleanup -> Done`.
//! Stages run strictly one after another, and so do the transcoder calls
//! inside a stage. Every stage re-scans the room directory; between stages
//! the outputs of the previous one are confirmed closed and readable
//! before the next scan.

use super::cleanup::{delete_all, CleanupReport, FileRemover, FsRemover};
use super::progress::{ProgressReporter, ProgressStage};
use crate::config::PipelineConfig;
use crate::pairing::pair;
use crate::store::{naming, wait_for_artifact, ConvertedFile, FinalArtifact, RecordingStore};
use crate::transcoder::{
    Demuxer, FfmpegTranscoder, MergeMode, NoopDemuxer, ShellDemuxer, TranscodeOptions, Transcoder,
};
use crate::utils::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    IdempotencyCheck,
    DemuxConvert,
    Mixing,
    Normalize,
    Merge,
    Cleanup,
    Done,
    Failed,
}

/// Stage plus the data it hands to the next one
enum State {
    IdempotencyCheck,
    DemuxConvert,
    Mixing,
    Normalize,
    Merge,
    Cleanup(FinalArtifact),
    Done {
        artifact: FinalArtifact,
        reused: bool,
        cleanup: Option<CleanupReport>,
    },
}

impl State {
    fn stage(&self) -> Stage {
        match self {
            State::IdempotencyCheck => Stage::IdempotencyCheck,
            State::DemuxConvert => Stage::DemuxConvert,
            State::Mixing => Stage::Mixing,
            State::Normalize => Stage::Normalize,
            State::Merge => Stage::Merge,
            State::Cleanup(_) => Stage::Cleanup,
            State::Done { .. } => Stage::Done,
        }
    }
}

/// Successful end of a job
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub artifact: FinalArtifact,
    /// The artifact existed before this run; nothing was transcoded
    pub reused: bool,
    pub cleanup: Option<CleanupReport>,
    /// Stages entered, in order
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs the conversion pipeline for one room at a time
pub struct Sequencer {
    config: PipelineConfig,
    store: RecordingStore,
    transcoder: Arc<dyn Transcoder>,
    demuxer: Arc<dyn Demuxer>,
    remover: Arc<dyn FileRemover>,
}

impl Sequencer {
    pub fn new(
        config: PipelineConfig,
        transcoder: Arc<dyn Transcoder>,
        demuxer: Arc<dyn Demuxer>,
    ) -> Self {
        let store = RecordingStore::new(config.videos_base_dir.clone());
        Self {
            config,
            store,
            transcoder,
            demuxer,
            remover: Arc::new(FsRemover),
        }
    }

    /// Replace how intermediates are deleted during cleanup
    pub fn with_remover(mut self, remover: Arc<dyn FileRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Sequencer backed by ffmpeg and the configured demux command
    pub fn from_config(config: PipelineConfig) -> Self {
        let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::from_config(&config));
        let demuxer: Arc<dyn Demuxer> = match config.demux_command {
            Some(ref template) => Arc::new(ShellDemuxer::new(
                template.clone(),
                config.videos_base_dir.clone(),
            )),
            None => Arc::new(NoopDemuxer),
        };
        Self::new(config, transcoder, demuxer)
    }

    /// Run the job described by `reporter` to a terminal outcome
    pub async fn run(&self, reporter: &ProgressReporter) -> PipelineResult<PipelineOutcome> {
        let job = reporter.job();
        let span = tracing::info_span!("job", job_id = job.job_id, room_id = %job.room_id);
        self.drive(reporter).instrument(span).await
    }

    async fn drive(&self, reporter: &ProgressReporter) -> PipelineResult<PipelineOutcome> {
        let room_id = reporter.job().room_id.as_str();
        let started_at = Utc::now();
        let mut stages = Vec::new();
        let mut state = State::IdempotencyCheck;

        tracing::info!("Processing room {}", room_id);

        loop {
            let stage = state.stage();
            stages.push(stage);
            tracing::info!("Entering stage {:?}", stage);

            let result = match state {
                State::IdempotencyCheck => self.check_existing(room_id).await.map(|existing| {
                    match existing {
                        Some(artifact) => State::Done {
                            artifact,
                            reused: true,
                            cleanup: None,
                        },
                        None => State::DemuxConvert,
                    }
                }),
                State::DemuxConvert => {
                    self.demux(reporter).await;
                    Ok(State::Mixing)
                }
                State::Mixing => self.mix(reporter).await.map(|_| State::Normalize),
                State::Normalize => self.normalize(reporter).await.map(|_| State::Merge),
                State::Merge => self.merge(reporter).await.map(State::Cleanup),
                State::Cleanup(artifact) => {
                    let cleanup = self.cleanup(room_id).await;
                    Ok(State::Done {
                        artifact,
                        reused: false,
                        cleanup: Some(cleanup),
                    })
                }
                State::Done {
                    artifact,
                    reused,
                    cleanup,
                } => {
                    let finished_at = Utc::now();
                    reporter.finished(&artifact.filename);
                    tracing::info!(
                        "Room {} done in {} ms: {:?}{}",
                        room_id,
                        (finished_at - started_at).num_milliseconds(),
                        artifact.path,
                        if reused { " (already processed)" } else { "" }
                    );
                    return Ok(PipelineOutcome {
                        artifact,
                        reused,
                        cleanup,
                        stages,
                        started_at,
                        finished_at,
                    });
                }
            };

            state = match result {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!("Stage {:?} failed for room {}: {}", stage, room_id, e);
                    tracing::info!("Entering stage {:?}", Stage::Failed);
                    return Err(e);
                }
            };
        }
    }

    /// The existing final artifact, if any
    pub async fn check_existing(&self, room_id: &str) -> PipelineResult<Option<FinalArtifact>> {
        Ok(self.store.final_artifact(room_id).await?)
    }

    /// Run the external demux step; failures are logged and ignored
    pub async fn demux(&self, reporter: &ProgressReporter) {
        let room_id = &reporter.job().room_id;
        reporter.stage(ProgressStage::ConvertMjr, None);

        if let Err(e) = self.demuxer.demux(room_id).await {
            tracing::warn!("Demux step failed for room {}, continuing: {}", room_id, e);
        }
    }

    /// Mux every (video, audio) pair without re-encoding
    pub async fn mix(&self, reporter: &ProgressReporter) -> PipelineResult<Vec<PathBuf>> {
        let room_id = reporter.job().room_id.as_str();
        let fragments = self.store.fragments(room_id).await?;
        let pairs = pair(&fragments);
        tracing::info!(
            "Found {} fragments forming {} pairs in room {}",
            fragments.len(),
            pairs.len(),
            room_id
        );

        let mut outputs = Vec::with_capacity(pairs.len());
        for file_pair in &pairs {
            let video = self.store.path_of(room_id, &file_pair.video().filename);
            let audio = self.store.path_of(room_id, &file_pair.audio().filename);
            for input in [&video, &audio] {
                wait_for_artifact(input, &self.config.readiness).await?;
            }

            let output = self
                .store
                .path_of(room_id, &naming::mixed_name(&file_pair.video().filename));

            reporter.stage(ProgressStage::Mixing, Some(file_pair.user_id));
            let progress = reporter.callback(ProgressStage::Mixing, Some(file_pair.user_id));
            let written = self
                .transcoder
                .mux(&[video, audio], &output, &progress)
                .await?;

            self.confirm(&written).await?;
            tracing::info!("Mixing for user {} finished", file_pair.user_id);
            outputs.push(written);
        }

        Ok(outputs)
    }

    /// Rescale and re-encode every mixed file
    pub async fn normalize(&self, reporter: &ProgressReporter) -> PipelineResult<Vec<PathBuf>> {
        let room_id = reporter.job().room_id.as_str();
        let mixed_files = self.store.mixed(room_id).await?;
        let options = TranscodeOptions::normalize();

        let mut outputs = Vec::with_capacity(mixed_files.len());
        for mixed in &mixed_files {
            let input = self.store.path_of(room_id, &mixed.filename);
            let output = self
                .store
                .path_of(room_id, &naming::converted_name(&mixed.filename));

            reporter.stage(ProgressStage::ConvertMkv, Some(mixed.user_id));
            let info = self.transcoder.probe(&input).await?;
            tracing::info!(
                "{}: duration {}s, {}x{}",
                mixed.filename,
                info.duration_seconds,
                info.width,
                info.height
            );

            let progress = reporter.callback(ProgressStage::ConvertMkv, Some(mixed.user_id));
            let written = self
                .transcoder
                .transcode(&input, &output, &options, &progress)
                .await?;

            self.confirm(&written).await?;
            tracing::info!("Converting for user {} finished", mixed.user_id);
            outputs.push(written);
        }

        Ok(outputs)
    }

    /// Merge the room's converted files into `{room}.mkv`
    pub async fn merge(&self, reporter: &ProgressReporter) -> PipelineResult<FinalArtifact> {
        let room_id = reporter.job().room_id.as_str();
        let converted = self.store.converted(room_id).await?;
        self.merge_files(reporter, converted).await
    }

    /// Merge an explicit list of converted files, ordered by user
    pub async fn merge_files(
        &self,
        reporter: &ProgressReporter,
        mut converted: Vec<ConvertedFile>,
    ) -> PipelineResult<FinalArtifact> {
        let room_id = reporter.job().room_id.as_str();
        if converted.is_empty() {
            return Err(PipelineError::NoConvertedFiles(room_id.to_string()));
        }

        converted.sort_by_key(|c| (c.user_id, c.timestamp_ms));
        let inputs: Vec<PathBuf> = converted
            .iter()
            .map(|c| self.store.path_of(room_id, &c.filename))
            .collect();

        let filename = naming::final_name(room_id);
        let output = self.store.path_of(room_id, &filename);

        reporter.stage(ProgressStage::Merge, None);
        let progress = reporter.callback(ProgressStage::Merge, None);
        let written = self
            .transcoder
            .merge(&inputs, &output, MergeMode::HstackAmerge, &progress)
            .await?;

        self.confirm(&written).await?;
        tracing::info!("Merge of {} files finished", inputs.len());

        Ok(FinalArtifact {
            room_id: room_id.to_string(),
            filename,
            path: written,
        })
    }

    /// Best-effort removal of intermediates
    pub async fn cleanup(&self, room_id: &str) -> CleanupReport {
        let deletable = match self.store.deletable(room_id).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Cannot list files to delete in room {}: {}", room_id, e);
                return CleanupReport::default();
            }
        };

        let paths: Vec<PathBuf> = deletable.into_iter().map(|f| f.path).collect();
        let report = delete_all(&paths, self.remover.as_ref()).await;
        tracing::info!(
            "Cleanup of room {}: {} deleted, {} failed",
            room_id,
            report.deleted(),
            report.failed()
        );
        report
    }

    async fn confirm(&self, path: &Path) -> PipelineResult<()> {
        wait_for_artifact(path, &self.config.readiness).await?;
        Ok(())
    }
}
