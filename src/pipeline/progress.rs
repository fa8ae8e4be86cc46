//! Progress reporting
//!
//! Tokens have the layout `{jobId}:{roomId}:{stage}[:{userId}][:{percent}]`
//! and are opaque to the pipeline. They are handed to a [`ProgressSink`],
//! usually the dispatcher's progress channel.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of the running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub job_id: u64,
    pub room_id: String,
}

impl JobContext {
    pub fn new(job_id: u64, room_id: impl Into<String>) -> Self {
        Self {
            job_id,
            room_id: room_id.into(),
        }
    }
}

/// Stage markers used in progress tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    ConvertMjr,
    Mixing,
    ConvertMkv,
    Merge,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::ConvertMjr => "convert-mjr",
            ProgressStage::Mixing => "mixing",
            ProgressStage::ConvertMkv => "convert-mkv",
            ProgressStage::Merge => "merge",
        }
    }
}

/// Render a progress token
pub fn format_token(
    job_id: u64,
    room_id: &str,
    stage: &str,
    user_id: Option<u64>,
    percent: Option<f64>,
) -> String {
    let mut token = format!("{}:{}:{}", job_id, room_id, stage);
    if let Some(user_id) = user_id {
        token.push_str(&format!(":{}", user_id));
    }
    if let Some(percent) = percent {
        token.push_str(&format!(":{}", percent));
    }
    token
}

/// Receiver of progress tokens
pub trait ProgressSink: Send + Sync {
    fn report(&self, token: String);
}

/// Logs tokens, for runs without a dispatcher
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&self, token: String) {
        tracing::info!("progress {}", token);
    }
}

/// Keeps every token in memory; the last one is the job's current progress
#[derive(Debug, Default)]
pub struct MemorySink {
    tokens: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    pub fn latest(&self) -> Option<String> {
        self.tokens.lock().last().cloned()
    }
}

impl ProgressSink for MemorySink {
    fn report(&self, token: String) {
        self.tokens.lock().push(token);
    }
}

/// Formats and emits tokens for one job
#[derive(Clone)]
pub struct ProgressReporter {
    job: JobContext,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(job: JobContext, sink: Arc<dyn ProgressSink>) -> Self {
        Self { job, sink }
    }

    pub fn job(&self) -> &JobContext {
        &self.job
    }

    /// Stage marker without percent
    pub fn stage(&self, stage: ProgressStage, user_id: Option<u64>) {
        self.emit(stage, user_id, None);
    }

    pub fn percent(&self, stage: ProgressStage, user_id: Option<u64>, percent: f64) {
        self.emit(stage, user_id, Some(percent));
    }

    /// Final token: the artifact's file name
    pub fn finished(&self, artifact_filename: &str) {
        self.sink.report(artifact_filename.to_string());
    }

    /// Callback suitable for a transcoder call
    pub fn callback(
        &self,
        stage: ProgressStage,
        user_id: Option<u64>,
    ) -> impl Fn(f64) + Send + Sync + '_ {
        move |percent| self.percent(stage, user_id, percent)
    }

    fn emit(&self, stage: ProgressStage, user_id: Option<u64>, percent: Option<f64>) {
        let token = format_token(
            self.job.job_id,
            &self.job.room_id,
            stage.as_str(),
            user_id,
            percent,
        );
        tracing::debug!("{}", token);
        self.sink.report(token);
    }
}
