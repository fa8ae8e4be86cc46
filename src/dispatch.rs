//! Job dispatcher boundary
//!
//! The queue engine is external; this module defines the interface the
//! pipeline consumes, the request/status shapes exchanged with the HTTP
//! layer, and an in-process FIFO dispatcher used by the CLI and tests.

use crate::pipeline::{JobContext, ProgressReporter, ProgressSink, Sequencer};
use crate::store::naming;
use crate::utils::error::ErrorResponse;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type JobHandle = u64;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    #[error("Unknown job {0}")]
    UnknownJob(JobHandle),
}

/// Payload of a conversion job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub room_id: String,
}

/// Request to run the pipeline for a room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub room_id: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Status answer for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobHandle,
    pub state: JobState,
    pub progress: Option<String>,
    pub reason: Option<String>,
    /// 1-based place in the waiting list, 0 when not waiting
    pub position: usize,
}

/// Queue operations consumed by the pipeline
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn enqueue(&self, data: JobData, priority: i32) -> Result<JobHandle, DispatchError>;

    async fn report_progress(&self, job: JobHandle, token: String) -> Result<(), DispatchError>;

    async fn get_state(&self, job: JobHandle) -> Result<JobState, DispatchError>;

    /// Waiting jobs in dispatch order
    async fn list_waiting(&self) -> Result<Vec<JobHandle>, DispatchError>;
}

/// 1-based position of `job` in `waiting`, 0 if absent
pub fn queue_position(waiting: &[JobHandle], job: JobHandle) -> usize {
    waiting
        .iter()
        .position(|id| *id == job)
        .map(|index| index + 1)
        .unwrap_or(0)
}

/// Validate a run request and hand it to the dispatcher
pub async fn submit(
    dispatcher: &dyn Dispatcher,
    request: RunRequest,
) -> Result<JobHandle, DispatchError> {
    if !naming::is_valid_room_id(&request.room_id) {
        return Err(DispatchError::InvalidRoomId(request.room_id));
    }

    let handle = dispatcher
        .enqueue(
            JobData {
                room_id: request.room_id.clone(),
            },
            request.priority,
        )
        .await?;
    tracing::info!("Queued room {} as job {}", request.room_id, handle);
    Ok(handle)
}

/// Progress sink forwarding tokens to `Dispatcher::report_progress`
///
/// Reporting is synchronous inside the pipeline, so tokens go through an
/// unbounded channel drained by a background task. The task ends once
/// every clone of the sink is dropped.
#[derive(Debug, Clone)]
pub struct DispatcherSink {
    tx: mpsc::UnboundedSender<String>,
}

impl DispatcherSink {
    pub fn spawn(dispatcher: Arc<dyn Dispatcher>, job: JobHandle) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let forwarder = tokio::spawn(async move {
            while let Some(token) = rx.recv().await {
                if let Err(e) = dispatcher.report_progress(job, token).await {
                    tracing::warn!("Failed to report progress for job {}: {}", job, e);
                }
            }
        });
        (Self { tx }, forwarder)
    }
}

impl ProgressSink for DispatcherSink {
    fn report(&self, token: String) {
        if self.tx.send(token).is_err() {
            tracing::debug!("Progress forwarder stopped");
        }
    }
}

/// Run one dispatched job to its terminal outcome
///
/// Every progress token has been delivered to the dispatcher when this
/// returns. Failures come back as the reason for the failure channel.
pub async fn process_job(
    sequencer: &Sequencer,
    dispatcher: Arc<dyn Dispatcher>,
    job: JobHandle,
    data: &JobData,
) -> Result<PathBuf, ErrorResponse> {
    let (sink, forwarder) = DispatcherSink::spawn(dispatcher, job);
    let reporter = ProgressReporter::new(
        JobContext::new(job, data.room_id.clone()),
        Arc::new(sink),
    );

    let result = sequencer.run(&reporter).await;
    drop(reporter);
    if let Err(e) = forwarder.await {
        tracing::warn!("Progress forwarder for job {} panicked: {}", job, e);
    }

    result
        .map(|outcome| outcome.artifact.path)
        .map_err(ErrorResponse::from)
}

struct LocalJob {
    data: JobData,
    priority: i32,
    state: JobState,
    progress: Option<String>,
    reason: Option<String>,
    artifact: Option<PathBuf>,
}

#[derive(Default)]
struct LocalQueue {
    next_id: JobHandle,
    jobs: HashMap<JobHandle, LocalJob>,
    waiting: VecDeque<JobHandle>,
}

/// In-process FIFO dispatcher
///
/// Single-flight per room: enqueueing a room that already has a waiting or
/// active job returns that job's handle.
#[derive(Default)]
pub struct LocalDispatcher {
    queue: Mutex<LocalQueue>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the oldest waiting job to active
    pub fn take_next(&self) -> Option<(JobHandle, JobData)> {
        let mut queue = self.queue.lock();
        let id = queue.waiting.pop_front()?;
        let job = queue.jobs.get_mut(&id)?;
        job.state = JobState::Active;
        tracing::debug!("Dispatching job {} (priority {})", id, job.priority);
        Some((id, job.data.clone()))
    }

    /// Record the terminal outcome of an active job
    pub fn finish(
        &self,
        id: JobHandle,
        result: &Result<PathBuf, ErrorResponse>,
    ) -> Result<(), DispatchError> {
        let mut queue = self.queue.lock();
        let job = queue.jobs.get_mut(&id).ok_or(DispatchError::UnknownJob(id))?;
        match result {
            Ok(path) => {
                job.state = JobState::Completed;
                job.artifact = Some(path.clone());
            }
            Err(response) => {
                job.state = JobState::Failed;
                job.reason = Some(response.message.clone());
            }
        }
        Ok(())
    }

    pub fn status(&self, id: JobHandle) -> Option<JobStatus> {
        let queue = self.queue.lock();
        let job = queue.jobs.get(&id)?;
        let waiting: Vec<JobHandle> = queue.waiting.iter().copied().collect();
        Some(JobStatus {
            id,
            state: job.state,
            progress: job.progress.clone(),
            reason: job.reason.clone(),
            position: queue_position(&waiting, id),
        })
    }

    pub fn artifact(&self, id: JobHandle) -> Option<PathBuf> {
        self.queue.lock().jobs.get(&id)?.artifact.clone()
    }

    /// Drain the queue one job at a time
    pub async fn run_all(self: &Arc<Self>, sequencer: &Sequencer) -> usize {
        let mut processed = 0;
        while let Some((id, data)) = self.take_next() {
            let dispatcher: Arc<dyn Dispatcher> = self.clone();
            let result = process_job(sequencer, dispatcher, id, &data).await;
            if let Err(e) = self.finish(id, &result) {
                tracing::warn!("{}", e);
            }
            processed += 1;
        }
        processed
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn enqueue(&self, data: JobData, priority: i32) -> Result<JobHandle, DispatchError> {
        let mut queue = self.queue.lock();

        if let Some((id, _)) = queue
            .jobs
            .iter()
            .find(|(_, job)| job.data.room_id == data.room_id && !job.state.is_terminal())
        {
            tracing::info!("Room {} already has job {} in flight", data.room_id, id);
            return Ok(*id);
        }

        queue.next_id += 1;
        let id = queue.next_id;
        tracing::debug!("Enqueue job {} (priority {})", id, priority);
        queue.jobs.insert(
            id,
            LocalJob {
                data,
                priority,
                state: JobState::Waiting,
                progress: None,
                reason: None,
                artifact: None,
            },
        );
        queue.waiting.push_back(id);
        Ok(id)
    }

    async fn report_progress(&self, job: JobHandle, token: String) -> Result<(), DispatchError> {
        let mut queue = self.queue.lock();
        let entry = queue.jobs.get_mut(&job).ok_or(DispatchError::UnknownJob(job))?;
        entry.progress = Some(token);
        Ok(())
    }

    async fn get_state(&self, job: JobHandle) -> Result<JobState, DispatchError> {
        self.queue
            .lock()
            .jobs
            .get(&job)
            .map(|entry| entry.state)
            .ok_or(DispatchError::UnknownJob(job))
    }

    async fn list_waiting(&self) -> Result<Vec<JobHandle>, DispatchError> {
        Ok(self.queue.lock().waiting.iter().copied().collect())
    }
}

impl std::fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("LocalDispatcher")
            .field("jobs", &queue.jobs.len())
            .field("waiting", &queue.waiting.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ReadinessConfig};
    use crate::transcoder::fake::FakeTranscoder;
    use crate::transcoder::NoopDemuxer;
    use std::fs;
    use tempfile::tempdir;

    fn sequencer(base: &std::path::Path, transcoder: FakeTranscoder) -> Sequencer {
        let config = PipelineConfig {
            videos_base_dir: base.to_path_buf(),
            readiness: ReadinessConfig {
                poll_interval_ms: 1,
                stable_polls: 1,
                max_polls: 5,
            },
            ..Default::default()
        };
        Sequencer::new(config, Arc::new(transcoder), Arc::new(NoopDemuxer))
    }

    #[test]
    fn test_queue_position() {
        assert_eq!(queue_position(&[4, 9, 2], 9), 2);
        assert_eq!(queue_position(&[4, 9, 2], 4), 1);
        assert_eq!(queue_position(&[4, 9, 2], 7), 0);
        assert_eq!(queue_position(&[], 1), 0);
    }

    #[test]
    fn test_run_request_priority_defaults() {
        let request: RunRequest = serde_json::from_str(r#"{"roomId":"1234"}"#).unwrap();
        assert_eq!(request.room_id, "1234");
        assert_eq!(request.priority, 0);
    }

    #[test]
    fn test_status_serialization() {
        let status = JobStatus {
            id: 3,
            state: JobState::Waiting,
            progress: None,
            reason: None,
            position: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "waiting");
        assert_eq!(json["position"], 2);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_room() {
        let dispatcher = LocalDispatcher::new();
        let result = submit(
            &dispatcher,
            RunRequest {
                room_id: "../x".to_string(),
                priority: 0,
            },
        )
        .await;
        assert!(matches!(result, Err(DispatchError::InvalidRoomId(_))));
        assert!(dispatcher.list_waiting().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_per_room() {
        let dispatcher = LocalDispatcher::new();
        let request = |room: &str| RunRequest {
            room_id: room.to_string(),
            priority: 0,
        };

        let first = submit(&dispatcher, request("abc")).await.unwrap();
        let other = submit(&dispatcher, request("def")).await.unwrap();
        let again = submit(&dispatcher, request("abc")).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(dispatcher.list_waiting().await.unwrap(), vec![first, other]);
        assert_eq!(dispatcher.status(other).unwrap().position, 2);
    }

    #[tokio::test]
    async fn test_process_job_forwards_progress() {
        let dir = tempdir().unwrap();
        let room = dir.path().join("abc");
        fs::create_dir_all(&room).unwrap();
        for name in ["videoroom-x-abc-1-1000-video", "videoroom-x-abc-1-1000-audio"] {
            fs::write(room.join(name), b"recorded").unwrap();
        }

        let dispatcher = Arc::new(LocalDispatcher::new());
        let id = submit(
            dispatcher.as_ref(),
            RunRequest {
                room_id: "abc".to_string(),
                priority: 1,
            },
        )
        .await
        .unwrap();

        let seq = sequencer(dir.path(), FakeTranscoder::default());
        assert_eq!(dispatcher.run_all(&seq).await, 1);

        let status = dispatcher.status(id).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress.as_deref(), Some("abc.mkv"));
        assert_eq!(status.position, 0);
        assert_eq!(dispatcher.artifact(id), Some(room.join("abc.mkv")));
    }

    #[tokio::test]
    async fn test_failed_job_carries_reason() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("abc")).unwrap();

        let dispatcher = Arc::new(LocalDispatcher::new());
        let id = dispatcher
            .enqueue(
                JobData {
                    room_id: "abc".to_string(),
                },
                0,
            )
            .await
            .unwrap();

        let seq = sequencer(dir.path(), FakeTranscoder::default());
        dispatcher.run_all(&seq).await;

        assert_eq!(dispatcher.get_state(id).await.unwrap(), JobState::Failed);
        let reason = dispatcher.status(id).unwrap().reason.unwrap();
        assert!(reason.contains("no-converted-files"));
    }
}
