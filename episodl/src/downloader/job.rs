//! Jobs: what to download, where it stands, and the handles to control it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use episodl_engine::{Quality, RenditionSelector};
use hls::ContentReference;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::JobError;
use crate::scheduler::{PriorityTaskQueue, Ticket};

/// Everything needed to run, or later resume, one episode download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub content: ContentReference,
    /// Display name, also used for output file names.
    pub title: String,
    #[serde(default)]
    pub quality: Quality,
    /// Private directory for raw segments; its presence means the job can resume.
    pub temp_dir: PathBuf,
    /// `None` when the video is not wanted.
    pub video_path: Option<PathBuf>,
    /// `None` when subtitles are not wanted.
    pub subtitle_path: Option<PathBuf>,
}

impl JobParams {
    pub fn id(&self) -> &str {
        &self.content.id
    }

    /// True when every requested output is already on disk.
    pub fn outputs_exist(&self) -> bool {
        let wanted = [&self.video_path, &self.subtitle_path];
        wanted.iter().any(|path| path.is_some())
            && wanted
                .iter()
                .filter_map(|path| path.as_ref())
                .all(|path| path.is_file())
    }
}

/// Job state machine.
///
/// `Waiting -> FetchingMetadata -> DownloadingVideo -> DownloadingSubtitles
/// -> Postprocessing -> Done`, with `Canceled` and `Interrupted` reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    FetchingMetadata,
    DownloadingVideo,
    DownloadingSubtitles,
    Postprocessing,
    Done,
    Canceled,
    Interrupted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Interrupted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::FetchingMetadata => "fetching metadata",
            Self::DownloadingVideo => "downloading video",
            Self::DownloadingSubtitles => "downloading subtitles",
            Self::Postprocessing => "postprocessing",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus completion fraction in `[0, 1]`, `None` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub status: JobStatus,
    pub value: Option<f64>,
}

impl JobProgress {
    pub fn new(status: JobStatus, value: Option<f64>) -> Self {
        Self {
            status,
            value: value.map(|v| v.clamp(0.0, 1.0)),
        }
    }
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new(JobStatus::Waiting, None)
    }
}

impl fmt::Display for JobProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{} {:.0}%", self.status, value * 100.0),
            None => write!(f, "{}", self.status),
        }
    }
}

/// A download request and its live state.
///
/// Shared as `Arc<Job>` between the caller and the task running it.
pub struct Job {
    params: JobParams,
    selector: Arc<dyn RenditionSelector>,
    priority: Mutex<i32>,
    token: CancellationToken,
    progress: watch::Sender<JobProgress>,
    error: Mutex<Option<JobError>>,
    queue: PriorityTaskQueue,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

impl Job {
    pub(crate) fn new(
        params: JobParams,
        selector: Arc<dyn RenditionSelector>,
        priority: i32,
        queue: PriorityTaskQueue,
    ) -> Self {
        let (progress, _) = watch::channel(JobProgress::default());
        Self {
            params,
            selector,
            priority: Mutex::new(priority),
            token: CancellationToken::new(),
            progress,
            error: Mutex::new(None),
            queue,
        }
    }

    pub fn id(&self) -> &str {
        self.params.id()
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn selector(&self) -> &dyn RenditionSelector {
        self.selector.as_ref()
    }

    pub fn priority(&self) -> i32 {
        *self.priority.lock()
    }

    /// Updates the priority; a job still waiting for a slot is re-queued
    /// at its new position.
    pub fn set_priority(&self, priority: i32) {
        let mut current = self.priority.lock();
        *current = priority;
        if self.queue.change_priority(self.id(), priority) {
            debug!(job_id = %self.id(), priority, "re-queued waiting job");
        }
    }

    /// Joins the scheduler queue at the current priority.
    pub(crate) fn enqueue(&self) -> Ticket {
        let priority = self.priority.lock();
        self.queue.enqueue(self.id(), *priority)
    }

    pub fn cancel(&self) {
        if !self.is_finished() {
            info!(job_id = %self.id(), "cancel requested");
        }
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn progress(&self) -> JobProgress {
        *self.progress.borrow()
    }

    pub fn status(&self) -> JobStatus {
        self.progress().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.subscribe()
    }

    /// The failure that ended the job, if it did not reach `Done`.
    pub fn error(&self) -> Option<JobError> {
        self.error.lock().clone()
    }

    /// Waits until the job reaches a terminal state and returns it.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.subscribe();
        match rx.wait_for(|progress| progress.status.is_terminal()).await {
            Ok(progress) => progress.status,
            // The sender lives as long as `self`.
            Err(_) => self.status(),
        }
    }

    pub(crate) fn set_progress(&self, status: JobStatus, value: Option<f64>) {
        let progress = JobProgress::new(status, value);
        self.progress.send_if_modified(|current| {
            if current.status.is_terminal() || *current == progress {
                return false;
            }
            if current.status != status {
                info!(job_id = %self.id(), from = %current.status, to = %status, "job status changed");
            }
            *current = progress;
            true
        });
    }

    pub(crate) fn finish(&self, outcome: Result<(), JobError>) {
        let status = match &outcome {
            Ok(()) => JobStatus::Done,
            Err(JobError::Canceled) => JobStatus::Canceled,
            Err(JobError::Interrupted { .. }) => JobStatus::Interrupted,
        };
        if let Err(error) = outcome {
            *self.error.lock() = Some(error);
        }
        self.set_progress(status, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use episodl_engine::FirstAvailable;
    use url::Url;

    fn params(id: &str, dir: &std::path::Path) -> JobParams {
        JobParams {
            content: ContentReference::new(id, Url::parse("https://media.example/ep.m3u8").unwrap()),
            title: id.to_string(),
            quality: Quality::Best,
            temp_dir: dir.join(format!(".{id}.tmp")),
            video_path: Some(dir.join(format!("{id}.mp4"))),
            subtitle_path: Some(dir.join(format!("{id}.vtt"))),
        }
    }

    fn job(queue: &PriorityTaskQueue) -> Job {
        Job::new(
            params("ep", std::path::Path::new("/downloads")),
            Arc::new(FirstAvailable),
            0,
            queue.clone(),
        )
    }

    #[test]
    fn test_progress_display() {
        assert_eq!(JobProgress::new(JobStatus::DownloadingVideo, Some(0.43)).to_string(), "downloading video 43%");
        assert_eq!(JobProgress::new(JobStatus::Waiting, None).to_string(), "waiting");
        assert_eq!(JobProgress::new(JobStatus::Postprocessing, Some(1.7)).value, Some(1.0));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let job = job(&PriorityTaskQueue::new(1));
        job.set_progress(JobStatus::FetchingMetadata, None);
        job.finish(Err(JobError::Canceled));
        job.set_progress(JobStatus::DownloadingVideo, Some(0.5));
        assert_eq!(job.status(), JobStatus::Canceled);
        assert_eq!(job.error(), Some(JobError::Canceled));
    }

    #[test]
    fn test_outputs_exist_requires_every_requested_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = params("ep", dir.path());
        assert!(!params.outputs_exist());

        std::fs::write(params.video_path.as_ref().unwrap(), b"mp4").unwrap();
        assert!(!params.outputs_exist());
        params.subtitle_path = None;
        assert!(params.outputs_exist());

        params.video_path = None;
        assert!(!params.outputs_exist());
    }

    #[tokio::test]
    async fn test_set_priority_requeues_waiting_job() {
        let queue = PriorityTaskQueue::new(1);
        let _busy = queue.acquire("busy", 0, &CancellationToken::new()).await.unwrap();
        let _other = queue.enqueue("other", 1);
        let job = job(&queue);
        let _ticket = job.enqueue();
        assert_eq!(queue.waiting_jobs(), vec!["other", "ep"]);

        job.set_priority(3);
        assert_eq!(job.priority(), 3);
        assert_eq!(queue.waiting_jobs(), vec!["ep", "other"]);
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_status() {
        let job = Arc::new(job(&PriorityTaskQueue::new(1)));
        let waiter = tokio::spawn({
            let job = job.clone();
            async move { job.wait().await }
        });
        job.set_progress(JobStatus::DownloadingVideo, Some(0.1));
        job.finish(Ok(()));
        assert_eq!(waiter.await.unwrap(), JobStatus::Done);
    }

    #[test]
    fn test_params_round_trip_through_json() {
        let params = params("ep", std::path::Path::new("/downloads"));
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<JobParams>(&json).unwrap(), params);
    }
}
