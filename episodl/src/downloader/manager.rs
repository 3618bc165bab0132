//! Download manager: owns the scheduler queue and the registry of jobs.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use episodl_engine::RenditionSelector;
use tracing::{debug, info};

use super::job::{Job, JobParams};
use super::orchestrator::Orchestrator;
use crate::error::{Error, Result};
use crate::scheduler::PriorityTaskQueue;

/// Creates, tracks and restores download jobs.
pub struct DownloadManager {
    orchestrator: Orchestrator,
    queue: PriorityTaskQueue,
    jobs: DashMap<String, Arc<Job>>,
}

impl DownloadManager {
    pub fn new(orchestrator: Orchestrator, concurrency: usize) -> Self {
        Self {
            orchestrator,
            queue: PriorityTaskQueue::new(concurrency),
            jobs: DashMap::new(),
        }
    }

    pub fn queue(&self) -> &PriorityTaskQueue {
        &self.queue
    }

    /// Starts a job selecting renditions by `params.quality`.
    pub fn add(&self, params: JobParams, priority: i32) -> Result<Arc<Job>> {
        let selector = Arc::new(params.quality);
        self.add_with_selector(params, selector, priority)
    }

    /// Starts a job with a custom rendition selector.
    pub fn add_with_selector(
        &self,
        params: JobParams,
        selector: Arc<dyn RenditionSelector>,
        priority: i32,
    ) -> Result<Arc<Job>> {
        let job = self.register(params, selector, priority)?;
        info!(job_id = %job.id(), priority, "job added");
        let orchestrator = self.orchestrator.clone();
        let running = job.clone();
        tokio::spawn(async move { orchestrator.run(&running).await });
        Ok(job)
    }

    /// Re-creates a job from parameters persisted by the caller.
    ///
    /// A job whose temporary directory still exists is resumed. Otherwise,
    /// if every requested output is already present, the job is reported
    /// `Done` without running; failing both, it starts from scratch.
    pub fn restore(&self, params: JobParams, priority: i32) -> Result<Arc<Job>> {
        if params.temp_dir.is_dir() {
            info!(job_id = %params.id(), "resuming from temporary directory");
            return self.add(params, priority);
        }
        if params.outputs_exist() {
            let selector = Arc::new(params.quality);
            let job = self.register(params, selector, priority)?;
            debug!(job_id = %job.id(), "outputs already present");
            job.finish(Ok(()));
            return Ok(job);
        }
        self.add(params, priority)
    }

    fn register(
        &self,
        params: JobParams,
        selector: Arc<dyn RenditionSelector>,
        priority: i32,
    ) -> Result<Arc<Job>> {
        match self.jobs.entry(params.id().to_string()) {
            Entry::Occupied(entry) if !entry.get().is_finished() => {
                Err(Error::DuplicateJob(entry.key().clone()))
            }
            entry => {
                let job = Arc::new(Job::new(params, selector, priority, self.queue.clone()));
                entry.insert(job.clone());
                Ok(job)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// All known jobs, in no particular order.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Cancels the job if it is still running and forgets it.
    pub fn remove(&self, id: &str) -> Result<Arc<Job>> {
        let (_, job) = self
            .jobs
            .remove(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        job.cancel();
        debug!(job_id = id, "job removed");
        Ok(job)
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        info!(concurrency, "setting download concurrency");
        self.queue.set_capacity(concurrency);
    }

    pub fn cancel_all(&self) {
        for entry in self.jobs.iter() {
            entry.value().cancel();
        }
    }
}
