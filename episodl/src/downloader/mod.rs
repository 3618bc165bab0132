//! Download jobs and the machinery that runs them.

mod job;
mod manager;
mod orchestrator;
pub mod resume;

pub use job::{Job, JobParams, JobProgress, JobStatus};
pub use manager::DownloadManager;
pub use orchestrator::Orchestrator;
