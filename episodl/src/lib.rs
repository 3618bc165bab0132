//! Queued, resumable downloads of encrypted HLS episodes.
//!
//! Jobs go through a [`scheduler::PriorityTaskQueue`] that bounds how many run
//! at once; each admitted job resolves its playlists, stores the decrypted
//! segments in a private temporary directory, remuxes them into one MP4 and
//! merges the subtitles of all parts into one WebVTT file.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filename;
pub mod logging;
pub mod scheduler;

pub use config::AppConfig;
pub use downloader::{DownloadManager, Job, JobParams, JobProgress, JobStatus, Orchestrator};
pub use error::{Error, JobError, Result};
pub use scheduler::{Canceled, PriorityTaskQueue, QueuePermit, Ticket};
