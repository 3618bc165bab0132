//! Application-wide error types.

use std::path::PathBuf;

use episodl_engine::EngineError;
use remux::RemuxError;
use thiserror::Error;
use webvtt::WebVttError;

use crate::downloader::JobStatus;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("remux failed: {0}")]
    Remux(#[from] RemuxError),

    #[error("subtitle merge failed: {0}")]
    Subtitles(#[from] WebVttError),

    #[error("subtitle segment {url} is not valid UTF-8: {source}")]
    SubtitleEncoding {
        url: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("job {0} already exists")]
    DuplicateJob(String),

    #[error("canceled")]
    Canceled,
}

impl Error {
    /// Returns a closure wrapping an I/O error with the path it concerns.
    pub fn file(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::File { path, source }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Engine(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// How a job ended when it did not reach `Done`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("canceled")]
    Canceled,

    /// A data or network failure after the job started; the temporary
    /// directory is kept so the job can resume.
    #[error("interrupted while {status}: {message}")]
    Interrupted { status: JobStatus, message: String },
}

impl JobError {
    pub fn interrupted(status: JobStatus, error: &Error) -> Self {
        Self::Interrupted {
            status,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use episodl_engine::Stage;

    #[test]
    fn test_cancellation_looks_through_engine_errors() {
        assert!(Error::Canceled.is_cancelled());
        assert!(Error::from(EngineError::Cancelled.at(Stage::Manifest)).is_cancelled());
        assert!(!Error::from(EngineError::NoStreams).is_cancelled());
    }

    #[test]
    fn test_interrupted_message_names_status_and_stage() {
        let error = Error::from(EngineError::http_status("https://cdn.example/a.ts", 403).at(Stage::Segment(7)));
        let job_error = JobError::interrupted(JobStatus::DownloadingVideo, &error);
        assert_eq!(
            job_error.to_string(),
            "interrupted while downloading video: segment 7: HTTP 403 for https://cdn.example/a.ts"
        );
    }

    #[test]
    fn test_file_errors_carry_path() {
        let error = Error::file("/tmp/x/Seg0001.ts")(std::io::Error::other("disk full"));
        assert_eq!(error.to_string(), "/tmp/x/Seg0001.ts: disk full");
    }
}
