use std::fmt;

use hls::{HlsError, TrackKind};

/// Step of resolving or downloading an episode, used to tag errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Manifest,
    MasterPlaylist,
    MediaPlaylist(TrackKind),
    Key,
    RenditionSelection,
    Segment(u64),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => f.write_str("manifest"),
            Self::MasterPlaylist => f.write_str("master playlist"),
            Self::MediaPlaylist(kind) => write!(f, "{kind} playlist"),
            Self::Key => f.write_str("key"),
            Self::RenditionSelection => f.write_str("rendition selection"),
            Self::Segment(sequence) => write!(f, "segment {sequence}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error(transparent)]
    Hls(#[from] HlsError),

    #[error("invalid service document: {0}")]
    ServiceDocument(String),

    #[error("service document does not reference any stream")]
    NoStreams,

    #[error("key from {url} is {len} bytes, expected 16")]
    InvalidKeyLength { url: String, len: usize },

    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    UnalignedCiphertext(usize),

    #[error("no rendition matches {0}")]
    NoMatchingRendition(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Tags the error with the stage it happened in. Cancellation is left
    /// untagged.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Self::Cancelled => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Innermost stage the error was tagged with.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, source } => source.stage().or(Some(*stage)),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Connect and timeout failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Stage { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tags_wrap_the_message() {
        let err = EngineError::http_status("https://cdn.example/v.m3u8", 404)
            .at(Stage::MediaPlaylist(TrackKind::Video));
        assert_eq!(err.to_string(), "video playlist: HTTP 404 for https://cdn.example/v.m3u8");
        assert_eq!(err.stage(), Some(Stage::MediaPlaylist(TrackKind::Video)));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cancellation_is_never_tagged() {
        let err = EngineError::Cancelled.at(Stage::Segment(3));
        assert!(matches!(err, EngineError::Cancelled));
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), None);
    }
}
