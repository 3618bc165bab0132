use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HlsError {
    #[error("failed to parse {kind} playlist: {reason}")]
    Parse { kind: &'static str, reason: String },

    #[error("expected a {expected} playlist")]
    WrongPlaylistKind { expected: &'static str },

    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported key method {0}")]
    UnsupportedKeyMethod(String),

    #[error("key declaration without URI")]
    MissingKeyUri,

    #[error("invalid IV '{iv}': {reason}")]
    InvalidIv { iv: String, reason: String },

    #[error("master playlist has no usable variant streams")]
    NoRenditions,
}
