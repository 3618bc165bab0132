use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WebVttError {
    #[error("missing WEBVTT signature")]
    MissingSignature,

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("malformed block at line {line}: '{content}'")]
    MalformedBlock { line: usize, content: String },

    #[error("{parts} subtitle parts but {durations} durations")]
    LengthMismatch { parts: usize, durations: usize },

    #[error("part {index} has invalid duration {value}")]
    InvalidDuration { index: usize, value: f64 },
}
