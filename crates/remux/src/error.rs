use std::io;

use thiserror::Error;
use ts::StreamType;

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("transport stream error: {0}")]
    Ts(#[from] ts::TsError),

    #[error("mp4 error: {0}")]
    Mp4(#[from] mp4::Mp4Error),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(StreamType),

    #[error("invalid H.264 parameter sets: {0}")]
    ParameterSets(#[source] io::Error),

    #[error("no media frames were found in the input")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
