use thiserror::Error;

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown track index {0}")]
    UnknownTrack(usize),

    #[error("decode time went backwards on track {track}: {dts} after {previous}")]
    NonMonotonicDts { track: u32, previous: u64, dts: u64 },

    #[error("sample of {0} bytes does not fit a 32-bit size")]
    SampleTooLarge(usize),

    #[error("malformed box structure: {0}")]
    Malformed(String),
}
