//! AAC helpers: ADTS frame parsing and AudioSpecificConfig generation.

mod adts;
mod config;

pub use adts::{AdtsFrame, AdtsFrames, AdtsHeader, skip_id3v2};
pub use config::AudioSpecificConfig;

/// PCM samples carried by one AAC-LC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Sample rate for an MPEG-4 sampling frequency index.
pub fn sample_rate_from_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AacError {
    #[error("ADTS header needs {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("missing ADTS sync word")]
    NoSync,

    #[error("reserved sampling frequency index {0}")]
    InvalidFrequencyIndex(u8),

    #[error("ADTS frame length {0} is shorter than its header")]
    InvalidFrameLength(usize),
}

pub type Result<T> = std::result::Result<T, AacError>;
