//! Minimal MP4 (ISOBMFF) support: a progressive muxer for one H.264 and one
//! AAC track, plus a structural reader for inspecting the result.

mod box_utils;
mod error;
mod isobmff;
mod writer;

pub use error::Mp4Error;
pub use isobmff::{MovieSummary, TrackSummary, probe};
pub use media_types::Resolution;
pub use writer::{AudioTrackConfig, Mp4Muxer, Sample, TIMESCALE, TrackId, VideoTrackConfig};

pub type Result<T> = std::result::Result<T, Mp4Error>;
