//! TS to MP4 remuxing.
//!
//! [`Remuxer`] consumes the decrypted transport stream segments of an episode,
//! part after part, and streams them into a single progressive MP4 with one
//! H.264 video track and one AAC audio track.

mod error;
mod remuxer;

use std::io::Cursor;

pub use error::RemuxError;
pub use remuxer::{AudioSource, RemuxSummary, Remuxer};
pub use ts::{EsFrame, demux};

pub type Result<T> = std::result::Result<T, RemuxError>;

/// Muxes already demultiplexed frames into an in-memory MP4.
///
/// `video` holds the H.264 frames of a transport stream, `audio` its AAC
/// frames; audio is interleaved by decode time.
pub fn mux(video: Vec<EsFrame>, audio: Vec<EsFrame>) -> Result<Vec<u8>> {
    let mut remuxer = Remuxer::new(Cursor::new(Vec::new()))?;
    remuxer.begin_part(0, AudioSource::Separate)?;
    for frame in audio {
        remuxer.push_audio_frame(frame)?;
    }
    for frame in video {
        remuxer.push_video_frame(frame)?;
    }
    let (cursor, _) = remuxer.finish()?;
    Ok(cursor.into_inner())
}
