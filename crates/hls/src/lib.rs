//! HLS (HTTP Live Streaming) data model and playlist parsing.
//!
//! Only the VOD subset is handled: master playlists with variant streams and
//! audio/subtitle alternates, and media playlists with `EXTINF` durations and
//! `EXT-X-KEY` declarations.

pub mod error;
pub mod model;
pub mod playlist;

pub use error::HlsError;
pub use media_types::Resolution;
pub use model::{
    ContentReference, KeyMethod, MediaKey, Part, Rendition, SegmentRef, Track, TrackKind,
};
pub use playlist::{
    Alternate, KeyDeclaration, MasterPlaylist, MediaPlaylist, PlaylistSegment, parse_iv,
    parse_master_playlist, parse_media_playlist,
};

pub type Result<T> = std::result::Result<T, HlsError>;
