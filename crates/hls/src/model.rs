use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Resolution;

/// Identity and source of one episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentReference {
    /// Stable identifier, used as the manifest cache key.
    pub id: String,
    /// Either a service document or a master playlist.
    pub url: Url,
}

impl ContentReference {
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self { id: id.into(), url }
    }

    /// True when the URL points straight at an `.m3u8` playlist.
    pub fn is_playlist(&self) -> bool {
        self.url.path().ends_with(".m3u8")
    }
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}

/// One selectable video quality from a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub resolution: Option<Resolution>,
    pub codecs: Option<String>,
    pub frame_rate: Option<f64>,
    pub uri: Url,
    pub audio_group: Option<String>,
    pub subtitle_group: Option<String>,
}

impl Rendition {
    pub fn height(&self) -> Option<u32> {
        self.resolution.map(|r| r.height)
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolution {
            Some(resolution) => write!(f, "{resolution} @ {} bps", self.bandwidth),
            None => write!(f, "{} bps", self.bandwidth),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMethod {
    Aes128,
}

impl fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AES-128")
    }
}

/// Resolved key material for a run of segments.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaKey {
    pub method: KeyMethod,
    pub key: [u8; 16],
    /// Explicit IV; when absent the IV is derived from the media sequence number.
    pub iv: Option<[u8; 16]>,
}

impl fmt::Debug for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaKey")
            .field("method", &self.method)
            .field("key", &"<redacted>")
            .field("iv", &self.iv.map(hex::encode))
            .finish()
    }
}

/// One media segment of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Media sequence number.
    pub sequence: u64,
    pub url: Url,
    /// `EXTINF` duration in seconds.
    pub duration: Option<f64>,
    /// Key in effect for this segment; `None` means clear text.
    pub key: Option<Arc<MediaKey>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitles,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitles => "subtitles",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered list of segments. Keys travel with each segment so that a key
/// declared mid-playlist applies from that segment onward.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub kind: TrackKind,
    pub segments: Vec<SegmentRef>,
}

impl Track {
    pub fn new(kind: TrackKind, segments: Vec<SegmentRef>) -> Self {
        Self { kind, segments }
    }

    /// Sum of the declared segment durations in seconds.
    pub fn duration(&self) -> f64 {
        self.segments.iter().filter_map(|s| s.duration).sum()
    }

    /// Key of the first segment, if the track starts encrypted.
    pub fn key(&self) -> Option<&Arc<MediaKey>> {
        self.segments.first().and_then(|s| s.key.as_ref())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// One contiguous chunk of an episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub index: usize,
    pub rendition: Rendition,
    pub video: Track,
    /// Separate audio track; `None` when audio is muxed into the video stream.
    pub audio: Option<Track>,
    pub subtitles: Option<Track>,
}

impl Part {
    /// Duration of the part as declared by the video playlist.
    pub fn duration(&self) -> f64 {
        self.video.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(sequence: u64, duration: Option<f64>) -> SegmentRef {
        SegmentRef {
            sequence,
            url: Url::parse(&format!("https://cdn.example/seg{sequence}.ts")).unwrap(),
            duration,
            key: None,
        }
    }

    #[test]
    fn track_duration_skips_unknown_segments() {
        let track = Track::new(
            TrackKind::Video,
            vec![segment(0, Some(4.0)), segment(1, None), segment(2, Some(2.5))],
        );
        assert_eq!(track.duration(), 6.5);
        assert_eq!(track.len(), 3);
        assert!(track.key().is_none());
    }

    #[test]
    fn content_reference_kind_and_serde() {
        let direct = ContentReference::new(
            "ep1",
            Url::parse("https://cdn.example/master.m3u8?token=1").unwrap(),
        );
        assert!(direct.is_playlist());

        let json = serde_json::to_string(&direct).unwrap();
        let back: ContentReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, direct);

        let doc = ContentReference::new("ep2", Url::parse("https://api.example/feed/ep2").unwrap());
        assert!(!doc.is_playlist());
    }

    #[test]
    fn media_key_debug_hides_key() {
        let key = MediaKey {
            method: KeyMethod::Aes128,
            key: [7; 16],
            iv: None,
        };
        let debug = format!("{key:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("7, 7"));
    }
}
