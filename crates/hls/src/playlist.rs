//! Master and media playlist parsing on top of `m3u8-rs`.

use std::sync::Arc;

use m3u8_rs::{AlternativeMediaType, Playlist, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use crate::{HlsError, KeyMethod, Rendition, Resolution, Result};

fn join(base: &Url, uri: &str) -> Result<Url> {
    base.join(uri).map_err(|e| HlsError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

/// Parses a `0x`-prefixed 128-bit hex IV.
pub fn parse_iv(value: &str) -> Result<[u8; 16]> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let mut iv = [0u8; 16];
    hex::decode_to_slice(digits, &mut iv).map_err(|e| HlsError::InvalidIv {
        iv: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(iv)
}

/// An `EXT-X-MEDIA` audio or subtitle alternate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternate {
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    /// Absent when the rendition is carried inside the variant stream.
    pub uri: Option<Url>,
    pub default: bool,
    pub autoselect: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterPlaylist {
    /// Variant streams, best to worst by bandwidth.
    pub renditions: Vec<Rendition>,
    pub audio: Vec<Alternate>,
    pub subtitles: Vec<Alternate>,
}

impl MasterPlaylist {
    /// Audio alternate for `rendition`, or `None` if audio is muxed into the
    /// video stream.
    pub fn audio_for(&self, rendition: &Rendition) -> Option<&Alternate> {
        pick_alternate(&self.audio, rendition.audio_group.as_deref())
    }

    pub fn subtitles_for(&self, rendition: &Rendition) -> Option<&Alternate> {
        pick_alternate(&self.subtitles, rendition.subtitle_group.as_deref())
    }
}

/// Prefers `AUTOSELECT=YES`, then `DEFAULT=YES`, then the first entry,
/// restricted to `group` when the variant names one.
fn pick_alternate<'a>(alternates: &'a [Alternate], group: Option<&str>) -> Option<&'a Alternate> {
    let candidates: Vec<&Alternate> = alternates
        .iter()
        .filter(|alt| group.is_none_or(|group| alt.group_id == group))
        .collect();
    let chosen = candidates
        .iter()
        .find(|alt| alt.autoselect)
        .or_else(|| candidates.iter().find(|alt| alt.default))
        .or_else(|| candidates.first())
        .copied()?;
    chosen.uri.is_some().then_some(chosen)
}

pub fn parse_master_playlist(data: &[u8], base: &Url) -> Result<MasterPlaylist> {
    let master = match parse_playlist_res(data) {
        Ok(Playlist::MasterPlaylist(master)) => master,
        Ok(Playlist::MediaPlaylist(_)) => {
            return Err(HlsError::WrongPlaylistKind { expected: "master" });
        }
        Err(e) => {
            return Err(HlsError::Parse {
                kind: "master",
                reason: e.to_string(),
            });
        }
    };

    let mut renditions = Vec::with_capacity(master.variants.len());
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        renditions.push(Rendition {
            bandwidth: variant.bandwidth,
            average_bandwidth: variant.average_bandwidth,
            resolution: variant
                .resolution
                .map(|r| Resolution::new(r.width as u32, r.height as u32)),
            codecs: variant.codecs.clone(),
            frame_rate: variant.frame_rate,
            uri: join(base, &variant.uri)?,
            audio_group: variant.audio.clone(),
            subtitle_group: variant.subtitles.clone(),
        });
    }
    if renditions.is_empty() {
        return Err(HlsError::NoRenditions);
    }
    // Stable sort keeps playlist order among equal bandwidths.
    renditions.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    let mut audio = Vec::new();
    let mut subtitles = Vec::new();
    for media in &master.alternatives {
        let target = match media.media_type {
            AlternativeMediaType::Audio => &mut audio,
            AlternativeMediaType::Subtitles => &mut subtitles,
            _ => continue,
        };
        target.push(Alternate {
            group_id: media.group_id.clone(),
            name: media.name.clone(),
            language: media.language.clone(),
            uri: media.uri.as_deref().map(|uri| join(base, uri)).transpose()?,
            default: media.default,
            autoselect: media.autoselect,
        });
    }

    debug!(
        renditions = renditions.len(),
        audio = audio.len(),
        subtitles = subtitles.len(),
        "parsed master playlist"
    );
    Ok(MasterPlaylist {
        renditions,
        audio,
        subtitles,
    })
}

/// An `EXT-X-KEY` declaration before the key resource is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeclaration {
    pub method: KeyMethod,
    pub uri: Url,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSegment {
    pub sequence: u64,
    pub url: Url,
    pub duration: Option<f64>,
    pub key: Option<Arc<KeyDeclaration>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub media_sequence: u64,
    pub end_list: bool,
    pub segments: Vec<PlaylistSegment>,
}

impl MediaPlaylist {
    /// Distinct key declarations in playlist order.
    pub fn keys(&self) -> Vec<Arc<KeyDeclaration>> {
        let mut keys: Vec<Arc<KeyDeclaration>> = Vec::new();
        for key in self.segments.iter().filter_map(|s| s.key.as_ref()) {
            if !keys.iter().any(|known| Arc::ptr_eq(known, key)) {
                keys.push(Arc::clone(key));
            }
        }
        keys
    }
}

/// Splits an attribute list into `(name, value)` pairs. Quoted values may
/// contain commas; the quotes are removed.
fn attributes(list: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = list.trim();
    while !rest.is_empty() {
        let Some((name, tail)) = rest.split_once('=') else {
            break;
        };
        let (value, tail) = match tail.strip_prefix('"') {
            Some(quoted) => match quoted.split_once('"') {
                Some((value, after)) => (value, after),
                None => (quoted, ""),
            },
            None => tail.split_once(',').unwrap_or((tail, "")),
        };
        pairs.push((name.trim(), value.trim()));
        rest = tail.trim_start_matches(',').trim_start();
    }
    pairs
}

/// Resolves one `EXT-X-KEY` into the key for the following segments:
/// `None` for `METHOD=NONE`, an error for anything but AES-128.
fn declare_key(
    method: &str,
    uri: Option<&str>,
    iv: Option<&str>,
    base: &Url,
) -> Result<Option<Arc<KeyDeclaration>>> {
    match method {
        "NONE" => Ok(None),
        "AES-128" => {
            let uri = uri.ok_or(HlsError::MissingKeyUri)?;
            Ok(Some(Arc::new(KeyDeclaration {
                method: KeyMethod::Aes128,
                uri: join(base, uri)?,
                iv: iv.map(parse_iv).transpose()?,
            })))
        }
        other => Err(HlsError::UnsupportedKeyMethod(other.to_string())),
    }
}

/// `EXT-X-KEY` tags that `m3u8-rs` could not parse end up as unknown tags.
fn declare_unparsed_key(rest: Option<&str>, base: &Url) -> Result<Option<Arc<KeyDeclaration>>> {
    let attrs = attributes(rest.unwrap_or_default());
    let find = |name: &str| attrs.iter().find(|(key, _)| *key == name).map(|(_, value)| *value);
    let method = find("METHOD").ok_or_else(|| HlsError::Parse {
        kind: "media",
        reason: format!("EXT-X-KEY without METHOD: {}", rest.unwrap_or_default()),
    })?;
    declare_key(method, find("URI"), find("IV"), base)
}

/// Parses a media playlist. Each key declaration applies to its segment and
/// every following one until the next declaration; `METHOD=NONE` clears it.
pub fn parse_media_playlist(data: &[u8], base: &Url) -> Result<MediaPlaylist> {
    let media = match parse_playlist_res(data) {
        Ok(Playlist::MediaPlaylist(media)) => media,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(HlsError::WrongPlaylistKind { expected: "media" });
        }
        Err(e) => {
            return Err(HlsError::Parse {
                kind: "media",
                reason: e.to_string(),
            });
        }
    };

    let mut current_key: Option<Arc<KeyDeclaration>> = None;
    let mut segments = Vec::with_capacity(media.segments.len());
    for (index, segment) in media.segments.iter().enumerate() {
        let mut declared = Vec::new();
        if let Some(key) = &segment.key {
            declared.push(declare_key(
                &key.method.to_string(),
                key.uri.as_deref(),
                key.iv.as_deref(),
                base,
            )?);
        }
        for tag in segment.unknown_tags.iter().filter(|tag| tag.tag == "X-KEY") {
            declared.push(declare_unparsed_key(tag.rest.as_deref(), base)?);
        }
        for key in declared {
            if current_key.is_some() && key.is_some() {
                warn!(segment = index, "key rotation inside one playlist");
            }
            current_key = key;
        }

        segments.push(PlaylistSegment {
            sequence: media.media_sequence + index as u64,
            url: join(base, &segment.uri)?,
            duration: (segment.duration > 0.0).then_some(f64::from(segment.duration)),
            key: current_key.clone(),
        });
    }

    Ok(MediaPlaylist {
        media_sequence: media.media_sequence,
        end_list: media.end_list,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example/show/ep1/master.m3u8").unwrap()
    }

    const MASTER: &str = r#"#EXTM3U
#EXT-X-VERSION:4
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="English",LANGUAGE="en",AUTOSELECT=YES,DEFAULT=YES,URI="audio/en.m3u8"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="Deutsch",LANGUAGE="de",AUTOSELECT=NO,DEFAULT=NO,URI="audio/de.m3u8"
#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID="subs",NAME="English",LANGUAGE="en",AUTOSELECT=YES,URI="subs/en.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=640x360,CODECS="avc1.4d401e,mp4a.40.2",AUDIO="aac",SUBTITLES="subs"
video/360.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5400000,AVERAGE-BANDWIDTH=5000000,RESOLUTION=1920x1080,FRAME-RATE=23.976,CODECS="avc1.640028,mp4a.40.2",AUDIO="aac",SUBTITLES="subs"
https://other.example/1080.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720,CODECS="avc1.64001f,mp4a.40.2",AUDIO="aac",SUBTITLES="subs"
video/720.m3u8
"#;

    #[test]
    fn master_sorts_renditions_by_bandwidth() {
        let master = parse_master_playlist(MASTER.as_bytes(), &base()).unwrap();
        let heights: Vec<_> = master.renditions.iter().map(|r| r.height()).collect();
        assert_eq!(heights, vec![Some(1080), Some(720), Some(360)]);

        let best = &master.renditions[0];
        assert_eq!(best.uri.as_str(), "https://other.example/1080.m3u8");
        assert_eq!(best.codecs.as_deref(), Some("avc1.640028,mp4a.40.2"));
        assert_eq!(best.average_bandwidth, Some(5_000_000));
        assert_eq!(
            master.renditions[1].uri.as_str(),
            "https://cdn.example/show/ep1/video/720.m3u8"
        );
    }

    #[test]
    fn master_picks_autoselect_alternates() {
        let master = parse_master_playlist(MASTER.as_bytes(), &base()).unwrap();
        let rendition = &master.renditions[0];
        let audio = master.audio_for(rendition).unwrap();
        assert_eq!(audio.language.as_deref(), Some("en"));
        assert_eq!(
            audio.uri.as_ref().unwrap().as_str(),
            "https://cdn.example/show/ep1/audio/en.m3u8"
        );
        let subs = master.subtitles_for(rendition).unwrap();
        assert_eq!(subs.name, "English");
    }

    #[test]
    fn muxed_audio_has_no_alternate() {
        let text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",NAME=\"Main\",DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,AUDIO=\"a\"\n\
v.m3u8\n";
        let master = parse_master_playlist(text.as_bytes(), &base()).unwrap();
        assert!(master.audio_for(&master.renditions[0]).is_none());
        assert!(master.subtitles_for(&master.renditions[0]).is_none());
    }

    #[test]
    fn master_rejects_media_playlist() {
        let err = parse_master_playlist(b"#EXTM3U\n#EXTINF:4,\na.ts\n", &base()).unwrap_err();
        assert_eq!(err, HlsError::WrongPlaylistKind { expected: "master" });
    }

    #[test]
    fn media_playlist_carries_keys_forward() {
        let text = r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:7
#EXT-X-KEY:METHOD=AES-128,URI="key1.bin"
#EXTINF:6.006,
seg7.ts
#EXTINF:5.5,
seg8.ts
#EXT-X-KEY:METHOD=AES-128,URI="https://keys.example/k2",IV=0x000102030405060708090a0b0c0d0e0f
#EXTINF:4.0,
seg9.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:2.0,
seg10.ts
#EXT-X-ENDLIST
"#;
        let media = parse_media_playlist(text.as_bytes(), &base()).unwrap();
        assert!(media.end_list);
        assert_eq!(media.segments.len(), 4);

        let sequences: Vec<u64> = media.segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![7, 8, 9, 10]);
        assert!((media.segments[0].duration.unwrap() - 6.006).abs() < 1e-4);

        let first = media.segments[0].key.as_ref().unwrap();
        assert_eq!(first.uri.as_str(), "https://cdn.example/show/ep1/key1.bin");
        assert_eq!(first.iv, None);
        assert!(Arc::ptr_eq(first, media.segments[1].key.as_ref().unwrap()));

        let second = media.segments[2].key.as_ref().unwrap();
        assert_eq!(second.iv.unwrap()[15], 0x0f);
        assert!(media.segments[3].key.is_none());
        assert_eq!(media.keys().len(), 2);
    }

    #[test]
    fn media_playlist_rejects_sample_aes() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"k\"\n#EXTINF:4,\na.ts\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            parse_media_playlist(text.as_bytes(), &base()),
            Err(HlsError::UnsupportedKeyMethod(_))
        ));
    }

    #[test]
    fn media_playlist_clears_key_on_method_none() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"k1\"\n#EXTINF:4,\na.ts\n\
#EXT-X-KEY:METHOD=NONE\n#EXTINF:4,\nb.ts\n#EXTINF:4,\nc.ts\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"k2\"\n#EXTINF:4,\nd.ts\n#EXT-X-ENDLIST\n";
        let media = parse_media_playlist(text.as_bytes(), &base()).unwrap();
        let keys: Vec<Option<&str>> = media
            .segments
            .iter()
            .map(|s| s.key.as_ref().map(|k| k.uri.path()))
            .collect();
        assert_eq!(
            keys,
            vec![Some("/show/ep1/k1"), None, None, Some("/show/ep1/k2")]
        );
    }

    #[test]
    fn media_playlist_rejects_key_without_method() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-KEY:URI=\"k\"\n#EXTINF:4,\na.ts\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            parse_media_playlist(text.as_bytes(), &base()),
            Err(HlsError::Parse { kind: "media", .. })
        ));
    }

    #[test]
    fn attribute_values_may_quote_commas() {
        assert_eq!(
            attributes(r#"METHOD=AES-128,URI="k?a=1,b=2",IV=0x01"#),
            vec![("METHOD", "AES-128"), ("URI", "k?a=1,b=2"), ("IV", "0x01")]
        );
        assert_eq!(attributes("METHOD=NONE"), vec![("METHOD", "NONE")]);
        assert!(attributes("").is_empty());
    }

    #[test]
    fn parses_iv_with_and_without_prefix() {
        assert_eq!(parse_iv("0x00000000000000000000000000000001").unwrap()[15], 1);
        assert_eq!(parse_iv("000000000000000000000000000000FF").unwrap()[15], 0xFF);
        assert!(parse_iv("0x1234").is_err());
    }
}
