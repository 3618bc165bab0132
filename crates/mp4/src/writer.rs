//! Progressive (non-fragmented) MP4 writer.
//!
//! Layout is `ftyp`, `mdat`, `moov`: sample data is streamed into `mdat` as it
//! arrives and the sample tables are written once in [`Mp4Muxer::finish`].

use std::io::{Seek, SeekFrom, Write};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::box_utils::{write_box, write_full_box};
use crate::{Mp4Error, Result};

/// Media timescale shared by every track: milliseconds.
pub const TIMESCALE: u32 = 1000;

const MDAT_HEADER_SIZE: u64 = 16;
const LANGUAGE_UND: u16 = 0x55C4;
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub width: u32,
    pub height: u32,
    /// Serialized `AVCDecoderConfigurationRecord`.
    pub avcc: Bytes,
}

#[derive(Debug, Clone)]
pub struct AudioTrackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// MPEG-4 AudioSpecificConfig.
    pub audio_specific_config: Bytes,
    /// Duration of one frame in milliseconds, used for the last sample.
    pub frame_duration_ms: u32,
}

#[derive(Debug, Clone)]
enum TrackCodec {
    Avc(VideoTrackConfig),
    Aac(AudioTrackConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(usize);

/// One sample handed to [`Mp4Muxer::write_sample`]. Times are milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub dts: u64,
    pub pts: u64,
    pub sync: bool,
    pub data: &'a [u8],
}

#[derive(Debug)]
struct Track {
    id: u32,
    codec: TrackCodec,
    sizes: Vec<u32>,
    dts: Vec<u64>,
    cts_offsets: Vec<i64>,
    sync: Vec<bool>,
    /// `(file offset, sample count)` per chunk.
    chunks: Vec<(u64, u32)>,
}

impl Track {
    fn new(id: u32, codec: TrackCodec) -> Self {
        Self {
            id,
            codec,
            sizes: Vec::new(),
            dts: Vec::new(),
            cts_offsets: Vec::new(),
            sync: Vec::new(),
            chunks: Vec::new(),
        }
    }

    fn is_video(&self) -> bool {
        matches!(self.codec, TrackCodec::Avc(_))
    }

    fn durations(&self) -> Vec<u32> {
        let mut durations: Vec<u32> = self
            .dts
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as u32)
            .collect();
        if !self.dts.is_empty() {
            let last = match (&self.codec, durations.last()) {
                (_, Some(&previous)) => previous,
                (TrackCodec::Aac(config), None) => config.frame_duration_ms,
                (TrackCodec::Avc(_), None) => 33,
            };
            durations.push(last);
        }
        durations
    }

    fn first_dts(&self) -> u64 {
        self.dts.first().copied().unwrap_or(0)
    }

    /// Length of the sample data itself, excluding the leading gap.
    fn media_duration(&self) -> u64 {
        self.durations().iter().map(|&d| u64::from(d)).sum()
    }

    /// Presentation length including the leading gap before the first sample.
    fn duration(&self) -> u64 {
        self.first_dts() + self.media_duration()
    }
}

/// Streaming MP4 muxer over any seekable writer.
pub struct Mp4Muxer<W: Write + Seek> {
    writer: W,
    mdat_start: u64,
    position: u64,
    tracks: Vec<Track>,
    last_track: Option<usize>,
}

impl<W: Write + Seek> Mp4Muxer<W> {
    /// Writes `ftyp` and a placeholder `mdat` header.
    pub fn new(mut writer: W) -> Result<Self> {
        let mut head = BytesMut::new();
        write_box(&mut head, b"ftyp", |out| {
            out.put_slice(b"isom");
            out.put_u32(0x200);
            for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
                out.put_slice(brand);
            }
        });
        let mdat_start = head.len() as u64;
        head.put_u32(1);
        head.put_slice(b"mdat");
        head.put_u64(0);
        writer.write_all(&head)?;

        Ok(Self {
            writer,
            mdat_start,
            position: mdat_start + MDAT_HEADER_SIZE,
            tracks: Vec::new(),
            last_track: None,
        })
    }

    pub fn add_video_track(&mut self, config: VideoTrackConfig) -> TrackId {
        self.add_track(TrackCodec::Avc(config))
    }

    pub fn add_audio_track(&mut self, config: AudioTrackConfig) -> TrackId {
        self.add_track(TrackCodec::Aac(config))
    }

    fn add_track(&mut self, codec: TrackCodec) -> TrackId {
        let index = self.tracks.len();
        debug!(track = index + 1, video = matches!(codec, TrackCodec::Avc(_)), "declaring track");
        self.tracks.push(Track::new(index as u32 + 1, codec));
        TrackId(index)
    }

    pub fn sample_count(&self, track: TrackId) -> usize {
        self.tracks.get(track.0).map_or(0, |t| t.sizes.len())
    }

    /// Appends one sample to `mdat`. Decode times must not decrease within a track.
    pub fn write_sample(&mut self, track: TrackId, sample: Sample<'_>) -> Result<()> {
        let entry = self
            .tracks
            .get_mut(track.0)
            .ok_or(Mp4Error::UnknownTrack(track.0))?;
        if let Some(&previous) = entry.dts.last()
            && sample.dts < previous
        {
            return Err(Mp4Error::NonMonotonicDts {
                track: entry.id,
                previous,
                dts: sample.dts,
            });
        }
        let size = u32::try_from(sample.data.len()).map_err(|_| Mp4Error::SampleTooLarge(sample.data.len()))?;

        self.writer.write_all(sample.data)?;

        if self.last_track == Some(track.0)
            && let Some(chunk) = entry.chunks.last_mut()
        {
            chunk.1 += 1;
        } else {
            entry.chunks.push((self.position, 1));
        }
        entry.sizes.push(size);
        entry.dts.push(sample.dts);
        entry.cts_offsets.push(sample.pts as i64 - sample.dts as i64);
        entry.sync.push(sample.sync);

        self.position += u64::from(size);
        self.last_track = Some(track.0);
        Ok(())
    }

    /// Patches the `mdat` size and writes `moov`. Consumes the muxer so the
    /// trailer can only be written once.
    pub fn finish(mut self) -> Result<W> {
        let mdat_size = self.position - self.mdat_start;
        self.writer.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.writer.write_all(&mdat_size.to_be_bytes())?;
        self.writer.seek(SeekFrom::Start(self.position))?;

        let moov = self.build_moov();
        self.writer.write_all(&moov)?;
        self.writer.flush()?;
        debug!(
            tracks = self.tracks.len(),
            mdat_bytes = mdat_size,
            moov_bytes = moov.len(),
            "finalized mp4"
        );
        Ok(self.writer)
    }

    fn build_moov(&self) -> Bytes {
        let movie_duration = self.tracks.iter().map(Track::duration).max().unwrap_or(0);
        let mut out = BytesMut::new();
        write_box(&mut out, b"moov", |out| {
            write_full_box(out, b"mvhd", 0, 0, |out| {
                out.put_u32(0); // creation_time
                out.put_u32(0); // modification_time
                out.put_u32(TIMESCALE);
                out.put_u32(movie_duration as u32);
                out.put_u32(0x0001_0000); // rate
                out.put_u16(0x0100); // volume
                out.put_bytes(0, 10);
                for value in UNITY_MATRIX {
                    out.put_u32(value);
                }
                out.put_bytes(0, 24);
                out.put_u32(self.tracks.len() as u32 + 1);
            });
            for track in &self.tracks {
                write_trak(out, track);
            }
        });
        out.freeze()
    }
}

/// Sample times in `stts` start at zero, so a track that begins later gets an
/// empty edit covering the gap followed by the edit that plays the samples.
fn write_edits(out: &mut BytesMut, gap: u32, media_duration: u32) {
    write_box(out, b"edts", |out| {
        write_full_box(out, b"elst", 0, 0, |out| {
            out.put_u32(2);
            out.put_u32(gap);
            out.put_i32(-1);
            out.put_u16(1);
            out.put_u16(0);
            out.put_u32(media_duration);
            out.put_i32(0);
            out.put_u16(1);
            out.put_u16(0);
        });
    });
}

fn write_trak(out: &mut BytesMut, track: &Track) {
    let duration = track.duration() as u32;
    let media_duration = track.media_duration() as u32;
    write_box(out, b"trak", |out| {
        write_full_box(out, b"tkhd", 0, 0x3, |out| {
            out.put_u32(0);
            out.put_u32(0);
            out.put_u32(track.id);
            out.put_u32(0);
            out.put_u32(duration);
            out.put_bytes(0, 8);
            out.put_u16(0); // layer
            out.put_u16(0); // alternate_group
            out.put_u16(if track.is_video() { 0 } else { 0x0100 });
            out.put_u16(0);
            for value in UNITY_MATRIX {
                out.put_u32(value);
            }
            let (width, height) = match &track.codec {
                TrackCodec::Avc(config) => (config.width, config.height),
                TrackCodec::Aac(_) => (0, 0),
            };
            out.put_u32(width << 16);
            out.put_u32(height << 16);
        });
        if track.first_dts() > 0 {
            write_edits(out, track.first_dts() as u32, media_duration);
        }
        write_box(out, b"mdia", |out| {
            write_full_box(out, b"mdhd", 0, 0, |out| {
                out.put_u32(0);
                out.put_u32(0);
                out.put_u32(TIMESCALE);
                out.put_u32(media_duration);
                out.put_u16(LANGUAGE_UND);
                out.put_u16(0);
            });
            write_full_box(out, b"hdlr", 0, 0, |out| {
                out.put_u32(0);
                out.put_slice(if track.is_video() { b"vide" } else { b"soun" });
                out.put_bytes(0, 12);
                out.put_slice(if track.is_video() {
                    b"VideoHandler\0"
                } else {
                    b"SoundHandler\0"
                });
            });
            write_box(out, b"minf", |out| {
                if track.is_video() {
                    write_full_box(out, b"vmhd", 0, 1, |out| out.put_bytes(0, 8));
                } else {
                    write_full_box(out, b"smhd", 0, 0, |out| out.put_u32(0));
                }
                write_box(out, b"dinf", |out| {
                    write_full_box(out, b"dref", 0, 0, |out| {
                        out.put_u32(1);
                        write_full_box(out, b"url ", 0, 1, |_| {});
                    });
                });
                write_stbl(out, track);
            });
        });
    });
}

fn write_stbl(out: &mut BytesMut, track: &Track) {
    write_box(out, b"stbl", |out| {
        write_full_box(out, b"stsd", 0, 0, |out| {
            out.put_u32(1);
            match &track.codec {
                TrackCodec::Avc(config) => write_avc1(out, config),
                TrackCodec::Aac(config) => write_mp4a(out, config),
            }
        });

        let stts = run_lengths(&track.durations());
        write_full_box(out, b"stts", 0, 0, |out| {
            out.put_u32(stts.len() as u32);
            for (count, delta) in &stts {
                out.put_u32(*count);
                out.put_u32(*delta);
            }
        });

        if track.cts_offsets.iter().any(|&offset| offset != 0) {
            let negative = track.cts_offsets.iter().any(|&offset| offset < 0);
            let ctts = run_lengths(&track.cts_offsets);
            write_full_box(out, b"ctts", u8::from(negative), 0, |out| {
                out.put_u32(ctts.len() as u32);
                for (count, offset) in &ctts {
                    out.put_u32(*count);
                    out.put_u32(*offset as i32 as u32);
                }
            });
        }

        if track.is_video() && !track.sync.iter().all(|&sync| sync) {
            let sync: Vec<u32> = track
                .sync
                .iter()
                .enumerate()
                .filter(|(_, sync)| **sync)
                .map(|(index, _)| index as u32 + 1)
                .collect();
            write_full_box(out, b"stss", 0, 0, |out| {
                out.put_u32(sync.len() as u32);
                for number in sync {
                    out.put_u32(number);
                }
            });
        }

        let per_chunk: Vec<u32> = track.chunks.iter().map(|chunk| chunk.1).collect();
        let mut stsc = Vec::new();
        for (index, count) in per_chunk.iter().enumerate() {
            if stsc.last().is_none_or(|&(_, previous): &(u32, u32)| previous != *count) {
                stsc.push((index as u32 + 1, *count));
            }
        }
        write_full_box(out, b"stsc", 0, 0, |out| {
            out.put_u32(stsc.len() as u32);
            for (first_chunk, samples) in stsc {
                out.put_u32(first_chunk);
                out.put_u32(samples);
                out.put_u32(1);
            }
        });

        write_full_box(out, b"stsz", 0, 0, |out| {
            out.put_u32(0);
            out.put_u32(track.sizes.len() as u32);
            for size in &track.sizes {
                out.put_u32(*size);
            }
        });

        write_full_box(out, b"co64", 0, 0, |out| {
            out.put_u32(track.chunks.len() as u32);
            for (offset, _) in &track.chunks {
                out.put_u64(*offset);
            }
        });
    });
}

fn write_avc1(out: &mut BytesMut, config: &VideoTrackConfig) {
    write_box(out, b"avc1", |out| {
        out.put_bytes(0, 6);
        out.put_u16(1); // data_reference_index
        out.put_bytes(0, 16);
        out.put_u16(config.width as u16);
        out.put_u16(config.height as u16);
        out.put_u32(0x0048_0000);
        out.put_u32(0x0048_0000);
        out.put_u32(0);
        out.put_u16(1); // frame_count
        out.put_bytes(0, 32);
        out.put_u16(0x0018);
        out.put_i16(-1);
        write_box(out, b"avcC", |out| out.put_slice(&config.avcc));
    });
}

fn write_mp4a(out: &mut BytesMut, config: &AudioTrackConfig) {
    write_box(out, b"mp4a", |out| {
        out.put_bytes(0, 6);
        out.put_u16(1);
        out.put_bytes(0, 8);
        out.put_u16(config.channels);
        out.put_u16(16);
        out.put_u32(0);
        out.put_u32((config.sample_rate & 0xFFFF) << 16);
        write_full_box(out, b"esds", 0, 0, |out| {
            let asc = &config.audio_specific_config;
            let decoder_specific_len = asc.len();
            let decoder_config_len = 13 + 2 + decoder_specific_len;
            let es_len = 3 + 2 + decoder_config_len + 3;

            out.put_u8(0x03); // ES_Descriptor
            out.put_u8(es_len as u8);
            out.put_u16(1); // ES_ID
            out.put_u8(0);

            out.put_u8(0x04); // DecoderConfigDescriptor
            out.put_u8(decoder_config_len as u8);
            out.put_u8(0x40); // MPEG-4 audio
            out.put_u8(0x15); // audio stream
            out.put_bytes(0, 3); // bufferSizeDB
            out.put_u32(0); // maxBitrate
            out.put_u32(0); // avgBitrate

            out.put_u8(0x05); // DecoderSpecificInfo
            out.put_u8(decoder_specific_len as u8);
            out.put_slice(asc);

            out.put_u8(0x06); // SLConfigDescriptor
            out.put_u8(1);
            out.put_u8(0x02);
        });
    });
}

/// Collapses consecutive equal values into `(count, value)` pairs.
fn run_lengths<T: Copy + PartialEq>(values: &[T]) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for &value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}
