use std::collections::VecDeque;
use std::io::{Seek, Write};

use aac::{AdtsFrames, AdtsHeader, AudioSpecificConfig, SAMPLES_PER_FRAME};
use bytes::Bytes;
use h264::{AvcDecoderConfigurationRecord, NalUnitType, annexb_to_length_prefixed, iter_nal_units};
use mp4::{AudioTrackConfig, Mp4Muxer, Sample, TrackId, VideoTrackConfig};
use tracing::{debug, trace, warn};
use ts::{EsFrame, StreamType, TIMESTAMP_MASK, TIMESTAMP_MODULUS, TS_PACKET_SIZE, TS_SYNC_BYTE, TsDemuxer, TsError};

use crate::{RemuxError, Result};

const TICKS_PER_MS: u64 = 90;
/// Duration assumed for a video frame until a second frame is seen.
const DEFAULT_VIDEO_FRAME_MS: u64 = 33;

/// Where the audio of a part comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSource {
    /// AAC muxed into the video transport stream.
    #[default]
    Embedded,
    /// A separate audio rendition fed through [`Remuxer::push_audio_segment`].
    Separate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemuxSummary {
    pub video_frames: usize,
    pub audio_frames: usize,
    pub duration_ms: u64,
}

struct VideoTrack {
    id: TrackId,
    last_dts: Option<u64>,
    last_delta: u64,
}

struct AudioTrack {
    id: TrackId,
    sample_rate: u32,
    frame_ms: u64,
    last_dts: Option<u64>,
}

struct QueuedAudio {
    dts: u64,
    data: Bytes,
}

struct PartState {
    offset_ms: u64,
    audio_source: AudioSource,
    /// 90 kHz decode time of the first video frame of the part.
    video_base: Option<u64>,
    /// Start of the current audio segment, relative to the part offset.
    audio_anchor_ms: u64,
    /// AAC frames clocked since the anchor.
    audio_frames: u64,
    video_demuxer: TsDemuxer,
    audio_demuxer: TsDemuxer,
}

impl PartState {
    fn new(offset_ms: u64, audio_source: AudioSource) -> Self {
        Self {
            offset_ms,
            audio_source,
            video_base: None,
            audio_anchor_ms: 0,
            audio_frames: 0,
            video_demuxer: TsDemuxer::new(),
            audio_demuxer: TsDemuxer::new(),
        }
    }
}

/// Streams H.264/AAC transport stream segments into a progressive MP4.
///
/// Video frames are written as soon as they are demultiplexed. Audio frames
/// are clocked from the part start at 1024 samples per frame and written
/// once the video has reached their decode time. Tracks are declared when
/// their first frame shows up.
pub struct Remuxer<W: Write + Seek> {
    muxer: Mp4Muxer<W>,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    part: PartState,
    parts: usize,
    pending_audio: VecDeque<QueuedAudio>,
    summary: RemuxSummary,
}

impl<W: Write + Seek> Remuxer<W> {
    pub fn new(writer: W) -> Result<Self> {
        Ok(Self {
            muxer: Mp4Muxer::new(writer)?,
            video: None,
            audio: None,
            part: PartState::new(0, AudioSource::default()),
            parts: 0,
            pending_audio: VecDeque::new(),
            summary: RemuxSummary::default(),
        })
    }

    /// Starts the next part of the episode at `offset_ms`.
    ///
    /// The offset is raised if it would overlap media already written, so
    /// decode times stay monotonic across parts.
    pub fn begin_part(&mut self, offset_ms: u64, audio_source: AudioSource) -> Result<()> {
        self.drain_audio(None)?;
        let offset = offset_ms.max(self.end_ms());
        if offset != offset_ms {
            debug!(requested = offset_ms, offset, "part overlaps previous media, shifting");
        }
        self.parts += 1;
        debug!(part = self.parts, offset_ms = offset, ?audio_source, "beginning part");
        self.part = PartState::new(offset, audio_source);
        Ok(())
    }

    /// Demultiplexes one video transport stream segment of the current part.
    pub fn push_video_segment(&mut self, data: Bytes) -> Result<()> {
        let frames = demux_segment(&mut self.part.video_demuxer, data)?;
        for frame in frames {
            self.push_video_frame(frame)?;
        }
        Ok(())
    }

    /// Feeds one segment of a separate audio rendition, either packed ADTS
    /// (optionally behind an ID3 tag) or a transport stream.
    pub fn push_audio_segment(&mut self, data: Bytes) -> Result<()> {
        if !looks_like_ts(&data) {
            return self.queue_adts(&data);
        }
        let frames = demux_segment(&mut self.part.audio_demuxer, data)?;
        for frame in frames {
            self.push_audio_frame(frame)?;
        }
        Ok(())
    }

    /// Like [`Remuxer::push_audio_segment`], but restarts the audio clock at
    /// `start_ms` into the part. Rounding in the frame clock then never
    /// accumulates past one segment.
    pub fn push_audio_segment_at(&mut self, data: Bytes, start_ms: u64) -> Result<()> {
        trace!(start_ms, carried_frames = self.part.audio_frames, "anchoring audio segment");
        self.part.audio_anchor_ms = start_ms;
        self.part.audio_frames = 0;
        self.push_audio_segment(data)
    }

    /// Handles one frame demultiplexed from a video transport stream.
    pub fn push_video_frame(&mut self, frame: EsFrame) -> Result<()> {
        match frame.stream_type {
            StreamType::H264 => self.write_video(frame),
            other if other.is_video() => Err(RemuxError::UnsupportedCodec(other)),
            other if other.is_audio() => {
                if self.part.audio_source == AudioSource::Embedded {
                    self.push_audio_frame(frame)
                } else {
                    trace!(pid = frame.pid, "ignoring muxed audio, separate rendition in use");
                    Ok(())
                }
            }
            other => {
                trace!(pid = frame.pid, stream_type = %other, "ignoring elementary stream");
                Ok(())
            }
        }
    }

    /// Handles one frame of audio, from either the video or an audio stream.
    pub fn push_audio_frame(&mut self, frame: EsFrame) -> Result<()> {
        match frame.stream_type {
            StreamType::AacAdts => self.queue_adts(&frame.data),
            other if other.is_audio() => Err(RemuxError::UnsupportedCodec(other)),
            other => {
                trace!(pid = frame.pid, stream_type = %other, "ignoring elementary stream");
                Ok(())
            }
        }
    }

    /// Writes the remaining audio and the container trailer.
    pub fn finish(mut self) -> Result<(W, RemuxSummary)> {
        self.drain_audio(None)?;
        if self.summary.video_frames == 0 && self.summary.audio_frames == 0 {
            return Err(RemuxError::Empty);
        }
        let mut summary = self.summary;
        summary.duration_ms = self.end_ms();
        let writer = self.muxer.finish()?;
        debug!(
            parts = self.parts,
            video_frames = summary.video_frames,
            audio_frames = summary.audio_frames,
            duration_ms = summary.duration_ms,
            "remux finished"
        );
        Ok((writer, summary))
    }

    fn end_ms(&self) -> u64 {
        let video_end = self
            .video
            .as_ref()
            .and_then(|video| video.last_dts.map(|dts| dts + video.last_delta));
        let audio_end = self
            .audio
            .as_ref()
            .and_then(|audio| audio.last_dts.map(|dts| dts + audio.frame_ms));
        video_end.max(audio_end).unwrap_or(0)
    }

    fn write_video(&mut self, frame: EsFrame) -> Result<()> {
        let Some(dts90) = frame.decode_timestamp() else {
            warn!(pid = frame.pid, "dropping video frame without timestamps");
            return Ok(());
        };
        let pts90 = frame.pts.unwrap_or(dts90);

        if self.video.is_none() && !self.declare_video(&frame.data)? {
            debug!(dts = dts90, "dropping video frame before the first parameter sets");
            return Ok(());
        }

        let base = *self.part.video_base.get_or_insert(dts90);
        let mut dts = self.part.offset_ms + ticks_since(base, dts90).unwrap_or(0) / TICKS_PER_MS;
        let cts = ticks_since(dts90, pts90).unwrap_or(0) / TICKS_PER_MS;

        let last_dts = self.video.as_ref().and_then(|video| video.last_dts);
        if let Some(last) = last_dts
            && dts <= last
        {
            trace!(dts, last, "clamping non-increasing video decode time");
            dts = last + 1;
        }

        let sync = frame.random_access
            || iter_nal_units(&frame.data).any(|nal| NalUnitType::from_header(nal[0]) == NalUnitType::IdrSlice);
        let payload = annexb_to_length_prefixed(&frame.data);
        if payload.is_empty() {
            return Ok(());
        }

        self.drain_audio(Some(dts))?;

        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        self.muxer.write_sample(
            video.id,
            Sample {
                dts,
                pts: dts + cts,
                sync,
                data: &payload,
            },
        )?;
        if let Some(last) = video.last_dts {
            video.last_delta = dts - last;
        }
        video.last_dts = Some(dts);
        self.summary.video_frames += 1;
        Ok(())
    }

    /// Declares the video track from the SPS/PPS in `access_unit`.
    /// Returns `false` when the access unit carries no parameter sets.
    fn declare_video(&mut self, access_unit: &[u8]) -> Result<bool> {
        let mut sps = None;
        let mut pps = None;
        for nal in iter_nal_units(access_unit) {
            match NalUnitType::from_header(nal[0]) {
                NalUnitType::Sps if sps.is_none() => sps = Some(nal),
                NalUnitType::Pps if pps.is_none() => pps = Some(nal),
                _ => {}
            }
        }
        let (Some(sps), Some(pps)) = (sps, pps) else {
            return Ok(false);
        };

        let (record, parsed) =
            AvcDecoderConfigurationRecord::from_parameter_sets(sps, pps).map_err(RemuxError::ParameterSets)?;
        debug!(
            codec = %record.codec_string(),
            width = parsed.width(),
            height = parsed.height(),
            "declaring video track"
        );
        let id = self.muxer.add_video_track(VideoTrackConfig {
            width: parsed.width(),
            height: parsed.height(),
            avcc: record.to_bytes(),
        });
        self.video = Some(VideoTrack {
            id,
            last_dts: None,
            last_delta: DEFAULT_VIDEO_FRAME_MS,
        });
        Ok(true)
    }

    fn queue_adts(&mut self, data: &Bytes) -> Result<()> {
        for frame in AdtsFrames::new(data) {
            let sample_rate = self.audio_track(&frame.header).sample_rate;
            if frame.header.sample_rate() != sample_rate {
                warn!(
                    expected = sample_rate,
                    found = frame.header.sample_rate(),
                    "audio sample rate changed mid-stream"
                );
            }
            let elapsed_ms =
                self.part.audio_frames * u64::from(SAMPLES_PER_FRAME) * 1000 / u64::from(sample_rate);
            self.part.audio_frames += 1;
            self.pending_audio.push_back(QueuedAudio {
                dts: self.part.offset_ms + self.part.audio_anchor_ms + elapsed_ms,
                data: data.slice_ref(frame.payload),
            });
        }
        Ok(())
    }

    fn audio_track(&mut self, header: &AdtsHeader) -> &AudioTrack {
        let muxer = &mut self.muxer;
        self.audio.get_or_insert_with(|| {
            let sample_rate = header.sample_rate().max(1);
            let frame_ms = (u64::from(SAMPLES_PER_FRAME) * 1000).div_ceil(u64::from(sample_rate));
            debug!(
                sample_rate,
                channels = header.channel_configuration,
                "declaring audio track"
            );
            let config = AudioSpecificConfig::from(header);
            let id = muxer.add_audio_track(AudioTrackConfig {
                sample_rate,
                channels: u16::from(header.channel_configuration),
                audio_specific_config: Bytes::copy_from_slice(&config.to_bytes()),
                frame_duration_ms: frame_ms as u32,
            });
            AudioTrack {
                id,
                sample_rate,
                frame_ms,
                last_dts: None,
            }
        })
    }

    /// Writes queued audio up to and including `until`, or everything.
    fn drain_audio(&mut self, until: Option<u64>) -> Result<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        while let Some(front) = self.pending_audio.front() {
            if until.is_some_and(|limit| front.dts > limit) {
                break;
            }
            let Some(queued) = self.pending_audio.pop_front() else {
                break;
            };
            let dts = match audio.last_dts {
                Some(last) if queued.dts <= last => last + 1,
                _ => queued.dts,
            };
            self.muxer.write_sample(
                audio.id,
                Sample {
                    dts,
                    pts: dts,
                    sync: true,
                    data: &queued.data,
                },
            )?;
            audio.last_dts = Some(dts);
            self.summary.audio_frames += 1;
        }
        Ok(())
    }
}

/// Ticks from `base` to `ts` on the 33-bit clock, or `None` if `ts` is
/// behind `base`.
fn ticks_since(base: u64, ts: u64) -> Option<u64> {
    let delta = ts.wrapping_sub(base) & TIMESTAMP_MASK;
    (delta < TIMESTAMP_MODULUS / 2).then_some(delta)
}

fn looks_like_ts(data: &[u8]) -> bool {
    data.len() >= TS_PACKET_SIZE
        && data[0] == TS_SYNC_BYTE
        && data.get(TS_PACKET_SIZE).is_none_or(|&b| b == TS_SYNC_BYTE)
}

/// Demultiplexes a segment, tolerating a cut-off final packet.
fn demux_segment(demuxer: &mut TsDemuxer, data: Bytes) -> Result<Vec<EsFrame>> {
    let mut frames = Vec::new();
    match demuxer.demux_segment(data, &mut |frame| frames.push(frame)) {
        Ok(()) => {}
        Err(TsError::Truncated { trailing }) => {
            debug!(trailing, "segment ends mid-packet, continuing with what was read");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use ts::test_support::{
        AUDIO_FRAME_TICKS, TsSegmentBuilder, VIDEO_FRAME_TICKS, VIDEO_PID, av_segment,
        avc_access_unit, packed_audio_segment,
    };

    fn remuxer() -> Remuxer<Cursor<Vec<u8>>> {
        Remuxer::new(Cursor::new(Vec::new())).unwrap()
    }

    fn finish(remuxer: Remuxer<Cursor<Vec<u8>>>) -> (mp4::MovieSummary, RemuxSummary) {
        let (cursor, summary) = remuxer.finish().unwrap();
        (mp4::probe(cursor.get_ref()).unwrap(), summary)
    }

    #[test]
    fn remuxes_embedded_audio() {
        let mut remuxer = remuxer();
        remuxer.begin_part(0, AudioSource::Embedded).unwrap();
        remuxer.push_video_segment(av_segment(900_000, 10, 19).into()).unwrap();
        let (movie, summary) = finish(remuxer);

        assert_eq!(summary.video_frames, 10);
        assert_eq!(summary.audio_frames, 19);

        let video = movie.track(b"vide").unwrap();
        assert_eq!(video.sample_count(), 10);
        assert_eq!(video.decode_times[..3], [0, 40, 80]);
        assert_eq!(video.presentation_times[0], 40);
        assert_eq!(video.sync_samples, vec![0]);
        assert_eq!(video.resolution, Some(mp4::Resolution::new(64, 64)));

        let audio = movie.track(b"soun").unwrap();
        assert_eq!(audio.sample_count(), 19);
        assert_eq!(audio.decode_times[..4], [0, 21, 42, 64]);
    }

    #[test]
    fn separate_audio_ignores_muxed_audio() {
        let mut remuxer = remuxer();
        remuxer.begin_part(0, AudioSource::Separate).unwrap();
        remuxer.push_audio_segment(packed_audio_segment(5).into()).unwrap();
        remuxer.push_video_segment(av_segment(0, 3, 8).into()).unwrap();
        let (movie, summary) = finish(remuxer);

        assert_eq!(summary.audio_frames, 5);
        assert_eq!(movie.track(b"soun").unwrap().sample_count(), 5);
        assert_eq!(movie.track(b"vide").unwrap().sample_count(), 3);
    }

    #[test]
    fn audio_is_interleaved_with_video() {
        let mut remuxer = remuxer();
        remuxer.begin_part(0, AudioSource::Separate).unwrap();
        remuxer.push_audio_segment(packed_audio_segment(10).into()).unwrap();
        remuxer.push_video_segment(av_segment(0, 5, 0).into()).unwrap();
        let (movie, _) = finish(remuxer);

        // Audio written before the third video frame (dts 80) must precede it in the file.
        let video = movie.track(b"vide").unwrap();
        let audio = movie.track(b"soun").unwrap();
        let third_video = video.sample_offsets[2];
        let before: Vec<_> = audio
            .decode_times
            .iter()
            .zip(&audio.sample_offsets)
            .filter(|(_, offset)| **offset < third_video)
            .map(|(dts, _)| *dts)
            .collect();
        assert_eq!(before, vec![0, 21, 42, 64]);
    }

    #[test]
    fn parts_continue_where_the_previous_ended() {
        let mut remuxer = remuxer();
        remuxer.begin_part(0, AudioSource::Embedded).unwrap();
        remuxer.push_video_segment(av_segment(0, 5, 0).into()).unwrap();
        // Declared offset is shorter than the media actually written.
        remuxer.begin_part(100, AudioSource::Embedded).unwrap();
        remuxer.push_video_segment(av_segment(5_000_000, 5, 0).into()).unwrap();
        remuxer.begin_part(1_000, AudioSource::Embedded).unwrap();
        remuxer.push_video_segment(av_segment(0, 2, 0).into()).unwrap();
        let (movie, _) = finish(remuxer);

        let video = movie.track(b"vide").unwrap();
        assert_eq!(video.decode_times, vec![0, 40, 80, 120, 160, 200, 240, 280, 320, 360, 1000, 1040]);
        assert_eq!(video.sync_samples, vec![0, 5, 10]);
    }

    #[test]
    fn handles_timestamp_wraparound() {
        let start = TIMESTAMP_MODULUS - 2 * VIDEO_FRAME_TICKS;
        let mut remuxer = remuxer();
        let mut builder = TsSegmentBuilder::new().program(&[(0x1B, VIDEO_PID)]);
        for index in 0..4u64 {
            let dts = (start + index * VIDEO_FRAME_TICKS) & TIMESTAMP_MASK;
            builder = builder.pes(VIDEO_PID, 0xE0, dts, None, index == 0, &avc_access_unit(index == 0, 50));
        }
        remuxer.push_video_segment(builder.build().into()).unwrap();
        let (movie, _) = finish(remuxer);
        assert_eq!(movie.track(b"vide").unwrap().decode_times, vec![0, 40, 80, 120]);
    }

    #[test]
    fn drops_frames_until_parameter_sets() {
        let data = TsSegmentBuilder::new()
            .program(&[(0x1B, VIDEO_PID)])
            .pes(VIDEO_PID, 0xE0, 0, None, false, &avc_access_unit(false, 20))
            .pes(VIDEO_PID, 0xE0, 3600, None, true, &avc_access_unit(true, 20))
            .pes(VIDEO_PID, 0xE0, 7200, None, false, &avc_access_unit(false, 20))
            .build();
        let mut remuxer = remuxer();
        remuxer.push_video_segment(data.into()).unwrap();
        let (_, summary) = remuxer.finish().unwrap();
        assert_eq!(summary.video_frames, 2);
    }

    #[test]
    fn tolerates_truncated_segment() {
        let mut data = av_segment(0, 6, 0);
        data.truncate(data.len() - 50);
        let mut remuxer = remuxer();
        remuxer.push_video_segment(data.into()).unwrap();
        let (_, summary) = remuxer.finish().unwrap();
        assert_eq!(summary.video_frames, 6);
    }

    #[test]
    fn rejects_hevc() {
        let data = TsSegmentBuilder::new()
            .program(&[(0x24, VIDEO_PID)])
            .pes(VIDEO_PID, 0xE0, 0, None, true, &[0, 0, 1, 0x40, 0x01])
            .pes(VIDEO_PID, 0xE0, 3600, None, false, &[0, 0, 1, 0x02, 0x01])
            .build();
        let mut remuxer = remuxer();
        assert!(matches!(
            remuxer.push_video_segment(data.into()),
            Err(RemuxError::UnsupportedCodec(StreamType::H265))
        ));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(remuxer().finish(), Err(RemuxError::Empty)));
    }

    #[test]
    fn audio_segments_start_at_their_playlist_time() {
        let mut remuxer = remuxer();
        remuxer.begin_part(1000, AudioSource::Separate).unwrap();
        remuxer.push_audio_segment_at(packed_audio_segment(3).into(), 0).unwrap();
        // The first segment clocked 3 frames (64 ms); the next one is
        // declared to start at 100 ms.
        remuxer.push_audio_segment_at(packed_audio_segment(2).into(), 100).unwrap();
        let (movie, summary) = finish(remuxer);

        assert_eq!(summary.audio_frames, 5);
        assert_eq!(movie.track(b"soun").unwrap().decode_times, vec![1000, 1021, 1042, 1100, 1121]);
    }

    #[test]
    fn audio_clock_ignores_stream_timestamps() {
        // Audio PES timestamps are far from the video; the frame clock still
        // starts the audio at the part offset.
        let data = TsSegmentBuilder::new()
            .program(&[(0x1B, VIDEO_PID), (0x0F, 0x101)])
            .pes(VIDEO_PID, 0xE0, 0, None, true, &avc_access_unit(true, 20))
            .pes(0x101, 0xC0, 50 * AUDIO_FRAME_TICKS, None, false, &ts::test_support::adts_frame(10))
            .build();
        let mut remuxer = remuxer();
        remuxer.begin_part(500, AudioSource::Embedded).unwrap();
        remuxer.push_video_segment(data.into()).unwrap();
        let (movie, _) = finish(remuxer);
        assert_eq!(movie.track(b"soun").unwrap().decode_times, vec![500]);
        assert_eq!(movie.track(b"vide").unwrap().decode_times, vec![500]);
    }
}
