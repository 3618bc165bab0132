//! Builders for synthetic transport streams used by tests across the workspace.

use std::collections::HashMap;

use crate::{PID_PAT, TS_PACKET_SIZE, TS_SYNC_BYTE};

pub const PMT_PID: u16 = 0x1000;

/// Builds a PSI section with a dummy CRC around `body`.
pub fn section(table_id: u8, body: &[u8]) -> Vec<u8> {
    let length = body.len() + 4;
    let mut out = vec![table_id, 0xB0 | (length >> 8) as u8, length as u8];
    out.extend_from_slice(body);
    out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    out
}

pub fn pat_section(pmt_pid: u16) -> Vec<u8> {
    section(
        0x00,
        &[
            0x00,
            0x01,
            0xC1,
            0x00,
            0x00,
            0x00,
            0x01,
            0xE0 | (pmt_pid >> 8) as u8,
            pmt_pid as u8,
        ],
    )
}

/// PMT section for `(stream_type, pid)` pairs; the first stream carries the PCR.
pub fn pmt_section(streams: &[(u8, u16)]) -> Vec<u8> {
    let pcr = streams.first().map_or(0x1FFF, |s| s.1);
    let mut body = vec![
        0x00,
        0x01,
        0xC1,
        0x00,
        0x00,
        0xE0 | (pcr >> 8) as u8,
        pcr as u8,
        0xF0,
        0x00,
    ];
    for &(stream_type, pid) in streams {
        body.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x00]);
    }
    section(0x02, &body)
}

fn timestamp_field(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 1,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 1,
    ]
}

/// Assembles a transport stream packet by packet.
#[derive(Default)]
pub struct TsSegmentBuilder {
    out: Vec<u8>,
    counters: HashMap<u16, u8>,
}

impl TsSegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a PAT and a PMT describing `streams`.
    pub fn program(mut self, streams: &[(u8, u16)]) -> Self {
        let mut pat = vec![0u8];
        pat.extend(pat_section(PMT_PID));
        self.packetize(PID_PAT, &pat, false);
        let mut pmt = vec![0u8];
        pmt.extend(pmt_section(streams));
        self.packetize(PMT_PID, &pmt, false);
        self
    }

    /// Writes one PES packet carrying `payload`.
    pub fn pes(
        mut self,
        pid: u16,
        stream_id: u8,
        pts: u64,
        dts: Option<u64>,
        random_access: bool,
        payload: &[u8],
    ) -> Self {
        let mut fields = Vec::new();
        let flags = match dts {
            Some(dts) => {
                fields.extend(timestamp_field(0x3, pts));
                fields.extend(timestamp_field(0x1, dts));
                0xC0
            }
            None => {
                fields.extend(timestamp_field(0x2, pts));
                0x80
            }
        };
        let bounded = stream_id & 0xE0 == 0xC0;
        let length = if bounded {
            3 + fields.len() + payload.len()
        } else {
            0
        };
        let mut pes = vec![0, 0, 1, stream_id, (length >> 8) as u8, length as u8, 0x80, flags];
        pes.push(fields.len() as u8);
        pes.extend(fields);
        pes.extend_from_slice(payload);
        self.packetize(pid, &pes, random_access);
        self
    }

    /// Appends raw bytes, e.g. to simulate a cut-off segment.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.out
    }

    fn packetize(&mut self, pid: u16, data: &[u8], random_access: bool) {
        let mut first = true;
        let mut rest = data;
        while first || !rest.is_empty() {
            let cc = self.counters.entry(pid).or_insert(0);
            let counter = *cc;
            *cc = (*cc + 1) & 0x0F;

            let needs_flags = first && random_access;
            let min_adaptation = if needs_flags { 2 } else { 0 };
            let room = TS_PACKET_SIZE - 4 - min_adaptation;
            let take = rest.len().min(room);
            let stuffing = room - take;
            let has_adaptation = needs_flags || stuffing > 0;

            let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
            packet.push(TS_SYNC_BYTE);
            packet.push((if first { 0x40 } else { 0 }) | (pid >> 8) as u8 & 0x1F);
            packet.push(pid as u8);
            packet.push((if has_adaptation { 0x30 } else { 0x10 }) | counter);
            if has_adaptation {
                let length = min_adaptation + stuffing;
                if needs_flags {
                    packet.push((length - 1) as u8);
                    packet.push(0x40);
                    packet.extend(std::iter::repeat_n(0xFF, length - 2));
                } else if length == 1 {
                    packet.push(0);
                } else {
                    packet.push((length - 1) as u8);
                    packet.push(0x00);
                    packet.extend(std::iter::repeat_n(0xFF, length - 2));
                }
            }
            packet.extend_from_slice(&rest[..take]);
            debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
            self.out.extend(packet);

            rest = &rest[take..];
            first = false;
        }
    }
}

pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

/// Baseline profile SPS for a 64x64 picture, without start code.
pub const SPS_64X64: [u8; 7] = [0x67, 0x42, 0x00, 0x1E, 0xDA, 0x10, 0x99];
pub const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

/// 90 kHz ticks between synthetic video frames (25 fps).
pub const VIDEO_FRAME_TICKS: u64 = 3600;
/// 90 kHz ticks per AAC frame at 48 kHz.
pub const AUDIO_FRAME_TICKS: u64 = 1920;

/// Annex B access unit: AUD, then SPS/PPS/IDR for keyframes or a single
/// non-IDR slice otherwise.
pub fn avc_access_unit(keyframe: bool, slice_len: usize) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 1, 0x09, 0xF0];
    if keyframe {
        for nal in [&SPS_64X64[..], &PPS[..]] {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
    }
    out.extend_from_slice(&[0, 0, 1, if keyframe { 0x65 } else { 0x41 }]);
    out.extend(std::iter::repeat_n(0x88, slice_len));
    out
}

/// AAC-LC, 48 kHz, stereo ADTS frame with `payload_len` bytes of payload.
pub fn adts_frame(payload_len: usize) -> Vec<u8> {
    let frame_length = 7 + payload_len;
    let mut frame = vec![
        0xFF,
        0xF1,
        (1 << 6) | (3 << 2),
        (2 << 6) | ((frame_length >> 11) as u8 & 0x03),
        (frame_length >> 3) as u8,
        ((frame_length as u8 & 0x07) << 5) | 0x1F,
        0xFC,
    ];
    frame.extend(std::iter::repeat_n(0x21, payload_len));
    frame
}

/// Packed audio segment: an ID3 timestamp tag followed by `frames` ADTS frames.
pub fn packed_audio_segment(frames: usize) -> Vec<u8> {
    let mut out = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    for _ in 0..frames {
        out.extend(adts_frame(24));
    }
    out
}

/// Transport stream segment with `video_frames` H.264 frames starting at the
/// 90 kHz time `start` and, when `audio_frames > 0`, that many muxed AAC
/// frames packed four to a PES packet. The first frame is a keyframe.
pub fn av_segment(start: u64, video_frames: usize, audio_frames: usize) -> Vec<u8> {
    let streams: &[(u8, u16)] = if audio_frames > 0 {
        &[(0x1B, VIDEO_PID), (0x0F, AUDIO_PID)]
    } else {
        &[(0x1B, VIDEO_PID)]
    };
    let mut builder = TsSegmentBuilder::new().program(streams);

    let audio_groups: Vec<(u64, usize)> = (0..audio_frames)
        .step_by(4)
        .map(|first| (start + first as u64 * AUDIO_FRAME_TICKS, (audio_frames - first).min(4)))
        .collect();
    let mut next_audio = 0;

    for index in 0..video_frames {
        let dts = start + index as u64 * VIDEO_FRAME_TICKS;
        let keyframe = index == 0;
        builder = builder.pes(
            VIDEO_PID,
            0xE0,
            dts + VIDEO_FRAME_TICKS,
            Some(dts),
            keyframe,
            &avc_access_unit(keyframe, 200),
        );
        while let Some(&(pts, count)) = audio_groups.get(next_audio)
            && pts < dts + VIDEO_FRAME_TICKS
        {
            let payload: Vec<u8> = (0..count).flat_map(|_| adts_frame(24)).collect();
            builder = builder.pes(AUDIO_PID, 0xC0, pts, None, false, &payload);
            next_audio += 1;
        }
    }
    for &(pts, count) in &audio_groups[next_audio..] {
        let payload: Vec<u8> = (0..count).flat_map(|_| adts_frame(24)).collect();
        builder = builder.pes(AUDIO_PID, 0xC0, pts, None, false, &payload);
    }
    builder.build()
}
