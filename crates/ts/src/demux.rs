use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use memchr::memchr;
use tracing::{debug, trace, warn};

use crate::psi::declared_section_size;
use crate::{
    PID_PAT, Pat, PesHeader, Pmt, Result, StreamType, TS_PACKET_SIZE, TS_SYNC_BYTE, TsError,
    TsPacket,
};

/// One reassembled PES packet: a single access unit for video, one or
/// more ADTS frames for audio.
#[derive(Debug, Clone)]
pub struct EsFrame {
    pub pid: u16,
    pub stream_type: StreamType,
    /// 90 kHz presentation timestamp.
    pub pts: Option<u64>,
    /// 90 kHz decode timestamp, absent when equal to the PTS.
    pub dts: Option<u64>,
    pub random_access: bool,
    pub data: Bytes,
}

impl EsFrame {
    pub fn decode_timestamp(&self) -> Option<u64> {
        self.dts.or(self.pts)
    }
}

struct PendingPes {
    stream_type: StreamType,
    header: PesHeader,
    random_access: bool,
    data: BytesMut,
}

/// Stateful transport stream demuxer.
///
/// Program tables are remembered across segments, so one demuxer should be
/// used for every segment of the same track.
#[derive(Default)]
pub struct TsDemuxer {
    pmt_pid: Option<u16>,
    streams: HashMap<u16, StreamType>,
    sections: HashMap<u16, BytesMut>,
    pending: HashMap<u16, PendingPes>,
    resyncs: usize,
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elementary streams announced by the most recent PMT.
    pub fn streams(&self) -> impl Iterator<Item = (u16, StreamType)> + '_ {
        self.streams.iter().map(|(&pid, &stream_type)| (pid, stream_type))
    }

    /// Number of times the demuxer had to hunt for a sync byte.
    pub fn resync_count(&self) -> usize {
        self.resyncs
    }

    /// Demultiplexes one complete segment, delivering every frame to
    /// `on_frame` in stream order.
    ///
    /// Frames still pending at the end of the segment are flushed. If the
    /// segment ends in the middle of a packet, everything before the cut is
    /// delivered and [`TsError::Truncated`] is returned.
    pub fn demux_segment<F>(&mut self, data: Bytes, on_frame: &mut F) -> Result<()>
    where
        F: FnMut(EsFrame),
    {
        let mut pos = 0;
        let mut trailing = 0;
        while pos < data.len() {
            if data[pos] != TS_SYNC_BYTE {
                match memchr(TS_SYNC_BYTE, &data[pos..]) {
                    Some(skip) => {
                        self.resyncs += 1;
                        debug!(offset = pos, skip, "lost sync, skipping to next sync byte");
                        pos += skip;
                        continue;
                    }
                    None => {
                        trailing = data.len() - pos;
                        break;
                    }
                }
            }
            if pos + TS_PACKET_SIZE > data.len() {
                trailing = data.len() - pos;
                break;
            }

            match TsPacket::parse(data.slice(pos..pos + TS_PACKET_SIZE)) {
                Ok(packet) => {
                    pos += TS_PACKET_SIZE;
                    self.handle_packet(packet, on_frame)?;
                }
                Err(e) => {
                    trace!(offset = pos, error = %e, "skipping malformed packet");
                    pos += 1;
                }
            }
        }

        self.flush(on_frame);

        if trailing > 0 {
            return Err(TsError::Truncated { trailing });
        }
        Ok(())
    }

    /// Emits every partially assembled PES packet.
    pub fn flush<F>(&mut self, on_frame: &mut F)
    where
        F: FnMut(EsFrame),
    {
        let mut pids: Vec<u16> = self.pending.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            if let Some(pes) = self.pending.remove(&pid) {
                Self::emit(pid, pes, on_frame);
            }
        }
    }

    fn handle_packet<F>(&mut self, packet: TsPacket, on_frame: &mut F) -> Result<()>
    where
        F: FnMut(EsFrame),
    {
        if packet.pid == PID_PAT || Some(packet.pid) == self.pmt_pid {
            return self.handle_section(packet);
        }
        if let Some(&stream_type) = self.streams.get(&packet.pid) {
            self.handle_pes(packet, stream_type, on_frame)?;
        }
        Ok(())
    }

    fn handle_section(&mut self, packet: TsPacket) -> Result<()> {
        let Some(payload) = packet.payload else {
            return Ok(());
        };
        let pid = packet.pid;

        if packet.payload_unit_start_indicator {
            let start = 1 + *payload.first().unwrap_or(&0) as usize;
            if start > payload.len() {
                return Err(TsError::InvalidSection {
                    table: if pid == PID_PAT { "PAT" } else { "PMT" },
                    reason: format!("pointer field {} past end of packet", start - 1),
                });
            }
            self.sections.insert(pid, BytesMut::from(&payload[start..]));
        } else if let Some(buffer) = self.sections.get_mut(&pid) {
            buffer.extend_from_slice(&payload);
        } else {
            return Ok(());
        }

        let complete = self.sections.get(&pid).and_then(|buffer| {
            declared_section_size(buffer)
                .filter(|&size| buffer.len() >= size)
                .map(|size| buffer[..size].to_vec())
        });
        let Some(section) = complete else {
            return Ok(());
        };
        self.sections.remove(&pid);

        if pid == PID_PAT {
            let pat = Pat::parse(&section)?;
            let pmt_pid = pat.programs.first().map(|program| program.pmt_pid);
            if pmt_pid != self.pmt_pid {
                debug!(?pmt_pid, "program association changed");
                self.pmt_pid = pmt_pid;
                self.streams.clear();
            }
        } else {
            let pmt = Pmt::parse(&section)?;
            let streams: HashMap<u16, StreamType> = pmt
                .streams
                .iter()
                .map(|stream| (stream.pid, stream.stream_type))
                .collect();
            if streams != self.streams {
                debug!(
                    streams = ?pmt.streams,
                    program = pmt.program_number,
                    "program map updated"
                );
                self.pending.retain(|pid, _| streams.contains_key(pid));
                self.streams = streams;
            }
        }
        Ok(())
    }

    fn handle_pes<F>(&mut self, packet: TsPacket, stream_type: StreamType, on_frame: &mut F) -> Result<()>
    where
        F: FnMut(EsFrame),
    {
        let Some(payload) = packet.payload else {
            return Ok(());
        };
        let pid = packet.pid;

        if packet.payload_unit_start_indicator {
            if let Some(previous) = self.pending.remove(&pid) {
                Self::emit(pid, previous, on_frame);
            }
            let header = PesHeader::parse(&payload, pid)?;
            self.pending.insert(
                pid,
                PendingPes {
                    stream_type,
                    header,
                    random_access: packet.random_access,
                    data: BytesMut::from(&payload[..]),
                },
            );
        } else if let Some(pes) = self.pending.get_mut(&pid) {
            pes.data.extend_from_slice(&payload);
        } else {
            trace!(pid, "dropping PES continuation without a start");
            return Ok(());
        }

        let done = self.pending.get(&pid).is_some_and(|pes| {
            pes.header
                .declared_size()
                .is_some_and(|size| pes.data.len() >= size)
        });
        if done && let Some(pes) = self.pending.remove(&pid) {
            Self::emit(pid, pes, on_frame);
        }
        Ok(())
    }

    fn emit<F>(pid: u16, pes: PendingPes, on_frame: &mut F)
    where
        F: FnMut(EsFrame),
    {
        let data = pes.data.freeze();
        let end = pes
            .header
            .declared_size()
            .map_or(data.len(), |size| size.min(data.len()));
        if pes.header.payload_offset >= end {
            return;
        }
        if pes.header.pts.is_none() {
            warn!(pid, "PES packet without timestamps");
        }
        on_frame(EsFrame {
            pid,
            stream_type: pes.stream_type,
            pts: pes.header.pts,
            dts: pes.header.dts,
            random_access: pes.random_access,
            data: data.slice(pes.header.payload_offset..end),
        });
    }
}

/// Demultiplexes a whole transport stream into frames.
///
/// A cut-off final packet is tolerated.
pub fn demux(data: Bytes) -> Result<Vec<EsFrame>> {
    let mut frames = Vec::new();
    let mut demuxer = TsDemuxer::new();
    match demuxer.demux_segment(data, &mut |frame| frames.push(frame)) {
        Ok(()) => {}
        Err(TsError::Truncated { trailing }) => {
            debug!(trailing, "ignoring incomplete trailing packet");
        }
        Err(e) => return Err(e),
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TsSegmentBuilder;

    const VIDEO: u16 = 0x100;
    const AUDIO: u16 = 0x101;

    fn program() -> TsSegmentBuilder {
        TsSegmentBuilder::new().program(&[(0x1B, VIDEO), (0x0F, AUDIO)])
    }

    #[test]
    fn reassembles_frames_across_packets() {
        let big = vec![0x5A; 1000];
        let data = program()
            .pes(VIDEO, 0xE0, 3600, Some(0), true, &big)
            .pes(AUDIO, 0xC0, 1800, None, false, &[1, 2, 3])
            .pes(VIDEO, 0xE0, 7200, Some(3600), false, &[9; 10])
            .build();

        let frames = demux(data.into()).unwrap();
        assert_eq!(frames.len(), 3);

        // Bounded audio PES completes before the unbounded first video frame.
        assert_eq!(frames[0].stream_type, StreamType::AacAdts);
        assert_eq!(&frames[0].data[..], &[1, 2, 3]);
        assert_eq!(frames[0].decode_timestamp(), Some(1800));

        assert_eq!(frames[1].stream_type, StreamType::H264);
        assert_eq!(frames[1].data.len(), 1000);
        assert!(frames[1].random_access);
        assert_eq!((frames[1].pts, frames[1].dts), (Some(3600), Some(0)));

        assert!(!frames[2].random_access);
        assert_eq!(frames[2].decode_timestamp(), Some(3600));
    }

    #[test]
    fn tolerates_truncated_tail() {
        let mut data = program().pes(VIDEO, 0xE0, 0, None, true, &[7; 400]).build();
        data.truncate(data.len() - 100);

        let mut demuxer = TsDemuxer::new();
        let mut frames = Vec::new();
        let err = demuxer
            .demux_segment(data.clone().into(), &mut |f| frames.push(f))
            .unwrap_err();
        assert!(err.is_truncated());
        assert_eq!(frames.len(), 1);

        assert_eq!(demux(data.into()).unwrap().len(), 1);
    }

    #[test]
    fn resyncs_after_garbage() {
        let data = TsSegmentBuilder::new()
            .raw(&[0x00, 0x11, 0x22])
            .program(&[(0x1B, VIDEO)])
            .pes(VIDEO, 0xE0, 0, None, true, &[1; 20])
            .build();
        let mut demuxer = TsDemuxer::new();
        let mut count = 0;
        demuxer
            .demux_segment(data.into(), &mut |_| count += 1)
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(demuxer.resync_count(), 1);
    }

    #[test]
    fn keeps_program_tables_between_segments() {
        let first = program().pes(VIDEO, 0xE0, 0, None, true, &[1; 5]).build();
        let second = TsSegmentBuilder::new()
            .pes(VIDEO, 0xE0, 3000, None, false, &[2; 5])
            .build();

        let mut demuxer = TsDemuxer::new();
        let mut frames = Vec::new();
        demuxer
            .demux_segment(first.into(), &mut |f| frames.push(f))
            .unwrap();
        demuxer
            .demux_segment(second.into(), &mut |f| frames.push(f))
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(demuxer.streams().count(), 2);
    }

    #[test]
    fn invalid_pes_start_is_fatal() {
        let mut data = program().pes(VIDEO, 0xE0, 0, None, true, &[1; 5]).build();
        // First video packet: header(4) + adaptation(2 + stuffing); corrupt the PES prefix.
        let video_packet = 2 * TS_PACKET_SIZE;
        let af_len = data[video_packet + 4] as usize;
        data[video_packet + 5 + af_len + 2] = 0x02;
        assert!(matches!(
            demux(data.into()),
            Err(TsError::InvalidPesStartCode { pid: VIDEO })
        ));
    }
}
