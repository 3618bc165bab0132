//! Reads back the sample tables of a progressive MP4.
//!
//! Walks `moov/trak/mdia/minf/stbl` and expands the run-length tables into
//! per-sample timing, so callers can check what a muxer produced.

use crate::box_utils::{BoxView, box_at, children, find_first_box, find_path};
use crate::{Mp4Error, Resolution, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub track_id: u32,
    pub handler: [u8; 4],
    /// FourCC of the first sample entry, e.g. `avc1`.
    pub codec: [u8; 4],
    pub timescale: u32,
    pub duration: u64,
    pub resolution: Option<Resolution>,
    pub sample_sizes: Vec<u32>,
    pub sample_offsets: Vec<u64>,
    pub decode_times: Vec<u64>,
    pub presentation_times: Vec<u64>,
    /// Zero-based indices of sync samples.
    pub sync_samples: Vec<usize>,
}

impl TrackSummary {
    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieSummary {
    pub major_brand: [u8; 4],
    pub timescale: u32,
    pub duration: u64,
    pub mdat_size: u64,
    pub tracks: Vec<TrackSummary>,
}

impl MovieSummary {
    pub fn track(&self, handler: &[u8; 4]) -> Option<&TrackSummary> {
        self.tracks.iter().find(|track| &track.handler == handler)
    }
}

fn malformed(what: &str) -> Mp4Error {
    Mp4Error::Malformed(what.to_string())
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| malformed("field past end of box"))
}

fn u64_at(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| malformed("field past end of box"))
}

fn require(data: &[u8], parent: BoxView, path: &[[u8; 4]]) -> Result<BoxView> {
    find_path(data, parent, path).ok_or_else(|| {
        let names: Vec<String> = path
            .iter()
            .map(|fourcc| String::from_utf8_lossy(fourcc).into_owned())
            .collect();
        malformed(&format!("missing {}", names.join("/")))
    })
}

/// Summarizes a complete MP4 file.
pub fn probe(data: &[u8]) -> Result<MovieSummary> {
    let mut major_brand = [0; 4];
    let mut moov = None;
    let mut mdat_size = 0;
    for view in children(data, 0, data.len()) {
        match &view.fourcc {
            b"ftyp" => {
                if let Some(brand) = view.body(data).get(..4) {
                    major_brand.copy_from_slice(brand);
                }
            }
            b"moov" => moov = Some(view),
            b"mdat" => mdat_size = (view.end - view.start) as u64,
            _ => {}
        }
    }
    let moov = moov.ok_or_else(|| malformed("missing moov"))?;

    let mvhd = require(data, moov, &[*b"mvhd"])?.body(data);
    let (timescale, duration) = match mvhd.first() {
        Some(1) => (u32_at(mvhd, 20)?, u64_at(mvhd, 24)?),
        _ => (u32_at(mvhd, 12)?, u64::from(u32_at(mvhd, 16)?)),
    };

    let tracks = children(data, moov.body_start, moov.end)
        .filter(|view| &view.fourcc == b"trak")
        .map(|trak| probe_track(data, trak, timescale))
        .collect::<Result<Vec<_>>>()?;

    Ok(MovieSummary {
        major_brand,
        timescale,
        duration,
        mdat_size,
        tracks,
    })
}

fn probe_track(data: &[u8], trak: BoxView, movie_timescale: u32) -> Result<TrackSummary> {
    let tkhd = require(data, trak, &[*b"tkhd"])?.body(data);
    let track_id = u32_at(tkhd, 12)?;
    let width = u32_at(tkhd, 76)? >> 16;
    let height = u32_at(tkhd, 80)? >> 16;

    let mdia = require(data, trak, &[*b"mdia"])?;
    let mdhd = require(data, mdia, &[*b"mdhd"])?.body(data);
    let timescale = u32_at(mdhd, 12)?;
    let duration = u64::from(u32_at(mdhd, 16)?);

    let hdlr = require(data, mdia, &[*b"hdlr"])?.body(data);
    let mut handler = [0; 4];
    handler.copy_from_slice(&hdlr.get(8..12).ok_or_else(|| malformed("short hdlr"))?[..]);

    let stbl = require(data, mdia, &[*b"minf", *b"stbl"])?;
    let stsd = require(data, stbl, &[*b"stsd"])?;
    let entry = box_at(data, stsd.body_start + 8, stsd.end).ok_or_else(|| malformed("empty stsd"))?;

    let stsz = require(data, stbl, &[*b"stsz"])?.body(data);
    let uniform = u32_at(stsz, 4)?;
    let count = u32_at(stsz, 8)? as usize;
    let sample_sizes = if uniform != 0 {
        vec![uniform; count]
    } else {
        (0..count)
            .map(|i| u32_at(stsz, 12 + i * 4))
            .collect::<Result<Vec<_>>>()?
    };

    let mut decode_times = Vec::with_capacity(count);
    let stts = require(data, stbl, &[*b"stts"])?.body(data);
    let mut time = edit_offset(data, trak, movie_timescale, timescale)?;
    for i in 0..u32_at(stts, 4)? as usize {
        let run = u32_at(stts, 8 + i * 8)?;
        let delta = u32_at(stts, 12 + i * 8)?;
        for _ in 0..run {
            decode_times.push(time);
            time += u64::from(delta);
        }
    }
    if decode_times.len() != count {
        return Err(malformed("stts and stsz disagree on sample count"));
    }

    let mut presentation_times = decode_times.clone();
    if let Some(ctts) = find_first_box(data, stbl.body_start, stbl.end, *b"ctts") {
        let ctts = ctts.body(data);
        let signed = ctts.first() == Some(&1);
        let mut index = 0;
        for i in 0..u32_at(ctts, 4)? as usize {
            let run = u32_at(ctts, 8 + i * 8)?;
            let raw = u32_at(ctts, 12 + i * 8)?;
            let offset = if signed { i64::from(raw as i32) } else { i64::from(raw) };
            for _ in 0..run {
                let slot = presentation_times
                    .get_mut(index)
                    .ok_or_else(|| malformed("ctts longer than sample count"))?;
                *slot = (*slot as i64 + offset).max(0) as u64;
                index += 1;
            }
        }
    }

    let sync_samples = match find_first_box(data, stbl.body_start, stbl.end, *b"stss") {
        Some(stss) => {
            let stss = stss.body(data);
            (0..u32_at(stss, 4)? as usize)
                .map(|i| u32_at(stss, 8 + i * 4).map(|n| n as usize - 1))
                .collect::<Result<Vec<_>>>()?
        }
        None => (0..count).collect(),
    };

    let sample_offsets = expand_chunk_offsets(data, stbl, &sample_sizes)?;

    Ok(TrackSummary {
        track_id,
        handler,
        codec: entry.fourcc,
        timescale,
        duration,
        resolution: (width > 0 && height > 0).then(|| Resolution::new(width, height)),
        sample_sizes,
        sample_offsets,
        decode_times,
        presentation_times,
        sync_samples,
    })
}

/// Media time at which the first sample plays: leading empty edits delay it,
/// and a non-zero `media_time` on the first real edit skips ahead.
fn edit_offset(data: &[u8], trak: BoxView, movie_timescale: u32, media_timescale: u32) -> Result<u64> {
    let Some(elst) = find_path(data, trak, &[*b"edts", *b"elst"]) else {
        return Ok(0);
    };
    let elst = elst.body(data);
    let wide = elst.first() == Some(&1);
    let entry_size = if wide { 20 } else { 12 };
    let mut gap = 0u64;
    let mut skip = 0u64;
    for i in 0..u32_at(elst, 4)? as usize {
        let at = 8 + i * entry_size;
        let (segment_duration, media_time) = if wide {
            (u64_at(elst, at)?, u64_at(elst, at + 8)? as i64)
        } else {
            (u64::from(u32_at(elst, at)?), i64::from(u32_at(elst, at + 4)? as i32))
        };
        if media_time == -1 {
            gap += segment_duration;
        } else {
            skip = media_time.max(0) as u64;
            break;
        }
    }
    let gap = if movie_timescale == 0 {
        gap
    } else {
        gap * u64::from(media_timescale) / u64::from(movie_timescale)
    };
    Ok(gap.saturating_sub(skip))
}

fn expand_chunk_offsets(data: &[u8], stbl: BoxView, sizes: &[u32]) -> Result<Vec<u64>> {
    let chunk_offsets: Vec<u64> = if let Some(co64) = find_first_box(data, stbl.body_start, stbl.end, *b"co64") {
        let co64 = co64.body(data);
        (0..u32_at(co64, 4)? as usize)
            .map(|i| u64_at(co64, 8 + i * 8))
            .collect::<Result<_>>()?
    } else {
        let stco = require(data, stbl, &[*b"stco"])?.body(data);
        (0..u32_at(stco, 4)? as usize)
            .map(|i| u32_at(stco, 8 + i * 4).map(u64::from))
            .collect::<Result<_>>()?
    };

    let stsc = require(data, stbl, &[*b"stsc"])?.body(data);
    let entries = (0..u32_at(stsc, 4)? as usize)
        .map(|i| Ok((u32_at(stsc, 8 + i * 12)? as usize, u32_at(stsc, 12 + i * 12)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut offsets = Vec::with_capacity(sizes.len());
    let mut sample = 0;
    for (chunk_index, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_index + 1;
        let per_chunk = entries
            .iter()
            .rev()
            .find(|(first, _)| *first <= chunk_number)
            .map_or(0, |(_, samples)| *samples);
        let mut offset = chunk_offset;
        for _ in 0..per_chunk {
            let size = *sizes.get(sample).ok_or_else(|| malformed("chunks exceed sample count"))?;
            offsets.push(offset);
            offset += u64::from(size);
            sample += 1;
        }
    }
    Ok(offsets)
}
