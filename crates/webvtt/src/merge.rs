use tracing::debug;

use crate::{Block, Result, WebVtt, WebVttError};

/// Concatenates the segment files of one subtitle track into a single
/// document. The header of the first segment is kept; later headers are dropped.
pub fn join_segments<S: AsRef<str>>(segments: &[S]) -> Result<String> {
    let mut joined = WebVtt::default();
    for (index, segment) in segments.iter().enumerate() {
        let vtt = WebVtt::parse(segment.as_ref())?;
        if index == 0 {
            joined.header = vtt.header;
        }
        joined.blocks.extend(vtt.blocks);
    }
    Ok(joined.to_string())
}

/// Merges per-part WebVTT documents into one, shifting every cue of part `i`
/// by the sum of `durations[..i]` (seconds).
pub fn merge<S: AsRef<str>>(parts: &[S], durations: &[f64]) -> Result<String> {
    if parts.len() != durations.len() {
        return Err(WebVttError::LengthMismatch {
            parts: parts.len(),
            durations: durations.len(),
        });
    }
    if let Some((index, &value)) = durations
        .iter()
        .enumerate()
        .find(|(_, d)| !d.is_finite() || **d < 0.0)
    {
        return Err(WebVttError::InvalidDuration { index, value });
    }

    let namespaced = parts.len() > 1;
    let mut merged = WebVtt::default();
    let mut elapsed = 0.0_f64;

    for (index, (part, duration)) in parts.iter().zip(durations).enumerate() {
        let vtt = WebVtt::parse(part.as_ref())?;
        let offset_ms = (elapsed * 1000.0).round() as u64;
        let part_number = index + 1;

        debug!(
            part = part_number,
            offset_ms,
            cues = vtt.cues().count(),
            "merging subtitle part"
        );

        if !vtt.header.is_empty() {
            merged
                .blocks
                .push(Block::Note(format!("Part {part_number} {}", vtt.header)));
        }

        merged.blocks.extend(vtt.blocks.into_iter().map(|block| match block {
            Block::Cue(cue) => {
                let mut cue = cue.shifted(offset_ms);
                if namespaced {
                    cue.id = cue.id.map(|id| format!("{part_number}:{id}"));
                }
                Block::Cue(cue)
            }
            note => note,
        }));

        elapsed += duration;
    }

    Ok(merged.to_string())
}
