use std::io::Cursor;

use bytes_util::BitReader;

use crate::{AacError, Result, sample_rate_from_index};

/// Fixed and variable ADTS header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (ADTS profile + 1).
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Total frame length including the header.
    pub frame_length: usize,
    pub header_length: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(AacError::Truncated {
                needed: 7,
                available: data.len(),
            });
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(AacError::NoSync);
        }

        let mut bits = BitReader::new(Cursor::new(&data[1..7]));
        let read = |bits: &mut BitReader<Cursor<&[u8]>>, n| {
            bits.read_bits(n).map_err(|_| AacError::Truncated {
                needed: 7,
                available: data.len(),
            })
        };
        read(&mut bits, 4)?; // sync word tail
        read(&mut bits, 1)?; // MPEG version
        read(&mut bits, 2)?; // layer
        let protection_absent = read(&mut bits, 1)? == 1;
        let profile = read(&mut bits, 2)? as u8;
        let sampling_frequency_index = read(&mut bits, 4)? as u8;
        read(&mut bits, 1)?; // private bit
        let channel_configuration = read(&mut bits, 3)? as u8;
        read(&mut bits, 4)?; // originality, home, copyright bits
        let frame_length = read(&mut bits, 13)? as usize;

        if sample_rate_from_index(sampling_frequency_index).is_none() {
            return Err(AacError::InvalidFrequencyIndex(sampling_frequency_index));
        }
        let header_length = if protection_absent { 7 } else { 9 };
        if frame_length < header_length {
            return Err(AacError::InvalidFrameLength(frame_length));
        }

        Ok(Self {
            object_type: profile + 1,
            sampling_frequency_index,
            channel_configuration,
            frame_length,
            header_length,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        sample_rate_from_index(self.sampling_frequency_index).unwrap_or(0)
    }
}

/// One ADTS frame: its header and the raw AAC payload after the header.
#[derive(Debug, Clone, Copy)]
pub struct AdtsFrame<'a> {
    pub header: AdtsHeader,
    pub payload: &'a [u8],
}

/// Iterator over consecutive ADTS frames.
///
/// Stops at the first position that does not hold a complete frame, which
/// also swallows cipher padding left at the end of decrypted segments.
pub struct AdtsFrames<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdtsFrames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            pos: skip_id3v2(data),
            data,
        }
    }
}

impl<'a> Iterator for AdtsFrames<'a> {
    type Item = AdtsFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        let header = AdtsHeader::parse(rest).ok()?;
        if header.frame_length > rest.len() {
            return None;
        }
        self.pos += header.frame_length;
        Some(AdtsFrame {
            header,
            payload: &rest[header.header_length..header.frame_length],
        })
    }
}

/// Offset of the first byte after a leading ID3v2 tag, or 0 when absent.
///
/// Packed-audio HLS segments carry their timestamp in such a tag.
pub fn skip_id3v2(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    (10 + size + footer).min(data.len())
}
