use crate::{Result, TsError};

/// PTS/DTS values are 33-bit counters of a 90 kHz clock.
pub const TIMESTAMP_MODULUS: u64 = 1 << 33;
pub const TIMESTAMP_MASK: u64 = TIMESTAMP_MODULUS - 1;

/// Decode a 5-byte PTS/DTS field.
///
/// Layout: `[prefix(4) | ts32..30 | 1 | ts29..15 | 1 | ts14..0 | 1]`
fn read_timestamp(field: &[u8]) -> u64 {
    (u64::from(field[0] >> 1) & 0x07) << 30
        | u64::from(field[1]) << 22
        | (u64::from(field[2] >> 1) & 0x7F) << 15
        | u64::from(field[3]) << 7
        | (u64::from(field[4] >> 1) & 0x7F)
}

/// Stream ids that carry the optional PES header (ISO 13818-1 Table 2-21).
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// Declared packet length; 0 means unbounded (common for video).
    pub packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Offset of the elementary stream data from the start of the PES packet.
    pub payload_offset: usize,
}

impl PesHeader {
    /// Parse a PES header starting at the `00 00 01` prefix.
    ///
    /// `pid` is only used for error reporting.
    pub fn parse(data: &[u8], pid: u16) -> Result<Self> {
        let need = |expected: usize| -> Result<()> {
            if data.len() < expected {
                Err(TsError::InsufficientData {
                    expected,
                    actual: data.len(),
                })
            } else {
                Ok(())
            }
        };

        need(6)?;
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(TsError::InvalidPesStartCode { pid });
        }
        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]);

        if !has_optional_header(stream_id) {
            return Ok(Self {
                stream_id,
                packet_length,
                pts: None,
                dts: None,
                payload_offset: 6,
            });
        }

        need(9)?;
        let flags = data[7] >> 6;
        let payload_offset = 9 + data[8] as usize;
        let (pts, dts) = match flags {
            0b00 => (None, None),
            0b10 => {
                need(14)?;
                (Some(read_timestamp(&data[9..14])), None)
            }
            0b11 => {
                need(19)?;
                (
                    Some(read_timestamp(&data[9..14])),
                    Some(read_timestamp(&data[14..19])),
                )
            }
            other => return Err(TsError::InvalidPtsDtsFlags(other)),
        };
        need(payload_offset)?;

        Ok(Self {
            stream_id,
            packet_length,
            pts,
            dts,
            payload_offset,
        })
    }

    /// Total PES packet size when the header declares one.
    pub fn declared_size(&self) -> Option<usize> {
        (self.packet_length > 0).then(|| 6 + self.packet_length as usize)
    }
}

#[cfg(test)]
pub(crate) fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 1,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 1,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pes_with(flags: u8, fields: &[u8]) -> Vec<u8> {
        let mut data = vec![0, 0, 1, 0xE0, 0, 0, 0x80, flags, fields.len() as u8];
        data.extend_from_slice(fields);
        data.extend_from_slice(&[0xAA, 0xBB]);
        data
    }

    #[test]
    fn parses_pts_only() {
        let data = pes_with(0x80, &encode_timestamp(0x2, 900_000));
        let header = PesHeader::parse(&data, 0x100).unwrap();
        assert_eq!(header.pts, Some(900_000));
        assert_eq!(header.dts, None);
        assert_eq!(&data[header.payload_offset..], &[0xAA, 0xBB]);
    }

    #[test]
    fn parses_pts_and_dts_near_wrap() {
        let pts = TIMESTAMP_MASK - 10;
        let mut fields = encode_timestamp(0x3, pts).to_vec();
        fields.extend(encode_timestamp(0x1, 3_003));
        let header = PesHeader::parse(&pes_with(0xC0, &fields), 0x100).unwrap();
        assert_eq!(header.pts, Some(pts));
        assert_eq!(header.dts, Some(3_003));
        assert_eq!(header.declared_size(), None);
    }

    #[test]
    fn rejects_bad_start_code_and_flags() {
        assert_eq!(
            PesHeader::parse(&[0, 0, 2, 0xE0, 0, 0], 0x42).unwrap_err(),
            TsError::InvalidPesStartCode { pid: 0x42 }
        );
        assert_eq!(
            PesHeader::parse(&pes_with(0x40, &[]), 0x100).unwrap_err(),
            TsError::InvalidPtsDtsFlags(0b01)
        );
    }

    #[test]
    fn padding_stream_has_no_optional_header() {
        let header = PesHeader::parse(&[0, 0, 1, 0xBE, 0, 4, 0xFF, 0xFF, 0xFF, 0xFF], 1).unwrap();
        assert_eq!(header.payload_offset, 6);
        assert_eq!(header.declared_size(), Some(10));
    }
}
