use std::io::{self, Cursor};

use bytes::{BufMut, Bytes, BytesMut};

use crate::Sps;

/// `AVCDecoderConfigurationRecord` (ISO/IEC 14496-15 5.3.3.1), the payload of
/// an `avcC` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcDecoderConfigurationRecord {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    chroma_format_idc: u8,
    bit_depth_luma: u8,
    bit_depth_chroma: u8,
}

impl AvcDecoderConfigurationRecord {
    /// Builds a record from one SPS and one PPS NAL unit (without start codes).
    pub fn from_parameter_sets(sps: &[u8], pps: &[u8]) -> io::Result<(Self, Sps)> {
        let parsed = Sps::parse_with_emulation_prevention(Cursor::new(sps))?;
        let record = Self {
            profile_indication: parsed.profile_idc,
            profile_compatibility: parsed.constraint_flags,
            level_indication: parsed.level_idc,
            sps: vec![Bytes::copy_from_slice(sps)],
            pps: vec![Bytes::copy_from_slice(pps)],
            chroma_format_idc: parsed.chroma_format_idc,
            bit_depth_luma: parsed.bit_depth_luma,
            bit_depth_chroma: parsed.bit_depth_chroma,
        };
        Ok((record, parsed))
    }

    /// Codec string as used in HLS `CODECS` attributes, e.g. `avc1.64001f`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(1);
        out.put_u8(self.profile_indication);
        out.put_u8(self.profile_compatibility);
        out.put_u8(self.level_indication);
        out.put_u8(0xFF); // 4-byte NAL lengths
        out.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        if matches!(self.profile_indication, 100 | 110 | 122 | 144) {
            out.put_u8(0xFC | (self.chroma_format_idc & 0x03));
            out.put_u8(0xF8 | (self.bit_depth_luma.saturating_sub(8) & 0x07));
            out.put_u8(0xF8 | (self.bit_depth_chroma.saturating_sub(8) & 0x07));
            out.put_u8(0);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 7] = [0x67, 0x42, 0x00, 0x1E, 0xDA, 0x10, 0x99];
    const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

    #[test]
    fn serializes_baseline_record() {
        let (record, sps) = AvcDecoderConfigurationRecord::from_parameter_sets(&SPS, &PPS).unwrap();
        assert_eq!(sps.width(), 64);
        assert_eq!(record.codec_string(), "avc1.42001e");

        let bytes = record.to_bytes();
        assert_eq!(&bytes[..6], &[1, 0x42, 0x00, 0x1E, 0xFF, 0xE1]);
        assert_eq!(&bytes[6..8], &[0, 7]);
        assert_eq!(&bytes[8..15], &SPS);
        assert_eq!(bytes[15], 1);
        assert_eq!(&bytes[16..18], &[0, 4]);
        assert_eq!(&bytes[18..], &PPS);
    }
}
