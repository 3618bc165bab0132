/// NAL unit types relevant to remuxing (ITU-T H.264 Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdrSlice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    Filler,
    Other(u8),
}

impl NalUnitType {
    /// Type of a NAL unit given its first (header) byte.
    pub fn from_header(byte: u8) -> Self {
        match byte & 0x1F {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            other => Self::Other(other),
        }
    }

    /// Parameter sets and delimiters live in `avcC` or are implied by sample
    /// boundaries, so they are not carried in MP4 sample data.
    pub fn is_out_of_band(self) -> bool {
        matches!(
            self,
            Self::Sps | Self::Pps | Self::AccessUnitDelimiter | Self::Filler
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_nal_ref_idc_bits() {
        assert_eq!(NalUnitType::from_header(0x65), NalUnitType::IdrSlice);
        assert_eq!(NalUnitType::from_header(0x67), NalUnitType::Sps);
        assert_eq!(NalUnitType::from_header(0x41), NalUnitType::NonIdrSlice);
        assert_eq!(NalUnitType::from_header(0x0E), NalUnitType::Other(14));
        assert!(NalUnitType::Pps.is_out_of_band());
        assert!(!NalUnitType::Sei.is_out_of_band());
    }
}
