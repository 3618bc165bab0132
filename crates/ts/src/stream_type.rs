/// Elementary stream types from the PMT (ISO 13818-1 Table 2-34).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg1Audio,
    Mpeg2Audio,
    AacAdts,
    AacLatm,
    Id3Metadata,
    H264,
    H265,
    Other(u8),
}

impl StreamType {
    pub fn is_video(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            Self::Mpeg1Audio | Self::Mpeg2Audio | Self::AacAdts | Self::AacLatm
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mpeg1Audio => "mpeg1-audio",
            Self::Mpeg2Audio => "mpeg2-audio",
            Self::AacAdts => "aac-adts",
            Self::AacLatm => "aac-latm",
            Self::Id3Metadata => "id3",
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Other(_) => "other",
        }
    }
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x03 => Self::Mpeg1Audio,
            0x04 => Self::Mpeg2Audio,
            0x0F => Self::AacAdts,
            0x11 => Self::AacLatm,
            0x15 => Self::Id3Metadata,
            0x1B => Self::H264,
            0x24 => Self::H265,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(value) => write!(f, "stream type 0x{value:02x}"),
            known => f.write_str(known.as_str()),
        }
    }
}
