use crate::AdtsHeader;

/// Two-byte MPEG-4 AudioSpecificConfig as carried in an `esds` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    pub fn to_bytes(&self) -> [u8; 2] {
        let value: u16 = ((self.object_type as u16 & 0x1F) << 11)
            | ((self.sampling_frequency_index as u16 & 0x0F) << 7)
            | ((self.channel_configuration as u16 & 0x0F) << 3);
        value.to_be_bytes()
    }
}

impl From<&AdtsHeader> for AudioSpecificConfig {
    fn from(header: &AdtsHeader) -> Self {
        Self {
            object_type: header.object_type,
            sampling_frequency_index: header.sampling_frequency_index,
            channel_configuration: header.channel_configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_aac_lc_stereo_48k() {
        let config = AudioSpecificConfig {
            object_type: 2,
            sampling_frequency_index: 3,
            channel_configuration: 2,
        };
        assert_eq!(config.to_bytes(), [0x11, 0x90]);
    }
}
