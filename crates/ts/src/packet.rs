use bytes::Bytes;

use crate::{Result, TsError};

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// PAT PID (always 0x0000)
pub const PID_PAT: u16 = 0x0000;
/// NULL PID (always 0x1FFF)
pub const PID_NULL: u16 = 0x1FFF;

/// A transport packet reduced to the fields the demuxer acts on.
#[derive(Debug, Clone)]
pub struct TsPacket {
    pub pid: u16,
    pub payload_unit_start_indicator: bool,
    pub continuity_counter: u8,
    /// Adaptation field `random_access_indicator`.
    pub random_access: bool,
    pub payload: Option<Bytes>,
}

impl TsPacket {
    /// Parse a 188-byte packet. The payload is a zero-copy slice of `data`.
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        if data[0] != TS_SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let payload_unit_start_indicator = data[1] & 0x40 != 0;
        let pid = (u16::from(data[1] & 0x1F) << 8) | u16::from(data[2]);
        let adaptation_field_control = (data[3] >> 4) & 0x03;
        let continuity_counter = data[3] & 0x0F;

        let mut offset = 4;
        let mut random_access = false;
        if adaptation_field_control & 0x02 != 0 {
            let length = data[4] as usize;
            if 5 + length > TS_PACKET_SIZE {
                return Err(TsError::InsufficientData {
                    expected: 5 + length,
                    actual: TS_PACKET_SIZE,
                });
            }
            if length > 0 {
                random_access = data[5] & 0x40 != 0;
            }
            offset = 5 + length;
        }

        let payload = (adaptation_field_control & 0x01 != 0 && offset < TS_PACKET_SIZE)
            .then(|| data.slice(offset..));

        Ok(Self {
            pid,
            payload_unit_start_indicator,
            continuity_counter,
            random_access,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_sync_and_size() {
        let mut data = vec![0u8; 188];
        data[0] = 0x46;
        assert_eq!(
            TsPacket::parse(data.into()).unwrap_err(),
            TsError::InvalidSyncByte(0x46)
        );
        assert_eq!(
            TsPacket::parse(Bytes::from_static(&[0x47; 10])).unwrap_err(),
            TsError::InvalidPacketSize(10)
        );
    }

    #[test]
    fn parses_header_and_adaptation_field() {
        let mut data = vec![0xFFu8; 188];
        data[0] = 0x47;
        data[1] = 0x41; // PUSI, PID high bits = 1
        data[2] = 0x00;
        data[3] = 0x37; // adaptation + payload, CC 7
        data[4] = 7; // adaptation field length
        data[5] = 0x40; // random access

        let packet = TsPacket::parse(data.into()).unwrap();
        assert_eq!(packet.pid, 0x0100);
        assert!(packet.payload_unit_start_indicator);
        assert_eq!(packet.continuity_counter, 7);
        assert!(packet.random_access);
        assert_eq!(packet.payload.unwrap().len(), 188 - 12);
    }

    #[test]
    fn adaptation_only_packet_has_no_payload() {
        let mut data = vec![0u8; 188];
        data[0] = 0x47;
        data[3] = 0x20;
        data[4] = 183;
        let packet = TsPacket::parse(data.into()).unwrap();
        assert!(packet.payload.is_none());
        assert!(!packet.random_access);
    }
}
