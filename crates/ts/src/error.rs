use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid packet size: {0} (expected 188)")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte 0x{0:02x}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("invalid PES start code on PID 0x{pid:04x}")]
    InvalidPesStartCode { pid: u16 },

    #[error("invalid PTS/DTS flags: {0:#04b}")]
    InvalidPtsDtsFlags(u8),

    #[error("malformed {table} section: {reason}")]
    InvalidSection { table: &'static str, reason: String },

    #[error("input ends with {trailing} bytes of an incomplete packet")]
    Truncated { trailing: usize },
}

impl TsError {
    /// Incomplete trailing input, as produced by a segment cut off mid-packet.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    pub(crate) fn section(table: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSection {
            table,
            reason: reason.into(),
        }
    }
}
