//! MPEG-2 Transport Stream demultiplexing.
//!
//! Parses transport packets, the PAT/PMT program tables and PES headers, and
//! reassembles PES packets into timestamped elementary-stream frames.

pub mod demux;
pub mod error;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod stream_type;

pub use demux::{EsFrame, TsDemuxer, demux};
pub use error::TsError;
pub use packet::{PID_NULL, PID_PAT, TS_PACKET_SIZE, TS_SYNC_BYTE, TsPacket};
pub use pes::{PesHeader, TIMESTAMP_MASK, TIMESTAMP_MODULUS};
pub use psi::{Pat, PatProgram, Pmt, PmtStream};
pub use stream_type::StreamType;

/// Result type for TS parsing operations
pub type Result<T> = std::result::Result<T, TsError>;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
