//! H.264/AVC bitstream helpers: Annex B framing, SPS parsing and the
//! `avcC` decoder configuration record.

mod annexb;
mod config;
mod nal;
mod sps;

pub use annexb::{AnnexBNalIter, annexb_to_length_prefixed, iter_nal_units};
pub use config::AvcDecoderConfigurationRecord;
pub use nal::NalUnitType;
pub use sps::Sps;
