//! WebVTT subtitle handling: a small parser and the part merger used to
//! stitch multi-part episodes into one subtitle file.

mod error;
mod merge;
mod parser;
mod timestamp;

pub use error::WebVttError;
pub use merge::{join_segments, merge};
pub use parser::{Block, Cue, WebVtt};
pub use timestamp::Timestamp;

pub type Result<T> = std::result::Result<T, WebVttError>;
