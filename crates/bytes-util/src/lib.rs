//! Small byte and bit level helpers shared by the codec crates.

mod bit_reader;

pub use bit_reader::BitReader;
