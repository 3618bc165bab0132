//! Exp-Golomb decoding on top of [`bytes_util::BitReader`].

use std::io;

use bytes_util::BitReader;

pub trait BitReaderExpGolombExt {
    /// Reads an unsigned Exp-Golomb code (`ue(v)`).
    fn read_exp_golomb(&mut self) -> io::Result<u64>;

    /// Reads a signed Exp-Golomb code (`se(v)`).
    fn read_signed_exp_golomb(&mut self) -> io::Result<i64>;
}

impl<R: io::Read> BitReaderExpGolombExt for BitReader<R> {
    fn read_exp_golomb(&mut self) -> io::Result<u64> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 63 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "exp-golomb code too long",
                ));
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u64 << leading_zeros) - 1 + suffix)
    }

    fn read_signed_exp_golomb(&mut self) -> io::Result<i64> {
        let code = self.read_exp_golomb()?;
        let magnitude = code.div_ceil(2) as i64;
        if code % 2 == 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn decodes_unsigned_codes() {
        // 1 | 010 | 011 | 00100 -> 0, 1, 2, 3
        let mut reader = BitReader::new(Cursor::new([0b1010_0110, 0b0100_0000]));
        assert_eq!(reader.read_exp_golomb().unwrap(), 0);
        assert_eq!(reader.read_exp_golomb().unwrap(), 1);
        assert_eq!(reader.read_exp_golomb().unwrap(), 2);
        assert_eq!(reader.read_exp_golomb().unwrap(), 3);
    }

    #[test]
    fn decodes_signed_codes() {
        // 010 -> 1, 011 -> -1, 00100 -> 2
        let mut reader = BitReader::new(Cursor::new([0b0100_1100, 0b1000_0000]));
        assert_eq!(reader.read_signed_exp_golomb().unwrap(), 1);
        assert_eq!(reader.read_signed_exp_golomb().unwrap(), -1);
        assert_eq!(reader.read_signed_exp_golomb().unwrap(), 2);
    }
}
