use std::io;

/// MSB-first bit reader over any byte source.
#[derive(Debug)]
pub struct BitReader<R> {
    inner: R,
    current: u8,
    remaining: u8,
}

impl<R: io::Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            current: 0,
            remaining: 0,
        }
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> io::Result<bool> {
        if self.remaining == 0 {
            let mut byte = [0u8; 1];
            self.inner.read_exact(&mut byte)?;
            self.current = byte[0];
            self.remaining = 8;
        }
        self.remaining -= 1;
        Ok((self.current >> self.remaining) & 1 == 1)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, count: u8) -> io::Result<u64> {
        if count > 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot read more than 64 bits at once",
            ));
        }
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn skip_bits(&mut self, count: usize) -> io::Result<()> {
        for _ in 0..count {
            self.read_bit()?;
        }
        Ok(())
    }

    /// True when the reader sits on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.remaining == 0
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
