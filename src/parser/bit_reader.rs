use std::io::{self, Read};

use super::lzw::LzwError;

/// Largest sub-block a GIF data stream can carry; the length prefix is one byte.
pub const MAX_SUB_BLOCK_LEN: usize = u8::MAX as usize;

/// Widest value a single [`SubBlockBitReader::get`] call can return.
pub const MAX_READ_WIDTH: u32 = u16::BITS;

/// Serves GIF raster data as a stream of bits.
///
/// The bytes arrive in length prefixed sub-blocks terminated by an empty one. Inside each byte
/// bits are consumed least significant first, and every bit becomes the next more significant
/// bit of the returned value. This is the GIF packing order, the reverse of the usual MSB-first
/// bit readers.
#[derive(Debug)]
pub struct SubBlockBitReader<R: Read> {
    inner: R,
    block: [u8; MAX_SUB_BLOCK_LEN],
    block_len: usize,
    block_pos: usize,
    // low bits are consumed first
    buffer: u8,
    remaining_bits: u8,
    terminated: bool,
}

impl<R: Read> SubBlockBitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            block: [0; MAX_SUB_BLOCK_LEN],
            block_len: 0,
            block_pos: 0,
            buffer: 0,
            remaining_bits: 0,
            terminated: false,
        }
    }

    /// Reads the next `count` bits. `count` may be zero, in which case nothing is consumed.
    pub fn get(&mut self, count: u32) -> Result<u16, LzwError> {
        if count > MAX_READ_WIDTH {
            return Err(LzwError::InvalidReadWidth(count));
        }

        let mut value: u16 = 0;
        for i in 0..count {
            value |= u16::from(self.next_bit()?) << i;
        }
        Ok(value)
    }

    /// True once the zero length terminator sub-block has been consumed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Skips whatever is left of the data stream, up to and including the terminator.
    ///
    /// Encoders may pad the raster data after the end of information code, so the container
    /// has to drain it before looking for the next block.
    pub fn finish(&mut self) -> Result<(), LzwError> {
        self.remaining_bits = 0;
        self.block_pos = self.block_len;

        while !self.terminated {
            let len = self.read_block_len()?;
            if len == 0 {
                self.terminated = true;
            } else {
                self.inner.read_exact(&mut self.block[..len])?;
            }
        }
        self.block_len = 0;
        self.block_pos = 0;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_bit(&mut self) -> Result<u8, LzwError> {
        if self.remaining_bits == 0 {
            self.buffer = self.next_byte()?;
            self.remaining_bits = 8;
        }

        let bit = self.buffer & 0x01;
        self.buffer >>= 1;
        self.remaining_bits -= 1;
        Ok(bit)
    }

    fn next_byte(&mut self) -> Result<u8, LzwError> {
        if self.block_pos == self.block_len {
            self.read_sub_block()?;
        }

        let byte = self.block[self.block_pos];
        self.block_pos += 1;
        Ok(byte)
    }

    fn read_sub_block(&mut self) -> Result<(), LzwError> {
        if self.terminated {
            return Err(past_terminator());
        }

        let len = self.read_block_len()?;
        if len == 0 {
            self.terminated = true;
            return Err(past_terminator());
        }

        self.inner.read_exact(&mut self.block[..len])?;
        self.block_len = len;
        self.block_pos = 0;
        Ok(())
    }

    fn read_block_len(&mut self) -> Result<usize, LzwError> {
        let mut len = [0; 1];
        self.inner.read_exact(&mut len)?;
        Ok(len[0].into())
    }
}

fn past_terminator() -> LzwError {
    LzwError::TruncatedInput(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "raster data ended at the sub-block terminator",
    ))
}
