//! GIF flavoured LZW encoder, the inverse of [`crate::parser::lzw::LzwDecoder`].
//!
//! The code width follows the same rule as the decoder: a code is written with as many bits as
//! the decoder's dictionary length needs at the time it reads it. When the dictionary is about to
//! outgrow 12 bit codes a clear code is emitted and a new epoch starts.

use std::collections::HashMap;
use std::io::{self, Write};

use thiserror::Error;

use crate::parser::bit_reader::MAX_SUB_BLOCK_LEN;
use crate::parser::lzw::{Code, MAX_CODE_WIDTH, MIN_INITIAL_CODE_SIZE};

/// Symbols are palette indices, so 8 bits is the widest root alphabet.
pub const MAX_ENCODER_CODE_SIZE: u8 = 8;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("code size must be between 2 and 8, was {0}")]
    CodeSize(u8),

    #[error("symbol {symbol} does not fit in a code size of {code_size} bits")]
    UnexpectedSymbol { symbol: u8, code_size: u8 },
}

/// Packs codes least significant bit first and frames the bytes into GIF sub-blocks.
pub struct CodeWriter<W: Write> {
    inner: W,
    block: Vec<u8>,
    buffer: u32,
    buffered_bits: u32,
}

impl<W: Write> CodeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            block: Vec::with_capacity(MAX_SUB_BLOCK_LEN),
            buffer: 0,
            buffered_bits: 0,
        }
    }

    pub fn write(&mut self, code: Code, width: u32) -> io::Result<()> {
        let mask = (1u32 << width) - 1;
        self.buffer |= (u32::from(code) & mask) << self.buffered_bits;
        self.buffered_bits += width;

        while self.buffered_bits >= 8 {
            self.push_byte(self.buffer as u8)?;
            self.buffer >>= 8;
            self.buffered_bits -= 8;
        }
        Ok(())
    }

    /// Pads the last byte with zeros, writes the pending sub-block and the terminator.
    pub fn finish(mut self) -> io::Result<W> {
        if self.buffered_bits > 0 {
            self.push_byte(self.buffer as u8)?;
            self.buffer = 0;
            self.buffered_bits = 0;
        }
        self.flush_block()?;
        self.inner.write_all(&[0])?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn push_byte(&mut self, byte: u8) -> io::Result<()> {
        self.block.push(byte);
        if self.block.len() == MAX_SUB_BLOCK_LEN {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if !self.block.is_empty() {
            self.inner.write_all(&[self.block.len() as u8])?;
            self.inner.write_all(&self.block)?;
            self.block.clear();
        }
        Ok(())
    }
}

/// Compresses palette indices into sub-blocked raster data.
///
/// The output starts with a clear code and ends with the end of information code followed by the
/// sub-block terminator. The leading code size byte of a GIF image is not included.
///
/// ```
/// let raster = gif2ppm::encoder::encode(&[0, 0, 1, 3], 2).unwrap();
/// assert_eq!(raster, [3, 0x04, 0x32, 0x05, 0]);
/// ```
pub fn encode(indices: &[u8], code_size: u8) -> Result<Vec<u8>, EncodingError> {
    encode_into(indices, code_size, Vec::new())
}

pub fn encode_into<W: Write>(
    indices: &[u8],
    code_size: u8,
    into: W,
) -> Result<W, EncodingError> {
    if !(MIN_INITIAL_CODE_SIZE..=MAX_ENCODER_CODE_SIZE).contains(&code_size) {
        return Err(EncodingError::CodeSize(code_size));
    }

    let clear_code: Code = 1 << code_size;
    let end_of_information_code = clear_code + 1;
    let initial_width = u32::from(code_size) + 1;

    let mut writer = CodeWriter::new(into);
    let mut table: HashMap<(Code, u8), Code> = HashMap::new();
    let mut next_code = clear_code + 2;
    let mut width = initial_width;

    writer.write(clear_code, width)?;

    let mut symbols = indices.iter().copied();
    let mut current: Code = match symbols.next() {
        Some(symbol) => check_symbol(symbol, code_size)?,
        None => {
            writer.write(end_of_information_code, width)?;
            return Ok(writer.finish()?);
        }
    };

    for symbol in symbols {
        check_symbol(symbol, code_size)?;

        if let Some(&code) = table.get(&(current, symbol)) {
            current = code;
            continue;
        }

        writer.write(current, width)?;
        let new_code = next_code;
        table.insert((current, symbol), new_code);
        next_code += 1;

        if new_code == 1 << width {
            if width < MAX_CODE_WIDTH {
                width += 1;
            } else {
                writer.write(clear_code, width)?;
                table.clear();
                next_code = clear_code + 2;
                width = initial_width;
            }
        }
        current = symbol.into();
    }

    writer.write(current, width)?;
    writer.write(end_of_information_code, width)?;
    Ok(writer.finish()?)
}

fn check_symbol(symbol: u8, code_size: u8) -> Result<Code, EncodingError> {
    if u16::from(symbol) >> code_size != 0 {
        return Err(EncodingError::UnexpectedSymbol { symbol, code_size });
    }
    Ok(symbol.into())
}
