//! GIF decoding down to a flat RGB canvas, and PPM output.
//!
//! The interesting part lives in [`parser::lzw`]: a GIF flavoured LZW decoder reading codes from
//! the sub-block framed, least significant bit first [`parser::bit_reader`]. The [`encoder`]
//! module is its inverse.

pub mod encoder;
pub mod image;
pub mod parser;
pub mod ppm_writer;

pub use parser::Decoder;
