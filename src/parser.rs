pub mod bit_reader;
mod decoder;
pub mod lzw;

pub use decoder::{
    Decoder, Frame, GraphicControlExtension, LogicalScreenDescriptor, LoopCount, ParserError,
    SpecialPurposeExtension, Version,
};

/// What happens to a frame's area once the next frame is about to be drawn.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalMethod {
    DoNotDispose = 1,
    RestoreToBackgroundColor = 2,
    RestoreToPrevious = 3,
}

impl DisposalMethod {
    /// 0 means no disposal was specified, 4 to 7 are undefined. Both map to `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DisposalMethod::DoNotDispose),
            2 => Some(DisposalMethod::RestoreToBackgroundColor),
            3 => Some(DisposalMethod::RestoreToPrevious),
            _ => None,
        }
    }
}
