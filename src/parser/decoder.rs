use super::bit_reader::SubBlockBitReader;
use super::lzw::{Code, LzwDecoder, LzwError};
use super::DisposalMethod;
use crate::image::{Palette, Rgb};

use anyhow::Result;
use log::{debug, warn};
use thiserror::Error;

use std::io::prelude::*;
use std::io::ErrorKind;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_DESCRIPTOR_LABEL: u8 = 0x2c;
const TRAILER_LABEL: u8 = 0x3b;

// Extension labels
const APPLICATION_EXTENSION: u8 = 0xff;
const COMMENT_EXTENSION: u8 = 0xfe;
const GRAPHIC_CONTROL_EXTENSION: u8 = 0xf9;
const PLAIN_TEXT_EXTENSION: u8 = 0x01;

/// Palette indices are bytes, so raster data never needs more than 8 bit roots.
const MAX_RASTER_CODE_SIZE: u8 = 8;

#[derive(Debug)]
enum ExtensionType {
    Application,
    Comment,
    GraphicControl,
    PlainText,
    Unknown(u8),
}

impl From<u8> for ExtensionType {
    fn from(value: u8) -> Self {
        use ExtensionType::*;

        match value {
            APPLICATION_EXTENSION => Application,
            COMMENT_EXTENSION => Comment,
            GRAPHIC_CONTROL_EXTENSION => GraphicControl,
            PLAIN_TEXT_EXTENSION => PlainText,
            label => Unknown(label),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicControlExtension {
    pub disposal_method: Option<DisposalMethod>,
    pub user_input_flag: bool,
    pub transparent_color_flag: bool,

    /// Hundredths of a second.
    pub delay_time: u16,
    pub transparent_color_index: u8,
}

impl GraphicControlExtension {
    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent_color_flag
            .then_some(self.transparent_color_index)
    }
}

/// One table based image, with its image descriptor and decoded palette indices.
#[derive(Debug, Clone)]
pub struct Frame {
    pub left: u16,
    pub top: u16,

    pub width: u16,
    pub height: u16,

    pub interlaced: bool,
    pub sorted: bool,

    pub local_color_table: Option<Palette>,
    pub graphic_control: Option<GraphicControlExtension>,

    /// Row major, in stream order; interlaced frames keep the interlaced row order. May hold
    /// fewer than `width * height` entries when the stream ended early.
    pub indices: Box<[u8]>,
}

impl Frame {
    /// The local color table if there is one, the global one otherwise.
    pub fn palette<'a>(&'a self, global: Option<&'a [Rgb]>) -> Option<&'a [Rgb]> {
        self.local_color_table.as_deref().or(global)
    }

    pub fn pixel_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialPurposeExtension {
    ApplicationBlock {
        application_identifier: Box<str>,
        application_authentication_code: Box<[u8]>,
        application_data: Box<[u8]>,
    },
    CommentBlock(Box<[u8]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V87a,
    V89a,
}

impl TryFrom<&str> for Version {
    type Error = ParserError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "87a" => Ok(Version::V87a),
            "89a" => Ok(Version::V89a),
            version => Err(ParserError::UnsupportedVersion(version.into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Infinite,
    Number(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalScreenDescriptor {
    pub screen_width: u16,
    pub screen_height: u16,
    pub global_color_table_flag: bool,
    pub color_resolution: u8,
    pub sort_flag: bool,
    pub global_color_table_len: Option<usize>,
    pub background_color_index: u8,
    pub pixel_aspect_ratio: u8,
}

#[derive(Debug)]
enum ParserState {
    ProcessMagic,
    ProcessLogicalScreenDescriptor,
    ProcessGlobalColorTable,
    ProcessTrailer,

    DetermineNextBlock(Option<GraphicControlExtension>),
    ProcessExtension(u8, Option<GraphicControlExtension>),
    ProcessImageDescriptor(Option<GraphicControlExtension>),
    ProcessLocalColorTable(Frame, usize),
    ProcessImageData(Frame),

    Done,
}

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("signature is invalid")]
    InvalidSignature,

    #[error("version {0} in the header is unsupported")]
    UnsupportedVersion(String),

    #[error("encountered unexpected label, this label is not supported: 0x{0:02x}")]
    UnexpectedLabel(u8),

    #[error("{block} should be {expected} bytes long, got {actual}")]
    UnexpectedBlockSize {
        block: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("{0} is not followed by a block terminator")]
    MissingBlockTerminator(&'static str),

    #[error("encountered application descriptor with name {name}, expected descriptor data length to be {expected}, actual length is {actual}")]
    UnexpectedApplicationDescriptorDataLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("lzw code size {0} is out of range for palette indices")]
    InvalidLzwCodeSize(u8),
}

/// Reads a whole GIF file, decoding the raster data of every image as it goes.
#[derive(Debug)]
pub struct Decoder<'a, T: Read> {
    inner: &'a mut T,
    version: Option<Version>,
    logical_screen_descriptor: Option<LogicalScreenDescriptor>,
    global_color_table: Option<Palette>,
    special_purpose_extensions: Vec<SpecialPurposeExtension>,
    frames: Vec<Frame>,
    loop_count: Option<LoopCount>,
}

impl<'a, T: Read> Decoder<'a, T> {
    pub fn new(inner: &'a mut T) -> Self {
        Self {
            inner,
            version: None,
            logical_screen_descriptor: None,
            global_color_table: None,
            special_purpose_extensions: Vec::new(),
            frames: Vec::new(),
            loop_count: None,
        }
    }

    pub fn parse(&mut self) -> Result<()> {
        let mut state = ParserState::ProcessMagic;

        loop {
            debug!("begin parsing state {:?}", state);

            state = self.process_next_state(state)?;
            if let ParserState::Done = state {
                break Ok(());
            }
        }
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn logical_screen_descriptor(&self) -> Option<&LogicalScreenDescriptor> {
        self.logical_screen_descriptor.as_ref()
    }

    pub fn global_color_table(&self) -> Option<&[Rgb]> {
        self.global_color_table.as_deref()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn special_purpose_extensions(&self) -> &[SpecialPurposeExtension] {
        &self.special_purpose_extensions
    }

    pub fn loop_count(&self) -> Option<LoopCount> {
        self.loop_count
    }

    fn process_next_state(&mut self, next_state: ParserState) -> Result<ParserState> {
        use ParserState::*;

        match next_state {
            ProcessMagic => {
                let signature = self.read_str(3)?;
                if signature.as_ref() != "GIF" {
                    return Err(ParserError::InvalidSignature.into());
                }
                debug!("processed signature, got GIF");

                self.version = Some(Version::try_from(self.read_str(3)?.as_ref())?);
                debug!("processed version, got {:?}", self.version);

                Ok(ProcessLogicalScreenDescriptor)
            }
            ProcessLogicalScreenDescriptor => {
                let screen_width = self.read_u16()?;
                let screen_height = self.read_u16()?;

                let packed_fields = self.read_byte()?;

                // packed field start
                let global_color_table_flag = packed_fields & 0b10000000 != 0;
                let color_resolution = (packed_fields >> 4) & 0b00000111;
                let sort_flag = packed_fields & 0b00001000 != 0;
                let global_color_table_len =
                    global_color_table_flag.then(|| color_table_len(packed_fields));
                // packed field end

                let background_color_index = self.read_byte()?;
                let pixel_aspect_ratio = self.read_byte()?;

                self.logical_screen_descriptor = Some(LogicalScreenDescriptor {
                    screen_width,
                    screen_height,
                    global_color_table_flag,
                    color_resolution,
                    sort_flag,
                    global_color_table_len,
                    background_color_index,
                    pixel_aspect_ratio,
                });

                debug!(
                    "processed logical screen descriptor, got: {:#?}",
                    self.logical_screen_descriptor
                );

                let next_state = if global_color_table_flag {
                    ProcessGlobalColorTable
                } else {
                    DetermineNextBlock(None)
                };

                Ok(next_state)
            }
            ProcessGlobalColorTable => {
                let len = self
                    .logical_screen_descriptor
                    .as_ref()
                    .and_then(|screen_desc| screen_desc.global_color_table_len)
                    .unwrap_or_default();

                self.global_color_table = Some(self.read_color_table(len)?);
                debug!("processed global color table with {len} colors");

                Ok(DetermineNextBlock(None))
            }
            ProcessTrailer => Ok(Done),
            DetermineNextBlock(graphic_control_extension) => {
                let Some(introducer_or_label) = self.read_optional_byte()? else {
                    warn!("data stream ended without a trailer");
                    return Ok(ProcessTrailer);
                };

                match introducer_or_label {
                    // extension introducer means that a label follows determining what exact type
                    // of extension it is.
                    EXTENSION_INTRODUCER => Ok(ProcessExtension(
                        self.read_byte()?,
                        graphic_control_extension,
                    )),
                    IMAGE_DESCRIPTOR_LABEL => {
                        Ok(ProcessImageDescriptor(graphic_control_extension))
                    }
                    TRAILER_LABEL => Ok(ProcessTrailer),
                    label => Err(ParserError::UnexpectedLabel(label).into()),
                }
            }
            ProcessExtension(label, graphic_control_extension) => {
                self.process_extension(label.into(), graphic_control_extension)
            }
            ProcessImageDescriptor(graphic_control_extension) => {
                let left = self.read_u16()?;
                let top = self.read_u16()?;

                let width = self.read_u16()?;
                let height = self.read_u16()?;

                let packed_fields = self.read_byte()?;

                let local_color_table_flag = packed_fields & 0b10000000 != 0;
                let interlaced = packed_fields & 0b01000000 != 0;
                let sorted = packed_fields & 0b00100000 != 0;

                let frame = Frame {
                    left,
                    top,
                    width,
                    height,
                    interlaced,
                    sorted,
                    local_color_table: None,
                    graphic_control: graphic_control_extension,
                    indices: Box::default(),
                };
                debug!("processed image descriptor {width}x{height} at ({left}, {top})");

                let next_state = if local_color_table_flag {
                    ProcessLocalColorTable(frame, color_table_len(packed_fields))
                } else {
                    ProcessImageData(frame)
                };

                Ok(next_state)
            }
            ProcessLocalColorTable(mut frame, len) => {
                frame.local_color_table = Some(self.read_color_table(len)?);
                debug!("processed local color table with {len} colors");

                Ok(ProcessImageData(frame))
            }
            ProcessImageData(mut frame) => {
                frame.indices = self.read_raster_data(frame.pixel_count())?;
                self.frames.push(frame);

                Ok(DetermineNextBlock(None))
            }
            Done => Ok(Done),
        }
    }

    fn process_extension(
        &mut self,
        label: ExtensionType,
        pending_graphic_control: Option<GraphicControlExtension>,
    ) -> Result<ParserState> {
        use ExtensionType::*;

        debug!("processing extension type: {:?}", label);
        match label {
            Application => {
                self.expect_block_size("application extension", 11)?;
                let application_identifier = self.read_str(8)?;

                let application_authentication_code = self.read_bytes(3)?;
                let application_data = self.read_data_sub_blocks()?;

                if application_identifier.as_ref() == "NETSCAPE"
                    && application_authentication_code.as_ref() == "2.0".as_bytes()
                {
                    if application_data.len() != 3 {
                        return Err(ParserError::UnexpectedApplicationDescriptorDataLength {
                            name: application_identifier.into(),
                            expected: 3,
                            actual: application_data.len(),
                        }
                        .into());
                    }

                    let loop_number =
                        u16::from_le_bytes([application_data[1], application_data[2]]);
                    self.loop_count = Some(match loop_number {
                        0 => LoopCount::Infinite,
                        number => LoopCount::Number(number),
                    });
                    debug!("processed loop count, got: {:?}", self.loop_count);
                };

                self.special_purpose_extensions
                    .push(SpecialPurposeExtension::ApplicationBlock {
                        application_identifier,
                        application_authentication_code,
                        application_data,
                    });
                Ok(ParserState::DetermineNextBlock(pending_graphic_control))
            }
            Comment => {
                // sequence of data sub-blocks
                let data = self.read_data_sub_blocks()?;
                debug!("processed comment block, got: {}", String::from_utf8_lossy(&data));
                self.special_purpose_extensions
                    .push(SpecialPurposeExtension::CommentBlock(data));
                Ok(ParserState::DetermineNextBlock(pending_graphic_control))
            }
            GraphicControl => {
                self.expect_block_size("graphic control extension", 4)?;

                let packed_fields = self.read_byte()?;
                // packed fields definition
                // XXXYYYZW
                // XXX = reserved, not needed
                // YYY = disposal method, indicates what to do with graphic after displaying
                // Z = user input flag
                // W = transparent color flag

                let disposal_method = DisposalMethod::from_u8((packed_fields >> 2) & 0b00000111);
                let user_input_flag = packed_fields & 0b00000010 != 0;
                let transparent_color_flag = packed_fields & 0b00000001 != 0;

                let delay_time = self.read_u16()?;
                let transparent_color_index = self.read_byte()?;

                if self.read_byte()? != 0 {
                    return Err(
                        ParserError::MissingBlockTerminator("graphic control extension").into(),
                    );
                }

                let graphic_control_extension = GraphicControlExtension {
                    disposal_method,
                    user_input_flag,
                    transparent_color_flag,

                    delay_time,
                    transparent_color_index,
                };

                debug!(
                    "processed GraphicControlExtension: {:#?}",
                    graphic_control_extension
                );

                Ok(ParserState::DetermineNextBlock(Some(
                    graphic_control_extension,
                )))
            }
            PlainText => {
                // rendered text is not supported, the header and the text are skipped
                self.expect_block_size("plain text extension", 12)?;
                self.read_bytes(12)?;
                self.read_data_sub_blocks()?;

                // the graphic control extension applied to the text, not to the next image
                Ok(ParserState::DetermineNextBlock(None))
            }
            Unknown(label) => {
                warn!("skipping extension with unknown label 0x{label:02x}");
                self.read_data_sub_blocks()?;
                Ok(ParserState::DetermineNextBlock(pending_graphic_control))
            }
        }
    }

    /// Decodes one image's raster data straight from the stream.
    fn read_raster_data(&mut self, pixel_count: usize) -> Result<Box<[u8]>> {
        let lzw_code_size = self.read_byte()?;
        if lzw_code_size > MAX_RASTER_CODE_SIZE {
            return Err(ParserError::InvalidLzwCodeSize(lzw_code_size).into());
        }

        let root_count: Code = 1 << lzw_code_size;
        let roots: Vec<u8> = (0..root_count).map(|index| index as u8).collect();
        let reader = SubBlockBitReader::new(&mut *self.inner);
        let mut lzw = LzwDecoder::new(reader, lzw_code_size, roots)?;

        let indices = lzw
            .by_ref()
            .take(pixel_count)
            .collect::<Result<Vec<u8>, LzwError>>()?;
        // surplus pixels are decoded to find the end of the raster, but never stored
        let surplus = lzw
            .by_ref()
            .try_fold(0usize, |count, symbol| symbol.map(|_| count + 1))?;
        if surplus > 0 {
            warn!(
                "raster data holds {} pixels, the image only has room for {pixel_count}",
                pixel_count + surplus
            );
        } else if indices.len() < pixel_count {
            warn!(
                "raster data ended after {} of {pixel_count} pixels",
                indices.len()
            );
        }
        debug!(
            "decoded {} pixels, dictionary ended with {} entries",
            indices.len(),
            lzw.dictionary_len()
        );

        lzw.into_inner().finish()?;
        Ok(indices.into_boxed_slice())
    }

    fn read_color_table(&mut self, len: usize) -> Result<Palette> {
        let bytes = self.read_bytes(3 * len)?;
        Ok(bytes
            .chunks_exact(3)
            .map(|rgb| Rgb::new(rgb[0], rgb[1], rgb[2]))
            .collect())
    }

    fn expect_block_size(&mut self, block: &'static str, expected: u8) -> Result<()> {
        let actual = self.read_byte()?;
        if actual != expected {
            return Err(ParserError::UnexpectedBlockSize {
                block,
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn read_bytes(&mut self, count: usize) -> Result<Box<[u8]>> {
        let mut buffer = vec![0; count];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer.into_boxed_slice())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buffer: [u8; 1] = [0; 1];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer[0])
    }

    /// Like `read_byte`, but a clean end of stream yields `None`.
    fn read_optional_byte(&mut self) -> Result<Option<u8>> {
        let mut buffer: [u8; 1] = [0; 1];
        loop {
            match self.inner.read(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buffer[0])),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        // multi-byte fields are little endian throughout the format
        let mut buffer: [u8; 2] = [0; 2];
        self.inner.read_exact(&mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    fn read_str(&mut self, count: usize) -> Result<Box<str>> {
        let mut buffer = vec![0; count];
        self.inner.read_exact(&mut buffer)?;
        Ok(String::from_utf8(buffer)?.into_boxed_str())
    }

    fn read_data_sub_blocks(&mut self) -> Result<Box<[u8]>> {
        let mut block_size = self.read_byte()?;

        let mut result = Vec::with_capacity(block_size.into());

        // we might have read the block terminator at the end of the while loop, stop right there
        // because we're done.
        while block_size != 0 {
            let start = result.len();
            result.resize(start + usize::from(block_size), 0);
            self.inner.read_exact(&mut result[start..])?;

            block_size = self.read_byte()?;
        }

        Ok(result.into_boxed_slice())
    }
}

/// Color table length encoded in the low three bits of a packed field.
fn color_table_len(packed_fields: u8) -> usize {
    1 << ((packed_fields & 0b00000111) + 1)
}
