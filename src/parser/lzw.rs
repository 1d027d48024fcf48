use std::io::{self, Read};

use log::{debug, trace};
use thiserror::Error;

use super::bit_reader::SubBlockBitReader;

/// Index of an entry in the LZW dictionary.
pub type Code = u16;

pub const MAX_CODE_WIDTH: u32 = 12;
pub const MAX_DICTIONARY_LEN: usize = 1 << MAX_CODE_WIDTH;
/// GIF never uses fewer than two bits per root code.
pub const MIN_INITIAL_CODE_SIZE: u8 = 2;
/// The first code width is `initial_code_size + 1`, which must stay within [`MAX_CODE_WIDTH`].
pub const MAX_INITIAL_CODE_SIZE: u8 = MAX_CODE_WIDTH as u8 - 1;

#[derive(Error, Debug)]
pub enum LzwError {
    #[error("raster data is truncated: {0}")]
    TruncatedInput(#[from] io::Error),

    #[error("dictionary is full (4096 entries) and no clear code was received")]
    CodeWidthOverflow,

    #[error("code {code} does not refer to the dictionary, which has {dictionary_len} entries")]
    InvalidCodeReference { code: Code, dictionary_len: usize },

    #[error("initial code size {0} is out of range, expected 2 to 11")]
    InvalidCodeSize(u8),

    #[error("root table must hold {expected} symbols, got {actual}")]
    RootTableSize { expected: usize, actual: usize },

    #[error("cannot read {0} bits at once, the limit is 16")]
    InvalidReadWidth(u32),
}

/// Number of bits needed to write `len` in binary, capped at [`MAX_CODE_WIDTH`].
///
/// A dictionary of 6 entries is read with 3 bit codes, one of 8 entries with 4 bit codes. The
/// width grows as soon as the next entry to be created would not fit in the current width.
pub fn code_width(len: usize) -> u32 {
    (usize::BITS - len.leading_zeros()).min(MAX_CODE_WIDTH)
}

#[derive(Debug, Clone, Copy)]
struct Entry<S> {
    prefix: Code,
    symbol: S,
    // first symbol of the whole chain, saves a walk when a new entry is derived
    first: S,
}

/// Append-only code table. Codes below `roots.len()` are the roots, the next two are the clear
/// and end of information codes, everything after lives in `entries`.
#[derive(Debug)]
struct Dictionary<S> {
    roots: Box<[S]>,
    entries: Vec<Entry<S>>,
}

impl<S: Copy> Dictionary<S> {
    fn new(roots: Box<[S]>) -> Self {
        let capacity = MAX_DICTIONARY_LEN - (roots.len() + 2);
        Self {
            roots,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.first_free() + self.entries.len()
    }

    fn first_free(&self) -> usize {
        self.roots.len() + 2
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn is_root(&self, code: Code) -> bool {
        usize::from(code) < self.roots.len()
    }

    fn entry(&self, code: Code) -> Option<&Entry<S>> {
        usize::from(code)
            .checked_sub(self.first_free())
            .and_then(|index| self.entries.get(index))
    }

    /// Root codes have no prefix.
    fn prefix(&self, code: Code) -> Option<Code> {
        self.entry(code).map(|entry| entry.prefix)
    }

    fn first_symbol(&self, code: Code) -> S {
        match self.entry(code) {
            Some(entry) => entry.first,
            None => self.roots[usize::from(code)],
        }
    }

    fn symbol(&self, code: Code) -> S {
        match self.entry(code) {
            Some(entry) => entry.symbol,
            None => self.roots[usize::from(code)],
        }
    }

    /// Pushes the expansion of `code` onto `stack`, last symbol first, so popping yields the
    /// symbols in output order.
    fn push_expansion(&self, code: Code, stack: &mut Vec<S>) {
        let mut current = Some(code);
        while let Some(code) = current {
            stack.push(self.symbol(code));
            current = self.prefix(code);
        }
    }

    fn add(&mut self, prefix: Code, symbol: S) {
        let first = self.first_symbol(prefix);
        self.entries.push(Entry {
            prefix,
            symbol,
            first,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingFirstCodeOfEpoch,
    Steady { last_code: Code },
    Terminated,
}

/// Decodes one GIF raster data stream into symbols taken from a root table.
///
/// The decoder pulls codes lazily from the bit reader, either through [`Iterator`] or all at once
/// with [`LzwDecoder::decode_all`]. It stops for good after the end of information code or after
/// the first error.
#[derive(Debug)]
pub struct LzwDecoder<R: Read, S> {
    reader: SubBlockBitReader<R>,
    dictionary: Dictionary<S>,
    clear_code: Code,
    end_of_information_code: Code,
    state: DecoderState,
    // symbols decoded but not yet handed out, in reverse order
    pending: Vec<S>,
}

impl<R: Read, S: Copy> LzwDecoder<R, S> {
    /// `roots` must hold exactly `2^initial_code_size` symbols, one per root code.
    pub fn new(
        reader: SubBlockBitReader<R>,
        initial_code_size: u8,
        roots: impl Into<Box<[S]>>,
    ) -> Result<Self, LzwError> {
        if !(MIN_INITIAL_CODE_SIZE..=MAX_INITIAL_CODE_SIZE).contains(&initial_code_size) {
            return Err(LzwError::InvalidCodeSize(initial_code_size));
        }

        let roots = roots.into();
        let clear_code: Code = 1 << initial_code_size;
        if roots.len() != usize::from(clear_code) {
            return Err(LzwError::RootTableSize {
                expected: clear_code.into(),
                actual: roots.len(),
            });
        }

        debug!(
            "lzw decoder ready, clear_code={clear_code} end_of_information_code={}",
            clear_code + 1
        );

        Ok(Self {
            reader,
            dictionary: Dictionary::new(roots),
            clear_code,
            end_of_information_code: clear_code + 1,
            state: DecoderState::AwaitingFirstCodeOfEpoch,
            pending: Vec::new(),
        })
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Entries currently in the dictionary, roots and the two control codes included.
    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len()
    }

    /// Width of the next code to be read.
    pub fn code_width(&self) -> u32 {
        code_width(self.dictionary.len())
    }

    pub fn clear_code(&self) -> Code {
        self.clear_code
    }

    pub fn end_of_information_code(&self) -> Code {
        self.end_of_information_code
    }

    /// Decodes everything up to the end of information code.
    pub fn decode_all(&mut self) -> Result<Vec<S>, LzwError> {
        self.by_ref().collect()
    }

    pub fn into_inner(self) -> SubBlockBitReader<R> {
        self.reader
    }

    /// Reads one code and applies it. Decoded symbols land in `pending`.
    fn step(&mut self) -> Result<(), LzwError> {
        let dictionary_len = self.dictionary.len();
        let code = self.reader.get(code_width(dictionary_len))?;

        if code == self.end_of_information_code {
            trace!("end of information with {dictionary_len} dictionary entries");
            self.state = DecoderState::Terminated;
            return Ok(());
        }

        if code == self.clear_code {
            trace!("clear code with {dictionary_len} dictionary entries");
            self.dictionary.reset();
            self.state = DecoderState::AwaitingFirstCodeOfEpoch;
            return Ok(());
        }

        match self.state {
            DecoderState::AwaitingFirstCodeOfEpoch => {
                if !self.dictionary.is_root(code) {
                    return Err(LzwError::InvalidCodeReference {
                        code,
                        dictionary_len,
                    });
                }
                self.pending.push(self.dictionary.symbol(code));
            }
            DecoderState::Steady { last_code } => {
                if dictionary_len >= MAX_DICTIONARY_LEN {
                    return Err(LzwError::CodeWidthOverflow);
                }

                let code_index = usize::from(code);
                let first = if code_index < dictionary_len {
                    self.dictionary.push_expansion(code, &mut self.pending);
                    self.dictionary.first_symbol(code)
                } else if code_index == dictionary_len {
                    // the code names the entry about to be created: last_code's expansion
                    // followed by its own first symbol
                    let first = self.dictionary.first_symbol(last_code);
                    self.pending.push(first);
                    self.dictionary.push_expansion(last_code, &mut self.pending);
                    first
                } else {
                    return Err(LzwError::InvalidCodeReference {
                        code,
                        dictionary_len,
                    });
                };

                self.dictionary.add(last_code, first);
            }
            DecoderState::Terminated => unreachable!("terminated decoders never step"),
        }

        self.state = DecoderState::Steady { last_code: code };
        Ok(())
    }
}

impl<R: Read, S: Copy> Iterator for LzwDecoder<R, S> {
    type Item = Result<S, LzwError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(symbol) = self.pending.pop() {
                return Some(Ok(symbol));
            }
            if self.state == DecoderState::Terminated {
                return None;
            }
            if let Err(err) = self.step() {
                self.state = DecoderState::Terminated;
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::encoder::{self, CodeWriter};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Color {
        A,
        B,
        C,
        D,
    }

    use Color::*;

    const ROOTS: [Color; 4] = [A, B, C, D];

    /// Packs codes with explicit widths into sub-blocked raster data.
    fn pack(codes: &[(u16, u32)]) -> Vec<u8> {
        let mut writer = CodeWriter::new(Vec::new());
        for &(code, width) in codes {
            writer.write(code, width).unwrap();
        }
        writer.finish().unwrap()
    }

    fn decoder(data: &[u8]) -> LzwDecoder<&[u8], Color> {
        LzwDecoder::new(SubBlockBitReader::new(data), 2, ROOTS).unwrap()
    }

    #[test]
    fn first_codes_of_epoch_are_emitted_directly() {
        let data = pack(&[(4, 3), (0, 3), (1, 3), (2, 3), (3, 4), (5, 4)]);
        let mut decoder = decoder(&data);
        assert_eq!(decoder.clear_code(), 4);
        assert_eq!(decoder.end_of_information_code(), 5);

        assert_eq!(decoder.decode_all().unwrap(), [A, B, C, D]);
        assert_eq!(decoder.state(), DecoderState::Terminated);
        assert_eq!(decoder.dictionary_len(), 9);
    }

    #[test]
    fn end_of_information_stops_immediately() {
        // anything after the end of information code must be left unread
        let data = pack(&[(4, 3), (1, 3), (5, 3), (7, 3), (7, 3)]);
        let mut decoder = decoder(&data);

        assert_eq!(decoder.decode_all().unwrap(), [B]);
        assert!(decoder.next().is_none());
    }

    #[test]
    fn leaves_sub_blocks_after_end_of_information_unread() {
        // 20 bits of codes fill a 3 byte sub-block, another sub-block follows
        let mut data = pack(&[(4, 3), (0, 3), (1, 3), (2, 3), (3, 4), (5, 4)]);
        assert_eq!(data.len(), 5);
        data.pop();
        data.extend_from_slice(&[3, 9, 9, 9, 0]);

        let mut cursor = Cursor::new(data);
        let mut decoder = LzwDecoder::new(SubBlockBitReader::new(&mut cursor), 2, ROOTS).unwrap();
        assert_eq!(decoder.decode_all().unwrap(), [A, B, C, D]);
        assert!(!decoder.into_inner().is_terminated());

        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn resolves_code_equal_to_dictionary_len() {
        // A B, then 6 = "AB", then 8 is not in the dictionary yet and must expand to "ABA"
        let data = pack(&[(4, 3), (0, 3), (1, 3), (6, 3), (8, 4), (5, 4)]);
        let mut decoder = decoder(&data);

        assert_eq!(decoder.decode_all().unwrap(), [A, B, A, B, A, B, A]);
        assert_eq!(decoder.dictionary_len(), 9);
    }

    #[test]
    fn clear_code_resets_the_dictionary() {
        let data = pack(&[
            (4, 3),
            (0, 3),
            (1, 3),
            (6, 3),
            (4, 4),
            // first of a new epoch, 3 bits again, no dictionary growth
            (3, 3),
            (2, 3),
            (5, 3),
        ]);
        let mut decoder = decoder(&data);

        let first_epoch: Vec<Color> = decoder
            .by_ref()
            .take(4)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(first_epoch, [A, B, A, B]);
        assert_eq!(decoder.dictionary_len(), 8);

        assert_eq!(decoder.next().unwrap().unwrap(), D);
        assert_eq!(decoder.dictionary_len(), 6);
        assert_eq!(decoder.state(), DecoderState::Steady { last_code: 3 });

        assert_eq!(decoder.decode_all().unwrap(), [C]);
        assert_eq!(decoder.dictionary_len(), 7);
    }

    #[test]
    fn dictionary_grows_by_one_per_steady_code() {
        let pixels: Vec<u8> = (0..64u32).map(|i| ((i * 7 + i / 3) % 4) as u8).collect();
        let data = encoder::encode(&pixels, 2).unwrap();

        let mut decoder =
            LzwDecoder::new(SubBlockBitReader::new(&data[..]), 2, [0u8, 1, 2, 3]).unwrap();
        let mut codes_seen = 0;
        while let DecoderState::AwaitingFirstCodeOfEpoch = decoder.state() {
            decoder.step().unwrap();
            codes_seen += 1;
        }
        // the clear code and the first code of the epoch
        assert_eq!(codes_seen, 2);
        assert_eq!(decoder.dictionary_len(), 6);

        for k in 1..=5 {
            decoder.step().unwrap();
            assert_eq!(decoder.dictionary_len(), 6 + k);
        }
    }

    #[test]
    fn code_width_follows_dictionary_len() {
        assert_eq!(code_width(6), 3);
        assert_eq!(code_width(7), 3);
        assert_eq!(code_width(8), 4);
        assert_eq!(code_width(258), 9);
        assert_eq!(code_width(511), 9);
        assert_eq!(code_width(512), 10);
        assert_eq!(code_width(4095), 12);
        assert_eq!(code_width(4096), 12);
    }

    #[test]
    fn width_grows_when_crossing_512_entries() {
        // 8 bit roots, a long run of distinct pairs keeps the dictionary growing
        let pixels: Vec<u8> = (0..2000u32).map(|i| ((i * 31 + i / 256) % 256) as u8).collect();
        let data = encoder::encode(&pixels, 8).unwrap();

        let roots: Vec<u8> = (0..=255).collect();
        let mut decoder = LzwDecoder::new(SubBlockBitReader::new(&data[..]), 8, roots).unwrap();
        let mut previous_width = decoder.code_width();
        while decoder.dictionary_len() < 520 {
            decoder.step().unwrap();
            let width = decoder.code_width();
            if decoder.dictionary_len() == 512 {
                assert_eq!(previous_width, 9);
                assert_eq!(width, 10);
            }
            previous_width = width;
        }
        assert_eq!(decoder.code_width(), 10);
    }

    #[test]
    fn code_beyond_dictionary_is_rejected() {
        let data = pack(&[(4, 3), (0, 3), (7, 3)]);
        let mut decoder = decoder(&data);

        match decoder.decode_all() {
            Err(LzwError::InvalidCodeReference { code, dictionary_len }) => {
                assert_eq!(code, 7);
                assert_eq!(dictionary_len, 6);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(decoder.state(), DecoderState::Terminated);
        assert!(decoder.next().is_none());
    }

    #[test]
    fn first_code_of_epoch_must_be_a_root() {
        let data = pack(&[(4, 3), (6, 3)]);

        assert!(matches!(
            decoder(&data).decode_all(),
            Err(LzwError::InvalidCodeReference { code: 6, .. })
        ));
    }

    #[test]
    fn partial_output_survives_an_error() {
        let data = pack(&[(4, 3), (2, 3), (3, 3), (1, 3), (15, 4)]);
        let mut decoder = decoder(&data);

        assert_eq!(decoder.next().unwrap().unwrap(), C);
        assert_eq!(decoder.next().unwrap().unwrap(), D);
        assert_eq!(decoder.next().unwrap().unwrap(), B);
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.next().is_none());
    }

    /// Clear, a first code, then enough steady codes to fill the dictionary.
    fn fill_dictionary() -> Vec<(u16, u32)> {
        let mut codes = vec![(4, 3), (0, 3)];
        let mut len = 6;
        while len < MAX_DICTIONARY_LEN {
            codes.push((1, code_width(len)));
            len += 1;
        }
        codes
    }

    #[test]
    fn full_dictionary_without_clear_code_overflows() {
        let mut codes = fill_dictionary();
        codes.push((0, 12));

        let data = pack(&codes);
        let mut decoder = decoder(&data);

        assert!(matches!(decoder.decode_all(), Err(LzwError::CodeWidthOverflow)));
        assert_eq!(decoder.dictionary_len(), MAX_DICTIONARY_LEN);
    }

    #[test]
    fn full_dictionary_accepts_clear_and_end_codes() {
        let mut codes = fill_dictionary();
        codes.push((4, 12));
        codes.push((2, 3));
        codes.push((5, 3));

        let data = pack(&codes);
        let mut decoder = decoder(&data);

        let decoded = decoder.decode_all().unwrap();
        assert_eq!(decoded.len(), 1 + (MAX_DICTIONARY_LEN - 6) + 1);
        assert_eq!(decoded.first(), Some(&A));
        assert_eq!(decoded.last(), Some(&C));
        assert_eq!(decoder.dictionary_len(), 6);
    }

    #[test]
    fn truncated_stream_is_reported() {
        let mut data = pack(&[(4, 3), (0, 3), (1, 3)]);
        // drop the terminator and the last data byte
        data.truncate(data.len() - 2);

        assert!(matches!(decoder(&data).decode_all(), Err(LzwError::TruncatedInput(_))));
    }

    #[test]
    fn rejects_bad_construction() {
        let data = pack(&[(4, 3)]);
        assert!(matches!(
            LzwDecoder::new(SubBlockBitReader::new(&data[..]), 1, [A, B]),
            Err(LzwError::InvalidCodeSize(1))
        ));
        assert!(matches!(
            LzwDecoder::new(SubBlockBitReader::new(&data[..]), 12, Vec::<Color>::new()),
            Err(LzwError::InvalidCodeSize(12))
        ));
        assert!(matches!(
            LzwDecoder::new(SubBlockBitReader::new(&data[..]), 2, [A, B, C]),
            Err(LzwError::RootTableSize { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn decode_4color_data() {
        let data = [
            12, 0x8C, 0x2D, 0x99, 0x87, 0x2A, 0x1C, 0xDC, 0x33, 0xA0, 0x2, 0x55, 0x0, 0,
        ];

        let mut decoder =
            LzwDecoder::new(SubBlockBitReader::new(&data[..]), 2, [0u8, 1, 2, 3]).unwrap();

        assert_eq!(
            decoder.decode_all().unwrap(),
            [
                1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 2, 2, 2,
                2, 2, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2,
            ]
        );
    }

    #[test]
    fn round_trips_through_the_encoder() {
        let pixels: Vec<u8> = (0..20_000u32)
            .map(|i| match i % 97 {
                0..=40 => 3,
                41..=60 => (i % 5) as u8,
                _ => ((i / 13) % 16) as u8,
            })
            .collect();
        let mut data = encoder::encode(&pixels, 4).unwrap();
        data.push(0x3b);

        let roots: Vec<u8> = (0..16).collect();
        let mut cursor = Cursor::new(&data[..]);
        let mut decoder = LzwDecoder::new(SubBlockBitReader::new(&mut cursor), 4, roots).unwrap();
        assert_eq!(decoder.decode_all().unwrap(), pixels);

        decoder.into_inner().finish().unwrap();
        assert_eq!(cursor.position() as usize, data.len() - 1);
    }
}
