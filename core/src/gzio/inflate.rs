//! Resumable DEFLATE decoder over a 32 KiB circular window.
//!
//! [`Inflater::inflate_window`] decodes until almost a window's worth of new
//! output exists, then returns; everything produced by one call is still in
//! the window afterwards. State between calls is the bit buffer, the
//! current block kind and its tables.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use super::crc32::Crc32;
use super::huffman::{Entry, HuffmanTable};
use crate::error::{Error, Result};

pub const WSIZE: usize = 0x8000;

/// Longest match deflate can encode
const MAX_MATCH: usize = 258;

/// Root table sizes for literal/length, distance and code-length codes
const LBITS: u32 = 9;
const DBITS: u32 = 6;
const BLBITS: u32 = 7;

const MAX_LIT_CODES: usize = 286;
const MAX_DIST_CODES: usize = 30;
const END_OF_BLOCK: u16 = 256;

/// Order in which code-length code lengths are stored
const BORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

const LEN_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131, 163, 195, 227, 258,
];
const LEN_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537, 2049, 3073, 4097, 6145,
    8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];

/// Source of compressed bytes. `Ok(None)` at end of input.
pub trait ByteInput {
    fn next_byte(&mut self) -> Result<Option<u8>>;
}

impl ByteInput for &[u8] {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        match self.split_first() {
            Some((&b, rest)) => {
                *self = rest;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }
}

/// LSB-first bit buffer.
///
/// Peeking past the end of input pads with zeros so table lookups near the
/// end of the stream work; consuming a padded bit is an error.
#[derive(Debug, Default)]
struct BitReader {
    buf: u64,
    count: u32,
    padding: u32,
}

impl BitReader {
    fn fill(&mut self, input: &mut dyn ByteInput, n: u32) -> Result<()> {
        while self.count < n {
            let byte = match input.next_byte()? {
                Some(b) => b,
                None => {
                    self.padding += 8;
                    0
                }
            };
            self.buf |= (byte as u64) << self.count;
            self.count += 8;
        }
        Ok(())
    }

    fn peek(&self, n: u32) -> u32 {
        (self.buf & ((1u64 << n) - 1)) as u32
    }

    fn consume(&mut self, n: u32) -> Result<()> {
        if n > self.count - self.padding {
            return Err(Error::BadGzipData);
        }
        self.buf >>= n;
        self.count -= n;
        Ok(())
    }

    fn bits(&mut self, input: &mut dyn ByteInput, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        self.fill(input, n)?;
        let value = self.peek(n);
        self.consume(n)?;
        Ok(value)
    }

    /// Next whole byte, from the buffer first
    fn byte(&mut self, input: &mut dyn ByteInput) -> Result<u8> {
        if self.count >= 8 {
            return Ok(self.bits(input, 8)? as u8);
        }
        input.next_byte()?.ok_or(Error::BadGzipData)
    }

    fn align(&mut self) {
        let drop = self.count % 8;
        self.buf >>= drop;
        self.count -= drop;
    }

    fn decode(&mut self, input: &mut dyn ByteInput, table: &HuffmanTable) -> Result<u16> {
        let root = table.root_bits();
        self.fill(input, root)?;
        match table.entry(self.peek(root) as usize) {
            Entry::Symbol { bits, value } => {
                self.consume(bits as u32)?;
                Ok(value)
            }
            Entry::Link { offset, bits: sub } => {
                self.fill(input, root + sub as u32)?;
                let index = (self.peek(root + sub as u32) >> root) as usize;
                match table.entry(offset as usize + index) {
                    Entry::Symbol { bits, value } => {
                        self.consume(bits as u32)?;
                        Ok(value)
                    }
                    _ => Err(Error::BadGzipData),
                }
            }
            Entry::Invalid => Err(Error::BadGzipData),
        }
    }
}

struct CodeTables {
    literals: HuffmanTable,
    distances: HuffmanTable,
}

enum Block {
    /// Next thing in the stream is a block header
    Header,
    Stored { remaining: u16 },
    Codes(Box<CodeTables>),
    /// Final block finished
    Done,
}

pub struct Inflater {
    window: Vec<u8>,
    total_out: u64,
    bits: BitReader,
    block: Block,
    last_block: bool,
    crc: Crc32,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            window: vec![0u8; WSIZE],
            total_out: 0,
            bits: BitReader::default(),
            block: Block::Header,
            last_block: false,
            crc: Crc32::new(),
        }
    }

    /// Start over from the beginning of a stream
    pub fn reset(&mut self) {
        self.total_out = 0;
        self.bits = BitReader::default();
        self.block = Block::Header;
        self.last_block = false;
        self.crc = Crc32::new();
    }

    /// Bytes produced since the last reset
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Oldest stream offset still held in the window
    pub fn window_start(&self) -> u64 {
        self.total_out.saturating_sub(WSIZE as u64)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.block, Block::Done)
    }

    /// CRC-32 of everything produced so far
    pub fn crc(&self) -> u32 {
        self.crc.finish()
    }

    /// Copy bytes starting at stream offset `pos` out of the window.
    ///
    /// Returns how many were copied; zero if `pos` is not in the window.
    pub fn copy_out(&self, pos: u64, dst: &mut [u8]) -> usize {
        if pos < self.window_start() || pos >= self.total_out {
            return 0;
        }
        let offset = (pos % WSIZE as u64) as usize;
        let available = (self.total_out - pos) as usize;
        let n = dst.len().min(available).min(WSIZE - offset);
        dst[..n].copy_from_slice(&self.window[offset..offset + n]);
        n
    }

    #[inline]
    fn emit(&mut self, byte: u8) {
        self.window[(self.total_out % WSIZE as u64) as usize] = byte;
        self.total_out += 1;
        self.crc.update_byte(byte);
    }

    fn copy_match(&mut self, length: usize, distance: usize) -> Result<()> {
        if distance as u64 > self.total_out {
            log::debug!("inflate: distance {} before start of output", distance);
            return Err(Error::BadGzipData);
        }
        for _ in 0..length {
            let from = ((self.total_out - distance as u64) % WSIZE as u64) as usize;
            self.emit(self.window[from]);
        }
        Ok(())
    }

    /// Decode until close to a window of new output has been produced or
    /// the stream ends. Returns the number of bytes produced.
    pub fn inflate_window(&mut self, input: &mut dyn ByteInput) -> Result<usize> {
        let start = self.total_out;
        let budget = (WSIZE - MAX_MATCH) as u64;

        while self.total_out - start < budget {
            match &mut self.block {
                Block::Done => break,
                Block::Header => {
                    if self.last_block {
                        self.block = Block::Done;
                        break;
                    }
                    self.block = self.read_block_header(input)?;
                }
                Block::Stored { remaining } => {
                    let mut remaining = *remaining;
                    while remaining > 0 && self.total_out - start < budget {
                        let byte = self.bits.byte(input)?;
                        self.emit(byte);
                        remaining -= 1;
                    }
                    self.block = if remaining == 0 {
                        Block::Header
                    } else {
                        Block::Stored { remaining }
                    };
                }
                Block::Codes(_) => {
                    if let Block::Codes(tables) = core::mem::replace(&mut self.block, Block::Header) {
                        if !self.inflate_codes(input, &tables, start, budget)? {
                            self.block = Block::Codes(tables);
                        }
                    }
                }
            }
        }

        Ok((self.total_out - start) as usize)
    }

    /// Decode symbols until end of block (`true`) or the budget is used up.
    fn inflate_codes(&mut self, input: &mut dyn ByteInput, tables: &CodeTables, start: u64, budget: u64) -> Result<bool> {
        while self.total_out - start < budget {
            let symbol = self.bits.decode(input, &tables.literals)?;
            if symbol < END_OF_BLOCK {
                self.emit(symbol as u8);
                continue;
            }
            if symbol == END_OF_BLOCK {
                return Ok(true);
            }

            let index = (symbol - 257) as usize;
            if index >= LEN_BASE.len() {
                return Err(Error::BadGzipData);
            }
            let length = LEN_BASE[index] as usize + self.bits.bits(input, LEN_EXTRA[index] as u32)? as usize;

            let dcode = self.bits.decode(input, &tables.distances)? as usize;
            if dcode >= DIST_BASE.len() {
                return Err(Error::BadGzipData);
            }
            let distance = DIST_BASE[dcode] as usize + self.bits.bits(input, DIST_EXTRA[dcode] as u32)? as usize;

            self.copy_match(length, distance)?;
        }
        Ok(false)
    }

    fn read_block_header(&mut self, input: &mut dyn ByteInput) -> Result<Block> {
        self.last_block = self.bits.bits(input, 1)? == 1;
        match self.bits.bits(input, 2)? {
            0 => {
                self.bits.align();
                let len = self.bits.bits(input, 16)? as u16;
                let nlen = self.bits.bits(input, 16)? as u16;
                if len != !nlen {
                    log::debug!("inflate: stored length {:#x} / {:#x} mismatch", len, nlen);
                    return Err(Error::BadGzipData);
                }
                Ok(Block::Stored { remaining: len })
            }
            1 => Ok(Block::Codes(Box::new(fixed_tables()?))),
            2 => Ok(Block::Codes(Box::new(self.dynamic_tables(input)?))),
            _ => Err(Error::BadGzipData),
        }
    }

    fn dynamic_tables(&mut self, input: &mut dyn ByteInput) -> Result<CodeTables> {
        let nl = self.bits.bits(input, 5)? as usize + 257;
        let nd = self.bits.bits(input, 5)? as usize + 1;
        let nb = self.bits.bits(input, 4)? as usize + 4;
        if nl > MAX_LIT_CODES || nd > MAX_DIST_CODES {
            return Err(Error::BadGzipData);
        }

        let mut bl_lengths = [0u8; 19];
        for &slot in BORDER.iter().take(nb) {
            bl_lengths[slot] = self.bits.bits(input, 3)? as u8;
        }
        let bl_table = HuffmanTable::build(&bl_lengths, BLBITS)?;
        if !bl_table.is_complete() {
            return Err(Error::BadGzipData);
        }

        let mut lengths = [0u8; MAX_LIT_CODES + MAX_DIST_CODES];
        let total = nl + nd;
        let mut i = 0;
        let mut previous = 0u8;
        while i < total {
            let symbol = self.bits.decode(input, &bl_table)?;
            let (value, repeat) = match symbol {
                0..=15 => {
                    previous = symbol as u8;
                    (previous, 1)
                }
                16 => (previous, 3 + self.bits.bits(input, 2)? as usize),
                17 => {
                    previous = 0;
                    (0, 3 + self.bits.bits(input, 3)? as usize)
                }
                _ => {
                    previous = 0;
                    (0, 11 + self.bits.bits(input, 7)? as usize)
                }
            };
            if i + repeat > total {
                return Err(Error::BadGzipData);
            }
            lengths[i..i + repeat].fill(value);
            i += repeat;
        }

        if lengths[END_OF_BLOCK as usize] == 0 {
            return Err(Error::BadGzipData);
        }

        let literals = HuffmanTable::build(&lengths[..nl], LBITS)?;
        let distances = HuffmanTable::build(&lengths[nl..total], DBITS)?;
        for table in [&literals, &distances] {
            if !table.is_complete() && table.max_len() != 1 {
                return Err(Error::BadGzipData);
            }
        }

        Ok(CodeTables { literals, distances })
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

fn fixed_tables() -> Result<CodeTables> {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    let literals = HuffmanTable::build(&lengths, LBITS)?;
    // 30 five-bit codes; the set is incomplete by construction.
    let distances = HuffmanTable::build(&[5u8; MAX_DIST_CODES], DBITS)?;
    Ok(CodeTables { literals, distances })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inflate_all(mut data: &[u8]) -> Result<Vec<u8>> {
        let mut inflater = Inflater::new();
        let mut out = Vec::new();
        loop {
            let before = inflater.total_out();
            inflater.inflate_window(&mut data)?;
            let mut pos = before;
            let mut chunk = [0u8; 4096];
            while pos < inflater.total_out() {
                let n = inflater.copy_out(pos, &mut chunk);
                out.extend_from_slice(&chunk[..n]);
                pos += n as u64;
            }
            if inflater.is_done() {
                return Ok(out);
            }
        }
    }

    #[test]
    fn test_stored_block() {
        // BFINAL=1, BTYPE=00, LEN=5, NLEN=!5
        let data = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(inflate_all(&data).unwrap(), b"hello");
    }

    #[test]
    fn test_stored_length_check() {
        let data = [0x01, 0x05, 0x00, 0xFB, 0xFF, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(inflate_all(&data).unwrap_err(), Error::BadGzipData);
    }

    #[test]
    fn test_compressed_block_with_matches() {
        let payload = b"abcabcabcabcabcabcabc-abcabcabcabc";
        let compressed = miniz_oxide::deflate::compress_to_vec(payload, 6);
        assert_eq!(inflate_all(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_reserved_block_type() {
        assert_eq!(inflate_all(&[0x07]).unwrap_err(), Error::BadGzipData);
    }

    #[test]
    fn test_truncated_stream() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 251) as u8).collect();
        let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 9);
        assert!(inflate_all(&compressed[..compressed.len() / 2]).is_err());
    }

    #[test]
    fn test_window_wraps() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| ((i / 3) ^ (i >> 9)) as u8).collect();
        let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);
        let out = inflate_all(&compressed).unwrap();
        assert_eq!(out.len(), payload.len());
        assert!(out == payload);
        assert_eq!(Inflater::new().window_start(), 0);
    }
}
