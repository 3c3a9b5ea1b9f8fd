//! Transparent gzip decompression.
//!
//! [`Gunzip::probe`] checks an open file for a gzip header. When one is
//! found, reads of the file are served by [`Gunzip::read`], which inflates
//! forward from the last position and restarts from the beginning of the
//! compressed data when asked for bytes that already left the window.

pub mod crc32;
pub mod huffman;
pub mod inflate;

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::fs::registry::FilePosition;
use inflate::{ByteInput, Inflater};

pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
pub const OLD_GZIP_MAGIC: [u8; 2] = [0x1F, 0x9E];

/// The only compression method
pub const DEFLATED: u8 = 8;

pub const FLAG_ASCII: u8 = 0x01;
pub const FLAG_CONTINUATION: u8 = 0x02;
pub const FLAG_EXTRA_FIELD: u8 = 0x04;
pub const FLAG_ORIG_NAME: u8 = 0x08;
pub const FLAG_COMMENT: u8 = 0x10;
pub const FLAG_ENCRYPTED: u8 = 0x20;
pub const FLAG_RESERVED: u8 = 0xC0;
pub const UNSUPPORTED_FLAGS: u8 = FLAG_CONTINUATION | FLAG_ENCRYPTED | FLAG_RESERVED;

const HEADER_LEN: usize = 10;
const TRAILER_LEN: u64 = 8;
const INBUF_LEN: usize = 0x2000;

/// The file underneath the decompressor.
///
/// Reads are clamped against `position` the same way reads of an
/// uncompressed file are, and advance it.
pub trait RawSource {
    fn raw_read(&mut self, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize>;
}

/// Buffered compressed input
struct InputBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            data: vec![0u8; INBUF_LEN],
            start: 0,
            end: 0,
        }
    }

    fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

struct RawBytes<'a> {
    source: &'a mut dyn RawSource,
    position: &'a mut FilePosition,
    input: &'a mut InputBuffer,
}

impl ByteInput for RawBytes<'_> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.input.start == self.input.end {
            let n = self.source.raw_read(self.position, &mut self.input.data)?;
            if n == 0 {
                return Ok(None);
            }
            self.input.start = 0;
            self.input.end = n;
        }
        let byte = self.input.data[self.input.start];
        self.input.start += 1;
        Ok(Some(byte))
    }
}

/// State of one open compressed file
pub struct Gunzip {
    /// Position in the compressed file
    raw: FilePosition,
    data_offset: u64,
    crc: u32,
    size: u32,
    inflater: Inflater,
    input: InputBuffer,
    verified: bool,
}

fn read_exact(source: &mut dyn RawSource, position: &mut FilePosition, buf: &mut [u8]) -> Result<bool> {
    Ok(source.raw_read(position, buf)? == buf.len())
}

/// Skip a NUL-terminated header string
fn skip_string(source: &mut dyn RawSource, position: &mut FilePosition) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        if !read_exact(source, position, &mut byte)? {
            return Err(Error::BadGzipHeader);
        }
        if byte[0] == 0 {
            return Ok(());
        }
    }
}

impl Gunzip {
    /// Look for a gzip header at the start of the file.
    ///
    /// `Ok(None)` means the file is not compressed; `position` is rewound.
    /// A header that is recognized but malformed is `BadGzipHeader`.
    pub fn probe(source: &mut dyn RawSource, position: &mut FilePosition) -> Result<Option<Self>> {
        position.pos = 0;
        let mut header = [0u8; HEADER_LEN];
        let complete = read_exact(source, position, &mut header)?;
        let magic = [header[0], header[1]];
        if !complete || (magic != GZIP_MAGIC && magic != OLD_GZIP_MAGIC) {
            position.pos = 0;
            return Ok(None);
        }

        let flags = header[3];
        if header[2] != DEFLATED || flags & UNSUPPORTED_FLAGS != 0 {
            log::debug!("gzip: method {} flags {:#04x} not supported", header[2], flags);
            return Err(Error::BadGzipHeader);
        }

        if flags & FLAG_EXTRA_FIELD != 0 {
            let mut len = [0u8; 2];
            if !read_exact(source, position, &mut len)? {
                return Err(Error::BadGzipHeader);
            }
            let len = u16::from_le_bytes(len) as u64;
            if position.pos + len > position.max {
                return Err(Error::BadGzipHeader);
            }
            position.pos += len;
        }
        if flags & FLAG_ORIG_NAME != 0 {
            skip_string(source, position)?;
        }
        if flags & FLAG_COMMENT != 0 {
            skip_string(source, position)?;
        }

        let data_offset = position.pos;
        if position.max < data_offset + TRAILER_LEN {
            return Err(Error::BadGzipHeader);
        }
        position.pos = position.max - TRAILER_LEN;
        let mut trailer = [0u8; TRAILER_LEN as usize];
        if !read_exact(source, position, &mut trailer)? {
            return Err(Error::BadGzipHeader);
        }
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        log::debug!(
            "gzip: data at {}, {} bytes compressed, {} expanded",
            data_offset,
            position.max - data_offset - TRAILER_LEN,
            size
        );

        let mut raw = *position;
        raw.pos = data_offset;
        Ok(Some(Self {
            raw,
            data_offset,
            crc,
            size,
            inflater: Inflater::new(),
            input: InputBuffer::new(),
            verified: false,
        }))
    }

    /// Expanded length from the trailer
    pub fn size(&self) -> u64 {
        self.size as u64
    }

    pub fn stored_crc(&self) -> u32 {
        self.crc
    }

    /// Position of the expanded file right after opening
    pub fn visible_position(&self) -> FilePosition {
        FilePosition {
            pos: 0,
            max: self.size(),
            fsmax: self.size(),
        }
    }

    /// Go back to the start of the compressed data
    fn restart(&mut self) {
        log::debug!("gzip: restarting at {}", self.data_offset);
        self.inflater.reset();
        self.input.clear();
        self.raw.pos = self.data_offset;
        self.verified = false;
    }

    /// Inflate into `buf` from `position.pos` (already clamped to the file).
    ///
    /// On error nothing read by this call counts and the next read starts
    /// decompression over.
    pub fn read(&mut self, source: &mut dyn RawSource, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        let start = position.pos;
        match self.read_inner(source, position, buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                position.pos = start;
                self.restart();
                Err(err)
            }
        }
    }

    fn read_inner(&mut self, source: &mut dyn RawSource, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        if position.pos < self.inflater.window_start() {
            self.restart();
        }

        let mut done = 0;
        while done < buf.len() {
            while position.pos >= self.inflater.total_out() {
                if self.inflater.is_done() {
                    // Stream ended short of the trailer's length
                    return Err(Error::BadGzipData);
                }
                let mut input = RawBytes {
                    source: &mut *source,
                    position: &mut self.raw,
                    input: &mut self.input,
                };
                self.inflater.inflate_window(&mut input)?;
                if self.inflater.is_done() {
                    self.verify()?;
                }
            }

            let n = self.inflater.copy_out(position.pos, &mut buf[done..]);
            done += n;
            position.pos += n as u64;
        }
        Ok(done)
    }

    fn verify(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        let crc = self.inflater.crc();
        let size = self.inflater.total_out() as u32;
        if crc != self.crc || size != self.size {
            log::warn!(
                "gzip: trailer says crc {:#010x} size {}, got {:#010x} / {}",
                self.crc,
                self.size,
                crc,
                size
            );
            return Err(Error::BadGzipData);
        }
        self.verified = true;
        Ok(())
    }
}
