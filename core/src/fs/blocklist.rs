// Block lists: files named by sector ranges, e.g. "100+2,500+3"
//
// Sectors are relative to the partition the file was opened on. A bare
// number after the last range ("0+20,9000") sets the length in bytes.

use super::registry::{FilePosition, Volume};
use crate::disk::bios::SECTOR_SIZE;
use crate::error::{Error, Result};

/// Ranges one block list can hold
pub const BLOCKLIST_CAPACITY: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    /// Sectors
    pub length: u64,
}

impl BlockRange {
    fn bytes(&self) -> u64 {
        self.length * SECTOR_SIZE as u64
    }
}

/// A parsed block list and its read cursor
#[derive(Debug, Clone)]
pub struct BlockList {
    ranges: [BlockRange; BLOCKLIST_CAPACITY],
    count: usize,
    length: u64,
    // File offset where range `cur_range` begins
    cur_offset: u64,
    cur_range: usize,
}

fn is_terminator(c: Option<u8>) -> bool {
    match c {
        None => true,
        Some(c) => c == b'/' || c.is_ascii_whitespace(),
    }
}

/// Decimal or `0x` hex number at `*pos`; `None` if there are no digits.
fn parse_number(bytes: &[u8], pos: &mut usize) -> Result<Option<u64>> {
    let mut radix = 10;
    let mut at = *pos;
    if bytes.get(at) == Some(&b'0') && matches!(bytes.get(at + 1), Some(b'x') | Some(b'X')) {
        radix = 16;
        at += 2;
    }
    let start = at;
    let mut value: u64 = 0;
    while let Some(digit) = bytes.get(at).and_then(|&b| (b as char).to_digit(radix)) {
        value = value
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or(Error::NumberParsing)?;
        at += 1;
    }
    if at == start {
        if radix == 16 {
            *pos += 1;
            return Ok(Some(0));
        }
        return Ok(None);
    }
    *pos = at;
    Ok(Some(value))
}

impl BlockList {
    /// Parse `start+length[,start+length...][,bytes]`.
    ///
    /// A missing start means sector 0. Zero lengths, text after a range
    /// and a byte length larger than the ranges are all `BadFilename`.
    pub fn parse(spec: &str) -> Result<Self> {
        let bytes = spec.as_bytes();
        let mut list = Self {
            ranges: [BlockRange::default(); BLOCKLIST_CAPACITY],
            count: 0,
            length: 0,
            cur_offset: 0,
            cur_range: 0,
        };
        let mut pos = 0;

        loop {
            let start = parse_number(bytes, &mut pos)?.unwrap_or(0);

            if bytes.get(pos) != Some(&b'+') {
                // Trailing byte length
                if !is_terminator(bytes.get(pos).copied()) || start == 0 || start > list.length {
                    return Err(Error::BadFilename);
                }
                list.length = start;
                break;
            }
            pos += 1;

            let length = match parse_number(bytes, &mut pos)? {
                Some(length) if length != 0 => length,
                _ => return Err(Error::BadFilename),
            };
            let next = bytes.get(pos).copied();
            if next != Some(b',') && !is_terminator(next) {
                return Err(Error::BadFilename);
            }

            if list.count == BLOCKLIST_CAPACITY {
                log::warn!("block list {:?} has more than {} ranges", spec, BLOCKLIST_CAPACITY);
                return Err(Error::BadFilename);
            }
            let range = BlockRange { start, length };
            list.length = range
                .length
                .checked_mul(SECTOR_SIZE as u64)
                .and_then(|bytes| bytes.checked_add(list.length))
                .ok_or(Error::NumberParsing)?;
            list.ranges[list.count] = range;
            list.count += 1;

            if next != Some(b',') {
                break;
            }
            pos += 1;
        }

        log::debug!("block list: {} ranges, {} bytes", list.count, list.length);
        Ok(list)
    }

    pub fn ranges(&self) -> &[BlockRange] {
        &self.ranges[..self.count]
    }

    /// File length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read at `position.pos`, walking ranges forward from the last one
    /// used and rewinding only when asked for an earlier offset.
    pub fn read(&mut self, volume: &mut Volume<'_>, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;

        while done < buf.len() {
            if position.pos < self.cur_offset {
                self.cur_offset = 0;
                self.cur_range = 0;
            }

            while self.cur_range < self.count {
                let bytes = self.ranges[self.cur_range].bytes();
                if position.pos < self.cur_offset + bytes {
                    break;
                }
                self.cur_offset += bytes;
                self.cur_range += 1;
            }
            let range = *self.ranges().get(self.cur_range).ok_or(Error::FileLength)?;

            let within = position.pos - self.cur_offset;
            let sector = within / SECTOR_SIZE as u64;
            let offset = (within % SECTOR_SIZE as u64) as usize;
            let size = ((range.bytes() - within) as usize).min(buf.len() - done);

            volume.read(range.start + sector, offset, &mut buf[done..done + size])?;

            done += size;
            position.pos += size as u64;
        }

        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(spec: &str) -> alloc::vec::Vec<(u64, u64)> {
        BlockList::parse(spec)
            .unwrap()
            .ranges()
            .iter()
            .map(|r| (r.start, r.length))
            .collect()
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(ranges("100+2,500+3"), [(100, 2), (500, 3)]);
        assert_eq!(ranges("+4"), [(0, 4)]);
        assert_eq!(ranges("0x10+1/ignored"), [(16, 1)]);
        assert_eq!(BlockList::parse("100+2,500+3").unwrap().len(), 5 * 512);
    }

    #[test]
    fn test_parse_trailing_length() {
        let list = BlockList::parse("0+4,1000").unwrap();
        assert_eq!(list.len(), 1000);
        assert_eq!(BlockList::parse("0+1,513").unwrap_err(), Error::BadFilename);
        assert_eq!(BlockList::parse("0+1,0").unwrap_err(), Error::BadFilename);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for spec in ["", "kernel", "10+0", "10+", "10+2x", "10+2,", "10+2;3+1"] {
            assert_eq!(BlockList::parse(spec).unwrap_err(), Error::BadFilename, "{:?}", spec);
        }
    }

    #[test]
    fn test_parse_capacity() {
        let mut spec = alloc::string::String::new();
        for i in 0..BLOCKLIST_CAPACITY {
            if i > 0 {
                spec.push(',');
            }
            spec.push_str("1+1");
        }
        assert_eq!(BlockList::parse(&spec).unwrap().ranges().len(), BLOCKLIST_CAPACITY);
        spec.push_str(",1+1");
        assert_eq!(BlockList::parse(&spec).unwrap_err(), Error::BadFilename);
    }
}
