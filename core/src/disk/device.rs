//! Device specifier parsing.
//!
//! Two spellings are accepted:
//!
//! * `(fd0)`, `(hd0)`, `(hd0,1)`, `(hd0,1,a)`, `(hd0,a)`, `(,1)`, `(hd0,)`
//!   with zero-based slice numbers, and
//! * BSD style `hd0/`, `hd0s2/`, `hd0s2a/`, `hd0a/` with one-based slices.
//!
//! The parsed partition is kept in the packed form used by the boot device
//! word: `slice << 16 | bsd << 8 | 0xFF`, where `0xFF` in a field means
//! "not specified".

use core::fmt;

use crate::error::{Error, Result};

/// Packed partition value meaning "the whole drive"
pub const WHOLE_DISK: u32 = 0x00FF_FFFF;

/// Field value meaning "not specified" in a packed partition
pub const UNSPECIFIED: u8 = 0xFF;

/// Highest slice number a specifier may name
pub const MAX_SLICE: u32 = 254;

/// A drive plus packed partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub drive: u8,
    pub partition: u32,
}

/// How far the partition part of an incomplete specifier got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartChoice {
    /// Nothing after the drive yet
    Unspecified,
    /// A `,` was seen but no partition followed
    Disk,
    /// A partition (or the drive alone) was chosen
    Chosen,
}

/// Result of parsing a device specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome<'a> {
    /// A full specifier; `rest` is whatever followed it
    Complete { device: DeviceSpec, rest: &'a str },
    /// Input ended before the specifier was closed
    Incomplete {
        partial: DeviceSpec,
        /// Still choosing which drive
        disk_choice: bool,
        part_choice: PartChoice,
    },
}

impl DeviceSpec {
    pub const fn new(drive: u8, partition: u32) -> Self {
        Self { drive, partition }
    }

    /// Whole drive
    pub const fn disk(drive: u8) -> Self {
        Self::new(drive, WHOLE_DISK)
    }

    /// Primary or logical slice of a hard disk
    pub const fn slice(drive: u8, slice: u8) -> Self {
        Self::new(drive, pack(slice, UNSPECIFIED))
    }

    /// BSD sub-partition `letter` (0 = `a`) inside `slice`
    pub const fn bsd(drive: u8, slice: u8, letter: u8) -> Self {
        Self::new(drive, pack(slice, letter))
    }

    pub fn is_hard_disk(&self) -> bool {
        self.drive & 0x80 != 0
    }

    pub fn is_whole_disk(&self) -> bool {
        self.partition == WHOLE_DISK
    }

    /// Requested slice number, if any
    pub fn slice_number(&self) -> Option<u8> {
        let slice = (self.partition >> 16) as u8;
        (slice != UNSPECIFIED).then_some(slice)
    }

    /// Requested BSD sub-partition index (0 = `a`), if any
    pub fn bsd_part(&self) -> Option<u8> {
        let part = (self.partition >> 8) as u8;
        (part != UNSPECIFIED).then_some(part)
    }

    /// Reject values that cannot describe a real device.
    ///
    /// Runs before any disk access so that nonsense from a config or a
    /// partition table never turns into reads.
    pub fn check_sane(&self) -> Result<()> {
        check_sane(self.drive as u32, self.partition)
    }

    /// `drive << 24 | partition`, the Multiboot `boot_device` layout
    pub fn boot_device(&self) -> u32 {
        ((self.drive as u32) << 24) | (self.partition & WHOLE_DISK)
    }

    /// Parse a specifier, filling unspecified parts from the saved device
    ///
    /// `saved` supplies the drive for `(,N)` and the partition for `(hdN,)`.
    pub fn parse<'a>(input: &'a str, saved: DeviceSpec) -> Result<ParseOutcome<'a>> {
        Parser::new(input, saved).run()
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hard_disk() {
            write!(f, "(hd{}", self.drive & 0x7F)?;
        } else {
            write!(f, "(fd{}", self.drive)?;
        }
        if let Some(slice) = self.slice_number() {
            write!(f, ",{}", slice)?;
        }
        if let Some(part) = self.bsd_part() {
            write!(f, ",{}", (b'a' + part) as char)?;
        }
        f.write_str(")")
    }
}

pub const fn pack(slice: u8, bsd: u8) -> u32 {
    ((slice as u32) << 16) | ((bsd as u32) << 8) | 0xFF
}

fn check_sane(drive: u32, partition: u32) -> Result<()> {
    let sane = partition & 0xFF00_0000 == 0
        && (drive & 0xFFFF_FF7F) < 8
        && partition & 0xFF == 0xFF
        && (partition & 0xFF00 == 0xFF00 || partition & 0xFF00 < 0x800)
        && ((partition >> 16) == 0xFF || drive & 0x80 != 0);
    if sane {
        Ok(())
    } else {
        Err(Error::DevValues)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    saved: DeviceSpec,
    drive: u32,
    partition: u32,
    disk_choice: bool,
    part_choice: PartChoice,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, saved: DeviceSpec) -> Self {
        Self {
            input,
            pos: 0,
            saved,
            drive: saved.drive as u32,
            partition: WHOLE_DISK,
            disk_choice: true,
            part_choice: PartChoice::Unspecified,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + ahead).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn incomplete(&self) -> ParseOutcome<'a> {
        ParseOutcome::Incomplete {
            partial: DeviceSpec::new(self.drive as u8, self.partition),
            disk_choice: self.disk_choice,
            part_choice: self.part_choice,
        }
    }

    fn run(mut self) -> Result<ParseOutcome<'a>> {
        let complete = if self.peek() == Some(b'(') {
            self.pos += 1;
            if self.at_end() {
                return Ok(self.incomplete());
            }
            match self.parenthesized()? {
                Some(done) => done,
                None => return Ok(self.incomplete()),
            }
        } else {
            self.bsd_style()?
        };

        check_sane(self.drive, self.partition)?;

        if complete {
            Ok(ParseOutcome::Complete {
                device: DeviceSpec::new(self.drive as u8, self.partition),
                rest: &self.input[self.pos..],
            })
        } else if self.at_end() {
            Ok(self.incomplete())
        } else {
            Err(Error::DevFormat)
        }
    }

    /// Drive name after the opening parenthesis. `Ok(None)` means the input
    /// stopped inside the drive name.
    fn drive_name(&mut self, kind_error: Error) -> Result<Option<()>> {
        let kind = match self.peek() {
            Some(k) => k,
            None => return Ok(None),
        };
        if kind == b'f' || kind == b'h' {
            self.pos += 1;
            match self.peek() {
                Some(b'd') => self.pos += 1,
                None => return Ok(None),
                Some(_) => return Err(kind_error),
            }
            if self.at_end() {
                return Ok(None);
            }
        } else if !kind.is_ascii_digit() {
            return Err(kind_error);
        }

        let number = self.number()?.ok_or(Error::NumberParsing)?;
        self.disk_choice = false;
        self.drive = if kind == b'h' {
            number.checked_add(0x80).ok_or(Error::NumberParsing)?
        } else {
            number
        };
        Ok(Some(()))
    }

    fn parenthesized(&mut self) -> Result<Option<bool>> {
        if !matches!(self.peek(), Some(b',') | Some(b')')) && self.drive_name(Error::NumberParsing)?.is_none() {
            return Ok(None);
        }

        match self.peek() {
            Some(b')') => {
                self.part_choice = PartChoice::Chosen;
                self.pos += 1;
                Ok(Some(true))
            }
            Some(b',') => {
                self.disk_choice = false;
                self.part_choice = PartChoice::Disk;
                self.pos += 1;

                match self.peek() {
                    Some(c) if c.is_ascii_digit() => {
                        self.part_choice = PartChoice::Chosen;
                        let slice = self.slice_number(0)?;
                        self.partition = pack(slice, UNSPECIFIED);
                        if self.peek() == Some(b',') {
                            if let Some(letter @ b'a'..=b'h') = self.peek_at(1) {
                                self.pos += 2;
                                self.partition = pack(slice, letter - b'a');
                            }
                        }
                    }
                    Some(letter @ b'a'..=b'h') => {
                        self.part_choice = PartChoice::Chosen;
                        self.pos += 1;
                        self.partition = pack(UNSPECIFIED, letter - b'a');
                    }
                    _ => {}
                }

                if self.peek() == Some(b')') {
                    if self.part_choice == PartChoice::Disk {
                        self.partition = self.saved.partition;
                        self.part_choice = PartChoice::Chosen;
                    }
                    self.pos += 1;
                    return Ok(Some(true));
                }
                Ok(Some(false))
            }
            _ => Ok(Some(false)),
        }
    }

    fn bsd_style(&mut self) -> Result<bool> {
        let kind = self.peek();
        if !matches!(kind, Some(b'f') | Some(b'h')) || self.peek_at(1) != Some(b'd') {
            return Err(Error::DevFormat);
        }
        if self.drive_name(Error::DevFormat)?.is_none() {
            return Err(Error::DevFormat);
        }

        match self.peek() {
            Some(b'/') => {
                self.part_choice = PartChoice::Chosen;
                return Ok(true);
            }
            Some(b's') => {
                self.part_choice = PartChoice::Disk;
                self.pos += 1;
                if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.part_choice = PartChoice::Chosen;
                    // Slices count from one in this spelling.
                    let slice = self.slice_number(1)?;
                    self.partition = pack(slice, UNSPECIFIED);
                    if let Some(letter @ b'a'..=b'h') = self.peek() {
                        self.pos += 1;
                        self.partition = pack(slice, letter - b'a');
                    }
                }
            }
            Some(letter @ b'a'..=b'h') => {
                self.part_choice = PartChoice::Chosen;
                self.pos += 1;
                self.partition = pack(UNSPECIFIED, letter - b'a');
            }
            _ => {}
        }

        if self.peek() == Some(b'/') {
            if self.part_choice == PartChoice::Disk {
                self.partition = self.saved.partition;
                self.part_choice = PartChoice::Chosen;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Slice number minus `base`; only hard disks have slices.
    fn slice_number(&mut self, base: u32) -> Result<u8> {
        if self.drive & 0x80 == 0 {
            return Err(Error::DevFormat);
        }
        let number = self.number()?.ok_or(Error::DevFormat)?;
        match number.checked_sub(base) {
            Some(slice) if slice <= MAX_SLICE => Ok(slice as u8),
            _ => Err(Error::DevFormat),
        }
    }

    /// Decimal or `0x` hexadecimal number. `Ok(None)` if no digits follow.
    fn number(&mut self) -> Result<Option<u32>> {
        let bytes = self.input.as_bytes();
        let mut radix = 10;
        let mut pos = self.pos;
        if bytes.get(pos) == Some(&b'0') && matches!(bytes.get(pos + 1), Some(b'x') | Some(b'X')) {
            radix = 16;
            pos += 2;
        }

        let start = pos;
        let mut value: u32 = 0;
        while let Some(digit) = bytes.get(pos).and_then(|&b| (b as char).to_digit(radix)) {
            value = value
                .checked_mul(radix)
                .and_then(|v| v.checked_add(digit))
                .ok_or(Error::NumberParsing)?;
            pos += 1;
        }

        if pos == start {
            if radix == 16 {
                // "0x" with nothing after it is just the number zero.
                self.pos += 1;
                return Ok(Some(0));
            }
            return Ok(None);
        }
        self.pos = pos;
        Ok(Some(value))
    }
}
