// Physical memory the loader copies images into

use alloc::vec::Vec;
use core::ptr;

use stage2_core::{Error, Result};

pub const PAGE_SIZE: u32 = 0x1000;

/// Images must load at or above this address
pub const HIGH_MEMORY_START: u32 = 0x10_0000;

/// The first page is never handed out
const LOW_FLOOR: u32 = 0x1000;

pub const DEFAULT_LOWER_KB: u32 = 640;
pub const DEFAULT_UPPER_KB: u32 = 15 * 1024;

pub const fn align_page(addr: u32) -> u32 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Where loaded bytes go.
///
/// Addresses are physical. Implementations may assume every range they
/// are given already passed [`MemoryInfo::check`].
pub trait PhysicalMemory {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Set `len` bytes at `addr` to `byte`
    fn fill(&mut self, addr: u32, len: u32, byte: u8) -> Result<()>;
}

/// Multiboot memory map entry types
pub const MEMORY_AVAILABLE: u32 = 1;
pub const MEMORY_RESERVED: u32 = 2;

/// One range of the BIOS memory map, passed through to Multiboot kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
}

/// Memory sizes as probed by the BIOS.
///
/// `upper_kb` counts memory above 1 MiB up to the first hole and is the
/// only value loads are checked against; ranges past it are refused even
/// when the memory map lists more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Conventional memory below 1 MiB
    pub lower_kb: u32,
    pub upper_kb: u32,
    pub map: Vec<MemoryMapEntry>,
}

impl Default for MemoryInfo {
    fn default() -> Self {
        Self {
            lower_kb: DEFAULT_LOWER_KB,
            upper_kb: DEFAULT_UPPER_KB,
            map: Vec::new(),
        }
    }
}

impl MemoryInfo {
    pub fn new(lower_kb: u32, upper_kb: u32) -> Self {
        Self {
            lower_kb,
            upper_kb,
            map: Vec::new(),
        }
    }

    /// Sizes in bytes, rounded down to whole kilobytes
    pub fn from_bytes(lower: u64, upper: u64) -> Self {
        Self::new((lower / 1024) as u32, (upper / 1024).min(u32::MAX as u64) as u32)
    }

    pub fn with_map(mut self, map: Vec<MemoryMapEntry>) -> Self {
        self.map = map;
        self
    }

    /// First address past upper memory
    pub fn upper_end(&self) -> u64 {
        HIGH_MEMORY_START as u64 + self.upper_kb as u64 * 1024
    }

    /// Refuse ranges in the first page, past conventional memory, or past
    /// upper memory.
    pub fn check(&self, start: u32, len: u32) -> Result<()> {
        let start64 = start as u64;
        let end = start64 + len as u64;
        let fits = if start < LOW_FLOOR {
            false
        } else if start < HIGH_MEMORY_START {
            end <= self.lower_kb as u64 * 1024
        } else {
            end <= self.upper_end()
        };

        if fits {
            Ok(())
        } else {
            log::warn!(
                "{:#x}+{:#x} is outside memory (lower {}K, upper {}K)",
                start,
                len,
                self.lower_kb,
                self.upper_kb
            );
            Err(Error::WontFit)
        }
    }
}

/// Memory reached through identity-mapped pointers
pub struct IdentityMapped {
    _private: (),
}

impl IdentityMapped {
    /// # Safety
    ///
    /// Physical addresses must be identity mapped and every range the
    /// loader writes must be free for it to overwrite.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysicalMemory for IdentityMapped {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        // SAFETY: guaranteed by the caller of `new`
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), addr as usize as *mut u8, data.len()) };
        Ok(())
    }

    fn fill(&mut self, addr: u32, len: u32, byte: u8) -> Result<()> {
        // SAFETY: guaranteed by the caller of `new`
        unsafe { ptr::write_bytes(addr as usize as *mut u8, byte, len as usize) };
        Ok(())
    }
}
