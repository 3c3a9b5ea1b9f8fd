//! Multiboot header detection and the boot information structure.
//!
//! The header is a magic, flags and checksum triple somewhere in the first
//! [`MULTIBOOT_SEARCH`] bytes of the image, 4-byte aligned, whose three
//! words sum to zero. With [`MULTIBOOT_AOUT_KLUDGE`] set it also carries
//! the load addresses of an image in no format the loader knows.

use alloc::vec::Vec;

use crate::bytes::{le32, put_le32, put_le64};
use crate::memory::MemoryMapEntry;

/// Bytes of the image searched for a header
pub const MULTIBOOT_SEARCH: usize = 8192;

pub const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;

/// Value in EAX when a Multiboot kernel is entered
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Requirement bits this loader cannot honor; any of them is fatal
pub const MULTIBOOT_UNSUPPORTED: u32 = 0x0000_FFFC;
pub const MULTIBOOT_PAGE_ALIGN: u32 = 0x0000_0001;
pub const MULTIBOOT_MEMORY_INFO: u32 = 0x0000_0002;
/// Header carries load addresses
pub const MULTIBOOT_AOUT_KLUDGE: u32 = 0x0001_0000;

const HEADER_LEN: usize = 12;
const KLUDGE_HEADER_LEN: usize = 32;

/// A Multiboot header found in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultibootHeader {
    /// Offset of the magic in the file
    pub offset: usize,
    pub flags: u32,
    pub load: Option<KludgeAddresses>,
}

/// Addresses of the a.out kludge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KludgeAddresses {
    pub header_addr: u32,
    pub load_addr: u32,
    pub load_end_addr: u32,
    pub bss_end_addr: u32,
    pub entry_addr: u32,
}

impl MultibootHeader {
    /// First valid header in `buf`.
    ///
    /// A kludge header cut off by the end of `buf` is reported without its
    /// addresses; the loader treats that as a malformed image.
    pub fn find(buf: &[u8]) -> Option<Self> {
        (0..buf.len().saturating_sub(HEADER_LEN - 1))
            .step_by(4)
            .find(|&i| {
                let magic = le32(buf, i);
                let flags = le32(buf, i + 4);
                let checksum = le32(buf, i + 8);
                magic == MULTIBOOT_MAGIC && magic.wrapping_add(flags).wrapping_add(checksum) == 0
            })
            .map(|offset| {
                let flags = le32(buf, offset + 4);
                let load = (flags & MULTIBOOT_AOUT_KLUDGE != 0 && buf.len() >= offset + KLUDGE_HEADER_LEN)
                    .then(|| KludgeAddresses {
                        header_addr: le32(buf, offset + 12),
                        load_addr: le32(buf, offset + 16),
                        load_end_addr: le32(buf, offset + 20),
                        bss_end_addr: le32(buf, offset + 24),
                        entry_addr: le32(buf, offset + 28),
                    });
                Self { offset, flags, load }
            })
    }

    pub fn unsupported_flags(&self) -> u32 {
        self.flags & MULTIBOOT_UNSUPPORTED
    }

    pub fn wants_kludge(&self) -> bool {
        self.flags & MULTIBOOT_AOUT_KLUDGE != 0
    }
}

// Boot information flags
pub const MB_INFO_MEMORY: u32 = 0x0000_0001;
pub const MB_INFO_BOOTDEV: u32 = 0x0000_0002;
pub const MB_INFO_CMDLINE: u32 = 0x0000_0004;
pub const MB_INFO_MODS: u32 = 0x0000_0008;
pub const MB_INFO_AOUT_SYMS: u32 = 0x0000_0010;
pub const MB_INFO_ELF_SHDR: u32 = 0x0000_0020;
pub const MB_INFO_MEM_MAP: u32 = 0x0000_0040;

pub const MB_INFO_LEN: usize = 52;
pub const MODULE_ENTRY_LEN: usize = 16;
const MMAP_ENTRY_LEN: usize = 24;

/// Modules one kernel can be given
pub const MAX_MODULES: usize = 99;

/// a.out symbol table loaded after the kernel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AoutSymbols {
    pub tabsize: u32,
    pub strsize: u32,
    /// Address of the length word in front of the table
    pub addr: u32,
}

impl AoutSymbols {
    /// First address past the string table
    pub fn end(&self) -> u32 {
        self.addr + 4 + self.tabsize + self.strsize
    }
}

/// Multiboot boot information, as passed in EBX
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: AoutSymbols,
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

impl MultibootInfo {
    pub fn to_bytes(&self) -> [u8; MB_INFO_LEN] {
        let mut out = [0u8; MB_INFO_LEN];
        let words = [
            self.flags,
            self.mem_lower,
            self.mem_upper,
            self.boot_device,
            self.cmdline,
            self.mods_count,
            self.mods_addr,
            self.syms.tabsize,
            self.syms.strsize,
            self.syms.addr,
            0,
            self.mmap_length,
            self.mmap_addr,
        ];
        for (i, word) in words.iter().enumerate() {
            put_le32(&mut out, i * 4, *word);
        }
        out
    }
}

/// One entry of the module list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleEntry {
    pub mod_start: u32,
    pub mod_end: u32,
    pub cmdline: u32,
}

impl ModuleEntry {
    pub fn to_bytes(&self) -> [u8; MODULE_ENTRY_LEN] {
        let mut out = [0u8; MODULE_ENTRY_LEN];
        put_le32(&mut out, 0, self.mod_start);
        put_le32(&mut out, 4, self.mod_end);
        put_le32(&mut out, 8, self.cmdline);
        out
    }
}

/// Memory map in the Multiboot layout: each entry is preceded by its size
pub fn encode_memory_map(map: &[MemoryMapEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(map.len() * MMAP_ENTRY_LEN);
    for entry in map {
        let mut raw = [0u8; MMAP_ENTRY_LEN];
        put_le32(&mut raw, 0, (MMAP_ENTRY_LEN - 4) as u32);
        put_le64(&mut raw, 4, entry.base);
        put_le64(&mut raw, 12, entry.length);
        put_le32(&mut raw, 20, entry.kind);
        out.extend_from_slice(&raw);
    }
    out
}
