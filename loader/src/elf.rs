// Bootable i386 ELF executables, read through xmas_elf

use alloc::boxed::Box;
use alloc::vec::Vec;

use stage2_core::{Error, Result};
use xmas_elf::header::{Class, Data, Machine, Type, Version};
use xmas_elf::program::Type as SegmentType;
use xmas_elf::ElfFile;

use crate::multiboot::MULTIBOOT_SEARCH;

pub const ELF_HEADER_LEN: usize = 52;
const PHDR_MIN_LEN: u16 = 32;
const EV_CURRENT: u32 = 1;

/// The probed bytes at 8-byte alignment. xmas_elf overlays its structs on
/// the buffer in place and asserts natural alignment.
#[repr(C, align(8))]
struct AlignedHeader([u8; MULTIBOOT_SEARCH]);

/// One `PT_LOAD` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
}

/// Entry point and loadable segments of an i386 executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    pub entry: u32,
    pub loads: Vec<ProgramHeader>,
}

impl ElfImage {
    /// Parse the first bytes of an image.
    ///
    /// `Ok(None)` means the bytes are not a 32-bit little-endian i386
    /// executable. A program header table that does not lie wholly (and
    /// aligned) inside `buf` is `ExecFormat`.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let len = buf.len().min(MULTIBOOT_SEARCH);
        let mut aligned = Box::new(AlignedHeader([0; MULTIBOOT_SEARCH]));
        aligned.0[..len].copy_from_slice(&buf[..len]);
        let bytes = &aligned.0[..len];

        let elf = match ElfFile::new(bytes) {
            Ok(elf) => elf,
            Err(_) => return Ok(None),
        };
        if !is_bootable(&elf) {
            return Ok(None);
        }

        let pt2 = &elf.header.pt2;
        if !headers_within(pt2.ph_offset(), pt2.ph_entry_size(), pt2.ph_count(), len) {
            log::debug!(
                "elf: program headers {:#x}+{}x{} outside the first {:#x} bytes",
                pt2.ph_offset(),
                pt2.ph_count(),
                pt2.ph_entry_size(),
                len
            );
            return Err(Error::ExecFormat);
        }

        let loads = elf
            .program_iter()
            .filter(|phdr| matches!(phdr.get_type(), Ok(SegmentType::Load)))
            .map(|phdr| ProgramHeader {
                offset: phdr.offset() as u32,
                vaddr: phdr.virtual_addr() as u32,
                filesz: phdr.file_size() as u32,
                memsz: phdr.mem_size() as u32,
            })
            .collect();

        Ok(Some(Self {
            entry: pt2.entry_point() as u32,
            loads,
        }))
    }
}

fn is_bootable(elf: &ElfFile<'_>) -> bool {
    let pt1 = elf.header.pt1;
    let pt2 = &elf.header.pt2;
    matches!(pt1.class(), Class::ThirtyTwo)
        && matches!(pt1.data(), Data::LittleEndian)
        && matches!(pt1.version(), Version::Current)
        && matches!(pt2.type_().as_type(), Type::Executable)
        && matches!(pt2.machine().as_machine(), Machine::X86)
        && pt2.version() == EV_CURRENT
}

/// The table must end strictly inside the first `len` bytes, with 4-byte
/// aligned entries.
fn headers_within(phoff: u64, phentsize: u16, phnum: u16, len: usize) -> bool {
    let table = phentsize as u64 * phnum as u64;
    phoff != 0
        && phnum != 0
        && phentsize >= PHDR_MIN_LEN
        && phoff % 4 == 0
        && phentsize % 4 == 0
        && phoff + table < len as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{put_le16, put_le32};

    const PT_LOAD: u32 = 1;
    const PT_NOTE: u32 = 4;

    fn header() -> [u8; 128] {
        let mut buf = [0u8; 128];
        buf[..4].copy_from_slice(b"\x7FELF");
        buf[4] = 1; // 32-bit
        buf[5] = 1; // little endian
        buf[6] = 1;
        put_le16(&mut buf, 16, 2); // ET_EXEC
        put_le16(&mut buf, 18, 3); // EM_386
        put_le32(&mut buf, 20, 1);
        put_le32(&mut buf, 24, 0x10_000C);
        put_le32(&mut buf, 28, 52);
        put_le16(&mut buf, 40, 52);
        put_le16(&mut buf, 42, 32);
        put_le16(&mut buf, 44, 2);
        put_le32(&mut buf, 52, PT_LOAD);
        put_le32(&mut buf, 56, 0x1000);
        put_le32(&mut buf, 60, 0x10_0000);
        put_le32(&mut buf, 68, 0x200);
        put_le32(&mut buf, 72, 0x800);
        put_le32(&mut buf, 84, PT_NOTE);
        buf
    }

    #[test]
    fn test_parse_keeps_load_segments() {
        let elf = ElfImage::parse(&header()).unwrap().unwrap();
        assert_eq!(elf.entry, 0x10_000C);
        assert_eq!(
            elf.loads,
            [ProgramHeader {
                offset: 0x1000,
                vaddr: 0x10_0000,
                filesz: 0x200,
                memsz: 0x800
            }]
        );
    }

    #[test]
    fn test_other_binaries_are_not_elf_images() {
        let mut buf = header();
        put_le16(&mut buf, 18, 62);
        assert_eq!(ElfImage::parse(&buf), Ok(None));

        let mut buf = header();
        buf[4] = 2;
        assert_eq!(ElfImage::parse(&buf), Ok(None));

        let mut buf = header();
        put_le16(&mut buf, 16, 3);
        assert_eq!(ElfImage::parse(&buf), Ok(None));

        assert_eq!(ElfImage::parse(&[0u8; 128]), Ok(None));
    }

    #[test]
    fn test_program_headers_must_be_in_buffer() {
        let buf = header();
        assert_eq!(ElfImage::parse(&buf[..116]), Err(Error::ExecFormat));
        assert!(ElfImage::parse(&buf[..117]).unwrap().is_some());
    }

    #[test]
    fn test_misaligned_program_headers() {
        let mut buf = header();
        put_le32(&mut buf, 28, 54);
        assert_eq!(ElfImage::parse(&buf), Err(Error::ExecFormat));

        let mut buf = header();
        put_le16(&mut buf, 42, 34);
        assert_eq!(ElfImage::parse(&buf), Err(Error::ExecFormat));
    }
}
