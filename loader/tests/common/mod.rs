//! Common test utilities: fake physical memory, in-memory file sources and
//! kernel image builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};

use stage2_core::disk::{BlockIoBios, SECTOR_SIZE};
use stage2_core::{Error, FsRegistry, Result, Session, SessionConfig};
use stage2_loader::{ImageSource, MemoryInfo, PhysicalMemory};

pub const MULTIBOOT_MAGIC: u32 = 0x1BAD_B002;
pub const KLUDGE: u32 = 0x0001_0000;

/// Physical memory backed by a `Vec`, recording every write
pub struct MemoryImage {
    pub data: Vec<u8>,
    /// `(address, length)` of every write and fill, in order
    pub writes: Vec<(u32, u32)>,
}

impl MemoryImage {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            writes: Vec::new(),
        }
    }

    /// Large enough for [`MemoryInfo::default`]
    pub fn standard() -> Self {
        Self::new(MemoryInfo::default().upper_end() as usize)
    }

    pub fn at(&self, addr: u32, len: usize) -> &[u8] {
        &self.data[addr as usize..addr as usize + len]
    }

    pub fn u32_at(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.at(addr, 4).try_into().unwrap())
    }

    pub fn u16_at(&self, addr: u32) -> u16 {
        u16::from_le_bytes(self.at(addr, 2).try_into().unwrap())
    }

    /// NUL-terminated string at `addr`
    pub fn str_at(&self, addr: u32) -> String {
        let bytes = &self.data[addr as usize..];
        let end = bytes.iter().position(|&b| b == 0).unwrap();
        String::from_utf8(bytes[..end].to_vec()).unwrap()
    }
}

impl PhysicalMemory for MemoryImage {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = addr as usize;
        let dst = self.data.get_mut(start..start + data.len()).ok_or(Error::WontFit)?;
        dst.copy_from_slice(data);
        self.writes.push((addr, data.len() as u32));
        Ok(())
    }

    fn fill(&mut self, addr: u32, len: u32, byte: u8) -> Result<()> {
        let start = addr as usize;
        let dst = self.data.get_mut(start..start + len as usize).ok_or(Error::WontFit)?;
        dst.fill(byte);
        self.writes.push((addr, len));
        Ok(())
    }
}

/// Named in-memory files
pub struct FileSource {
    files: HashMap<String, Vec<u8>>,
    current: Option<String>,
    pos: u64,
    pub boot_device: u32,
    pub bsd_boot_device: u32,
    /// Packed geometry per BIOS hard disk
    pub geometries: HashMap<u8, u32>,
    pub opened: Vec<String>,
}

impl FileSource {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            current: None,
            pos: 0,
            boot_device: 0x80FF_FFFF,
            bsd_boot_device: 0xA000_0000,
            geometries: HashMap::new(),
            opened: Vec::new(),
        }
    }

    pub fn with(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), data);
        self
    }

    fn file(&self) -> Result<&Vec<u8>> {
        self.current
            .as_ref()
            .and_then(|name| self.files.get(name))
            .ok_or(Error::FileNotFound)
    }
}

impl ImageSource for FileSource {
    fn open(&mut self, path: &str) -> Result<()> {
        self.opened.push(path.to_string());
        self.current = None;
        if !self.files.contains_key(path) {
            return Err(Error::FileNotFound);
        }
        self.current = Some(path.to_string());
        self.pos = 0;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.file().map_or(0, |data| data.len() as u64)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.file()?.len() as u64 {
            return Err(Error::FileLength);
        }
        self.pos = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.pos as usize;
        let data = self.file()?;
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn boot_device(&self) -> u32 {
        self.boot_device
    }

    fn bsd_boot_device(&mut self) -> Result<u32> {
        Ok(self.bsd_boot_device)
    }

    fn bios_geometry(&mut self, drive: u8) -> Option<u32> {
        self.geometries.get(&drive).copied()
    }
}

fn put32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn multiboot_header(flags: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    put32(&mut out, 0, MULTIBOOT_MAGIC);
    put32(&mut out, 4, flags);
    put32(&mut out, 8, 0u32.wrapping_sub(MULTIBOOT_MAGIC).wrapping_sub(flags));
    out
}

/// One loadable segment of a test ELF
pub struct ElfSegment<'a> {
    pub vaddr: u32,
    pub data: &'a [u8],
    pub memsz: u32,
}

/// i386 executable with a Multiboot header after its program headers;
/// segment data starts at file offset 0x1000, one page apart
pub fn multiboot_elf(entry: u32, segments: &[ElfSegment<'_>], flags: u32) -> Vec<u8> {
    let phoff = 52usize;
    let mb_offset = (phoff + segments.len() * 32 + 3) & !3;
    let mut image = vec![0u8; 0x1000];
    image[..4].copy_from_slice(b"\x7FELF");
    image[4] = 1;
    image[5] = 1;
    image[6] = 1;
    put16(&mut image, 16, 2);
    put16(&mut image, 18, 3);
    put32(&mut image, 20, 1);
    put32(&mut image, 24, entry);
    put32(&mut image, 28, phoff as u32);
    put16(&mut image, 40, 52);
    put16(&mut image, 42, 32);
    put16(&mut image, 44, segments.len() as u16);
    image[mb_offset..mb_offset + 12].copy_from_slice(&multiboot_header(flags));

    for (i, segment) in segments.iter().enumerate() {
        let offset = image.len();
        let at = phoff + i * 32;
        put32(&mut image, at, 1);
        put32(&mut image, at + 4, offset as u32);
        put32(&mut image, at + 8, segment.vaddr);
        put32(&mut image, at + 12, segment.vaddr);
        put32(&mut image, at + 16, segment.data.len() as u32);
        put32(&mut image, at + 20, segment.memsz);
        image.extend_from_slice(segment.data);
        image.resize((image.len() + 0xFFF) & !0xFFF, 0);
    }
    image
}

/// Flat binary loaded whole at `load_addr` through the a.out kludge.
///
/// The Multiboot header sits at `header_offset` inside `code`.
pub fn kludge_image(code: &[u8], header_offset: usize, load_addr: u32, bss: u32, entry: u32) -> Vec<u8> {
    let mut image = code.to_vec();
    let load_end = load_addr + image.len() as u32;
    image[header_offset..header_offset + 12].copy_from_slice(&multiboot_header(KLUDGE));
    put32(&mut image, header_offset + 12, load_addr + header_offset as u32);
    put32(&mut image, header_offset + 16, load_addr);
    put32(&mut image, header_offset + 20, load_end);
    put32(&mut image, header_offset + 24, load_end + bss);
    put32(&mut image, header_offset + 28, entry);
    image
}

/// Little-endian ZMAGIC a.out (a FreeBSD kernel) with an optional symbol
/// table: `(symtab, strtab)`, the string table without its size word
pub fn freebsd_aout(entry: u32, text: &[u8], data: &[u8], bss: u32, syms: Option<(&[u8], &[u8])>) -> Vec<u8> {
    let mut image = vec![0u8; 0x1000];
    put32(&mut image, 0, 0x0086_010B);
    put32(&mut image, 4, text.len() as u32);
    put32(&mut image, 8, data.len() as u32);
    put32(&mut image, 12, bss);
    put32(&mut image, 20, entry);
    image.extend_from_slice(text);
    image.extend_from_slice(data);
    if let Some((symtab, strtab)) = syms {
        put32(&mut image, 16, symtab.len() as u32);
        image.extend_from_slice(symtab);
        image.extend_from_slice(&(strtab.len() as u32 + 4).to_le_bytes());
        image.extend_from_slice(strtab);
    }
    image
}

/// Network-order OMAGIC a.out, as NetBSD kernels are built
pub fn netbsd_aout(entry: u32, text: &[u8], data: &[u8], bss: u32) -> Vec<u8> {
    let mut image = vec![0u8; 32];
    put32(&mut image, 0, 0x0701_8600);
    put32(&mut image, 4, text.len() as u32);
    put32(&mut image, 8, data.len() as u32);
    put32(&mut image, 12, bss);
    put32(&mut image, 20, entry);
    image.extend_from_slice(text);
    image.extend_from_slice(data);
    image
}

/// Linux boot sector, `setup_sects` of setup code and the kernel
/// (a multiple of 16 bytes)
pub fn linux_image(setup_sects: u8, kernel: &[u8], big: bool) -> Vec<u8> {
    let mut image = vec![0u8; 512 * (1 + setup_sects as usize)];
    for (i, b) in image.iter_mut().enumerate().skip(512) {
        *b = (i % 251) as u8;
    }
    image[0x1F1] = setup_sects;
    put16(&mut image, 0x1F4, (kernel.len() / 16) as u16);
    put16(&mut image, 0x1FE, 0xAA55);
    image[0x210] = 0;
    image[0x211] = big as u8;
    image.extend_from_slice(kernel);
    image
}

/// Sector-filled test pattern: every byte depends on its offset
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    (0..len as u32)
        .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(seed) >> 13) as u8)
        .collect()
}

/// In-memory block device for testing
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    pub data: Vec<u8>,
}

impl BlockIo for MemoryBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(SECTOR_SIZE as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> core::result::Result<u64, Self::Error> {
        Ok((self.data.len() / SECTOR_SIZE) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> core::result::Result<(), Self::Error> {
        let offset = start_lba.0 as usize * SECTOR_SIZE;
        if offset + dst.len() > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read beyond end of device"));
        }
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> core::result::Result<(), Self::Error> {
        let offset = start_lba.0 as usize * SECTOR_SIZE;
        if offset + src.len() > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write beyond end of device"));
        }
        self.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        Ok(())
    }
}

pub type TestSession = Session<BlockIoBios<MemoryBlockDevice>>;

/// Hard disk 0x80 with `image` written from `sector` on, no partition
/// table, and no filesystem drivers
pub fn raw_disk_session(sectors: usize, sector: u64, image: &[u8]) -> TestSession {
    let mut data = vec![0u8; sectors * SECTOR_SIZE];
    let start = sector as usize * SECTOR_SIZE;
    data[start..start + image.len()].copy_from_slice(image);

    let mut bios = BlockIoBios::new();
    bios.attach(0x80, MemoryBlockDevice { data }, true).expect("attach");
    Session::new(bios, FsRegistry::new(), SessionConfig::with_root(0x80, 0x00FF_FFFF))
}

/// gzip container around a miniz_oxide deflate stream
pub fn gzip(payload: &[u8]) -> Vec<u8> {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in payload {
        crc ^= b as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    let mut out = vec![0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 3];
    out.extend(miniz_oxide::deflate::compress_to_vec(payload, 6));
    out.extend_from_slice(&(!crc).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out
}
