//! Common test utilities: in-memory disks, image builders, a tiny filesystem

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};

use stage2_core::disk::bsdlabel::write_label;
use stage2_core::disk::mbr::{entry_offset, MBR_SIGNATURE_OFFSET, SLICE_TYPE_EXTENDED};
use stage2_core::disk::{BlockIoBios, SECTOR_SIZE};
use stage2_core::{DirMode, Error, FilePosition, Filesystem, FsRegistry, Result, Session, SessionConfig, Volume};

/// In-memory block device for testing
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    pub data: Vec<u8>,
    pub block_size: usize,
    /// Number of `read_blocks` calls, shared with clones
    pub reads: Rc<Cell<usize>>,
}

impl MemoryBlockDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            block_size: SECTOR_SIZE,
            reads: Rc::new(Cell::new(0)),
        }
    }

    pub fn sector(&self, sector: u64) -> &[u8] {
        let start = sector as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }
}

impl BlockIo for MemoryBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(self.block_size as u32).expect("valid block size")
    }

    fn num_blocks(&mut self) -> core::result::Result<u64, Self::Error> {
        Ok((self.data.len() / self.block_size) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> core::result::Result<(), Self::Error> {
        self.reads.set(self.reads.get() + 1);
        let offset = start_lba.0 as usize * self.block_size;
        if offset + dst.len() > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read beyond end of device"));
        }
        dst.copy_from_slice(&self.data[offset..offset + dst.len()]);
        Ok(())
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> core::result::Result<(), Self::Error> {
        let offset = start_lba.0 as usize * self.block_size;
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

/// Builds raw disk images sector by sector
pub struct DiskBuilder {
    data: Vec<u8>,
}

impl DiskBuilder {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0u8; sectors * SECTOR_SIZE],
        }
    }

    pub fn bytes(mut self, sector: u64, bytes: &[u8]) -> Self {
        let start = sector as usize * SECTOR_SIZE;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Partition table slot `index` in the table at `table_sector`
    pub fn entry(mut self, table_sector: u64, index: usize, flag: u8, slice_type: u8, start: u32, length: u32) -> Self {
        let base = table_sector as usize * SECTOR_SIZE;
        let off = base + entry_offset(index);
        self.data[off] = flag;
        self.data[off + 4] = slice_type;
        self.data[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
        self.data[off + 12..off + 16].copy_from_slice(&length.to_le_bytes());
        self.signature(table_sector)
    }

    pub fn signature(mut self, table_sector: u64) -> Self {
        let off = table_sector as usize * SECTOR_SIZE + MBR_SIGNATURE_OFFSET;
        self.data[off] = 0x55;
        self.data[off + 1] = 0xAA;
        self
    }

    pub fn primary(self, index: usize, slice_type: u8, start: u32, length: u32) -> Self {
        self.entry(0, index, 0, slice_type, start, length)
    }

    /// One link of an extended chain: the table at `ebr` describes a
    /// logical slice `rel_start` sectors after it, and optionally the next
    /// table at `next` (relative to the first extended table).
    pub fn logical(self, ebr: u64, slice_type: u8, rel_start: u32, length: u32, next: Option<(u32, u32)>) -> Self {
        let builder = self.entry(ebr, 0, 0, slice_type, rel_start, length);
        match next {
            Some((start, len)) => builder.entry(ebr, 1, 0, SLICE_TYPE_EXTENDED, start, len),
            None => builder,
        }
    }

    /// BSD disklabel in the second sector of the slice at `slice_start`
    pub fn bsd_label(mut self, slice_start: u64, disk_type: u16, parts: &[(u32, u32, u8)]) -> Self {
        let start = (slice_start as usize + 1) * SECTOR_SIZE;
        write_label(&mut self.data[start..start + SECTOR_SIZE], disk_type, parts);
        self
    }

    /// A [`FlatFs`] volume at `part_start`
    pub fn flatfs(mut self, part_start: u64, files: &[(&str, &[u8])]) -> Self {
        let image = flatfs_image(files);
        let start = part_start as usize * SECTOR_SIZE;
        self.data[start..start + image.len()].copy_from_slice(&image);
        self
    }

    pub fn build(self) -> MemoryBlockDevice {
        MemoryBlockDevice::new(self.data)
    }
}

pub type TestSession = Session<BlockIoBios<MemoryBlockDevice>>;

pub fn bios(disks: Vec<(u8, MemoryBlockDevice)>, lba: bool) -> BlockIoBios<MemoryBlockDevice> {
    let mut bios = BlockIoBios::new();
    for (number, device) in disks {
        bios.attach(number, device, lba).expect("attach");
    }
    bios
}

pub fn session(disks: Vec<(u8, MemoryBlockDevice)>, registry: FsRegistry, config: SessionConfig) -> TestSession {
    Session::new(bios(disks, true), registry, config)
}

/// Sector-filled test pattern: every byte depends on its offset
pub fn pattern(len: usize, seed: u32) -> Vec<u8> {
    (0..len as u32)
        .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(seed) >> 13) as u8)
        .collect()
}

/// Bitwise CRC-32 for building gzip trailers
pub fn reference_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in data {
        crc ^= b as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    !crc
}

/// gzip container around a miniz_oxide deflate stream
pub fn gzip(payload: &[u8], name: Option<&str>) -> Vec<u8> {
    let mut out = vec![0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 3];
    if let Some(name) = name {
        out[3] |= 0x08;
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out.extend(miniz_oxide::deflate::compress_to_vec(payload, 6));
    out.extend_from_slice(&reference_crc32(payload).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out
}

pub const FLATFS_MAGIC: &[u8; 8] = b"FLATFS01";
const FLATFS_ENTRY_LEN: usize = 32;
const FLATFS_NAME_LEN: usize = 24;

/// Lay out a FlatFs volume: superblock, entry table, file data
pub fn flatfs_image(files: &[(&str, &[u8])]) -> Vec<u8> {
    let table_sectors = (files.len() * FLATFS_ENTRY_LEN + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let mut next = 1 + table_sectors.max(1);
    let mut image = vec![0u8; next * SECTOR_SIZE];
    image[..8].copy_from_slice(FLATFS_MAGIC);
    image[8..12].copy_from_slice(&(files.len() as u32).to_le_bytes());

    for (i, (name, content)) in files.iter().enumerate() {
        let off = SECTOR_SIZE + i * FLATFS_ENTRY_LEN;
        image[off..off + name.len()].copy_from_slice(name.as_bytes());
        image[off + 24..off + 28].copy_from_slice(&(next as u32).to_le_bytes());
        image[off + 28..off + 32].copy_from_slice(&(content.len() as u32).to_le_bytes());

        let sectors = (content.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        image.resize((next + sectors) * SECTOR_SIZE, 0);
        image[next * SECTOR_SIZE..next * SECTOR_SIZE + content.len()].copy_from_slice(content);
        next += sectors;
    }
    image
}

/// Minimal read-only filesystem: a flat table of (name, start, length)
#[derive(Default)]
pub struct FlatFs {
    files: Vec<(String, u64, u64)>,
    current: Option<u64>,
    /// Cap on readable bytes, as a driver that only supports small files would set
    pub ceiling: Option<u64>,
}

impl FlatFs {
    pub fn boxed() -> Box<dyn Filesystem> {
        Box::new(Self::default())
    }

    pub fn with_ceiling(ceiling: u64) -> Box<dyn Filesystem> {
        Box::new(Self {
            ceiling: Some(ceiling),
            ..Self::default()
        })
    }
}

impl Filesystem for FlatFs {
    fn name(&self) -> &'static str {
        "flatfs"
    }

    fn mount(&mut self, volume: &mut Volume<'_>) -> bool {
        self.files.clear();
        self.current = None;

        let count = match volume.read_scratch(0, 0, 0, 12) {
            Ok(sb) if &sb[..8] == FLATFS_MAGIC => u32::from_le_bytes([sb[8], sb[9], sb[10], sb[11]]) as usize,
            _ => return false,
        };
        for i in 0..count {
            let mut entry = [0u8; FLATFS_ENTRY_LEN];
            if volume.read(1, i * FLATFS_ENTRY_LEN, &mut entry).is_err() {
                return false;
            }
            let name_len = entry[..FLATFS_NAME_LEN].iter().position(|&b| b == 0).unwrap_or(FLATFS_NAME_LEN);
            let name = String::from_utf8_lossy(&entry[..name_len]).into_owned();
            let start = u32::from_le_bytes(entry[24..28].try_into().unwrap()) as u64;
            let len = u32::from_le_bytes(entry[28..32].try_into().unwrap()) as u64;
            self.files.push((name, start, len));
        }
        true
    }

    fn dir(&mut self, _volume: &mut Volume<'_>, path: &str, position: &mut FilePosition, mode: DirMode<'_>) -> Result<()> {
        let name = path.trim_start_matches('/');
        match mode {
            DirMode::Open => {
                let (_, start, len) = self.files.iter().find(|f| f.0 == name).ok_or(Error::FileNotFound)?;
                self.current = Some(*start);
                position.max = *len;
                if let Some(ceiling) = self.ceiling {
                    position.fsmax = ceiling;
                }
                Ok(())
            }
            DirMode::List(names) => {
                names.extend(self.files.iter().filter(|f| f.0.starts_with(name)).map(|f| f.0.clone()));
                if names.is_empty() {
                    Err(Error::FileNotFound)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn read(&mut self, volume: &mut Volume<'_>, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        let start = self.current.ok_or(Error::FileNotFound)?;
        volume.read(start, position.pos as usize, buf)?;
        position.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.current = None;
    }
}

/// Driver that records its mount probes and then defers to FlatFs
pub struct RecordingFs {
    pub name: &'static str,
    pub accept: bool,
    pub probes: Rc<RefCell<Vec<&'static str>>>,
    inner: FlatFs,
}

impl RecordingFs {
    pub fn boxed(name: &'static str, accept: bool, probes: &Rc<RefCell<Vec<&'static str>>>) -> Box<dyn Filesystem> {
        Box::new(Self {
            name,
            accept,
            probes: Rc::clone(probes),
            inner: FlatFs::default(),
        })
    }
}

impl Filesystem for RecordingFs {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mount(&mut self, volume: &mut Volume<'_>) -> bool {
        self.probes.borrow_mut().push(self.name);
        self.accept && self.inner.mount(volume)
    }

    fn dir(&mut self, volume: &mut Volume<'_>, path: &str, position: &mut FilePosition, mode: DirMode<'_>) -> Result<()> {
        self.inner.dir(volume, path, position, mode)
    }

    fn read(&mut self, volume: &mut Volume<'_>, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(volume, position, buf)
    }
}
