//! The open file.
//!
//! A [`Session`] owns the sector cache, the filesystem registry and the one
//! file that can be open at a time. Opening a path resolves its partition,
//! then either builds a block list or mounts a filesystem and looks the
//! path up, and finally checks for gzip compression.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::blocklist::BlockList;
use super::registry::{DirMode, FilePosition, Filesystem, FsRegistry, Volume};
use crate::config::SessionConfig;
use crate::disk::bios::BiosDisk;
use crate::disk::cache::{SectorCache, SectorSource};
use crate::disk::device::{DeviceSpec, ParseOutcome};
use crate::disk::partition::{self, PartitionDescriptor};
use crate::error::{Error, Result};
use crate::gzio::{Gunzip, RawSource};

/// What the open file reads through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Closed,
    /// Filesystem file, read as stored
    Plain,
    /// Filesystem or block-list file expanded through gzip
    Compressed,
    /// Sector ranges, read as stored
    BlockList,
}

/// Description of the current partition and its filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsysInfo {
    pub device: DeviceSpec,
    pub filesystem: Option<&'static str>,
    pub whole_disk: bool,
    pub slice_type: u32,
    pub start: u64,
    pub length: u64,
}

/// One partition found by [`Session::list_partitions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionListing {
    pub partition: PartitionDescriptor,
    /// Driver that mounts it, if any
    pub filesystem: Option<&'static str>,
}

/// Where raw (not decompressed) reads go
enum Target<'a> {
    Blocks(&'a mut BlockList),
    Driver(&'a mut dyn Filesystem),
    Unmounted,
}

struct Backend<'a> {
    volume: Volume<'a>,
    target: Target<'a>,
}

impl RawSource for Backend<'_> {
    fn raw_read(&mut self, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize> {
        let len = position.clamp(buf.len())?;
        let buf = &mut buf[..len];
        if buf.is_empty() {
            return Ok(0);
        }
        match &mut self.target {
            Target::Blocks(list) => list.read(&mut self.volume, position, buf),
            Target::Driver(driver) => driver.read(&mut self.volume, position, buf),
            Target::Unmounted => Err(Error::FsysMount),
        }
    }
}

/// True if `path` starts with a BSD-style drive name such as `hd0s1/`
fn names_bsd_device(path: &str) -> bool {
    let bytes = path.as_bytes();
    matches!(bytes.first(), Some(b'h') | Some(b'f'))
        && bytes.get(1) == Some(&b'd')
        && bytes.get(2).map_or(false, u8::is_ascii_digit)
}

pub struct Session<D> {
    config: SessionConfig,
    cache: SectorCache<D>,
    registry: FsRegistry,
    scratch: Vec<u8>,
    partition: Option<PartitionDescriptor>,
    driver: Option<usize>,
    blocklist: Option<BlockList>,
    gzip: Option<Box<Gunzip>>,
    position: FilePosition,
    state: FileState,
}

impl<D: BiosDisk> Session<D> {
    pub fn new(disk: D, registry: FsRegistry, config: SessionConfig) -> Self {
        let scratch = vec![0u8; config.fsys_buffer_len];
        Self {
            config,
            cache: SectorCache::new(disk),
            registry,
            scratch,
            partition: None,
            driver: None,
            blocklist: None,
            gzip: None,
            position: FilePosition::default(),
            state: FileState::Closed,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The device paths without a `(device)` prefix refer to
    pub fn root(&self) -> DeviceSpec {
        DeviceSpec::new(self.config.boot_drive, self.config.boot_partition)
    }

    pub fn set_root(&mut self, device: DeviceSpec) -> Result<()> {
        device.check_sane()?;
        self.config.boot_drive = device.drive;
        self.config.boot_partition = device.partition;
        Ok(())
    }

    pub fn cache(&mut self) -> &mut SectorCache<D> {
        &mut self.cache
    }

    pub fn into_disk(self) -> D {
        self.cache.into_inner()
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Length of the open file (expanded length if compressed)
    pub fn length(&self) -> u64 {
        self.position.max
    }

    pub fn position(&self) -> u64 {
        self.position.pos
    }

    /// Split a path into its device and the rest.
    ///
    /// A leading `/dev/` is dropped. Paths without a device use the root.
    fn split_device<'p>(&self, path: &'p str) -> Result<(DeviceSpec, &'p str)> {
        let path = path.strip_prefix("/dev/").unwrap_or(path);
        if !path.starts_with('(') && !names_bsd_device(path) {
            return Ok((self.root(), path));
        }
        match DeviceSpec::parse(path, self.root())? {
            ParseOutcome::Complete { device, rest } => Ok((device, rest)),
            ParseOutcome::Incomplete { .. } => Err(Error::DevFormat),
        }
    }

    /// Resolve the partition of `device` and mount it.
    fn mount(&mut self, device: DeviceSpec) -> Result<(PartitionDescriptor, usize)> {
        let partition = partition::resolve(&mut self.cache, device)?;
        self.partition = Some(partition);
        let mut volume = Volume::new(&mut self.cache, &partition, &mut self.scratch);
        let index = self.registry.mount(&mut volume)?;
        self.driver = Some(index);
        Ok((partition, index))
    }

    /// Open `path`, closing whatever was open.
    ///
    /// Paths starting with `/` are looked up by the filesystem driver;
    /// anything else is a block list.
    pub fn open(&mut self, path: &str) -> Result<()> {
        self.close();
        let result = self.open_inner(path);
        if let Err(err) = result {
            log::debug!("open {:?}: {}", path, err);
            self.close();
        }
        result
    }

    fn open_inner(&mut self, path: &str) -> Result<()> {
        let (device, name) = self.split_device(path)?;
        self.position = FilePosition::new(0);

        if !name.starts_with('/') {
            if !cfg!(feature = "block-files") {
                return Err(Error::BadFilename);
            }
            let partition = partition::resolve(&mut self.cache, device)?;
            self.partition = Some(partition);
            let list = BlockList::parse(name)?;
            self.position.max = list.len();
            self.blocklist = Some(list);
            self.state = FileState::BlockList;
        } else {
            let (partition, index) = self.mount(device)?;
            let driver = self.registry.get_mut(index).ok_or(Error::FsysMount)?;
            let mut volume = Volume::new(&mut self.cache, &partition, &mut self.scratch);
            driver.dir(&mut volume, name, &mut self.position, DirMode::Open)?;
            self.state = FileState::Plain;
        }
        self.position.pos = 0;

        if self.config.decompression && cfg!(feature = "decompression") {
            self.probe_compression()?;
        }
        Ok(())
    }

    fn backend(&mut self) -> Result<(Backend<'_>, &mut FilePosition, Option<&mut Gunzip>)> {
        let partition = self.partition.as_ref().ok_or(Error::FileNotFound)?;
        let target = match (self.blocklist.as_mut(), self.driver) {
            (Some(list), _) => Target::Blocks(list),
            (None, Some(index)) => match self.registry.get_mut(index) {
                Some(driver) => Target::Driver(driver),
                None => Target::Unmounted,
            },
            (None, None) => Target::Unmounted,
        };
        let backend = Backend {
            volume: Volume::new(&mut self.cache, partition, &mut self.scratch),
            target,
        };
        Ok((backend, &mut self.position, self.gzip.as_deref_mut()))
    }

    fn probe_compression(&mut self) -> Result<()> {
        let (mut backend, position, _) = self.backend()?;
        if let Some(gzip) = Gunzip::probe(&mut backend, position)? {
            *position = gzip.visible_position();
            self.gzip = Some(Box::new(gzip));
            self.state = FileState::Compressed;
        }
        Ok(())
    }

    /// Read at the current position into `buf`, returning the bytes read.
    ///
    /// The request is shortened at end of file. Errors leave the position
    /// where it was.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state == FileState::Closed {
            return Err(Error::FileNotFound);
        }
        let len = self.position.clamp(buf.len())?;
        let buf = &mut buf[..len];
        if buf.is_empty() {
            return Ok(0);
        }

        let start = self.position.pos;
        let (mut backend, position, gzip) = self.backend()?;
        let result = match gzip {
            Some(gzip) => gzip.read(&mut backend, position, buf),
            None => backend.raw_read(position, buf),
        };
        if result.is_err() {
            self.position.pos = start;
        }
        result
    }

    /// Read from the current position to the end of the file
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.position.remaining() as usize];
        let n = self.read(&mut out)?;
        out.truncate(n);
        Ok(out)
    }

    /// Move to `offset`. Offsets past the end are rejected.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if self.state == FileState::Closed {
            return Err(Error::FileNotFound);
        }
        if offset > self.position.max {
            return Err(Error::FileLength);
        }
        self.position.pos = offset;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(driver) = self.driver.and_then(|index| self.registry.get_mut(index)) {
            if self.state != FileState::Closed {
                driver.close();
            }
        }
        self.blocklist = None;
        self.gzip = None;
        self.position = FilePosition::default();
        self.state = FileState::Closed;
    }

    /// Names completing the last component of `path`.
    ///
    /// Closes any open file since the filesystem is mounted again.
    pub fn dir(&mut self, path: &str) -> Result<Vec<String>> {
        self.close();
        let (device, name) = self.split_device(path)?;
        if !name.starts_with('/') {
            return Err(Error::BadFilename);
        }
        let (partition, index) = self.mount(device)?;
        let driver = self.registry.get_mut(index).ok_or(Error::FsysMount)?;
        let mut volume = Volume::new(&mut self.cache, &partition, &mut self.scratch);
        let mut names = Vec::new();
        let mut position = FilePosition::default();
        driver.dir(&mut volume, name, &mut position, DirMode::List(&mut names))?;
        Ok(names)
    }

    /// The partition and driver of the last open or dir, if any
    pub fn fsys_info(&self) -> Option<FsysInfo> {
        let partition = self.partition.as_ref()?;
        let filesystem = if self.blocklist.is_some() {
            None
        } else {
            self.driver.and_then(|index| self.registry.names().nth(index))
        };
        Some(FsysInfo {
            device: partition.device(),
            filesystem,
            whole_disk: partition.is_whole_disk(),
            slice_type: partition.slice_type,
            start: partition.start,
            length: partition.length,
        })
    }

    /// Every partition on `drive`, with the filesystem mounted on each.
    pub fn list_partitions(&mut self, drive: u8) -> Result<Vec<PartitionListing>> {
        self.close();
        let partitions = partition::list_partitions(&mut self.cache, drive)?;
        let mut out = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let mut volume = Volume::new(&mut self.cache, &partition, &mut self.scratch);
            let filesystem = match self.registry.mount(&mut volume) {
                Ok(index) => self.registry.names().nth(index),
                Err(_) => None,
            };
            out.push(PartitionListing { partition, filesystem });
        }
        self.driver = None;
        Ok(out)
    }

    /// Make `device`'s primary slice the active one
    pub fn activate(&mut self, device: DeviceSpec) -> Result<()> {
        partition::activate(&mut self.cache, device)
    }

    /// Hide or unhide `device`'s primary slice
    pub fn set_hidden(&mut self, device: DeviceSpec, hidden: bool) -> Result<()> {
        partition::set_hidden(&mut self.cache, device, hidden)
    }

    /// Resolve the root device
    pub fn root_partition(&mut self) -> Result<PartitionDescriptor> {
        let root = self.root();
        partition::resolve(&mut self.cache, root)
    }

    /// BSD boot device word of the root device
    pub fn boot_device_word(&mut self, hd_bias: u8) -> Result<u32> {
        Ok(self.root_partition()?.boot_device_word(hd_bias))
    }

    /// Raw partition-relative read on the root device
    pub fn read_root_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let root = self.root_partition()?;
        root.read(&mut self.cache, sector, 0, buf)
    }

    /// Geometry of `drive`
    pub fn geometry(&mut self, drive: u8) -> Result<crate::disk::bios::Geometry> {
        self.cache.geometry(drive)
    }
}
