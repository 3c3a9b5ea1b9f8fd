//! Filesystem driver registry.
//!
//! Drivers are tried in registration order; the first whose `mount` probe
//! succeeds serves the open file until the next mount.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::disk::cache::SectorSource;
use crate::disk::partition::PartitionDescriptor;
use crate::error::{Error, Result};

/// Offset and limits of the open file.
///
/// `max` is the logical length. `fsmax` is a hard ceiling for drivers that
/// can only serve part of a file; reads crossing it fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    pub pos: u64,
    pub max: u64,
    pub fsmax: u64,
}

impl FilePosition {
    pub const fn new(max: u64) -> Self {
        Self {
            pos: 0,
            max,
            fsmax: u64::MAX,
        }
    }

    /// Bytes left before `max`
    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.pos)
    }

    /// Pull `pos` back inside the file and shorten `len` to what is left.
    ///
    /// Fails with `FileLength` if the clamped request crosses `fsmax`.
    pub fn clamp(&mut self, len: usize) -> Result<usize> {
        if self.pos > self.max {
            self.pos = self.max;
        }
        let len = (len as u64).min(self.max - self.pos);
        if self.pos + len > self.fsmax {
            return Err(Error::FileLength);
        }
        Ok(len as usize)
    }
}

impl Default for FilePosition {
    fn default() -> Self {
        Self::new(0)
    }
}

/// What a driver's `dir` call should do with the path
pub enum DirMode<'a> {
    /// Resolve the path and set the file length
    Open,
    /// Collect names completing the last path component
    List(&'a mut Vec<String>),
}

impl DirMode<'_> {
    pub fn is_listing(&self) -> bool {
        matches!(self, DirMode::List(_))
    }
}

/// The partition a driver works on, plus the shared scratch buffer.
///
/// Sector numbers are relative to the start of the partition.
pub struct Volume<'a> {
    source: &'a mut dyn SectorSource,
    partition: &'a PartitionDescriptor,
    scratch: &'a mut [u8],
}

impl<'a> Volume<'a> {
    pub fn new(
        source: &'a mut dyn SectorSource,
        partition: &'a PartitionDescriptor,
        scratch: &'a mut [u8],
    ) -> Self {
        Self {
            source,
            partition,
            scratch,
        }
    }

    pub fn partition(&self) -> &PartitionDescriptor {
        self.partition
    }

    /// Read `buf.len()` bytes starting `byte_offset` bytes into `sector`
    pub fn read(&mut self, sector: u64, byte_offset: usize, buf: &mut [u8]) -> Result<()> {
        self.partition.read(self.source, sector, byte_offset, buf)
    }

    /// Driver scratch memory. Contents do not survive the next mount.
    pub fn scratch(&mut self) -> &mut [u8] {
        self.scratch
    }

    /// Read into the scratch buffer at `at`
    pub fn read_scratch(&mut self, sector: u64, byte_offset: usize, at: usize, len: usize) -> Result<&[u8]> {
        let end = at.checked_add(len).filter(|&end| end <= self.scratch.len()).ok_or(Error::OutOfMemory)?;
        self.partition.read(self.source, sector, byte_offset, &mut self.scratch[at..end])?;
        Ok(&self.scratch[at..end])
    }
}

/// A filesystem driver.
///
/// Drivers keep no state across mounts that they did not re-derive from the
/// volume in `mount`.
pub trait Filesystem {
    fn name(&self) -> &'static str;

    /// Probe the volume. `true` if this driver understands it.
    fn mount(&mut self, volume: &mut Volume<'_>) -> bool;

    /// Look up `path` (starting with `/`).
    ///
    /// In [`DirMode::Open`] the driver sets `position.max` (and may lower
    /// `position.fsmax`) and leaves `position.pos` at zero.
    fn dir(
        &mut self,
        volume: &mut Volume<'_>,
        path: &str,
        position: &mut FilePosition,
        mode: DirMode<'_>,
    ) -> Result<()>;

    /// Read `buf.len()` bytes at `position.pos`, advancing it.
    ///
    /// The request is already clamped to the file length.
    fn read(&mut self, volume: &mut Volume<'_>, position: &mut FilePosition, buf: &mut [u8]) -> Result<usize>;

    fn close(&mut self) {}
}

/// Ordered list of filesystem drivers
#[derive(Default)]
pub struct FsRegistry {
    drivers: Vec<Box<dyn Filesystem>>,
}

impl FsRegistry {
    pub fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    /// Append a driver. Drivers with strict signatures go first.
    pub fn register(&mut self, driver: Box<dyn Filesystem>) {
        self.drivers.push(driver);
    }

    pub fn with(mut self, driver: Box<dyn Filesystem>) -> Self {
        self.register(driver);
        self
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.iter().map(|d| d.name())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Filesystem + 'static)> {
        self.drivers.get_mut(index).map(|d| d.as_mut())
    }

    /// Try each driver in order; index of the first that mounts.
    pub fn mount(&mut self, volume: &mut Volume<'_>) -> Result<usize> {
        for (index, driver) in self.drivers.iter_mut().enumerate() {
            // Whatever the last driver left behind is stale.
            volume.scratch().fill(0);
            log::debug!("{}: trying {}", volume.partition().device(), driver.name());
            if driver.mount(volume) {
                log::info!("{}: filesystem type is {}", volume.partition().device(), driver.name());
                return Ok(index);
            }
        }
        Err(Error::FsysMount)
    }
}
