// Raw BIOS-style disk boundary and a BlockIo-backed implementation

use alloc::vec::Vec;
use core::fmt;

use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_BITS: u32 = 9;

/// First BIOS hard disk number; lower numbers are floppies.
pub const FIRST_HARD_DISK: u8 = 0x80;

/// Disk geometry as reported by the firmware for one drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub total_sectors: u64,
    pub flags: u32,
}

impl Geometry {
    /// Drive accepts extended (LBA) addressing
    pub const FLAG_LBA_EXTENSION: u32 = 0x1;

    /// CHS-only geometry; total sectors is the CHS product
    pub const fn chs(cylinders: u32, heads: u32, sectors: u32) -> Self {
        Self {
            cylinders,
            heads,
            sectors,
            total_sectors: cylinders as u64 * heads as u64 * sectors as u64,
            flags: 0,
        }
    }

    pub fn has_lba(&self) -> bool {
        self.flags & Self::FLAG_LBA_EXTENSION != 0
    }

    /// Drop extended addressing and fall back to the CHS view of the drive
    pub fn disable_lba(&mut self) {
        self.flags &= !Self::FLAG_LBA_EXTENSION;
        self.total_sectors = self.cylinders as u64 * self.heads as u64 * self.sectors as u64;
    }

    /// Translate a linear sector into the address the drive expects.
    ///
    /// `None` means the sector is outside the addressable range.
    pub fn address(&self, sector: u64) -> Option<SectorAddress> {
        if self.has_lba() {
            if sector >= self.total_sectors {
                return None;
            }
            return Some(SectorAddress::Lba(sector));
        }

        if self.sectors == 0 || self.heads == 0 {
            return None;
        }
        // Sector numbers count from one; head and cylinder from zero.
        let sector_offset = (sector % self.sectors as u64) as u32 + 1;
        let head = sector / self.sectors as u64;
        let head_offset = (head % self.heads as u64) as u32;
        let cylinder = head / self.heads as u64;
        if cylinder >= self.cylinders as u64 {
            return None;
        }
        Some(SectorAddress::Chs {
            cylinder: cylinder as u32,
            head: head_offset,
            sector: sector_offset,
        })
    }

    /// Linear sector for a CHS triple, if it lies inside this geometry
    pub fn linear(&self, cylinder: u32, head: u32, sector: u32) -> Option<u64> {
        if sector == 0 || sector > self.sectors || head >= self.heads || cylinder >= self.cylinders {
            return None;
        }
        Some(
            (cylinder as u64 * self.heads as u64 + head as u64) * self.sectors as u64
                + (sector as u64 - 1),
        )
    }

    /// BSD bootinfo packing: `(cyl-1)<<16 | (heads-1)<<8 | sectors`
    pub fn bsd_word(&self) -> u32 {
        (self.cylinders.wrapping_sub(1) << 16)
            .wrapping_add((self.heads.wrapping_sub(1) & 0xff) << 8)
            .wrapping_add(self.sectors & 0xff)
    }
}

/// Address handed to the raw disk primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorAddress {
    Lba(u64),
    Chs { cylinder: u32, head: u32, sector: u32 },
}

/// Status reported by the raw disk primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiosError {
    /// No such drive
    NoDrive,
    /// Address lies outside what the drive accepts in this addressing mode
    Geometry,
    /// Controller reported the given status code
    Io(u8),
}

impl fmt::Display for BiosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDrive => write!(f, "no such drive"),
            Self::Geometry => write!(f, "geometry error"),
            Self::Io(code) => write!(f, "controller status {:#04x}", code),
        }
    }
}

/// The only trusted I/O primitive: whole sectors from a numbered drive
pub trait BiosDisk {
    fn drive_geometry(&mut self, drive: u8) -> Result<Geometry, BiosError>;

    /// Read `count` sectors into `dst` (`dst.len() >= count * SECTOR_SIZE`)
    fn read_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        dst: &mut [u8],
    ) -> Result<(), BiosError>;

    fn write_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        src: &[u8],
    ) -> Result<(), BiosError>;
}

impl<T: BiosDisk + ?Sized> BiosDisk for &mut T {
    fn drive_geometry(&mut self, drive: u8) -> Result<Geometry, BiosError> {
        (**self).drive_geometry(drive)
    }

    fn read_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        dst: &mut [u8],
    ) -> Result<(), BiosError> {
        (**self).read_sectors(drive, address, count, dst)
    }

    fn write_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        src: &[u8],
    ) -> Result<(), BiosError> {
        (**self).write_sectors(drive, address, count, src)
    }
}

struct AttachedDrive<B> {
    number: u8,
    device: B,
    geometry: Geometry,
}

/// BIOS drive table over `BlockIo` devices
///
/// Each attached device gets a fabricated CHS geometry so that CHS reads
/// work as they would through the firmware.
pub struct BlockIoBios<B> {
    drives: Vec<AttachedDrive<B>>,
}

impl<B: BlockIo> BlockIoBios<B> {
    pub fn new() -> Self {
        Self { drives: Vec::new() }
    }

    /// Attach `device` as BIOS drive `number`.
    ///
    /// `lba` controls whether extended addressing is advertised. Devices
    /// must use 512-byte blocks.
    pub fn attach(&mut self, number: u8, mut device: B, lba: bool) -> Result<(), BiosError> {
        if device.block_size().to_u32() as usize != SECTOR_SIZE {
            return Err(BiosError::Io(0x01));
        }
        let blocks = device.num_blocks().map_err(|_| BiosError::Io(0x20))?;
        let mut geometry = fabricate_geometry(number, blocks);
        if lba {
            geometry.flags |= Geometry::FLAG_LBA_EXTENSION;
            geometry.total_sectors = blocks;
        }

        log::debug!(
            "attach drive {:#04x}: {} sectors, C/H/S {}/{}/{}, lba={}",
            number,
            blocks,
            geometry.cylinders,
            geometry.heads,
            geometry.sectors,
            lba
        );

        self.drives.retain(|d| d.number != number);
        self.drives.push(AttachedDrive {
            number,
            device,
            geometry,
        });
        Ok(())
    }

    /// Borrow the device attached as `number`
    pub fn device(&self, number: u8) -> Option<&B> {
        self.drives.iter().find(|d| d.number == number).map(|d| &d.device)
    }

    fn drive(&mut self, number: u8) -> Result<&mut AttachedDrive<B>, BiosError> {
        self.drives
            .iter_mut()
            .find(|d| d.number == number)
            .ok_or(BiosError::NoDrive)
    }
}

impl<B: BlockIo> Default for BlockIoBios<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn fabricate_geometry(number: u8, blocks: u64) -> Geometry {
    let (heads, sectors) = if number & FIRST_HARD_DISK != 0 {
        (255, 63)
    } else {
        (2, 18)
    };
    let per_cylinder = heads as u64 * sectors as u64;
    let cylinders = ((blocks + per_cylinder - 1) / per_cylinder).max(1);
    Geometry::chs(cylinders.min(u32::MAX as u64) as u32, heads, sectors)
}

impl<B: BlockIo> AttachedDrive<B> {
    fn resolve(&self, address: SectorAddress, count: u32, len: usize) -> Result<u64, BiosError> {
        let first = match address {
            SectorAddress::Lba(lba) => {
                if !self.geometry.has_lba() || lba >= self.geometry.total_sectors {
                    return Err(BiosError::Geometry);
                }
                lba
            }
            SectorAddress::Chs {
                cylinder,
                head,
                sector,
            } => self
                .geometry
                .linear(cylinder, head, sector)
                .ok_or(BiosError::Geometry)?,
        };
        if len < count as usize * SECTOR_SIZE {
            return Err(BiosError::Io(0x09));
        }
        Ok(first)
    }
}

impl<B: BlockIo> BiosDisk for BlockIoBios<B> {
    fn drive_geometry(&mut self, drive: u8) -> Result<Geometry, BiosError> {
        Ok(self.drive(drive)?.geometry)
    }

    fn read_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        dst: &mut [u8],
    ) -> Result<(), BiosError> {
        let attached = self.drive(drive)?;
        let first = attached.resolve(address, count, dst.len())?;
        let bytes = count as usize * SECTOR_SIZE;
        attached
            .device
            .read_blocks(Lba(first), &mut dst[..bytes])
            .map_err(|err| {
                log::warn!("drive {:#04x} read at {} failed: {:?}", drive, first, err);
                BiosError::Io(0x04)
            })
    }

    fn write_sectors(
        &mut self,
        drive: u8,
        address: SectorAddress,
        count: u32,
        src: &[u8],
    ) -> Result<(), BiosError> {
        let attached = self.drive(drive)?;
        let first = attached.resolve(address, count, src.len())?;
        let bytes = count as usize * SECTOR_SIZE;
        attached
            .device
            .write_blocks(Lba(first), &src[..bytes])
            .map_err(|err| {
                log::warn!("drive {:#04x} write at {} failed: {:?}", drive, first, err);
                BiosError::Io(0x03)
            })?;
        attached.device.flush().map_err(|_| BiosError::Io(0x03))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chs_translation_round_trips() {
        let geom = Geometry::chs(10, 16, 63);
        for sector in [0u64, 62, 63, 1007, 1008, 10079] {
            match geom.address(sector) {
                Some(SectorAddress::Chs {
                    cylinder,
                    head,
                    sector: s,
                }) => assert_eq!(geom.linear(cylinder, head, s), Some(sector)),
                other => panic!("unexpected address {:?}", other),
            }
        }
        assert_eq!(geom.address(10080), None);
    }

    #[test]
    fn test_lba_bounds() {
        let mut geom = Geometry::chs(2, 255, 63);
        geom.flags |= Geometry::FLAG_LBA_EXTENSION;
        geom.total_sectors = 40_000;
        assert_eq!(geom.address(39_999), Some(SectorAddress::Lba(39_999)));
        assert_eq!(geom.address(40_000), None);

        geom.disable_lba();
        assert_eq!(geom.total_sectors, 2 * 255 * 63);
        assert!(matches!(geom.address(100), Some(SectorAddress::Chs { .. })));
    }

    #[test]
    fn test_bsd_geometry_word() {
        let geom = Geometry::chs(1024, 255, 63);
        assert_eq!(geom.bsd_word(), (1023 << 16) | (254 << 8) | 63);
    }
}
