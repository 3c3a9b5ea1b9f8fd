// Sector cache - one-track read buffer in front of the raw disk primitive

use alloc::vec;
use alloc::vec::Vec;

use super::bios::{BiosDisk, BiosError, Geometry, SECTOR_SIZE};
use crate::error::{Error, Result};

/// Longest track the buffer holds (63 sectors, 0x7e00 bytes)
pub const MAX_TRACK_SECTORS: u64 = 63;
pub const TRACK_BUFFER_LEN: usize = MAX_TRACK_SECTORS as usize * SECTOR_SIZE;

/// Byte-granular reads relative to the start of a drive.
///
/// This is the view filesystem drivers and block lists get of the disk.
pub trait SectorSource {
    /// Read `buf.len()` bytes starting `byte_offset` bytes into `sector`
    fn rawread(&mut self, drive: u8, sector: u64, byte_offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Geometry of `drive` as currently used for addressing
    fn geometry(&mut self, drive: u8) -> Result<Geometry>;
}

/// Track-buffered access to a [`BiosDisk`].
///
/// Holds at most one track of one drive. The geometry of the buffered drive
/// is memoized until a different drive is read or [`invalidate`] is called.
///
/// [`invalidate`]: SectorCache::invalidate
pub struct SectorCache<D> {
    disk: D,
    buffer: Vec<u8>,
    buf_drive: Option<u8>,
    buf_geom: Geometry,
    buf_track: Option<u64>,
}

impl<D: BiosDisk> SectorCache<D> {
    pub fn new(disk: D) -> Self {
        Self {
            disk,
            buffer: vec![0u8; TRACK_BUFFER_LEN],
            buf_drive: None,
            buf_geom: Geometry::chs(0, 0, 0),
            buf_track: None,
        }
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// Direct access to the disk; the track buffer is dropped since the
    /// caller may write behind its back.
    pub fn disk_mut(&mut self) -> &mut D {
        self.invalidate();
        &mut self.disk
    }

    pub fn into_inner(self) -> D {
        self.disk
    }

    /// Forget the buffered track and the memoized geometry.
    pub fn invalidate(&mut self) {
        self.buf_drive = None;
        self.buf_track = None;
    }

    /// Drive currently held in the buffer, if any
    pub fn buffered_drive(&self) -> Option<u8> {
        self.buf_drive
    }

    fn select_drive(&mut self, drive: u8) -> Result<()> {
        if self.buf_drive != Some(drive) {
            self.buf_geom = self.disk.drive_geometry(drive).map_err(|err| {
                log::debug!("no geometry for drive {:#04x}: {}", drive, err);
                Error::NoDisk
            })?;
            if self.buf_geom.sectors == 0 {
                return Err(Error::Geom);
            }
            self.buf_drive = Some(drive);
            self.buf_track = None;
        }
        Ok(())
    }

    /// Issue a read into the start of the track buffer, falling back from
    /// LBA to CHS addressing when the drive rejects the LBA request.
    fn bios_read(&mut self, drive: u8, sector: u64, count: u64) -> core::result::Result<(), BiosError> {
        loop {
            let address = self.buf_geom.address(sector).ok_or(BiosError::Geometry)?;
            let bytes = count as usize * SECTOR_SIZE;
            match self
                .disk
                .read_sectors(drive, address, count as u32, &mut self.buffer[..bytes])
            {
                Err(BiosError::Geometry) if self.buf_geom.has_lba() => {
                    log::warn!("drive {:#04x}: LBA read rejected, retrying with CHS", drive);
                    self.buf_geom.disable_lba();
                }
                result => return result,
            }
        }
    }

    /// Write one sector. The track buffer is invalidated first.
    pub fn write_sector(&mut self, drive: u8, sector: u64, data: &[u8]) -> Result<()> {
        self.select_drive(drive)?;
        self.buf_track = None;
        if data.len() < SECTOR_SIZE {
            return Err(Error::Write);
        }
        loop {
            let address = self.buf_geom.address(sector).ok_or(Error::Geom)?;
            match self.disk.write_sectors(drive, address, 1, &data[..SECTOR_SIZE]) {
                Ok(()) => return Ok(()),
                Err(BiosError::Geometry) if self.buf_geom.has_lba() => self.buf_geom.disable_lba(),
                Err(BiosError::Geometry) => return Err(Error::Geom),
                Err(err) => {
                    log::warn!("drive {:#04x}: write of sector {} failed: {}", drive, sector, err);
                    return Err(Error::Write);
                }
            }
        }
    }
}

impl<D: BiosDisk> SectorSource for SectorCache<D> {
    fn rawread(&mut self, drive: u8, sector: u64, byte_offset: usize, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut sector = sector + (byte_offset / SECTOR_SIZE) as u64;
        let mut byte_offset = byte_offset % SECTOR_SIZE;
        let mut slen = ((byte_offset + buf.len() + SECTOR_SIZE - 1) / SECTOR_SIZE) as u64;
        let mut done = 0;

        while done < buf.len() {
            self.select_drive(drive)?;

            let spt = (self.buf_geom.sectors as u64).min(MAX_TRACK_SECTORS);
            let soff = sector % spt;
            let track = sector - soff;
            let num_sect = spt - soff;
            let mut bufaddr = soff as usize * SECTOR_SIZE + byte_offset;

            if self.buf_track != Some(track) {
                self.buf_track = None;

                // When the request runs past this track, only fetch what is
                // needed from it instead of the whole track.
                let partial = slen > num_sect;
                let (read_start, read_len) = if partial {
                    bufaddr = byte_offset;
                    (sector, num_sect)
                } else {
                    (track, spt)
                };

                match self.bios_read(drive, read_start, read_len) {
                    Ok(()) if !partial => self.buf_track = Some(track),
                    Ok(()) => {}
                    Err(BiosError::Geometry) => return Err(Error::Geom),
                    Err(err) => {
                        log::warn!(
                            "drive {:#04x}: track read at {} failed ({}), retrying {} sectors",
                            drive,
                            read_start,
                            err,
                            slen
                        );
                        if partial || self.bios_read(drive, sector, slen).is_err() {
                            return Err(Error::Read);
                        }
                        bufaddr = byte_offset;
                    }
                }
            }

            let remaining = buf.len() - done;
            let size = remaining.min(num_sect as usize * SECTOR_SIZE - byte_offset);
            buf[done..done + size].copy_from_slice(&self.buffer[bufaddr..bufaddr + size]);

            done += size;
            sector += num_sect;
            slen = slen.saturating_sub(num_sect);
            byte_offset = 0;
        }

        Ok(())
    }

    fn geometry(&mut self, drive: u8) -> Result<Geometry> {
        self.select_drive(drive)?;
        Ok(self.buf_geom)
    }
}
