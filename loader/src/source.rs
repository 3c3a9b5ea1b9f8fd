// Where images are read from

use stage2_core::disk::bios::BiosDisk;
use stage2_core::{Result, Session};

/// A file store the loader pulls kernels and modules from.
///
/// One file is open at a time; `open` replaces it.
pub trait ImageSource {
    fn open(&mut self, path: &str) -> Result<()>;

    /// Length of the open file, after decompression
    fn length(&self) -> u64;

    fn position(&self) -> u64;

    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Read at the current position; short only at end of file
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Multiboot `boot_device` of the root device
    fn boot_device(&self) -> u32;

    /// BSD boot device word of the root device
    fn bsd_boot_device(&mut self) -> Result<u32>;

    /// BIOS geometry of `drive` packed for BSD bootinfo, if it exists
    fn bios_geometry(&mut self, drive: u8) -> Option<u32>;
}

/// First BIOS hard disk number, subtracted from drive numbers in BSD words
const HARD_DISK_BIAS: u8 = 0x80;

impl<D: BiosDisk> ImageSource for Session<D> {
    fn open(&mut self, path: &str) -> Result<()> {
        Session::open(self, path)
    }

    fn length(&self) -> u64 {
        Session::length(self)
    }

    fn position(&self) -> u64 {
        Session::position(self)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        Session::seek(self, offset)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Session::read(self, buf)
    }

    fn boot_device(&self) -> u32 {
        self.root().boot_device()
    }

    fn bsd_boot_device(&mut self) -> Result<u32> {
        self.boot_device_word(HARD_DISK_BIAS)
    }

    fn bios_geometry(&mut self, drive: u8) -> Option<u32> {
        self.geometry(drive).ok().map(|geometry| geometry.bsd_word())
    }
}
