//! Session configuration.
//!
//! Runtime options for the file layer: which device unqualified paths
//! refer to, and whether compressed files are expanded on open.

use crate::disk::device::WHOLE_DISK;

/// Default boot drive (first hard disk).
pub const DEFAULT_BOOT_DRIVE: u8 = 0x80;

/// Size of the scratch buffer handed to filesystem drivers.
pub const FSYS_BUFFER_LEN: usize = 0x8000;

/// File layer configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Drive used when a path carries no `(device)` prefix.
    pub boot_drive: u8,
    /// Packed partition used when a path carries no `(device)` prefix,
    /// and for `(hdN,)`.
    pub boot_partition: u32,
    /// Expand gzip files transparently on open.
    pub decompression: bool,
    /// Bytes of scratch memory shared by filesystem drivers.
    pub fsys_buffer_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_drive: DEFAULT_BOOT_DRIVE,
            boot_partition: WHOLE_DISK,
            decompression: cfg!(feature = "decompression"),
            fsys_buffer_len: FSYS_BUFFER_LEN,
        }
    }
}

impl SessionConfig {
    /// Create config rooted at the given drive and packed partition.
    pub fn with_root(drive: u8, partition: u32) -> Self {
        Self {
            boot_drive: drive,
            boot_partition: partition,
            ..Default::default()
        }
    }

    /// Set the default drive.
    pub fn drive(mut self, drive: u8) -> Self {
        self.boot_drive = drive;
        self
    }

    /// Set the default packed partition.
    pub fn partition(mut self, partition: u32) -> Self {
        self.boot_partition = partition;
        self
    }

    /// Disable transparent decompression (the raw bytes are returned).
    pub fn no_decompression(mut self) -> Self {
        self.decompression = false;
        self
    }

    /// Set the filesystem scratch buffer size.
    pub fn fsys_buffer(mut self, len: usize) -> Self {
        self.fsys_buffer_len = len;
        self
    }
}
