//! Error types shared by every stage2 component

use core::fmt;

/// Result type for stage2 operations
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur while accessing disks, files and images
///
/// Every failure in the loader is one of these values; nothing is kept in
/// a global "last error" slot, callers see the error through `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Filename has the wrong shape (not `/path` and not a block list)
    BadFilename,

    /// Path names something that is not a regular file
    BadFiletype,

    /// Compressed stream is malformed
    BadGzipData,

    /// Compressed container header is malformed or unsupported
    BadGzipHeader,

    /// Partition table or disklabel is invalid
    BadPartTable,

    /// Image declares a version this loader does not handle
    BadVersion,

    /// Image wants to be loaded below the 1 MiB floor
    Below1Mb,

    /// Multiboot header requests features this loader lacks
    BootFeatures,

    /// Device string is malformed
    DevFormat,

    /// Device values are out of range
    DevValues,

    /// Executable format not recognized or inconsistent
    ExecFormat,

    /// Read past the length the filesystem can describe
    FileLength,

    /// No such file
    FileNotFound,

    /// Filesystem structures are inconsistent
    FsysCorrupt,

    /// No registered filesystem driver mounts the partition
    FsysMount,

    /// Disk access outside the drive geometry
    Geom,

    /// Drive does not exist
    NoDisk,

    /// Requested partition does not exist
    NoPart,

    /// Number could not be parsed
    NumberParsing,

    /// Access past the end of the partition
    OutsidePart,

    /// Disk read failed
    Read,

    /// Image does not fit in available memory
    WontFit,

    /// Disk write failed
    Write,

    /// Scratch memory is too small for the request
    OutOfMemory,
}

impl Error {
    /// Short human readable description
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadFilename => "Bad filename (must be absolute pathname or blocklist)",
            Self::BadFiletype => "Bad file or directory type",
            Self::BadGzipData => "Bad or corrupt data while decompressing file",
            Self::BadGzipHeader => "Bad or incompatible header in compressed file",
            Self::BadPartTable => "Partition table invalid or corrupt",
            Self::BadVersion => "Mismatched or corrupt version of stage1/stage2",
            Self::Below1Mb => "Loading below 1MB is not supported",
            Self::BootFeatures => "Unsupported Multiboot features requested",
            Self::DevFormat => "Device string unrecognizable",
            Self::DevValues => "Invalid device requested",
            Self::ExecFormat => "Invalid or unsupported executable format",
            Self::FileLength => "Filesystem compatibility error, cannot read whole file",
            Self::FileNotFound => "File not found",
            Self::FsysCorrupt => "Inconsistent filesystem structure",
            Self::FsysMount => "Cannot mount selected partition",
            Self::Geom => "Selected cylinder exceeds maximum supported by BIOS",
            Self::NoDisk => "Selected disk does not exist",
            Self::NoPart => "No such partition",
            Self::NumberParsing => "Error while parsing number",
            Self::OutsidePart => "Attempt to access block outside partition",
            Self::Read => "Disk read error",
            Self::WontFit => "Selected item cannot fit into memory",
            Self::Write => "Disk write error",
            Self::OutOfMemory => "Out of scratch memory",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
