// Files: driver registry, block lists and the open-file session

pub mod blocklist;
pub mod file;
pub mod registry;

pub use blocklist::{BlockList, BlockRange, BLOCKLIST_CAPACITY};
pub use file::{FileState, FsysInfo, PartitionListing, Session};
pub use registry::{DirMode, FilePosition, Filesystem, FsRegistry, Volume};
