//! Stage 2 Core Library
//!
//! Storage access for a second-stage boot loader: raw BIOS disks, partition
//! tables, filesystem dispatch, block-list files and transparent gzip.
//! Designed to be no_std compatible.

#![no_std]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

pub mod config;
pub mod disk;
pub mod error;
pub mod fs;
pub mod gzio;
pub mod logger;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use fs::file::{FileState, FsysInfo, Session};
pub use fs::registry::{DirMode, FilePosition, Filesystem, FsRegistry, Volume};
