//! Stage 2 Image Loader
//!
//! Loads kernels into physical memory and hands control to them:
//! Multiboot kernels (ELF, or any format through the a.out kludge),
//! FreeBSD and NetBSD a.out kernels, and Linux zImage / bzImage.
//! Images are read through [`ImageSource`], which the storage core's
//! `Session` implements, so compressed and block-listed kernels load
//! the same way as plain files.

#![no_std]

extern crate alloc;

pub mod aout;
pub mod arch;
pub mod bsd;
mod bytes;
pub mod descriptor;
pub mod elf;
pub mod handoff;
pub mod linux;
pub mod loader;
pub mod memory;
pub mod multiboot;
pub mod source;

pub use bsd::BsdBootArgs;
pub use descriptor::{ImageFormat, LoadDescriptor, Segment};
pub use handoff::{BootRequest, Handoff};
pub use loader::{ImageLoader, LoadedInitrd, LoadedModule};
pub use memory::{IdentityMapped, MemoryInfo, MemoryMapEntry, PhysicalMemory};
pub use multiboot::{AoutSymbols, MultibootInfo};
pub use source::ImageSource;
