// Disk access: raw BIOS boundary, sector cache, device names, partitions

pub mod bios;
pub mod bsdlabel;
pub mod cache;
pub mod device;
pub mod mbr;
pub mod partition;

pub use bios::{BiosDisk, BiosError, BlockIoBios, Geometry, SectorAddress, SECTOR_SIZE};
pub use cache::{SectorCache, SectorSource};
pub use device::{DeviceSpec, ParseOutcome, PartChoice, WHOLE_DISK};
pub use partition::PartitionDescriptor;
