// Partition resolution: MBR, extended chains and BSD disklabels

use alloc::vec::Vec;

use super::bios::{BiosDisk, SECTOR_SIZE};
use super::bsdlabel::{BsdLabel, BSD_LABEL_SECTOR};
use super::cache::{SectorCache, SectorSource};
use super::device::{DeviceSpec, UNSPECIFIED, WHOLE_DISK};
use super::mbr::{
    entry_offset, is_bsd, is_extended, Mbr, MbrEntry, PARTITION_ENTRY_LEN, PRIMARY_SLICES,
    SLICE_FLAG_BOOTABLE, SLICE_TYPE_FREEBSD, SLICE_TYPE_HIDDEN_FLAG,
};
use crate::error::{Error, Result};

/// Slice numbers stop here, as in the packed encoding
const MAX_SLICE_NUMBER: u32 = 255;

/// BSD `MAKEBOOTDEV` magic
pub const B_DEVMAGIC: u32 = 0xA000_0000;

/// BSD boot device types
pub const BOOTDEV_TYPE_WD: u32 = 0;
pub const BOOTDEV_TYPE_FD: u32 = 2;
pub const BOOTDEV_TYPE_DA: u32 = 4;

/// Where a partition lives on a drive.
///
/// Whole disks, MBR slices, logical slices and BSD sub-partitions all
/// resolve to this one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub drive: u8,
    /// Packed partition with the slice number filled in
    pub partition: u32,
    /// MBR type byte; for BSD sub-partitions `fs_type << 8 | 0xA5`
    pub slice_type: u32,
    /// First sector, absolute on the drive
    pub start: u64,
    /// Length in sectors
    pub length: u64,
    /// Snapshot of the partition table slot this came from (zero for
    /// whole disks)
    pub entry: [u8; PARTITION_ENTRY_LEN],
    /// Sector holding the table with `entry`
    pub entry_sector: u64,
    pub entry_index: u8,
    /// Disklabel declared a SCSI disk
    pub scsi_label: bool,
}

impl PartitionDescriptor {
    fn whole_disk(drive: u8, length: u64) -> Self {
        Self {
            drive,
            partition: WHOLE_DISK,
            slice_type: 0,
            start: 0,
            length,
            entry: [0; PARTITION_ENTRY_LEN],
            entry_sector: 0,
            entry_index: 0,
            scsi_label: false,
        }
    }

    fn from_chain(drive: u8, bsd: u32, item: &ChainEntry) -> Self {
        Self {
            drive,
            partition: (item.slice_no << 16) | (bsd & 0xFFFF),
            slice_type: item.entry.slice_type() as u32,
            start: item.table_sector + item.entry.start() as u64,
            length: item.entry.length() as u64,
            entry: item.entry.raw(),
            entry_sector: item.table_sector,
            entry_index: item.index as u8,
            scsi_label: false,
        }
    }

    pub fn device(&self) -> DeviceSpec {
        DeviceSpec::new(self.drive, self.partition)
    }

    pub fn is_whole_disk(&self) -> bool {
        self.partition == WHOLE_DISK
    }

    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Read bytes relative to the start of this partition.
    ///
    /// Fails with `OutsidePart` if any touched sector lies past the end.
    pub fn read(
        &self,
        source: &mut dyn SectorSource,
        sector: u64,
        byte_offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let span = (byte_offset + buf.len().max(1) - 1) / SECTOR_SIZE;
        if sector + span as u64 >= self.length {
            return Err(Error::OutsidePart);
        }
        let sector = sector + (byte_offset / SECTOR_SIZE) as u64;
        let byte_offset = byte_offset % SECTOR_SIZE;
        log::trace!("devread <{}, {}, {}>", sector, byte_offset, buf.len());
        source.rawread(self.drive, self.start + sector, byte_offset, buf)
    }

    /// BSD `MAKEBOOTDEV` word for this partition.
    ///
    /// `hd_bias` is subtracted from the drive number to form the unit.
    pub fn boot_device_word(&self, hd_bias: u8) -> u32 {
        let slice = (self.partition >> 16) & 0xFF;
        let slice_field = if self.partition == WHOLE_DISK {
            1
        } else if slice == 0xFF {
            0
        } else {
            slice + 2
        };

        let dev_type = if self.drive & 0x80 == 0 {
            BOOTDEV_TYPE_FD
        } else if self.scsi_label {
            BOOTDEV_TYPE_DA
        } else {
            BOOTDEV_TYPE_WD
        };

        let unit = (self.drive.wrapping_sub(hd_bias) & 0x7F) as u32;
        let bsd_part = (self.partition >> 8) & 0xFF;

        dev_type
            | ((slice_field >> 4) << 24)
            | ((slice_field & 0xF) << 20)
            | (unit << 16)
            | (bsd_part << 8)
            | B_DEVMAGIC
    }
}

#[derive(Clone, Copy)]
struct ChainEntry {
    slice_no: u32,
    entry: MbrEntry,
    table_sector: u64,
    index: usize,
}

/// Walk the primary table and the extended chain, numbering slices the way
/// the device syntax does: one per slot for the first four, then one per
/// non-empty, non-extended entry.
///
/// `visit` returns `true` to stop. Walking stops early once the slice
/// counter passes `stop_after`.
fn walk_chain<F>(
    source: &mut dyn SectorSource,
    drive: u8,
    stop_after: Option<u32>,
    mut visit: F,
) -> Result<bool>
where
    F: FnMut(&mut dyn SectorSource, &ChainEntry) -> Result<bool>,
{
    let mut sector = [0u8; SECTOR_SIZE];
    let mut slice_no = 0u32;
    let mut ext_offset = 0u64;
    let mut part_offset = 0u64;
    let mut tables = 0u32;

    while slice_no < MAX_SLICE_NUMBER && stop_after.map_or(true, |p| slice_no <= p) {
        // A chain that loops back on itself never adds a slice.
        tables += 1;
        if tables > MAX_SLICE_NUMBER {
            log::warn!("drive {:#04x}: extended partition chain does not end", drive);
            break;
        }

        source.rawread(drive, part_offset, 0, &mut sector)?;
        let mbr = Mbr::new(&sector).ok_or(Error::BadPartTable)?;
        if !mbr.has_signature() {
            log::debug!("drive {:#04x}: no partition table signature at {}", drive, part_offset);
            return Err(Error::BadPartTable);
        }

        let mut ext = None;
        for index in 0..PRIMARY_SLICES {
            let entry = mbr.entry(index);
            let slice_type = entry.slice_type();

            if !entry.is_empty() {
                let item = ChainEntry {
                    slice_no,
                    entry,
                    table_sector: part_offset,
                    index,
                };
                if visit(source, &item)? {
                    return Ok(true);
                }
                if is_extended(slice_type) && ext.is_none() {
                    ext = Some(index);
                }
            }

            if (slice_no as usize) < PRIMARY_SLICES || (!is_extended(slice_type) && !entry.is_empty()) {
                slice_no += 1;
            }
        }

        let ext = match ext {
            Some(ext) => ext,
            None => break,
        };
        part_offset = ext_offset + mbr.entry(ext).start() as u64;
        if ext_offset == 0 {
            ext_offset = part_offset;
        }
    }

    Ok(false)
}

/// Narrow `desc` (a BSD slice) to sub-partition `letter` using its disklabel.
fn open_bsd_part(source: &mut dyn SectorSource, desc: &mut PartitionDescriptor, letter: u8) -> Result<()> {
    if desc.length < BSD_LABEL_SECTOR + 1 {
        return Err(Error::BadPartTable);
    }

    let mut sector = [0u8; SECTOR_SIZE];
    source.rawread(desc.drive, desc.start + BSD_LABEL_SECTOR, 0, &mut sector)?;
    let label = BsdLabel::parse(&sector).ok_or(Error::BadPartTable)?;

    let part = label
        .partitions()
        .find(|p| p.is_used() && p.index == letter)
        .ok_or(Error::NoPart)?;

    // Which BSD owns the slice is unknown; FreeBSD's type stands in for all.
    desc.slice_type = ((part.fs_type as u32) << 8) | SLICE_TYPE_FREEBSD as u32;
    desc.start = part.offset as u64;
    desc.length = part.size as u64;
    if desc.drive & 0x80 != 0 && label.is_scsi() {
        desc.scsi_label = true;
    }
    Ok(())
}

/// Every used sub-partition in the disklabel of `slice`
fn list_bsd_parts(source: &mut dyn SectorSource, slice: &PartitionDescriptor) -> Result<Vec<PartitionDescriptor>> {
    if slice.length < BSD_LABEL_SECTOR + 1 {
        return Err(Error::BadPartTable);
    }
    let mut sector = [0u8; SECTOR_SIZE];
    source.rawread(slice.drive, slice.start + BSD_LABEL_SECTOR, 0, &mut sector)?;
    let label = BsdLabel::parse(&sector).ok_or(Error::BadPartTable)?;

    Ok(label
        .partitions()
        .filter(|p| p.is_used())
        .map(|p| PartitionDescriptor {
            partition: (slice.partition & 0xFF00FF) | ((p.index as u32) << 8),
            slice_type: ((p.fs_type as u32) << 8) | SLICE_TYPE_FREEBSD as u32,
            start: p.offset as u64,
            length: p.size as u64,
            scsi_label: slice.drive & 0x80 != 0 && label.is_scsi(),
            ..*slice
        })
        .collect())
}

/// Resolve a device specifier to the sectors it covers.
pub fn resolve(source: &mut dyn SectorSource, device: DeviceSpec) -> Result<PartitionDescriptor> {
    device.check_sane()?;

    let drive = device.drive;
    let mut sector = [0u8; SECTOR_SIZE];
    source.rawread(drive, 0, 0, &mut sector)?;
    let total = source.geometry(drive)?.total_sectors;

    if !device.is_hard_disk() {
        return resolve_floppy(source, device, total);
    }

    if device.is_whole_disk() {
        return Ok(PartitionDescriptor::whole_disk(drive, total));
    }

    let part_no = device.slice_number().map(u32::from);
    let mut found = None;
    walk_chain(source, drive, part_no, |_, item| {
        let slice_type = item.entry.slice_type();
        // An extended container is never a partition of its own.
        let matches = !is_extended(slice_type)
            && (part_no == Some(item.slice_no) || (part_no.is_none() && is_bsd(slice_type as u32)));
        if matches {
            found = Some(*item);
        }
        Ok(matches)
    })?;

    let item = found.ok_or(Error::NoPart)?;
    let mut desc = PartitionDescriptor::from_chain(drive, device.partition, &item);

    if let Some(letter) = device.bsd_part() {
        if !is_bsd(desc.slice_type) {
            return Err(Error::NoPart);
        }
        open_bsd_part(source, &mut desc, letter)?;
    }

    check_within_disk(&desc, total)?;

    log::debug!(
        "{}: type {:#x}, start {}, length {}",
        desc.device(),
        desc.slice_type,
        desc.start,
        desc.length
    );
    Ok(desc)
}

/// A partition must end on the disk it was found on.
fn check_within_disk(desc: &PartitionDescriptor, total: u64) -> Result<()> {
    if desc.end() > total {
        log::warn!(
            "{}: partition {}+{} runs past the end of the disk ({})",
            desc.device(),
            desc.start,
            desc.length,
            total
        );
        return Err(Error::BadPartTable);
    }
    Ok(())
}

fn resolve_floppy(source: &mut dyn SectorSource, device: DeviceSpec, total: u64) -> Result<PartitionDescriptor> {
    let mut desc = PartitionDescriptor::whole_disk(device.drive, total);

    if let Some(letter) = device.bsd_part() {
        let mut labelled = desc;
        labelled.partition = device.partition;
        if open_bsd_part(source, &mut labelled, letter).is_ok() {
            check_within_disk(&labelled, total)?;
            return Ok(labelled);
        }
    }

    // Without a usable label `(fd0,a)` means the whole floppy.
    if device.partition == WHOLE_DISK || device.partition == 0xFF00FF {
        desc.partition = WHOLE_DISK;
        return Ok(desc);
    }
    Err(Error::NoPart)
}

/// Every partition on `drive`: primary and logical slices, and the used
/// sub-partitions of any BSD slice.
///
/// Floppies list their disklabel partitions, or the whole disk if they have
/// no label.
pub fn list_partitions(source: &mut dyn SectorSource, drive: u8) -> Result<Vec<PartitionDescriptor>> {
    DeviceSpec::disk(drive).check_sane()?;
    let total = source.geometry(drive)?.total_sectors;
    let mut out = Vec::new();

    if drive & 0x80 == 0 {
        let disk = PartitionDescriptor::whole_disk(drive, total);
        match list_bsd_parts(source, &disk) {
            Ok(parts) if !parts.is_empty() => {
                for part in &parts {
                    check_within_disk(part, total)?;
                }
                out.extend(parts);
            }
            _ => out.push(disk),
        }
        return Ok(out);
    }

    walk_chain(source, drive, None, |source, item| {
        let slice_type = item.entry.slice_type();
        if is_extended(slice_type) {
            return Ok(false);
        }
        let desc = PartitionDescriptor::from_chain(drive, 0xFFFF, item);
        check_within_disk(&desc, total)?;
        out.push(desc);
        if is_bsd(slice_type as u32) {
            match list_bsd_parts(source, &desc) {
                Ok(parts) => {
                    for part in &parts {
                        check_within_disk(part, total)?;
                    }
                    out.extend(parts);
                }
                Err(err) => log::debug!("{}: unreadable disklabel: {}", desc.device(), err),
            }
        }
        Ok(false)
    })?;

    Ok(out)
}

/// Read sector 0 of a hard disk and check that `device` names a primary slice.
fn primary_table<D: BiosDisk>(
    cache: &mut SectorCache<D>,
    device: DeviceSpec,
) -> Result<Option<(usize, [u8; SECTOR_SIZE])>> {
    device.check_sane()?;
    if !device.is_hard_disk() {
        return Ok(None);
    }
    let slice = (device.partition >> 16) as usize & 0xFF;
    if slice >= PRIMARY_SLICES {
        return Err(Error::NoPart);
    }

    let mut sector = [0u8; SECTOR_SIZE];
    cache.rawread(device.drive, 0, 0, &mut sector)?;
    let has_signature = Mbr::new(&sector).map_or(false, |mbr| mbr.has_signature());
    if !has_signature {
        return Err(Error::BadPartTable);
    }
    Ok(Some((slice, sector)))
}

/// Make the primary slice named by `device` the only bootable one.
///
/// Floppies have nothing to activate and succeed unchanged.
pub fn activate<D: BiosDisk>(cache: &mut SectorCache<D>, device: DeviceSpec) -> Result<()> {
    let (slice, mut sector) = match primary_table(cache, device)? {
        Some(table) => table,
        None => return Ok(()),
    };

    if sector[entry_offset(slice)] == SLICE_FLAG_BOOTABLE {
        return Ok(());
    }
    for index in 0..PRIMARY_SLICES {
        sector[entry_offset(index)] = 0;
    }
    sector[entry_offset(slice)] = SLICE_FLAG_BOOTABLE;

    log::info!("{}: marking slice {} active", device, slice);
    cache.write_sector(device.drive, 0, &sector)
}

/// Set or clear the hidden bit in the type of the primary slice named by `device`.
pub fn set_hidden<D: BiosDisk>(cache: &mut SectorCache<D>, device: DeviceSpec, hidden: bool) -> Result<()> {
    let (slice, mut sector) = match primary_table(cache, device)? {
        Some(table) => table,
        None => return Ok(()),
    };

    let type_offset = entry_offset(slice) + 4;
    if hidden {
        sector[type_offset] |= SLICE_TYPE_HIDDEN_FLAG;
    } else {
        sector[type_offset] &= !SLICE_TYPE_HIDDEN_FLAG;
    }

    log::info!("{}: hidden={} (type now {:#04x})", device, hidden, sector[type_offset]);
    cache.write_sector(device.drive, 0, &sector)
}

/// True when the packed partition names no slice (whole disk or a bare BSD letter)
pub fn is_sliceless(partition: u32) -> bool {
    (partition >> 16) as u8 == UNSPECIFIED
}
