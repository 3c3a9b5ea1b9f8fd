// BSD disklabel accessors
//
// The label lives in the second sector of a BSD slice. Offsets below are the
// i386 `struct disklabel` layout.

use super::bios::SECTOR_SIZE;

/// Sector of the label, relative to the slice start
pub const BSD_LABEL_SECTOR: u64 = 1;
pub const BSD_LABEL_MAGIC: u32 = 0x8256_4557;
pub const BSD_MAX_PARTITIONS: usize = 8;

/// `d_type` value for SCSI disks
pub const DTYPE_SCSI: u16 = 4;

const MAGIC_OFFSET: usize = 0;
const DTYPE_OFFSET: usize = 4;
const MAGIC2_OFFSET: usize = 132;
const NPARTITIONS_OFFSET: usize = 138;
const PARTITIONS_OFFSET: usize = 148;
const PARTITION_LEN: usize = 16;

/// One entry of the label's partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsdPartition {
    /// Index in the table (0 = `a`)
    pub index: u8,
    /// Length in sectors
    pub size: u32,
    /// Start sector, absolute on the drive
    pub offset: u32,
    pub fs_type: u8,
}

impl BsdPartition {
    pub fn is_used(&self) -> bool {
        self.fs_type != 0
    }

    pub fn letter(&self) -> char {
        (b'a' + self.index) as char
    }
}

pub struct BsdLabel<'a> {
    sector: &'a [u8],
}

impl<'a> BsdLabel<'a> {
    /// Wrap a label sector. `None` if either magic number is missing.
    pub fn parse(sector: &'a [u8]) -> Option<Self> {
        if sector.len() < SECTOR_SIZE {
            return None;
        }
        let label = Self { sector };
        (label.u32_at(MAGIC_OFFSET) == BSD_LABEL_MAGIC && label.u32_at(MAGIC2_OFFSET) == BSD_LABEL_MAGIC)
            .then_some(label)
    }

    fn u16_at(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.sector[off], self.sector[off + 1]])
    }

    fn u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes([
            self.sector[off],
            self.sector[off + 1],
            self.sector[off + 2],
            self.sector[off + 3],
        ])
    }

    pub fn disk_type(&self) -> u16 {
        self.u16_at(DTYPE_OFFSET)
    }

    pub fn is_scsi(&self) -> bool {
        self.disk_type() == DTYPE_SCSI
    }

    /// Declared partition count, capped to what fits in the sector
    pub fn partition_count(&self) -> usize {
        let declared = self.u16_at(NPARTITIONS_OFFSET) as usize;
        declared.min((SECTOR_SIZE - PARTITIONS_OFFSET) / PARTITION_LEN)
    }

    pub fn partition(&self, index: usize) -> Option<BsdPartition> {
        if index >= self.partition_count() {
            return None;
        }
        let off = PARTITIONS_OFFSET + index * PARTITION_LEN;
        Some(BsdPartition {
            index: index as u8,
            size: self.u32_at(off),
            offset: self.u32_at(off + 4),
            fs_type: self.sector[off + 12],
        })
    }

    pub fn partitions(&self) -> impl Iterator<Item = BsdPartition> + '_ {
        (0..self.partition_count()).filter_map(move |i| self.partition(i))
    }
}

/// Lay out a label sector (used when building disk images)
pub fn write_label(sector: &mut [u8], disk_type: u16, parts: &[(u32, u32, u8)]) {
    sector[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&BSD_LABEL_MAGIC.to_le_bytes());
    sector[DTYPE_OFFSET..DTYPE_OFFSET + 2].copy_from_slice(&disk_type.to_le_bytes());
    sector[MAGIC2_OFFSET..MAGIC2_OFFSET + 4].copy_from_slice(&BSD_LABEL_MAGIC.to_le_bytes());
    sector[NPARTITIONS_OFFSET..NPARTITIONS_OFFSET + 2]
        .copy_from_slice(&(parts.len() as u16).to_le_bytes());
    for (i, &(size, offset, fs_type)) in parts.iter().enumerate() {
        let off = PARTITIONS_OFFSET + i * PARTITION_LEN;
        sector[off..off + 4].copy_from_slice(&size.to_le_bytes());
        sector[off + 4..off + 8].copy_from_slice(&offset.to_le_bytes());
        sector[off + 12] = fs_type;
    }
}
