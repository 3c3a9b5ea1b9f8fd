// PC (MBR) partition table accessors
//
// All fields are read from the raw sector with explicit little-endian
// accessors; the sector is never reinterpreted as a struct.

use super::bios::SECTOR_SIZE;

pub const MBR_SIGNATURE: u16 = 0xAA55;
pub const MBR_SIGNATURE_OFFSET: usize = 0x1FE;
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const PARTITION_ENTRY_LEN: usize = 16;
pub const PRIMARY_SLICES: usize = 4;

pub const SLICE_FLAG_BOOTABLE: u8 = 0x80;
pub const SLICE_TYPE_NONE: u8 = 0x00;
pub const SLICE_TYPE_EXTENDED: u8 = 0x05;
pub const SLICE_TYPE_WIN95_EXTENDED: u8 = 0x0F;
pub const SLICE_TYPE_LINUX_EXTENDED: u8 = 0x85;
pub const SLICE_TYPE_FREEBSD: u8 = 0xA5;
pub const SLICE_TYPE_OPENBSD: u8 = 0xA6;
pub const SLICE_TYPE_NETBSD: u8 = 0xA9;
pub const SLICE_TYPE_HIDDEN_FLAG: u8 = 0x10;

pub fn is_extended(slice_type: u8) -> bool {
    matches!(
        slice_type,
        SLICE_TYPE_EXTENDED | SLICE_TYPE_WIN95_EXTENDED | SLICE_TYPE_LINUX_EXTENDED
    )
}

/// Types of slices that carry a BSD disklabel. Only the low byte is
/// considered; resolved BSD sub-partitions keep their fs type in bits 8..16.
pub fn is_bsd(slice_type: u32) -> bool {
    matches!(
        (slice_type & 0xFF) as u8,
        SLICE_TYPE_FREEBSD | SLICE_TYPE_OPENBSD | SLICE_TYPE_NETBSD
    )
}

/// One 16-byte partition table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrEntry {
    raw: [u8; PARTITION_ENTRY_LEN],
}

impl MbrEntry {
    pub fn from_bytes(raw: [u8; PARTITION_ENTRY_LEN]) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> [u8; PARTITION_ENTRY_LEN] {
        self.raw
    }

    pub fn flag(&self) -> u8 {
        self.raw[0]
    }

    pub fn slice_type(&self) -> u8 {
        self.raw[4]
    }

    /// First sector, relative to the table that holds this entry
    pub fn start(&self) -> u32 {
        u32::from_le_bytes([self.raw[8], self.raw[9], self.raw[10], self.raw[11]])
    }

    pub fn length(&self) -> u32 {
        u32::from_le_bytes([self.raw[12], self.raw[13], self.raw[14], self.raw[15]])
    }

    pub fn is_empty(&self) -> bool {
        self.slice_type() == SLICE_TYPE_NONE
    }
}

/// A 512-byte sector holding a partition table
pub struct Mbr<'a> {
    sector: &'a [u8],
}

impl<'a> Mbr<'a> {
    /// Wrap a sector buffer; `None` if it is shorter than a sector
    pub fn new(sector: &'a [u8]) -> Option<Self> {
        (sector.len() >= SECTOR_SIZE).then_some(Self { sector })
    }

    pub fn signature(&self) -> u16 {
        u16::from_le_bytes([
            self.sector[MBR_SIGNATURE_OFFSET],
            self.sector[MBR_SIGNATURE_OFFSET + 1],
        ])
    }

    pub fn has_signature(&self) -> bool {
        self.signature() == MBR_SIGNATURE
    }

    /// Entry `index` (0..4)
    pub fn entry(&self, index: usize) -> MbrEntry {
        let off = entry_offset(index);
        let mut raw = [0u8; PARTITION_ENTRY_LEN];
        raw.copy_from_slice(&self.sector[off..off + PARTITION_ENTRY_LEN]);
        MbrEntry::from_bytes(raw)
    }

    pub fn entries(&self) -> impl Iterator<Item = MbrEntry> + '_ {
        (0..PRIMARY_SLICES).map(move |i| self.entry(i))
    }
}

/// Byte offset of table slot `index` inside the sector
pub fn entry_offset(index: usize) -> usize {
    PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_fields() {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[MBR_SIGNATURE_OFFSET] = 0x55;
        sector[MBR_SIGNATURE_OFFSET + 1] = 0xAA;
        let off = entry_offset(1);
        sector[off] = SLICE_FLAG_BOOTABLE;
        sector[off + 4] = 0x83;
        sector[off + 8..off + 12].copy_from_slice(&2048u32.to_le_bytes());
        sector[off + 12..off + 16].copy_from_slice(&4096u32.to_le_bytes());

        let mbr = Mbr::new(&sector).unwrap();
        assert!(mbr.has_signature());
        let entry = mbr.entry(1);
        assert_eq!(entry.flag(), SLICE_FLAG_BOOTABLE);
        assert_eq!(entry.slice_type(), 0x83);
        assert_eq!(entry.start(), 2048);
        assert_eq!(entry.length(), 4096);
        assert!(mbr.entry(0).is_empty());
        assert_eq!(mbr.entries().filter(|e| !e.is_empty()).count(), 1);
    }

    #[test]
    fn test_type_classes() {
        assert!(is_extended(0x05) && is_extended(0x0F) && is_extended(0x85));
        assert!(!is_extended(0x83));
        assert!(is_bsd(0xA5) && is_bsd(0x07A5) && is_bsd(0xA9));
        assert!(!is_bsd(0x83));
        assert!(Mbr::new(&[0u8; 100]).is_none());
    }
}
