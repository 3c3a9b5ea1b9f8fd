// a.out executables, as produced for FreeBSD and NetBSD kernels

use crate::bytes::le32;

pub const EXEC_HEADER_LEN: usize = 32;

pub const OMAGIC: u16 = 0o407;
pub const NMAGIC: u16 = 0o410;
pub const ZMAGIC: u16 = 0o413;
pub const QMAGIC: u16 = 0o314;

const PAGE: u32 = 0x1000;

/// Which loader convention the image follows when it has no Multiboot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsdFlavor {
    FreeBsd,
    NetBsd,
}

impl BsdFlavor {
    /// Address bits the kernel's entry point is masked with to get its
    /// physical load address
    pub fn entry_mask(&self) -> u32 {
        match self {
            BsdFlavor::FreeBsd => 0x00FF_FFFF,
            BsdFlavor::NetBsd => 0x00F0_0000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AoutHeader {
    pub midmag: u32,
    pub text: u32,
    pub data: u32,
    pub bss: u32,
    pub syms: u32,
    pub entry: u32,
    pub trsize: u32,
    pub drsize: u32,
}

fn is_known_magic(magic: u16) -> bool {
    matches!(magic, OMAGIC | NMAGIC | ZMAGIC | QMAGIC)
}

impl AoutHeader {
    /// Parse the header if either byte order of the magic is known
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < EXEC_HEADER_LEN {
            return None;
        }
        let header = Self {
            midmag: le32(buf, 0),
            text: le32(buf, 4),
            data: le32(buf, 8),
            bss: le32(buf, 12),
            syms: le32(buf, 16),
            entry: le32(buf, 20),
            trsize: le32(buf, 24),
            drsize: le32(buf, 28),
        };
        (is_known_magic(header.host_magic()) || is_known_magic(header.net_magic())).then_some(header)
    }

    /// Magic from a little-endian `a_midmag`
    pub fn host_magic(&self) -> u16 {
        self.midmag as u16
    }

    /// Magic from a `a_midmag` stored in network byte order (NetBSD)
    pub fn net_magic(&self) -> u16 {
        self.midmag.swap_bytes() as u16
    }

    /// Whichever byte order gives a known magic, host order first
    pub fn magic(&self) -> u16 {
        if is_known_magic(self.host_magic()) {
            self.host_magic()
        } else {
            self.net_magic()
        }
    }

    /// Little-endian ZMAGIC is the FreeBSD kernel layout; anything else
    /// is taken for NetBSD.
    pub fn flavor(&self) -> BsdFlavor {
        if self.host_magic() == ZMAGIC {
            BsdFlavor::FreeBsd
        } else {
            BsdFlavor::NetBsd
        }
    }

    /// Data follows text on the next page unless this is a NetBSD image
    /// in anything but NMAGIC
    pub fn page_aligned_data(&self, flavor: Option<BsdFlavor>) -> bool {
        flavor != Some(BsdFlavor::NetBsd) || self.magic() == NMAGIC
    }

    /// File offset of the text segment
    pub fn text_offset(&self) -> u32 {
        match self.magic() {
            ZMAGIC => PAGE,
            QMAGIC => 0,
            _ => EXEC_HEADER_LEN as u32,
        }
    }

    /// File offset of the symbol table
    pub fn symbols_offset(&self) -> u64 {
        self.text_offset() as u64
            + self.text as u64
            + self.data as u64
            + self.trsize as u64
            + self.drsize as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::put_le32;

    fn header(midmag: u32, entry: u32) -> [u8; 32] {
        let mut buf = [0u8; 32];
        put_le32(&mut buf, 0, midmag);
        put_le32(&mut buf, 4, 0x3000);
        put_le32(&mut buf, 8, 0x1000);
        put_le32(&mut buf, 12, 0x500);
        put_le32(&mut buf, 20, entry);
        buf
    }

    #[test]
    fn test_freebsd_zmagic() {
        let aout = AoutHeader::parse(&header(0x0086_010B, 0xF010_0000)).unwrap();
        assert_eq!(aout.flavor(), BsdFlavor::FreeBsd);
        assert_eq!(aout.entry & aout.flavor().entry_mask(), 0x10_0000);
        assert_eq!(aout.text_offset(), 0x1000);
        assert!(aout.page_aligned_data(Some(BsdFlavor::FreeBsd)));
        assert_eq!(aout.symbols_offset(), 0x5000);
    }

    #[test]
    fn test_netbsd_network_order() {
        // NetBSD i386 ZMAGIC written big-endian
        let aout = AoutHeader::parse(&header(0x0B01_8600, 0xF012_3456)).unwrap();
        assert_eq!(aout.net_magic(), ZMAGIC);
        assert_eq!(aout.flavor(), BsdFlavor::NetBsd);
        assert_eq!(aout.entry & aout.flavor().entry_mask(), 0x10_0000);
        assert!(!aout.page_aligned_data(Some(BsdFlavor::NetBsd)));
        assert_eq!(aout.text_offset(), 0x1000);

        let nmagic = AoutHeader::parse(&header(0x0801_8600, 0xF010_0000)).unwrap();
        assert_eq!(nmagic.magic(), NMAGIC);
        assert!(nmagic.page_aligned_data(Some(BsdFlavor::NetBsd)));
        assert_eq!(nmagic.text_offset(), 32);
    }

    #[test]
    fn test_bad_magic() {
        assert!(AoutHeader::parse(&header(0x1234_5678, 0)).is_none());
        assert!(AoutHeader::parse(&[0u8; 16]).is_none());
    }
}
