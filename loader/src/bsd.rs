//! Boot arguments for FreeBSD and NetBSD kernels.
//!
//! Both take a flags word and the BSD boot device word as their first two
//! cdecl arguments. FreeBSD also receives a `bootinfo` block describing
//! memory, disks and the symbol table; NetBSD gets the symbol table end
//! and memory sizes directly.

use crate::bytes::put_le32;
use crate::multiboot::AoutSymbols;

// Boot flags (sys/reboot.h)
pub const RB_ASKNAME: u32 = 0x01;
pub const RB_SINGLE: u32 = 0x02;
pub const RB_HALT: u32 = 0x08;
pub const RB_DFLTROOT: u32 = 0x20;
pub const RB_KDB: u32 = 0x40;
pub const RB_CONFIG: u32 = 0x400;
pub const RB_VERBOSE: u32 = 0x800;
pub const RB_SERIAL: u32 = 0x1000;
pub const RB_CDROM: u32 = 0x2000;
/// FreeBSD: third argument word points at a bootinfo block
pub const RB_BOOTINFO: u32 = 0x8000_0000;

pub const BOOTINFO_VERSION: u32 = 1;
pub const BOOTINFO_LEN: usize = 72;
/// BIOS hard disks described in bootinfo
pub const BOOTINFO_DISKS: usize = 8;

fn flag_for(option: char) -> u32 {
    match option {
        'C' => RB_CDROM,
        'a' => RB_ASKNAME,
        'b' => RB_HALT,
        'c' => RB_CONFIG,
        'd' => RB_KDB,
        'h' => RB_SERIAL,
        'r' => RB_DFLTROOT,
        's' => RB_SINGLE,
        'v' => RB_VERBOSE,
        _ => 0,
    }
}

/// Flags from `-xyz` style words following the kernel path.
///
/// Unknown letters are ignored.
pub fn parse_boot_flags(cmdline: &str) -> u32 {
    cmdline
        .split_whitespace()
        .skip(1)
        .filter_map(|word| word.strip_prefix('-'))
        .flat_map(str::chars)
        .fold(0, |flags, option| flags | flag_for(option))
}

/// The text after the last `/` of the kernel path
pub fn kernel_name(cmdline: &str) -> Option<&str> {
    let path = cmdline.split_whitespace().next()?;
    let (_, name) = path.rsplit_once('/')?;
    Some(name)
}

/// FreeBSD `struct bootinfo`, version 1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeBsdBootInfo {
    /// Address of the NUL-terminated kernel name, or 0
    pub kernelname: u32,
    /// [`Geometry::bsd_word`](stage2_core::disk::bios::Geometry::bsd_word)
    /// of drives 0x80..0x87, 0 where absent
    pub bios_geom: [u32; BOOTINFO_DISKS],
    pub basemem: u32,
    pub extmem: u32,
    pub symtab: u32,
    pub esymtab: u32,
}

impl FreeBsdBootInfo {
    pub fn with_symbols(mut self, syms: Option<&AoutSymbols>) -> Self {
        if let Some(syms) = syms {
            self.symtab = syms.addr;
            self.esymtab = syms.end();
        }
        self
    }

    pub fn to_bytes(&self) -> [u8; BOOTINFO_LEN] {
        let mut out = [0u8; BOOTINFO_LEN];
        put_le32(&mut out, 0, BOOTINFO_VERSION);
        put_le32(&mut out, 4, self.kernelname);
        // nfs_diskless and n_bios_used stay zero
        for (i, geom) in self.bios_geom.iter().enumerate() {
            put_le32(&mut out, 16 + i * 4, *geom);
        }
        put_le32(&mut out, 48, BOOTINFO_LEN as u32);
        out[52] = 1; // memsizes_valid
        put_le32(&mut out, 56, self.basemem);
        put_le32(&mut out, 60, self.extmem);
        put_le32(&mut out, 64, self.symtab);
        put_le32(&mut out, 68, self.esymtab);
        out
    }
}

/// The six cdecl arguments a BSD kernel is entered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsdBootArgs(pub [u32; 6]);

impl BsdBootArgs {
    pub fn freebsd(flags: u32, boot_device: u32, bootinfo_addr: u32) -> Self {
        Self([flags | RB_BOOTINFO, boot_device, 0, 0, 0, bootinfo_addr])
    }

    /// `esym` is 0 when the kernel has no symbol table loaded
    pub fn netbsd(flags: u32, boot_device: u32, esym: u32, mem_upper: u32, mem_lower: u32) -> Self {
        Self([flags, boot_device, 0, esym, mem_upper, mem_lower])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::le32;

    #[test]
    fn test_boot_flags() {
        assert_eq!(parse_boot_flags("/kernel -s -v"), RB_SINGLE | RB_VERBOSE);
        assert_eq!(parse_boot_flags("/kernel -sC root=x"), RB_SINGLE | RB_CDROM);
        assert_eq!(parse_boot_flags("/kernel -z"), 0);
        // The path itself is never an option
        assert_eq!(parse_boot_flags("-s"), 0);
    }

    #[test]
    fn test_kernel_name() {
        assert_eq!(kernel_name("(hd0,0,a)/boot/kernel -s"), Some("kernel"));
        assert_eq!(kernel_name("/kernel"), Some("kernel"));
        assert_eq!(kernel_name("0+20"), None);
        assert_eq!(kernel_name(""), None);
    }

    #[test]
    fn test_bootinfo_layout() {
        let syms = AoutSymbols {
            tabsize: 0x100,
            strsize: 0x40,
            addr: 0x20_0000,
        };
        let mut info = FreeBsdBootInfo {
            kernelname: 0x20_1000,
            basemem: 640,
            extmem: 15360,
            ..Default::default()
        }
        .with_symbols(Some(&syms));
        info.bios_geom[0] = 0x03FF_FE3F;
        let raw = info.to_bytes();
        assert_eq!(le32(&raw, 0), 1);
        assert_eq!(le32(&raw, 4), 0x20_1000);
        assert_eq!(le32(&raw, 16), 0x03FF_FE3F);
        assert_eq!(le32(&raw, 48), 72);
        assert_eq!(raw[52], 1);
        assert_eq!(le32(&raw, 56), 640);
        assert_eq!(le32(&raw, 64), 0x20_0000);
        assert_eq!(le32(&raw, 68), 0x20_0144);
    }

    #[test]
    fn test_args() {
        let args = BsdBootArgs::freebsd(RB_SINGLE, 0xA000_0000, 0x30_0000);
        assert_eq!(args.0, [RB_SINGLE | RB_BOOTINFO, 0xA000_0000, 0, 0, 0, 0x30_0000]);
        let args = BsdBootArgs::netbsd(0, 0xA000_0000, 0, 15360, 640);
        assert_eq!(args.0[3..], [0, 15360, 640]);
    }
}
