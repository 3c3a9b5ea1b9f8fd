//! Load descriptors: what an image is and where its pieces go.
//!
//! [`LoadDescriptor::probe`] looks at the first bytes of an image and
//! decides its format, in this order:
//!
//! 1. Multiboot header (unsupported requirement bits are fatal)
//! 2. ELF, only for images with a Multiboot header
//! 3. Multiboot a.out kludge
//! 4. a.out, FreeBSD or NetBSD when there is no Multiboot header
//! 5. Linux boot sector
//!
//! Nothing is written to memory here; every address check that can be
//! made from the headers is made before the loader copies anything.

use alloc::vec::Vec;
use core::fmt;

use stage2_core::{Error, Result};

use crate::aout::{AoutHeader, BsdFlavor, EXEC_HEADER_LEN};
use crate::elf::{ElfImage, ELF_HEADER_LEN};
use crate::linux::{self, LinuxImage, LINUX_KERNEL_MAXLEN, LINUX_SETUP, LINUX_STAGING_AREA};
use crate::memory::{align_page, MemoryInfo, HIGH_MEMORY_START};
use crate::multiboot::{KludgeAddresses, MultibootHeader};

/// Shortest file worth looking at
pub const MIN_IMAGE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    MultibootElf,
    MultibootKludge,
    MultibootAout,
    FreeBsd,
    NetBsd,
    LinuxZImage,
    LinuxBzImage,
}

impl ImageFormat {
    pub fn is_multiboot(&self) -> bool {
        matches!(
            self,
            ImageFormat::MultibootElf | ImageFormat::MultibootKludge | ImageFormat::MultibootAout
        )
    }

    pub fn is_linux(&self) -> bool {
        matches!(self, ImageFormat::LinuxZImage | ImageFormat::LinuxBzImage)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::MultibootElf => "Multiboot-elf",
            ImageFormat::MultibootKludge => "Multiboot-kludge",
            ImageFormat::MultibootAout => "Multiboot-a.out",
            ImageFormat::FreeBsd => "FreeBSD-a.out",
            ImageFormat::NetBsd => "NetBSD-a.out",
            ImageFormat::LinuxZImage => "Linux-zImage",
            ImageFormat::LinuxBzImage => "Linux-bzImage",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of the image: `file_len` bytes from `file_offset` copied to
/// `address`, then zeros up to `mem_len`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub file_offset: u64,
    pub address: u32,
    pub file_len: u32,
    pub mem_len: u32,
}

impl Segment {
    pub fn end(&self) -> u32 {
        self.address + self.mem_len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDescriptor {
    pub format: ImageFormat,
    pub entry: u32,
    pub segments: Vec<Segment>,
    /// a.out header, when the image has one (for its symbol table)
    pub aout: Option<AoutHeader>,
    pub linux: Option<LinuxImage>,
}

impl LoadDescriptor {
    /// Work out the format and layout of an image from its first bytes.
    ///
    /// `file_len` is the full length of the (decompressed) file.
    pub fn probe(buf: &[u8], file_len: u64) -> Result<Self> {
        if buf.len() < MIN_IMAGE_LEN {
            return Err(Error::ExecFormat);
        }

        let multiboot = MultibootHeader::find(buf);
        if let Some(header) = &multiboot {
            if header.unsupported_flags() != 0 {
                log::warn!("multiboot: unsupported flags {:#x}", header.unsupported_flags());
                return Err(Error::BootFeatures);
            }
            if buf.len() > ELF_HEADER_LEN {
                if let Some(elf) = ElfImage::parse(buf)? {
                    return Self::from_elf(elf);
                }
            }
            if header.wants_kludge() {
                return Self::from_kludge(header.offset, header.load);
            }
        }

        if buf.len() > EXEC_HEADER_LEN {
            if let Some(aout) = AoutHeader::parse(buf) {
                return Self::from_aout(aout, multiboot.is_some());
            }
        }

        match LinuxImage::parse(buf, file_len) {
            Some(image) => Self::from_linux(image),
            None => Err(Error::ExecFormat),
        }
    }

    fn from_elf(elf: ElfImage) -> Result<Self> {
        if elf.entry < HIGH_MEMORY_START {
            return Err(Error::Below1Mb);
        }

        let mut segments = Vec::new();
        for phdr in &elf.loads {
            if phdr.vaddr < HIGH_MEMORY_START {
                return Err(Error::Below1Mb);
            }
            segments.push(Segment {
                file_offset: phdr.offset as u64,
                address: phdr.vaddr,
                file_len: phdr.filesz.min(phdr.memsz),
                mem_len: phdr.memsz,
            });
        }
        if segments.is_empty() {
            return Err(Error::ExecFormat);
        }

        Ok(Self {
            format: ImageFormat::MultibootElf,
            entry: elf.entry,
            segments,
            aout: None,
            linux: None,
        })
    }

    fn from_kludge(offset: usize, load: Option<KludgeAddresses>) -> Result<Self> {
        let k = load.ok_or(Error::ExecFormat)?;
        if k.header_addr < k.load_addr
            || k.load_end_addr <= k.load_addr
            || k.bss_end_addr < k.load_end_addr
            || (k.header_addr - k.load_addr) as usize > offset
        {
            return Err(Error::ExecFormat);
        }
        if k.load_addr < HIGH_MEMORY_START || k.entry_addr < HIGH_MEMORY_START {
            return Err(Error::Below1Mb);
        }

        let text = k.load_end_addr - k.load_addr;
        Ok(Self {
            format: ImageFormat::MultibootKludge,
            entry: k.entry_addr,
            segments: alloc::vec![Segment {
                file_offset: (offset - (k.header_addr - k.load_addr) as usize) as u64,
                address: k.load_addr,
                file_len: text,
                mem_len: text + (k.bss_end_addr - k.load_end_addr),
            }],
            aout: None,
            linux: None,
        })
    }

    fn from_aout(aout: AoutHeader, multiboot: bool) -> Result<Self> {
        let flavor = (!multiboot).then(|| aout.flavor());
        let (format, entry) = match flavor {
            None => (ImageFormat::MultibootAout, aout.entry),
            Some(BsdFlavor::FreeBsd) => (ImageFormat::FreeBsd, aout.entry & BsdFlavor::FreeBsd.entry_mask()),
            Some(BsdFlavor::NetBsd) => (ImageFormat::NetBsd, aout.entry & BsdFlavor::NetBsd.entry_mask()),
        };
        if entry < HIGH_MEMORY_START {
            return Err(Error::Below1Mb);
        }

        let text_offset = aout.text_offset() as u64;
        let text_end = entry.checked_add(aout.text).ok_or(Error::ExecFormat)?;
        let data_addr = if aout.page_aligned_data(flavor) {
            align_page(text_end)
        } else {
            text_end
        };
        let data_mem = aout.data.checked_add(aout.bss).ok_or(Error::ExecFormat)?;
        data_addr.checked_add(data_mem).ok_or(Error::ExecFormat)?;

        Ok(Self {
            format,
            entry,
            segments: alloc::vec![
                Segment {
                    file_offset: text_offset,
                    address: entry,
                    file_len: aout.text,
                    mem_len: aout.text,
                },
                Segment {
                    file_offset: text_offset + aout.text as u64,
                    address: data_addr,
                    file_len: aout.data,
                    mem_len: data_mem,
                },
            ],
            aout: Some(aout),
            linux: None,
        })
    }

    fn from_linux(image: LinuxImage) -> Result<Self> {
        if !image.big && image.kernel_len > LINUX_KERNEL_MAXLEN {
            log::warn!("linux: zImage kernel of {:#x} bytes is too big, use a bzImage", image.kernel_len);
            return Err(Error::WontFit);
        }
        Ok(Self {
            format: if image.big {
                ImageFormat::LinuxBzImage
            } else {
                ImageFormat::LinuxZImage
            },
            entry: LINUX_SETUP + linux::SECTOR_SIZE,
            segments: alloc::vec![
                Segment {
                    file_offset: 0,
                    address: LINUX_SETUP,
                    file_len: image.setup_bytes(),
                    mem_len: image.setup_bytes(),
                },
                Segment {
                    file_offset: image.kernel_offset(),
                    address: LINUX_STAGING_AREA,
                    file_len: image.kernel_len,
                    mem_len: image.kernel_len,
                },
            ],
            aout: None,
            linux: Some(image),
        })
    }

    /// Check every segment against the memory sizes
    pub fn validate(&self, memory: &MemoryInfo) -> Result<()> {
        if self.format.is_linux() && memory.lower_kb < linux::MIN_LOWER_KB {
            log::warn!("linux: needs {}K of low memory, have {}K", linux::MIN_LOWER_KB, memory.lower_kb);
            return Err(Error::WontFit);
        }
        for segment in &self.segments {
            memory.check(segment.address, segment.mem_len)?;
        }
        Ok(())
    }

    /// First address past everything the image occupies
    pub fn end(&self) -> u32 {
        self.segments.iter().map(Segment::end).max().unwrap_or(0)
    }
}
