//! The image loader.
//!
//! [`ImageLoader`] owns physical memory and the boot state built up by
//! `load`, `load_module` and `load_initrd`: the kernel, the module list,
//! the a.out symbol table and the cursor marking the first free address
//! after everything loaded so far. [`ImageLoader::prepare_boot`] lays out
//! the boot information the kernel expects and says how to enter it.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use stage2_core::{Error, Result};

use crate::aout::AoutHeader;
use crate::bsd::{self, BsdBootArgs, FreeBsdBootInfo, BOOTINFO_DISKS, BOOTINFO_LEN};
use crate::bytes::put_le32;
use crate::descriptor::{ImageFormat, LoadDescriptor, Segment};
use crate::handoff::BootRequest;
use crate::linux::{
    self, LinuxImage, CL_BASE_ADDR, CL_MAGIC, CL_MAGIC_ADDR, CL_MY_LOCATION, CL_OFFSET,
    LINUX_SETUP, LINUX_SETUP_INITRD, LINUX_SETUP_LOADER, LINUX_STAGING_AREA, LOADER_TYPE,
};
use crate::memory::{align_page, MemoryInfo, PhysicalMemory, PAGE_SIZE};
use crate::multiboot::{
    encode_memory_map, AoutSymbols, ModuleEntry, MultibootInfo, MAX_MODULES, MB_INFO_AOUT_SYMS,
    MB_INFO_BOOTDEV, MB_INFO_CMDLINE, MB_INFO_LEN, MB_INFO_MEMORY, MB_INFO_MEM_MAP, MB_INFO_MODS,
    MODULE_ENTRY_LEN, MULTIBOOT_SEARCH,
};
use crate::source::ImageSource;

/// Bytes moved from the file to memory per read
const COPY_CHUNK: usize = 0x4000;

/// A Linux kernel may come up this many bytes short
const LINUX_SLACK: u32 = 16;

const FIRST_HARD_DISK: u8 = 0x80;

/// A module placed in memory by [`ImageLoader::load_module`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub start: u32,
    pub end: u32,
    pub cmdline: String,
}

/// Initial ramdisk placed by [`ImageLoader::load_initrd`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedInitrd {
    pub start: u32,
    pub len: u32,
}

struct Kernel {
    descriptor: LoadDescriptor,
    cmdline: String,
    symbols: Option<AoutSymbols>,
}

/// The kernel path: first word of a command line
fn image_path(cmdline: &str) -> Result<&str> {
    cmdline.split_whitespace().next().ok_or(Error::BadFilename)
}

/// Fill as much of `buf` as the file allows
fn read_up_to<S: ImageSource + ?Sized>(src: &mut S, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn nul_terminated(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.bytes().chain(core::iter::once(0))
}

pub struct ImageLoader<M> {
    memory: M,
    info: MemoryInfo,
    cursor: u32,
    kernel: Option<Kernel>,
    modules: Vec<LoadedModule>,
    initrd: Option<LoadedInitrd>,
}

impl<M: PhysicalMemory> ImageLoader<M> {
    pub fn new(memory: M, info: MemoryInfo) -> Self {
        Self {
            memory,
            info,
            cursor: 0,
            kernel: None,
            modules: Vec::new(),
            initrd: None,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    pub fn memory_info(&self) -> &MemoryInfo {
        &self.info
    }

    /// First free address after everything loaded
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// The loaded kernel, if the last `load` succeeded
    pub fn kernel(&self) -> Option<&LoadDescriptor> {
        self.kernel.as_ref().map(|kernel| &kernel.descriptor)
    }

    pub fn symbols(&self) -> Option<AoutSymbols> {
        self.kernel.as_ref().and_then(|kernel| kernel.symbols)
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn initrd(&self) -> Option<LoadedInitrd> {
        self.initrd
    }

    /// Load the kernel named by the first word of `cmdline`.
    ///
    /// Forgets any previous kernel and its modules first, so a failed load
    /// leaves nothing to boot.
    pub fn load<S: ImageSource + ?Sized>(&mut self, src: &mut S, cmdline: &str) -> Result<LoadDescriptor> {
        self.kernel = None;
        self.modules.clear();
        self.initrd = None;
        self.cursor = 0;

        let path = image_path(cmdline)?;
        src.open(path)?;
        let mut header = vec![0u8; MULTIBOOT_SEARCH];
        let len = read_up_to(src, &mut header)?;
        header.truncate(len);

        let descriptor = LoadDescriptor::probe(&header, src.length())?;
        descriptor.validate(&self.info)?;
        log::info!("[{}, entry={:#x}]", descriptor.format, descriptor.entry);

        let symbols = match (descriptor.linux, descriptor.aout) {
            (Some(image), _) => {
                self.load_linux(src, &mut header, &image, cmdline)?;
                None
            }
            (None, aout) => {
                for segment in &descriptor.segments {
                    self.copy_segment(src, segment)?;
                }
                self.cursor = descriptor.end();
                aout.and_then(|aout| self.load_aout_symbols(src, &aout))
            }
        };

        self.kernel = Some(Kernel {
            descriptor: descriptor.clone(),
            cmdline: String::from(cmdline.trim()),
            symbols,
        });
        Ok(descriptor)
    }

    fn copy_segment<S: ImageSource + ?Sized>(&mut self, src: &mut S, segment: &Segment) -> Result<()> {
        log::debug!(
            "<{:#x}:{:#x}:{:#x}>",
            segment.address,
            segment.file_len,
            segment.mem_len - segment.file_len
        );
        if segment.file_len > 0 {
            src.seek(segment.file_offset).map_err(|_| Error::ExecFormat)?;
            if self.copy_from(src, segment.address, segment.file_len)? != segment.file_len {
                return Err(Error::ExecFormat);
            }
        }
        if segment.mem_len > segment.file_len {
            self.memory
                .fill(segment.address + segment.file_len, segment.mem_len - segment.file_len, 0)?;
        }
        Ok(())
    }

    /// Copy up to `len` bytes from the current file position to `addr`,
    /// returning how many the file had
    fn copy_from<S: ImageSource + ?Sized>(&mut self, src: &mut S, addr: u32, len: u32) -> Result<u32> {
        let mut chunk = vec![0u8; COPY_CHUNK.min(len as usize)];
        let mut done = 0u32;
        while done < len {
            let want = ((len - done) as usize).min(chunk.len());
            let n = src.read(&mut chunk[..want])?;
            if n == 0 {
                break;
            }
            self.memory.write(addr + done, &chunk[..n])?;
            done += n as u32;
        }
        Ok(done)
    }

    /// Load the symbol table after the kernel. Failure drops the table
    /// and puts the cursor back.
    fn load_aout_symbols<S: ImageSource + ?Sized>(&mut self, src: &mut S, aout: &AoutHeader) -> Option<AoutSymbols> {
        let offset = aout.symbols_offset();
        if aout.syms == 0 || aout.syms as u64 >= src.length().saturating_sub(offset) {
            return None;
        }
        match self.copy_symbols(src, aout, offset) {
            Ok(syms) => {
                log::info!("[symbols @ {:#x}, {:#x}+{:#x}]", syms.addr, syms.tabsize, syms.strsize);
                self.cursor = syms.end();
                Some(syms)
            }
            Err(err) => {
                log::warn!("a.out symbol table dropped: {}", err);
                None
            }
        }
    }

    fn copy_symbols<S: ImageSource + ?Sized>(&mut self, src: &mut S, aout: &AoutHeader, offset: u64) -> Result<AoutSymbols> {
        let addr = align_page(self.cursor);
        let table = addr + 4;
        self.info.check(addr, aout.syms.saturating_add(4))?;
        src.seek(offset)?;
        self.memory.write(addr, &aout.syms.to_le_bytes())?;
        if self.copy_from(src, table, aout.syms)? != aout.syms {
            return Err(Error::ExecFormat);
        }

        let mut word = [0u8; 4];
        if read_up_to(src, &mut word)? != word.len() {
            return Err(Error::ExecFormat);
        }
        let strsize = u32::from_le_bytes(word);
        if strsize < 4 {
            return Err(Error::ExecFormat);
        }
        let strings = table + aout.syms;
        self.info.check(strings, strsize)?;
        self.memory.write(strings, &word)?;
        if self.copy_from(src, strings + 4, strsize - 4)? != strsize - 4 {
            return Err(Error::ExecFormat);
        }

        Ok(AoutSymbols {
            tabsize: aout.syms,
            strsize,
            addr,
        })
    }

    fn load_linux<S: ImageSource + ?Sized>(
        &mut self,
        src: &mut S,
        header: &mut [u8],
        image: &LinuxImage,
        cmdline: &str,
    ) -> Result<()> {
        let setup = image.setup_bytes() as usize;
        if header.len() < setup {
            return Err(Error::ExecFormat);
        }
        let line = linux::build_cmdline(cmdline, self.info.upper_kb);
        self.info.check(CL_MY_LOCATION, line.len() as u32)?;

        if let Some(loader) = header.get_mut(LINUX_SETUP_LOADER) {
            *loader = LOADER_TYPE;
        }
        self.memory.write(LINUX_SETUP, &header[..setup])?;
        self.memory.write(CL_MAGIC_ADDR, &CL_MAGIC.to_le_bytes())?;
        self.memory
            .write(CL_OFFSET, &((CL_MY_LOCATION - CL_BASE_ADDR) as u16).to_le_bytes())?;
        self.memory.write(CL_MY_LOCATION, &line)?;

        src.seek(image.kernel_offset()).map_err(|_| Error::ExecFormat)?;
        let read = self.copy_from(src, LINUX_STAGING_AREA, image.kernel_len)?;
        if read + LINUX_SLACK < image.kernel_len {
            return Err(Error::ExecFormat);
        }
        log::debug!("[linux: setup {:#x} bytes, kernel {:#x} bytes]", setup, image.kernel_len);
        self.cursor = LINUX_STAGING_AREA + image.kernel_len;
        Ok(())
    }

    /// Load the file named by the first word of `cmdline` as a Multiboot
    /// module, page aligned after everything loaded so far.
    pub fn load_module<S: ImageSource + ?Sized>(&mut self, src: &mut S, cmdline: &str) -> Result<LoadedModule> {
        match &self.kernel {
            Some(kernel) if kernel.descriptor.format.is_multiboot() => {}
            _ => return Err(Error::ExecFormat),
        }
        if self.modules.len() >= MAX_MODULES {
            return Err(Error::WontFit);
        }

        let path = image_path(cmdline)?;
        src.open(path)?;
        let len = u32::try_from(src.length()).map_err(|_| Error::WontFit)?;
        if len == 0 {
            return Err(Error::ExecFormat);
        }
        let start = align_page(self.cursor);
        self.info.check(start, len)?;
        if self.copy_from(src, start, len)? != len {
            return Err(Error::Read);
        }

        log::info!("[Multiboot-module @ {:#x}, {:#x} bytes]", start, len);
        let module = LoadedModule {
            start,
            end: start + len,
            cmdline: String::from(cmdline.trim()),
        };
        self.cursor = module.end;
        self.modules.push(module.clone());
        Ok(module)
    }

    /// Load an initial ramdisk for the loaded Linux kernel at the top of
    /// upper memory.
    pub fn load_initrd<S: ImageSource + ?Sized>(&mut self, src: &mut S, cmdline: &str) -> Result<LoadedInitrd> {
        match &self.kernel {
            Some(kernel) if kernel.descriptor.format.is_linux() => {}
            _ => return Err(Error::ExecFormat),
        }

        let path = image_path(cmdline)?;
        src.open(path)?;
        let len = u32::try_from(src.length()).map_err(|_| Error::WontFit)?;
        if len == 0 {
            return Err(Error::ExecFormat);
        }
        let top = self.info.upper_end();
        let start = top
            .checked_sub(len as u64)
            .map(|start| (start & !(PAGE_SIZE as u64 - 1)) as u32)
            .ok_or(Error::WontFit)?;
        if start < self.cursor {
            log::warn!("initrd of {:#x} bytes would overlap the kernel", len);
            return Err(Error::WontFit);
        }
        self.info.check(start, len)?;
        if self.copy_from(src, start, len)? != len {
            return Err(Error::Read);
        }

        let mut words = [0u8; 8];
        put_le32(&mut words, 0, start);
        put_le32(&mut words, 4, len);
        self.memory.write(LINUX_SETUP + LINUX_SETUP_INITRD, &words)?;

        log::info!("[Linux-initrd @ {:#x}, {:#x} bytes]", start, len);
        let initrd = LoadedInitrd { start, len };
        self.initrd = Some(initrd);
        Ok(initrd)
    }

    /// Write the boot information for the loaded kernel and return how to
    /// enter it.
    pub fn prepare_boot<S: ImageSource + ?Sized>(&mut self, src: &mut S) -> Result<BootRequest> {
        let (format, entry, cmdline, symbols, big) = match &self.kernel {
            Some(kernel) => (
                kernel.descriptor.format,
                kernel.descriptor.entry,
                kernel.cmdline.clone(),
                kernel.symbols,
                kernel.descriptor.linux.map_or(false, |image| image.big),
            ),
            None => return Err(Error::ExecFormat),
        };

        match format {
            ImageFormat::MultibootElf | ImageFormat::MultibootKludge | ImageFormat::MultibootAout => {
                let info = self.place_multiboot_info(src.boot_device(), &cmdline, symbols)?;
                Ok(BootRequest::Multiboot { entry, info })
            }
            ImageFormat::FreeBsd => {
                let flags = bsd::parse_boot_flags(&cmdline);
                let boot_device = src.bsd_boot_device()?;
                let mut bios_geom = [0u32; BOOTINFO_DISKS];
                for (i, geom) in bios_geom.iter_mut().enumerate() {
                    *geom = src.bios_geometry(FIRST_HARD_DISK + i as u8).unwrap_or(0);
                }
                let bootinfo = self.place_bootinfo(&cmdline, bios_geom, symbols)?;
                Ok(BootRequest::Bsd {
                    entry,
                    args: BsdBootArgs::freebsd(flags, boot_device, bootinfo),
                })
            }
            ImageFormat::NetBsd => {
                let flags = bsd::parse_boot_flags(&cmdline);
                let boot_device = src.bsd_boot_device()?;
                let esym = symbols.map_or(0, |syms| syms.end());
                Ok(BootRequest::Bsd {
                    entry,
                    args: BsdBootArgs::netbsd(flags, boot_device, esym, self.info.upper_kb, self.info.lower_kb),
                })
            }
            ImageFormat::LinuxZImage | ImageFormat::LinuxBzImage => Ok(BootRequest::Linux { big }),
        }
    }

    /// Info structure, module list, memory map and strings, in that
    /// order, on the page after the cursor
    fn place_multiboot_info(&mut self, boot_device: u32, cmdline: &str, symbols: Option<AoutSymbols>) -> Result<u32> {
        let base = align_page(self.cursor);
        let mods_addr = base + MB_INFO_LEN as u32;
        let mmap = encode_memory_map(&self.info.map);
        let mmap_addr = mods_addr + (self.modules.len() * MODULE_ENTRY_LEN) as u32;
        let strings_addr = mmap_addr + mmap.len() as u32;

        let mut strings: Vec<u8> = nul_terminated(cmdline).collect();
        let mut module_list = Vec::with_capacity(self.modules.len() * MODULE_ENTRY_LEN);
        for module in &self.modules {
            let entry = ModuleEntry {
                mod_start: module.start,
                mod_end: module.end,
                cmdline: strings_addr + strings.len() as u32,
            };
            module_list.extend_from_slice(&entry.to_bytes());
            strings.extend(nul_terminated(&module.cmdline));
        }

        let mut flags = MB_INFO_MEMORY | MB_INFO_BOOTDEV | MB_INFO_CMDLINE;
        if !self.modules.is_empty() {
            flags |= MB_INFO_MODS;
        }
        if symbols.is_some() {
            flags |= MB_INFO_AOUT_SYMS;
        }
        if !mmap.is_empty() {
            flags |= MB_INFO_MEM_MAP;
        }
        let info = MultibootInfo {
            flags,
            mem_lower: self.info.lower_kb,
            mem_upper: self.info.upper_kb,
            boot_device,
            cmdline: strings_addr,
            mods_count: self.modules.len() as u32,
            mods_addr,
            syms: symbols.unwrap_or_default(),
            mmap_length: mmap.len() as u32,
            mmap_addr,
        };

        let mut block = Vec::with_capacity(MB_INFO_LEN + module_list.len() + mmap.len() + strings.len());
        block.extend_from_slice(&info.to_bytes());
        block.extend_from_slice(&module_list);
        block.extend_from_slice(&mmap);
        block.extend_from_slice(&strings);
        self.info.check(base, block.len() as u32)?;
        self.memory.write(base, &block)?;
        self.cursor = base + block.len() as u32;
        Ok(base)
    }

    /// FreeBSD bootinfo followed by the kernel name
    fn place_bootinfo(
        &mut self,
        cmdline: &str,
        bios_geom: [u32; BOOTINFO_DISKS],
        symbols: Option<AoutSymbols>,
    ) -> Result<u32> {
        let base = align_page(self.cursor);
        let name = bsd::kernel_name(cmdline);
        let bootinfo = FreeBsdBootInfo {
            kernelname: name.map_or(0, |_| base + BOOTINFO_LEN as u32),
            bios_geom,
            basemem: self.info.lower_kb,
            extmem: self.info.upper_kb,
            ..Default::default()
        }
        .with_symbols(symbols.as_ref());

        let mut block = Vec::from(bootinfo.to_bytes());
        if let Some(name) = name {
            block.extend(nul_terminated(name));
        }
        self.info.check(base, block.len() as u32)?;
        self.memory.write(base, &block)?;
        self.cursor = base + block.len() as u32;
        Ok(base)
    }
}
