// Linux zImage / bzImage boot sector

use alloc::vec::Vec;

use crate::bytes::le16;

pub const BOOTSEC_SIGNATURE: u16 = 0xAA55;
pub const BOOTSEC_SIG_OFFSET: usize = 0x1FE;
pub const SECTOR_SIZE: u32 = 512;

/// Real-mode setup code is copied here
pub const LINUX_SETUP: u32 = 0x9_0000;
pub const LINUX_SETUP_MAXLEN: u32 = 0x1E00;
/// Protected-mode kernel is loaded here for both kernel sizes
pub const LINUX_STAGING_AREA: u32 = 0x10_0000;
/// Largest kernel that fits low memory once the setup code moves it
pub const LINUX_KERNEL_MAXLEN: u32 = 0x7_F000;

pub const LINUX_SETUP_LEN_OFFSET: usize = 0x1F1;
pub const LINUX_KERNEL_LEN_OFFSET: usize = 0x1F4;
pub const LINUX_SETUP_LOADER: usize = 0x210;
pub const LINUX_SETUP_LOAD_FLAGS: usize = 0x211;
pub const LINUX_SETUP_INITRD: u32 = 0x218;
pub const LINUX_FLAG_BIG_KERNEL: u8 = 0x01;

/// Loader id written into the setup header
pub const LOADER_TYPE: u8 = 0x70;

pub const CL_MY_LOCATION: u32 = 0x9_2000;
pub const CL_MY_END_ADDR: u32 = 0x9_20FF;
pub const CL_MAGIC_ADDR: u32 = 0x9_0020;
pub const CL_MAGIC: u16 = 0xA33F;
pub const CL_BASE_ADDR: u32 = 0x9_0000;
pub const CL_OFFSET: u32 = 0x9_0022;

/// Conventional memory the setup code and command line need, in KiB
pub const MIN_LOWER_KB: u32 = 608;

/// Layout declared by the boot sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinuxImage {
    /// Setup code after the boot sector, in bytes
    pub setup_len: u32,
    /// Protected-mode kernel, in bytes
    pub kernel_len: u32,
    pub big: bool,
}

impl LinuxImage {
    /// Recognize a boot sector whose declared lengths fit in a file of
    /// `file_len` bytes.
    pub fn parse(buf: &[u8], file_len: u64) -> Option<Self> {
        if buf.len() < SECTOR_SIZE as usize || le16(buf, BOOTSEC_SIG_OFFSET) != BOOTSEC_SIGNATURE {
            return None;
        }
        let setup_len = (buf[LINUX_SETUP_LEN_OFFSET] as u32) << 9;
        if setup_len > LINUX_SETUP_MAXLEN {
            return None;
        }
        let kernel_len = (le16(buf, LINUX_KERNEL_LEN_OFFSET) as u32) << 4;
        let rounded = (file_len + 15) & !15;
        if (setup_len + kernel_len + SECTOR_SIZE) as u64 > rounded {
            return None;
        }

        // Images without the load-flags byte have zero there.
        let big = buf.len() > LINUX_SETUP_LOAD_FLAGS && buf[LINUX_SETUP_LOAD_FLAGS] & LINUX_FLAG_BIG_KERNEL != 0;
        Some(Self {
            setup_len,
            kernel_len,
            big,
        })
    }

    /// Boot sector plus setup code
    pub fn setup_bytes(&self) -> u32 {
        self.setup_len + SECTOR_SIZE
    }

    /// File offset of the protected-mode kernel
    pub fn kernel_offset(&self) -> u64 {
        self.setup_bytes() as u64
    }
}

/// Command line handed to the kernel: a `mem=` hint for the upper memory
/// size, followed by the arguments after the kernel path.
///
/// The result is NUL terminated and cut to fit the fixed block at
/// [`CL_MY_LOCATION`].
pub fn build_cmdline(cmdline: &str, upper_kb: u32) -> Vec<u8> {
    let capacity = (CL_MY_END_ADDR - CL_MY_LOCATION) as usize;
    let mut out = Vec::with_capacity(capacity + 1);
    out.extend_from_slice(b"mem=");
    let mut digits = [0u8; 10];
    let mut value = upper_kb + 0x400;
    let mut n = 0;
    loop {
        digits[n] = b'0' + (value % 10) as u8;
        n += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    out.extend(digits[..n].iter().rev());
    out.extend_from_slice(b"K");

    let args = cmdline.trim_start().splitn(2, ' ').nth(1).unwrap_or("");
    if !args.is_empty() {
        out.push(b' ');
        out.extend_from_slice(args.as_bytes());
    }
    out.truncate(capacity);
    out.push(0);
    out
}
