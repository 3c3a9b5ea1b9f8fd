//! 32-bit protected mode handoff.
//!
//! Multiboot: EAX = 0x2BADB002, EBX = info, interrupts off, jump to entry.
//! BSD: a plain cdecl call with six arguments.
//! Linux: the kernel runs its setup code in real mode, so the drop out of
//! protected mode is left to a trampoline the platform provides.

use core::arch::asm;
use core::mem;

use crate::handoff::Handoff;
use crate::multiboot::MULTIBOOT_BOOTLOADER_MAGIC;

/// Platform code that returns to real mode and starts the Linux setup
/// code at 0x9020:0000. For a zImage it also moves the kernel from
/// 0x100000 down to 0x10000 first. `big` is 1 for a bzImage.
pub type LinuxTrampoline = unsafe extern "C" fn(big: u32) -> !;

type BsdEntry = unsafe extern "C" fn(u32, u32, u32, u32, u32, u32) -> !;

pub struct X86Handoff {
    linux: Option<LinuxTrampoline>,
}

impl X86Handoff {
    pub const fn new() -> Self {
        Self { linux: None }
    }

    pub const fn with_linux_trampoline(mut self, trampoline: LinuxTrampoline) -> Self {
        self.linux = Some(trampoline);
        self
    }
}

impl Handoff for X86Handoff {
    unsafe fn multiboot(&mut self, entry: u32, info: u32) -> ! {
        asm!(
            "cli",
            "mov ebx, edx",
            "jmp ecx",
            in("ecx") entry,
            in("edx") info,
            in("eax") MULTIBOOT_BOOTLOADER_MAGIC,
            options(noreturn)
        )
    }

    unsafe fn bsd(&mut self, entry: u32, args: [u32; 6]) -> ! {
        let kernel: BsdEntry = mem::transmute(entry as usize);
        asm!("cli", options(nomem, nostack));
        kernel(args[0], args[1], args[2], args[3], args[4], args[5])
    }

    unsafe fn linux(&mut self, big: bool) -> ! {
        match self.linux {
            Some(trampoline) => trampoline(big as u32),
            None => {
                log::error!("no real-mode trampoline for Linux");
                loop {
                    asm!("cli", "hlt", options(nomem, nostack));
                }
            }
        }
    }
}
