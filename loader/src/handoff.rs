// Kernel boot handoff

use crate::bsd::BsdBootArgs;

/// Architecture-specific transfer of control. None of these return.
pub trait Handoff {
    /// Enter a Multiboot kernel with the info structure at `info`
    ///
    /// # Safety
    ///
    /// The kernel and its info structure must be in place and nothing the
    /// caller still needs may live where the kernel was loaded.
    unsafe fn multiboot(&mut self, entry: u32, info: u32) -> !;

    /// Call a BSD kernel's entry with six cdecl arguments
    ///
    /// # Safety
    ///
    /// As for [`multiboot`](Self::multiboot).
    unsafe fn bsd(&mut self, entry: u32, args: [u32; 6]) -> !;

    /// Leave for the Linux setup code at 0x90000; `big` is set for a
    /// bzImage, which stays where it was loaded
    ///
    /// # Safety
    ///
    /// As for [`multiboot`](Self::multiboot).
    unsafe fn linux(&mut self, big: bool) -> !;
}

/// What [`ImageLoader::prepare_boot`](crate::ImageLoader::prepare_boot)
/// decided to jump to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootRequest {
    Multiboot { entry: u32, info: u32 },
    Bsd { entry: u32, args: BsdBootArgs },
    Linux { big: bool },
}

impl BootRequest {
    /// Jump to the kernel
    ///
    /// # Safety
    ///
    /// See [`Handoff`].
    pub unsafe fn execute(self, handoff: &mut dyn Handoff) -> ! {
        log::info!("booting: {:x?}", self);
        match self {
            BootRequest::Multiboot { entry, info } => handoff.multiboot(entry, info),
            BootRequest::Bsd { entry, args } => handoff.bsd(entry, args.0),
            BootRequest::Linux { big } => handoff.linux(big),
        }
    }
}
