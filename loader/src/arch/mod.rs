//! Architecture-specific boot code

#[cfg(target_arch = "x86")]
pub mod x86;

#[cfg(target_arch = "x86")]
pub use x86::X86Handoff;
