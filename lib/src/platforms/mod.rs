#[cfg(target_arch = "x86_64")]
pub mod linux_x86_64;

#[cfg(target_arch = "x86_64")]
pub use linux_x86_64::Handler as NativeHandler;

use crate::syscalls::{Syscall, SyscallEntry};

pub type SyscallRegs = libc::user_regs_struct;

/// Architecture-specific knowledge: where the syscall number, arguments and return value live in
/// the registers, and which numbers denote which syscalls
pub trait PlatformHandler {
    fn entry(&self, regs: &SyscallRegs) -> SyscallEntry;
    fn return_value(&self, regs: &SyscallRegs) -> i64;
    fn classify(&self, number: i64) -> Syscall;
}
