//! Abstraction over userspace multitasking.
//!
//! Provides an implementation for every supported CPU architecture.
//! Nothing outside this module knows the register layout of a suspended thread.

use std::arch::global_asm;
use std::{mem, ptr};

/// Handle to a stack pointer set up for context switching.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct Continuation(*const ());

impl Continuation {
    /// Placeholder for a slot that can't be resumed.
    pub(super) const fn null() -> Self {
        Continuation(ptr::null())
    }

    pub(super) fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Initializes a stack for context switching.
    ///
    /// Writes an [InitialFrame] just below `stack_top` so that jumping to the returned continuation
    /// "returns" into `entry` with the stack aligned as if `entry` had just been called.
    ///
    /// # Safety
    /// `stack_top` must be the upper end of writable memory with room for an [InitialFrame],
    /// and nothing may be executing on that memory.
    pub(super) unsafe fn prime(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Self {
        let top = stack_top as usize & !(STACK_ALIGNMENT - 1);
        let frame = (top - mem::size_of::<InitialFrame>()) as *mut InitialFrame;
        frame.write(InitialFrame::new(entry));
        Continuation(frame as *const ())
    }
}

extern "C" {
    /// Executes a context switch.
    ///
    /// Spills callee-saved registers, sets [from] to updated stack pointer.
    /// Sets stack pointer to [to], restores registers.
    #[link_name = "uthread_jump"]
    pub(super) fn jump(from: *mut Continuation, to: *const Continuation);
}

const STACK_ALIGNMENT: usize = 16;

/// Register image a never-run thread is resumed from.
///
/// Fields are in the order `uthread_jump` pops them, lowest address first.
/// Callee-saved registers start zeroed so nothing leaks from whatever ran on the stack before.
#[cfg(target_arch = "x86_64")]
#[repr(C)]
struct InitialFrame {
    r15: usize,
    r14: usize,
    r13: usize,
    r12: usize,
    rbx: usize,
    rbp: usize,
    /// Consumed by `ret`.
    entry: extern "C" fn() -> !,
    /// Where `entry` would return to, it never does.
    /// Leaves the stack pointer at 8 mod 16 on entry, as after a `call`.
    return_address: usize,
}

#[cfg(target_arch = "x86_64")]
impl InitialFrame {
    fn new(entry: extern "C" fn() -> !) -> Self {
        InitialFrame {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            entry,
            return_address: 0,
        }
    }
}

/// Register image a never-run thread is resumed from.
///
/// Fields are in the order `uthread_jump` loads them, lowest address first.
/// Callee-saved registers start zeroed so nothing leaks from whatever ran on the stack before.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
struct InitialFrame {
    x19_x28: [usize; 10],
    /// Null frame pointer terminates backtraces.
    fp: usize,
    /// Consumed by `ret`.
    lr: extern "C" fn() -> !,
    d8_d15: [u64; 8],
}

#[cfg(target_arch = "aarch64")]
impl InitialFrame {
    fn new(entry: extern "C" fn() -> !) -> Self {
        InitialFrame {
            x19_x28: [0; 10],
            fp: 0,
            lr: entry,
            d8_d15: [0; 8],
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthread only supports x86_64 and aarch64");

#[cfg(not(target_os = "linux"))]
compile_error!("uthread only supports Linux");

#[cfg(target_arch = "x86_64")]
global_asm!(include_str!("assembly/x86_64.s"));

#[cfg(target_arch = "aarch64")]
global_asm!(include_str!("assembly/aarch64.s"));
