//! Private stack memory for a single thread slot.

use std::num::NonZeroUsize;
use std::{ffi, io, ptr};

#[derive(Debug)]
pub(super) struct Stack {
    pointer: *mut u8,
    length: usize,
}

impl Stack {
    /// Allocates a thread stack of at least `size` usable bytes.
    pub(super) fn with_size(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let usable_pages = NonZeroUsize::new(size.div_ceil(page_size)).unwrap_or(NonZeroUsize::MIN);
        Stack::new(NonZeroUsize::MIN, usable_pages)
    }

    /// Maps `guard_pages + usable_pages` of anonymous memory for one pool slot.
    ///
    /// Pages are only backed once touched. The lowest `guard_pages` are inaccessible, so running
    /// off the end of a thread's stack faults instead of scribbling over a neighbouring slot.
    pub(super) fn new(guard_pages: NonZeroUsize, usable_pages: NonZeroUsize) -> io::Result<Self> {
        let page_size = page_size();
        let guard_length = guard_pages.get() * page_size;
        let length = guard_length + usable_pages.get() * page_size;

        let memory = unsafe {
            libc::mmap(
                ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if memory == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // owns the mapping from here on, an early return unmaps it
        let stack = Stack {
            pointer: memory as *mut u8,
            length,
        };

        if unsafe { libc::mprotect(memory, guard_length, libc::PROT_NONE) } == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(stack)
    }

    /// One past the highest usable byte, threads grow down from here.
    pub(super) fn base(&self) -> *mut u8 {
        // safety: one past the end of the mapping
        unsafe { self.pointer.add(self.length) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.pointer as *mut ffi::c_void, self.length) };
        debug_assert_eq!(result, 0, "{}", io::Error::last_os_error());
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
