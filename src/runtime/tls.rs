//! Thread local storage for the scheduler.
//!
//! Every OS thread can own one independent scheduler instance.
//! Switching to `fast_thread_local` only changes how the cell is reached.

use std::cell::RefCell;

use super::pool::Scheduler;

/// Cache padded to avoid potential performance hit due to false sharing.
#[repr(align(128))]
struct Runtime(RefCell<Option<Scheduler>>);

#[cfg(not(feature = "fast_thread_local"))]
thread_local! {
    /// Each thread gets its own independent scheduler.
    static RUNTIME: Runtime = const { Runtime(RefCell::new(None)) };
}

#[cfg(not(feature = "fast_thread_local"))]
fn with_cell<T>(f: impl FnOnce(&RefCell<Option<Scheduler>>) -> T) -> T {
    RUNTIME.with(|thread_local| f(&thread_local.0))
}

#[cfg(feature = "fast_thread_local")]
#[thread_local]
static RUNTIME: Runtime = Runtime(RefCell::new(None));

#[cfg(feature = "fast_thread_local")]
fn with_cell<T>(f: impl FnOnce(&RefCell<Option<Scheduler>>) -> T) -> T {
    f(&RUNTIME.0)
}

/// Makes the calling context the driver of a new scheduler.
pub(super) fn install() -> crate::Result<()> {
    with_cell(|cell| {
        let mut cell = cell.borrow_mut();
        if cell.is_some() {
            return Err(crate::Error::AlreadyInitialized);
        }
        *cell = Some(Scheduler::new());
        Ok(())
    })
}

/// Removes the scheduler, handing it back so it drops outside of the borrow.
pub(super) fn uninstall() -> Option<Scheduler> {
    with_cell(|cell| cell.borrow_mut().take())
}

/// Borrow the scheduler, failing if there is none.
///
/// The borrow must end before any context switch, the next thread will borrow it too.
pub(super) fn try_runtime<T>(
    f: impl FnOnce(&mut Scheduler) -> crate::Result<T>,
) -> crate::Result<T> {
    with_cell(|cell| {
        let mut cell = cell.borrow_mut();
        let runtime = cell.as_mut().ok_or(crate::Error::NotInitialized)?;
        f(runtime)
    })
}

/// Borrow the scheduler.
///
/// # Panics
/// If the calling OS thread has no scheduler.
pub(super) fn runtime<T>(f: impl FnOnce(&mut Scheduler) -> T) -> T {
    with_cell(|cell| {
        let mut cell = cell.borrow_mut();
        let runtime = cell
            .as_mut()
            .expect("no uthread scheduler on this thread, call uthread::init first");
        f(runtime)
    })
}
