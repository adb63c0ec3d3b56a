//! Cooperative scheduling of user-level threads.
//!
//! The OS thread that calls [init] becomes the driver, slot 0 of a fixed pool.
//! Threads made with [create] run on private stacks and only give up control through
//! [yield_now] or [exit]. [run] lends the driver's turn to them until all have exited.

use std::{hint, mem, panic, process};

mod context_switch;
mod pool;
mod stack;
mod tls;

pub use pool::{State, ThreadId, MAX_THREADS, STACK_SIZE};

use context_switch::Continuation;
use pool::Decision;

/// Initializes a scheduler on the calling OS thread, the caller becomes its driver.
pub fn init() -> crate::Result<()> {
    tls::install()?;
    tracing::debug!("scheduler initialized");
    Ok(())
}

/// Drops the calling OS thread's scheduler along with every thread stack.
///
/// Only the driver may do this, and only once every other thread has exited.
pub fn teardown() -> crate::Result<()> {
    tls::try_runtime(|runtime| {
        if !runtime.is_driver_running() {
            return Err(crate::Error::NotDriver("tear down the scheduler"));
        }

        match runtime.live_workers() {
            0 => Ok(()),
            live => Err(crate::Error::ThreadsAlive(live)),
        }
    })?;

    drop(tls::uninstall());
    tracing::debug!("scheduler torn down");
    Ok(())
}

/// Runs `f` as the driver of a fresh scheduler, then drives every created thread to completion.
///
/// # Examples
/// ```
/// let output = uthread::runtime::start(|| {
///     uthread::create(|| println!("hello from {}", uthread::current())).unwrap();
///     123
/// });
///
/// assert_eq!(output.unwrap(), 123);
/// ```
///
/// If `f` panics, the scheduler is removed before the panic continues, threads it created never run.
pub fn start<F: FnOnce() -> T, T>(f: F) -> crate::Result<T> {
    init()?;
    let output = match panic::catch_unwind(panic::AssertUnwindSafe(f)) {
        Ok(output) => output,
        Err(payload) => {
            drop(tls::uninstall());
            panic::resume_unwind(payload);
        }
    };
    run()?;
    teardown()?;
    Ok(output)
}

/// Adds a thread that will begin at `entry` once scheduled.
///
/// Slots are claimed lowest first. Returning from `entry` is the same as calling [exit].
pub fn create(entry: fn()) -> crate::Result<ThreadId> {
    let id = tls::try_runtime(|runtime| runtime.create(entry, trampoline))?;
    tracing::debug!(thread = %id, "thread created");
    Ok(id)
}

/// Lets created threads run until none is runnable.
///
/// Must be called by the driver. Returns immediately if no thread is runnable.
pub fn run() -> crate::Result<()> {
    loop {
        let parked = tls::try_runtime(|runtime| {
            if !runtime.is_driver_running() {
                return Err(crate::Error::NotDriver("run the scheduler"));
            }

            if !runtime.has_runnable() {
                return Ok(false);
            }

            runtime.park_driver();
            Ok(true)
        })?;

        if !parked {
            return Ok(());
        }

        schedule(Suspend::Save); // woken up once nothing else is runnable
    }
}

/// Gives other runnable threads a turn.
///
/// Returns immediately if the caller is the only runnable thread.
///
/// # Panics
/// If the calling OS thread has no scheduler.
pub fn yield_now() {
    tls::runtime(|runtime| runtime.demote());
    schedule(Suspend::Save);
}

/// Ends the calling thread, its slot becomes free for [create].
///
/// If the driver exits while no other thread is runnable, or the last thread exits after the
/// driver did, the process terminates.
///
/// # Panics
/// If the calling OS thread has no scheduler.
pub fn exit() -> ! {
    let id = tls::runtime(|runtime| {
        let id = runtime.running();
        runtime.release();
        id
    });
    tracing::debug!(thread = %id, "thread exited");

    schedule(Suspend::Discard);
    unreachable!("thread {id} resumed after exiting");
}

/// Identity of the calling thread.
///
/// # Panics
/// If the calling OS thread has no scheduler.
pub fn current() -> ThreadId {
    tls::runtime(|runtime| runtime.running())
}

/// State of every slot, indexed by [ThreadId::slot].
///
/// # Panics
/// If the calling OS thread has no scheduler.
pub fn states() -> [State; MAX_THREADS] {
    tls::runtime(|runtime| runtime.states())
}

/// What happens to the registers of the thread being switched away from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Suspend {
    /// It will be resumed later.
    Save,
    /// Its slot is free, nothing will resume it.
    Discard,
}

/// Result of a scheduling pass, computed while the scheduler is borrowed.
#[derive(Debug)]
enum Step {
    Stay,
    Jump(*mut Continuation, *const Continuation),
    Starved,
}

/// Hands control to whichever thread the scheduler picks.
/// Returns once the caller is picked again, if it ever is.
fn schedule(suspend: Suspend) {
    let step = tls::runtime(|runtime| match runtime.decide() {
        Decision::Stay => {
            runtime.stay();
            Step::Stay
        }
        Decision::Switch(next) => {
            let previous = runtime.running();
            let (from, to) = runtime.resume(next);
            tracing::trace!(from = %previous, to = %runtime.running(), "switching threads");
            Step::Jump(from, to)
        }
        Decision::Starved => Step::Starved,
    });

    match step {
        Step::Stay => {}
        Step::Starved => starved(),
        Step::Jump(from, to) => {
            let mut discarded = mem::MaybeUninit::<Continuation>::uninit();
            let from = match suspend {
                Suspend::Save => from,
                Suspend::Discard => discarded.as_mut_ptr(),
            };

            // safety: `to` was primed by create or saved by a previous jump, and no borrow is held
            unsafe { context_switch::jump(from, to) };
        }
    }
}

/// No thread can make progress, continuing would mean resuming nothing.
fn starved() -> ! {
    tracing::error!("no runnable threads");
    eprintln!("uthread: no runnable threads");

    // exit runs thread local destructors, which would unmap the stack we're standing on
    mem::forget(tls::uninstall());
    process::exit(1);
}

/// First frame of every created thread.
extern "C" fn trampoline() -> ! {
    let (id, entry) = tls::runtime(|runtime| (runtime.running(), runtime.running_entry()));

    if let Some(entry) = entry {
        let result = panic::catch_unwind(entry);
        hint::black_box(&result); // keeps the landing pad from being optimized across the switch

        if result.is_err() {
            tracing::warn!(thread = %id, "thread panicked, exiting it");
        }
    }

    exit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static LOG: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    fn record() {
        LOG.with(|log| log.borrow_mut().push(current().slot()));
    }

    fn taken_log() -> Vec<usize> {
        LOG.with(|log| log.take())
    }

    mod start {
        use super::*;

        #[test]
        fn returns_output() {
            let output = start(|| 123);

            assert_eq!(output.unwrap(), 123);
        }

        #[test]
        fn drives_created_threads() {
            start(|| {
                create(record).unwrap();
                create(record).unwrap();
            })
            .unwrap();

            assert_eq!(taken_log(), [1, 2]);
        }

        #[test]
        fn cant_nest() {
            start(|| {
                assert!(matches!(start(|| {}), Err(crate::Error::AlreadyInitialized)));
            })
            .unwrap();
        }

        #[test]
        fn clears_scheduler_after_panic() {
            let result = std::panic::catch_unwind(|| {
                start(|| {
                    create(record).unwrap();
                    panic!("driver failed");
                })
            });

            assert!(result.is_err());
            assert!(taken_log().is_empty());
            assert!(matches!(create(record), Err(crate::Error::NotInitialized)));
            start(|| {}).unwrap();
        }

        #[test]
        fn works_several_times() {
            start(|| {}).unwrap();
            start(|| {}).unwrap();
        }

        #[test]
        fn works_in_parallel() {
            let handle = std::thread::spawn(|| {
                start(|| {
                    create(record).unwrap();
                })
                .unwrap();
                taken_log()
            });

            start(|| {
                create(record).unwrap();
                create(record).unwrap();
            })
            .unwrap();

            assert_eq!(handle.join().unwrap(), [1]);
            assert_eq!(taken_log(), [1, 2]);
        }
    }

    mod create {
        use super::*;

        #[test]
        fn requires_scheduler() {
            assert!(matches!(create(record), Err(crate::Error::NotInitialized)));
        }

        #[test]
        fn doesnt_run_until_scheduled() {
            init().unwrap();

            create(record).unwrap();
            assert!(taken_log().is_empty());

            run().unwrap();
            assert_eq!(taken_log(), [1]);
            teardown().unwrap();
        }

        #[test]
        fn from_inside_a_thread() {
            fn spawner() {
                record();
                create(record).unwrap();
            }

            start(|| {
                create(spawner).unwrap();
            })
            .unwrap();

            assert_eq!(taken_log(), [1, 2]);
        }

        #[test]
        fn reports_exhaustion() {
            start(|| {
                for _ in 1..MAX_THREADS {
                    create(record).unwrap();
                }

                let result = create(record);

                assert!(matches!(result, Err(crate::Error::PoolExhausted { .. })));
            })
            .unwrap();

            assert_eq!(taken_log().len(), MAX_THREADS - 1);
        }
    }

    mod run {
        use super::*;

        #[test]
        fn returns_without_threads() {
            start(|| {
                run().unwrap();
                assert_eq!(current().slot(), 0);
            })
            .unwrap();
        }

        #[test]
        fn rejected_inside_a_thread() {
            fn nested_run() {
                let result = run();
                LOG.with(|log| {
                    log.borrow_mut()
                        .push(matches!(result, Err(crate::Error::NotDriver(_))) as usize)
                });
            }

            start(|| {
                create(nested_run).unwrap();
            })
            .unwrap();

            assert_eq!(taken_log(), [1]);
        }

        #[test]
        fn driver_is_waiting_meanwhile() {
            fn observe() {
                let states = states();
                LOG.with(|log| log.borrow_mut().push((states[0] == State::Waiting) as usize));
            }

            start(|| {
                create(observe).unwrap();
            })
            .unwrap();

            assert_eq!(taken_log(), [1]);
        }
    }

    mod yield_now {
        use super::*;

        #[test]
        fn alone_is_a_noop() {
            start(|| {
                yield_now();
                yield_now();
                assert_eq!(states()[0], State::Running);
            })
            .unwrap();
        }

        #[test]
        fn driver_interleaves_with_threads() {
            fn twice() {
                record();
                yield_now();
                record();
            }

            start(|| {
                create(twice).unwrap();
                record();
                yield_now();
                record();
                yield_now();
                record();
            })
            .unwrap();

            assert_eq!(taken_log(), [0, 1, 0, 1, 0]);
        }
    }

    mod exit {
        use super::*;

        #[test]
        fn skips_rest_of_entry() {
            fn early_exit() {
                record();
                exit();
            }

            start(|| {
                create(early_exit).unwrap();
            })
            .unwrap();

            assert_eq!(taken_log(), [1]);
        }

        #[test]
        fn frees_slot() {
            start(|| {
                let id = create(record).unwrap();
                run().unwrap();

                assert_eq!(states()[id.slot()], State::Free);
            })
            .unwrap();
        }
    }

    mod teardown {
        use super::*;

        #[test]
        fn rejects_live_threads() {
            init().unwrap();
            create(record).unwrap();

            assert!(matches!(teardown(), Err(crate::Error::ThreadsAlive(1))));

            run().unwrap();
            teardown().unwrap();
            assert!(matches!(teardown(), Err(crate::Error::NotInitialized)));
        }
    }

    #[test]
    fn panicking_thread_exits() {
        fn panics() {
            record();
            panic!("boom");
        }

        start(|| {
            create(panics).unwrap();
            create(record).unwrap();
        })
        .unwrap();

        assert_eq!(taken_log(), [1, 2]);
    }
}
