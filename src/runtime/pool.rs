//! Fixed pool of thread control blocks and the scheduling policy over it.
//!
//! Everything here is plain bookkeeping, the actual switch happens in the parent module.

use std::fmt;

use super::context_switch::Continuation;
use super::stack::Stack;

/// Number of thread slots, including the driver's slot 0.
pub const MAX_THREADS: usize = 8;

/// Usable bytes of every thread's private stack, rounded up to whole pages.
pub const STACK_SIZE: usize = 64 * 1024;

/// Lifecycle state of a thread slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    /// Unused, can be claimed by [crate::create].
    Free,
    /// Eligible to run.
    Runnable,
    /// Currently executing, exactly one slot at a time.
    Running,
    /// The driver, suspended inside [crate::run] until every other thread is done.
    Waiting,
}

/// Stable handle of a thread.
///
/// The generation changes every time a slot is reused, so two threads never share an identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    slot: usize,
    generation: u32,
}

impl ThreadId {
    /// Index of the pool slot backing this thread.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Number of threads created in this slot before, and including, this one.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.generation)
    }
}

/// Outcome of a scheduling pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum Decision {
    /// The running slot continues, no switch needed.
    Stay,
    /// Resume another slot.
    Switch(usize),
    /// Nothing can make progress.
    Starved,
}

/// Thread control block.
#[derive(Debug)]
struct Slot {
    state: State,
    generation: u32,
    continuation: Continuation,
    /// Allocated on the slot's first creation and kept for reuse, never present for the driver.
    stack: Option<Stack>,
    entry: Option<fn()>,
}

impl Slot {
    fn free() -> Self {
        Slot {
            state: State::Free,
            generation: 0,
            continuation: Continuation::null(),
            stack: None,
            entry: None,
        }
    }
}

#[derive(Debug)]
pub(super) struct Scheduler {
    slots: [Slot; MAX_THREADS],
    running: usize,
    /// Slot occupied by the context that initialized the scheduler, until it exits.
    driver: Option<usize>,
}

impl Scheduler {
    /// The calling context becomes slot 0 in the running state.
    pub(super) fn new() -> Self {
        let mut slots: [Slot; MAX_THREADS] = std::array::from_fn(|_| Slot::free());
        slots[0].state = State::Running;

        Scheduler {
            slots,
            running: 0,
            driver: Some(0),
        }
    }

    /// Claims the first free slot for a thread that will start at `entry`.
    ///
    /// `trampoline` is what the primed stack actually resumes into, it's expected to look up
    /// [Scheduler::running_entry] and call it.
    pub(super) fn create(
        &mut self,
        entry: fn(),
        trampoline: extern "C" fn() -> !,
    ) -> crate::Result<ThreadId> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.state == State::Free)
            .ok_or(crate::Error::PoolExhausted {
                capacity: MAX_THREADS,
            })?;

        let slot = &mut self.slots[index];
        let stack = match &mut slot.stack {
            Some(stack) => stack,
            empty => empty.insert(Stack::with_size(STACK_SIZE)?),
        };

        // safety: the slot is free so nothing is executing on its stack
        slot.continuation = unsafe { Continuation::prime(stack.base(), trampoline) };
        slot.entry = Some(entry);
        slot.generation = slot.generation.wrapping_add(1);
        slot.state = State::Runnable;

        Ok(ThreadId {
            slot: index,
            generation: slot.generation,
        })
    }

    pub(super) fn running(&self) -> ThreadId {
        ThreadId {
            slot: self.running,
            generation: self.slots[self.running].generation,
        }
    }

    pub(super) fn running_entry(&self) -> Option<fn()> {
        self.slots[self.running].entry
    }

    pub(super) fn states(&self) -> [State; MAX_THREADS] {
        std::array::from_fn(|index| self.slots[index].state)
    }

    pub(super) fn is_driver_running(&self) -> bool {
        self.driver == Some(self.running)
    }

    /// Whether any slot is ready to run.
    pub(super) fn has_runnable(&self) -> bool {
        self.slots.iter().any(|slot| slot.state == State::Runnable)
    }

    /// Threads other than the driver that haven't exited.
    pub(super) fn live_workers(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(index, slot)| Some(index) != self.driver && slot.state != State::Free)
            .count()
    }

    /// Running → Waiting, only meaningful for the driver.
    pub(super) fn park_driver(&mut self) {
        debug_assert!(self.is_driver_running());
        self.slots[self.running].state = State::Waiting;
    }

    /// Running → Runnable.
    pub(super) fn demote(&mut self) {
        self.slots[self.running].state = State::Runnable;
    }

    /// Running → Free, the slot becomes claimable right away.
    pub(super) fn release(&mut self) {
        let slot = &mut self.slots[self.running];
        slot.state = State::Free;
        slot.entry = None;
        slot.continuation = Continuation::null();

        if self.driver == Some(self.running) {
            self.driver = None;
        }
    }

    /// Picks the next slot to run.
    ///
    /// Scans from the head of the pool rather than from the running slot, so lower slots are
    /// preferred. The running slot only continues if nothing else is runnable, and a waiting
    /// driver is resumed only if nothing at all is runnable.
    pub(super) fn decide(&self) -> Decision {
        let other = self
            .slots
            .iter()
            .enumerate()
            .position(|(index, slot)| index != self.running && slot.state == State::Runnable);

        if let Some(index) = other {
            return Decision::Switch(index);
        }

        if self.slots[self.running].state == State::Runnable {
            return Decision::Stay;
        }

        match self.driver {
            Some(driver) if self.slots[driver].state == State::Waiting => Decision::Switch(driver),
            _ => Decision::Starved,
        }
    }

    /// Keeps the current slot running after [Decision::Stay].
    pub(super) fn stay(&mut self) {
        self.slots[self.running].state = State::Running;
    }

    /// Marks `next` as running and hands back the continuations to switch between.
    ///
    /// The first one is where the previously running slot gets suspended.
    pub(super) fn resume(&mut self, next: usize) -> (*mut Continuation, *const Continuation) {
        assert_ne!(next, self.running);
        debug_assert_ne!(self.slots[self.running].state, State::Running);
        assert!(!self.slots[next].continuation.is_null() || Some(next) == self.driver);

        let previous = self.running;
        self.slots[next].state = State::Running;
        self.running = next;

        (
            &mut self.slots[previous].continuation as *mut Continuation,
            &self.slots[next].continuation as *const Continuation,
        )
    }
}
