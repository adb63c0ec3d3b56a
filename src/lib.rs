//! A cooperative user-level thread scheduler.
//!
//! A fixed pool of lightweight threads shares one OS thread. Each thread owns a private stack
//! and runs until it explicitly calls [yield_now] or [exit], there is no preemption.
//!
//! # Examples
//! ```
//! fn worker() {
//!     for i in 0..3 {
//!         println!("thread {}: {i}", uthread::current());
//!         uthread::yield_now();
//!     }
//! }
//!
//! uthread::init().unwrap();
//! uthread::create(worker).unwrap();
//! uthread::create(worker).unwrap();
//! uthread::run().unwrap();
//! uthread::teardown().unwrap();
//! ```

#![cfg_attr(feature = "fast_thread_local", feature(thread_local))]

use std::io;

pub mod runtime;

pub use runtime::{
    create, current, exit, init, run, states, teardown, yield_now, State, ThreadId, MAX_THREADS,
    STACK_SIZE,
};

#[cfg(feature = "macros")]
pub use uthread_macros::start;

/// Errors reported by the scheduler's fallible operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("a scheduler is already running on this thread")]
    AlreadyInitialized,
    #[error("no scheduler on this thread, call uthread::init first")]
    NotInitialized,
    #[error("all {capacity} thread slots are in use")]
    PoolExhausted { capacity: usize },
    #[error("only the driver may {0}")]
    NotDriver(&'static str),
    #[error("{0} threads haven't exited yet")]
    ThreadsAlive(usize),
    #[error("failed to allocate a thread stack")]
    Stack(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
