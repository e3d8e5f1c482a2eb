#![forbid(unsafe_code)]

//! Process-wide default runtime.
//!
//! Each thread lazily gets one [`Runtime`], configured from the environment
//! on first use. The free functions here forward to it. Code that needs
//! isolation (tests, embedded schedulers) should hold its own `Runtime`
//! instead.

use std::cell::RefCell;

use crate::error::Result;
use crate::scheduler::Runtime;
use crate::signal::Signal;
use crate::value::Record;

thread_local! {
    static DEFAULT_RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::from_env());
}

/// Handle to this thread's default runtime.
#[must_use]
pub fn runtime() -> Runtime {
    DEFAULT_RUNTIME.with(|rt| rt.borrow().clone())
}

/// Replace this thread's default runtime with a fresh one.
///
/// Signals created before the reset stay attached to the old runtime and
/// keep working through it; they just no longer share a queue with signals
/// created afterwards.
pub fn reset() {
    let fresh = Runtime::from_env();
    let previous = DEFAULT_RUNTIME.with(|rt| std::mem::replace(&mut *rt.borrow_mut(), fresh));
    tracing::debug!(epoch = previous.epoch(), "default runtime reset");
}

/// Wrap `record` as a signal on the default runtime.
pub fn signal(record: Record) -> Result<Signal> {
    runtime().signal(record)
}

/// One tick of the default runtime.
pub fn update() -> Result<()> {
    runtime().update()
}

/// Settle the default runtime.
pub fn update_all() -> Result<()> {
    runtime().update_all()
}
