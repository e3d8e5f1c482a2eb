#![forbid(unsafe_code)]

//! Deferred, batched reactive signals for flow2d.
//!
//! This crate turns plain records into observable signals whose writes are
//! staged, batched and committed on a scheduled tick:
//!
//! - [`Signal`]: wrapper around a fixed-key [`Record`]. Reads return the last
//!   committed value; writes are staged until the next tick.
//! - [`Runtime`]: the scheduler owning every signal, the pending queue and
//!   the epoch counter. [`Runtime::update`] runs one tick,
//!   [`Runtime::update_all`] settles to quiescence.
//! - [`Signal::on`] / [`Signal::off`]: ordered subscriber registry.
//!   Callbacks get the signal and the old-value snapshot of the tick.
//! - [`Signal::link`]: bidirectional mirroring between two signals.
//!
//! Nested records are promoted to child signals whose settles bubble up to
//! the parent key, so a leaf change anywhere in a tree notifies every
//! ancestor exactly once per tick.
//!
//! # Architecture
//!
//! All state lives in one `Rc`-shared arena per runtime. Signals, relays and
//! link peers refer to each other by generational [`SignalId`]s, so dropping
//! the last [`Signal`] handle frees its node and every relay attached to it.
//! Nothing is thread-safe; a runtime belongs to the thread that created it.
//!
//! # Invariants
//!
//! 1. A read never observes a staged value.
//! 2. N writes to one key between two ticks produce one notification whose
//!    old value is the value before the first of them.
//! 3. A tick commits every queued signal before notifying any of them.
//! 4. Subscribers run in registration order; one failing callback never
//!    stops the others.
//! 5. `update_all` runs at most [`SchedulerConfig::max_ticks`] ticks.
//!
//! # Example
//!
//! ```
//! use flow2d_signal::{Runtime, record};
//!
//! let rt = Runtime::new();
//! let counter = rt.signal(record! { value: 42 })?;
//!
//! counter.on(|this, old| {
//!     println!("{:?} -> {:?}", old.get("value"), this.get("value"));
//! });
//!
//! counter.set("value", 1337)?;
//! assert_eq!(counter.get("value")?, 42);
//! rt.update_all()?;
//! assert_eq!(counter.get("value")?, 1337);
//! # Ok::<(), flow2d_signal::FlowError>(())
//! ```

mod config;
mod error;
mod global;
mod link;
mod registry;
mod relay;
mod scheduler;
mod signal;
mod value;

pub use config::{DEFAULT_MAX_TICKS, MAX_TICKS_ENV, SchedulerConfig};
pub use error::{FlowError, Result, SubscriberFailure};
pub use global::{reset, runtime, signal, update, update_all};
pub use link::LinkSource;
pub use registry::{
    CallbackOutcome, SignalTarget, SubscriberKey, SubscriptionHandle, SubscriptionId, Tag, off,
    on, on_tagged,
};
pub use relay::RelayId;
pub use scheduler::Runtime;
pub use signal::{Signal, SignalId};
pub use value::{Method, MethodFn, Opaque, Record, SlotKind, Value};
