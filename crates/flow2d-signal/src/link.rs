#![forbid(unsafe_code)]

//! Linking bridge between two independently rooted signals.
//!
//! `base.link(source)` returns a derived signal whose missing keys are filled
//! from `base`'s committed values. The two signals are then cross-wired: a
//! write staged on either one is staged on the other under the same key,
//! and each still notifies its own subscribers.
//!
//! The staging buffer's identity check is the only re-entrancy guard: when a
//! mirrored write reaches a signal that already holds that exact value in its
//! staging buffer, it stops there.
//!
//! Keys present on only one side are never mirrored.

use crate::error::{FlowError, Result};
use crate::signal::Signal;
use crate::value::Record;

/// What [`Signal::link`] derives its signal from.
#[derive(Debug, Clone)]
pub enum LinkSource {
    /// Plain record, filled from the base and promoted to a signal.
    Record(Record),
    /// Existing signal; unset keys are filled by staged writes.
    Signal(Signal),
}

impl From<Record> for LinkSource {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Signal> for LinkSource {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<&Signal> for LinkSource {
    fn from(signal: &Signal) -> Self {
        Self::Signal(signal.clone())
    }
}

impl Signal {
    /// Derive a signal from `source` and link it bidirectionally with this
    /// one.
    ///
    /// Keys absent from `source` (missing or unset) take this signal's
    /// committed value; keys present in `source` keep theirs.
    pub fn link(&self, source: impl Into<LinkSource>) -> Result<Signal> {
        let base = self.snapshot();
        let derived = match source.into() {
            LinkSource::Record(mut record) => {
                for (key, value) in base.iter() {
                    if record.is_absent(key) {
                        record.insert(key, value.clone());
                    }
                }
                self.runtime().signal(record)?
            }
            LinkSource::Signal(signal) => {
                if !signal.runtime().ptr_eq(&self.runtime()) {
                    return Err(FlowError::ForeignRuntime);
                }
                for key in signal.keys() {
                    let Some(fill) = base.get(&key).filter(|value| !value.is_unset()) else {
                        continue;
                    };
                    if signal.get(&key)?.is_unset() {
                        signal.set(&key, fill.clone())?;
                    }
                }
                signal
            }
        };
        self.link_to(&derived);
        tracing::debug!(base = ?self.id(), derived = ?derived.id(), "signals linked");
        Ok(derived)
    }
}
