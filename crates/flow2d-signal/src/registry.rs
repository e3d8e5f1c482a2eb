#![forbid(unsafe_code)]

//! Subscriber registry.
//!
//! Each signal keeps an ordered list of subscribers. Two kinds share the
//! list so that registration order is the single source of invocation order:
//!
//! - user callbacks registered through [`Signal::on`] / [`Signal::on_tagged`],
//! - bubbling relays installed when the signal is adopted as a child of
//!   another signal (see [`crate::relay`]).
//!
//! # Invariants
//!
//! 1. Subscribers are invoked in registration order.
//! 2. `off` removes at most one registration: the first whose id or tag
//!    matches.
//! 3. A failing or panicking callback never prevents later callbacks from
//!    running; its failure is recorded and surfaced after the tick.
//!
//! # Failure Modes
//!
//! - **Callback captures its own signal**: the signal can never be released,
//!   since the registry owns the callback. Use the `&Signal` argument instead.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{FlowError, Result, SubscriberFailure};
use crate::relay::RelayId;
use crate::signal::Signal;
use crate::value::{Record, Value};

/// Identifier handed out by `on`. Unique per runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller-chosen label for a group of subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(Rc<str>);

impl Tag {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(Rc::from(value))
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(Rc::from(value))
    }
}

/// Registration returned by `on`.
///
/// Holds the owning signal, so [`unsubscribe`](Self::unsubscribe) works
/// without keeping the signal around separately.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    tag: Option<Tag>,
    signal: Signal,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, tag: Option<Tag>, signal: Signal) -> Self {
        Self { id, tag, signal }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Remove this registration. A no-op if it is already gone.
    pub fn unsubscribe(&self) {
        self.signal.off(self.id);
    }
}

/// What `off` matches against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberKey {
    /// The registration itself.
    Id(SubscriptionId),
    Tag(Tag),
}

impl From<SubscriptionId> for SubscriberKey {
    fn from(id: SubscriptionId) -> Self {
        Self::Id(id)
    }
}

impl From<&SubscriptionHandle> for SubscriberKey {
    fn from(handle: &SubscriptionHandle) -> Self {
        Self::Id(handle.id)
    }
}

impl From<Tag> for SubscriberKey {
    fn from(tag: Tag) -> Self {
        Self::Tag(tag)
    }
}

impl From<&str> for SubscriberKey {
    fn from(tag: &str) -> Self {
        Self::Tag(Tag::from(tag))
    }
}

/// Return type accepted from subscriber callbacks.
///
/// Implemented for `()` and for `Result<(), E>` with a displayable error, so
/// both infallible and fallible closures can be registered.
pub trait CallbackOutcome {
    fn into_outcome(self) -> std::result::Result<(), String>;
}

impl CallbackOutcome for () {
    fn into_outcome(self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> CallbackOutcome for std::result::Result<(), E> {
    fn into_outcome(self) -> std::result::Result<(), String> {
        self.map_err(|err| err.to_string())
    }
}

pub(crate) type Callback = Rc<dyn Fn(&Signal, &Record) -> std::result::Result<(), String>>;

pub(crate) fn boxed_callback<F, R>(callback: F) -> Callback
where
    F: Fn(&Signal, &Record) -> R + 'static,
    R: CallbackOutcome,
{
    Rc::new(move |signal: &Signal, old: &Record| callback(signal, old).into_outcome())
}

#[derive(Clone)]
pub(crate) enum Subscriber {
    Callback {
        id: SubscriptionId,
        tag: Option<Tag>,
        callback: Callback,
    },
    Relay(RelayId),
}

#[derive(Clone, Default)]
pub(crate) struct Registry {
    entries: Vec<Subscriber>,
}

impl Registry {
    pub(crate) fn push_callback(&mut self, id: SubscriptionId, tag: Option<Tag>, callback: Callback) {
        self.entries.push(Subscriber::Callback { id, tag, callback });
    }

    pub(crate) fn push_relay(&mut self, relay: RelayId) {
        self.entries.push(Subscriber::Relay(relay));
    }

    /// Remove the first callback matching `key`. Returns whether one was found.
    pub(crate) fn remove(&mut self, key: &SubscriberKey) -> bool {
        let position = self.entries.iter().position(|entry| match (entry, key) {
            (Subscriber::Callback { id, .. }, SubscriberKey::Id(wanted)) => id == wanted,
            (Subscriber::Callback { tag: Some(tag), .. }, SubscriberKey::Tag(wanted)) => {
                tag == wanted
            }
            _ => false,
        });
        match position {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_relay(&mut self, relay: RelayId) {
        self.entries
            .retain(|entry| !matches!(entry, Subscriber::Relay(r) if *r == relay));
    }

    pub(crate) fn relay_ids(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Subscriber::Relay(relay) => Some(*relay),
            Subscriber::Callback { .. } => None,
        })
    }

    /// Copy of the list, taken before a notify step so callbacks may
    /// register or remove subscribers while it runs.
    pub(crate) fn snapshot(&self) -> Vec<Subscriber> {
        self.entries.clone()
    }

    pub(crate) fn callback_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, Subscriber::Callback { .. }))
            .count()
    }
}

/// Run one callback, converting an error return or a panic into a failure.
pub(crate) fn invoke(
    id: SubscriptionId,
    tag: Option<&Tag>,
    callback: &Callback,
    signal: &Signal,
    old: &Record,
) -> Option<SubscriberFailure> {
    let message = match panic::catch_unwind(AssertUnwindSafe(|| callback(signal, old))) {
        Ok(Ok(())) => return None,
        Ok(Err(message)) => message,
        Err(payload) => panic_message(payload.as_ref()),
    };
    Some(SubscriberFailure {
        subscription: id,
        tag: tag.cloned(),
        message,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}

/// Anything `on`/`off` can be pointed at.
///
/// Implemented for [`Signal`] and for [`Value`]; a value that does not hold a
/// signal fails with [`FlowError::NotASignal`].
pub trait SignalTarget {
    fn try_signal(&self) -> Result<&Signal>;
}

impl SignalTarget for Signal {
    fn try_signal(&self) -> Result<&Signal> {
        Ok(self)
    }
}

impl SignalTarget for Value {
    fn try_signal(&self) -> Result<&Signal> {
        match self {
            Value::Signal(signal) => Ok(signal),
            other => Err(FlowError::NotASignal {
                found: other.kind_name(),
            }),
        }
    }
}

/// Register `callback` on `target`.
pub fn on<T, F, R>(target: &T, callback: F) -> Result<SubscriptionHandle>
where
    T: SignalTarget + ?Sized,
    F: Fn(&Signal, &Record) -> R + 'static,
    R: CallbackOutcome,
{
    Ok(target.try_signal()?.on(callback))
}

/// Register `callback` on `target` under `tag`.
pub fn on_tagged<T, F, R>(target: &T, tag: impl Into<Tag>, callback: F) -> Result<SubscriptionHandle>
where
    T: SignalTarget + ?Sized,
    F: Fn(&Signal, &Record) -> R + 'static,
    R: CallbackOutcome,
{
    Ok(target.try_signal()?.on_tagged(tag, callback))
}

/// Remove the first registration on `target` matching `key`.
///
/// Not finding one is not an error.
pub fn off<T>(target: &T, key: impl Into<SubscriberKey>) -> Result<()>
where
    T: SignalTarget + ?Sized,
{
    target.try_signal()?.off(key);
    Ok(())
}
