#![forbid(unsafe_code)]

//! Signals and their property interceptors.
//!
//! A [`Signal`] wraps a record with a fixed key set. Reads return the last
//! committed value; writes are staged and only become visible after the
//! runtime's next tick.
//!
//! # Invariants
//!
//! 1. Keys are fixed at construction. Writing an unknown key fails.
//! 2. Each key's [`SlotKind`] is decided once, at construction.
//! 3. Reads never observe a staged value.
//! 4. The old value of a key is the committed value before the first write
//!    of the current settle window, not the value before the latest write.
//!
//! # Lifetime
//!
//! `Signal` is a reference-counted handle. The arena node behind it is
//! released when the last handle drops; relays and link peers only hold
//! generational ids, so they never keep a signal alive.

use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use slotmap::new_key_type;

use crate::error::{FlowError, Result};
use crate::registry::{
    self, CallbackOutcome, Registry, SubscriberKey, SubscriptionHandle, Tag,
};
use crate::relay::RelayId;
use crate::scheduler::{OldValue, Runtime, Shared};
use crate::value::{Record, SlotKind, Value};

new_key_type! {
    /// Arena key of a signal. Stale keys never resolve to a newer signal.
    pub struct SignalId;
}

/// One key of a signal.
pub(crate) struct Slot {
    pub(crate) name: Rc<str>,
    pub(crate) kind: SlotKind,
    /// Committed value.
    pub(crate) current: Value,
    /// Pending value, present only if written since the last commit.
    pub(crate) staged: Option<Value>,
    /// Old value recorded by the first write since the last commit.
    pub(crate) staged_old: Option<Value>,
    /// Relay from the child signal currently adopted by a nested slot.
    pub(crate) relay: Option<RelayId>,
}

pub(crate) struct SignalNode {
    handle: Weak<SignalHandle>,
    pub(crate) slots: Vec<Slot>,
    index: AHashMap<Rc<str>, usize>,
    /// Old-value snapshot from the most recent commit.
    pub(crate) old: Record,
    pub(crate) dirty: bool,
    pub(crate) should_notify: bool,
    pub(crate) enqueued_epoch: u64,
    pub(crate) subscribers: Registry,
    pub(crate) links: Vec<SignalId>,
}

impl SignalNode {
    fn new(slots: Vec<Slot>) -> Self {
        let index = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (Rc::clone(&slot.name), i))
            .collect();
        let old = slots
            .iter()
            .map(|slot| (slot.name.to_string(), slot.current.clone()))
            .collect();
        Self {
            handle: Weak::new(),
            slots,
            index,
            old,
            dirty: false,
            should_notify: false,
            enqueued_epoch: 0,
            subscribers: Registry::default(),
            links: Vec::new(),
        }
    }

    pub(crate) fn index_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(crate) fn handle(&self) -> Option<Signal> {
        self.handle.upgrade().map(|inner| Signal { inner })
    }
}

struct SignalHandle {
    id: SignalId,
    shared: Rc<Shared>,
}

impl Drop for SignalHandle {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

/// Observable wrapper around a fixed-key record.
///
/// Cloning a `Signal` creates a new handle to the **same** signal.
#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalHandle>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("id", &self.inner.id).finish()
    }
}

impl Signal {
    /// Build a signal from `record` inside `runtime`.
    pub(crate) fn create(runtime: &Runtime, record: Record) -> Result<Self> {
        // Children are created before this node exists, so no engine borrow
        // is held across the recursion.
        let mut slots = Vec::with_capacity(record.len());
        let mut children = Vec::new();
        for (key, value) in record {
            let kind = SlotKind::classify(&key, &value)?;
            let value = match kind {
                SlotKind::Primitive => value,
                SlotKind::Nested => {
                    let child = runtime.adopt(&key, value)?;
                    children.push((slots.len(), child.id()));
                    Value::Signal(child)
                }
            };
            slots.push(Slot {
                name: Rc::from(key),
                kind,
                current: value,
                staged: None,
                staged_old: None,
                relay: None,
            });
        }

        let mut engine = runtime.shared.engine.borrow_mut();
        let id = engine.signals.insert(SignalNode::new(slots));
        let inner = Rc::new(SignalHandle {
            id,
            shared: Rc::clone(&runtime.shared),
        });
        if let Some(node) = engine.signals.get_mut(id) {
            node.handle = Rc::downgrade(&inner);
        }
        for (slot, child) in children {
            engine.ensure_relay(id, slot, child);
        }
        drop(engine);
        Ok(Self { inner })
    }

    #[must_use]
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// The runtime this signal belongs to.
    #[must_use]
    pub fn runtime(&self) -> Runtime {
        Runtime {
            shared: Rc::clone(&self.inner.shared),
        }
    }

    pub(crate) fn runtime_ptr_eq(&self, runtime: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner.shared, &runtime.shared)
    }

    /// Whether both handles refer to the same signal.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn with_node<R>(&self, f: impl FnOnce(&SignalNode) -> R) -> Result<R> {
        let engine = self.inner.shared.engine.borrow();
        engine
            .signals
            .get(self.inner.id)
            .map(f)
            .ok_or(FlowError::NotASignal {
                found: "released signal",
            })
    }

    fn with_node_mut<R>(&self, f: impl FnOnce(&mut SignalNode) -> R) -> Result<R> {
        let mut engine = self.inner.shared.engine.borrow_mut();
        engine
            .signals
            .get_mut(self.inner.id)
            .map(f)
            .ok_or(FlowError::NotASignal {
                found: "released signal",
            })
    }

    /// Committed value of `key`.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.with_node(|node| {
            node.index_of(key)
                .map(|index| node.slots[index].current.clone())
        })?
        .ok_or_else(|| FlowError::UnknownKey {
            key: key.to_owned(),
        })
    }

    /// Stage a write of `value` to `key`.
    ///
    /// The write is invisible to [`get`](Self::get) until the next tick. A
    /// plain record written into a nested slot is promoted to a new child
    /// signal first.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (name, kind) = self
            .with_node(|node| {
                node.index_of(key)
                    .map(|index| (Rc::clone(&node.slots[index].name), node.slots[index].kind))
            })?
            .ok_or_else(|| FlowError::UnknownKey {
                key: key.to_owned(),
            })?;

        let value = match (kind, value) {
            (SlotKind::Nested, value @ (Value::Record(_) | Value::Signal(_))) => {
                Value::Signal(self.runtime().adopt(key, value)?)
            }
            (_, Value::Opaque(opaque)) => {
                return Err(FlowError::UnsupportedValueKind {
                    key: key.to_owned(),
                    kind: opaque.type_name(),
                });
            }
            (kind, value) if !kind.accepts(&value) => {
                return Err(FlowError::KindMismatch {
                    key: key.to_owned(),
                    expected: kind.as_str(),
                    found: value.kind_name(),
                });
            }
            (_, value) => value,
        };

        self.inner
            .shared
            .engine
            .borrow_mut()
            .stage(self.inner.id, name, value, OldValue::Current);
        self.inner.shared.collect();
        Ok(())
    }

    /// Invoke the method stored under `key` with this signal as receiver.
    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value> {
        match self.get(key)? {
            Value::Method(method) => method.invoke(self, args),
            _ => Err(FlowError::NotCallable {
                key: key.to_owned(),
            }),
        }
    }

    /// Keys in construction order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.with_node(|node| node.slots.iter().map(|slot| slot.name.to_string()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.with_node(|node| node.index_of(key).is_some())
            .unwrap_or(false)
    }

    /// Committed values as a record.
    #[must_use]
    pub fn snapshot(&self) -> Record {
        self.with_node(|node| {
            node.slots
                .iter()
                .map(|slot| (slot.name.to_string(), slot.current.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Old-value snapshot from the most recent commit.
    #[must_use]
    pub fn old_values(&self) -> Record {
        self.with_node(|node| node.old.clone()).unwrap_or_default()
    }

    /// Whether a write is waiting for the next tick.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.with_node(|node| node.dirty).unwrap_or(false)
    }

    /// Number of registered callbacks, not counting bubbling relays.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.with_node(|node| node.subscribers.callback_count())
            .unwrap_or(0)
    }

    /// Register `callback`, invoked after every commit of this signal with
    /// the signal and its old-value snapshot.
    pub fn on<F, R>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Signal, &Record) -> R + 'static,
        R: CallbackOutcome,
    {
        self.subscribe(None, registry::boxed_callback(callback))
    }

    /// Register `callback` under `tag`, so it can be removed by tag.
    pub fn on_tagged<F, R>(&self, tag: impl Into<Tag>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Signal, &Record) -> R + 'static,
        R: CallbackOutcome,
    {
        self.subscribe(Some(tag.into()), registry::boxed_callback(callback))
    }

    fn subscribe(&self, tag: Option<Tag>, callback: registry::Callback) -> SubscriptionHandle {
        let mut engine = self.inner.shared.engine.borrow_mut();
        let id = engine.next_subscription_id();
        if let Some(node) = engine.signals.get_mut(self.inner.id) {
            node.subscribers.push_callback(id, tag.clone(), callback);
        }
        drop(engine);
        SubscriptionHandle::new(id, tag, self.clone())
    }

    /// Remove the first registration matching `key`. No-op if none does.
    pub fn off(&self, key: impl Into<SubscriberKey>) {
        self.remove_subscriber(&key.into());
    }

    pub(crate) fn remove_subscriber(&self, key: &SubscriberKey) -> bool {
        let removed = self
            .with_node_mut(|node| node.subscribers.remove(key))
            .unwrap_or(false);
        // Handles captured by the dropped callback were released under the
        // engine borrow.
        self.inner.shared.collect();
        removed
    }

    pub(crate) fn link_to(&self, peer: &Signal) {
        if self.ptr_eq(peer) {
            return;
        }
        let (a, b) = (self.id(), peer.id());
        let mut engine = self.inner.shared.engine.borrow_mut();
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = engine.signals.get_mut(from) {
                if !node.links.contains(&to) {
                    node.links.push(to);
                }
            }
        }
    }
}
