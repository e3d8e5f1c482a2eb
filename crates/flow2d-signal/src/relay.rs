#![forbid(unsafe_code)]

//! Nested bubbling relays.
//!
//! When a slot adopts a child signal, the parent registers a relay record in
//! the runtime's relay arena and the child lists the relay among its
//! subscribers. Whenever the child settles, the relay stages the same child
//! back onto the parent's key with the child's old-value snapshot as the old
//! value, so the parent notifies exactly once per tick no matter how many of
//! the child's keys changed.
//!
//! Relays are keyed by `(parent, slot)` and refer to both ends by
//! generational id. Replacing a slot's child removes the old relay record
//! from the arena and its entry from the old child's subscriber list, so a
//! detached child carries no trace of its former parent. A relay that
//! disappears while its child is mid-notify is skipped and pruned there.

use slotmap::new_key_type;
use tracing::debug;

use crate::scheduler::{Engine, OldValue};
use crate::signal::{Signal, SignalId};
use crate::value::{Record, Value};

new_key_type! {
    /// Handle into the relay arena.
    pub struct RelayId;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Relay {
    pub(crate) parent: SignalId,
    pub(crate) slot: usize,
    pub(crate) child: SignalId,
}

impl Engine {
    /// Make sure slot `slot` of `parent` relays from `child`, replacing any
    /// relay it had from a different child.
    pub(crate) fn ensure_relay(&mut self, parent: SignalId, slot: usize, child: SignalId) {
        let Some(current) = self
            .signals
            .get(parent)
            .and_then(|node| node.slots.get(slot))
            .map(|slot| slot.relay)
        else {
            return;
        };

        if let Some(relay) = current {
            if self.relays.get(relay).is_some_and(|r| r.child == child) {
                return;
            }
            self.detach_relay(relay);
        }

        let Some(child_node) = self.signals.get_mut(child) else {
            return;
        };
        let relay = self.relays.insert(Relay {
            parent,
            slot,
            child,
        });
        child_node.subscribers.push_relay(relay);
        if let Some(slot) = self
            .signals
            .get_mut(parent)
            .and_then(|node| node.slots.get_mut(slot))
        {
            slot.relay = Some(relay);
        }
        debug!(?parent, ?child, ?relay, "relay installed");
    }

    /// Remove `relay` from the arena and from both of its ends.
    pub(crate) fn detach_relay(&mut self, relay: RelayId) {
        let Some(Relay {
            parent,
            slot,
            child,
        }) = self.relays.remove(relay)
        else {
            return;
        };
        if let Some(node) = self.signals.get_mut(child) {
            node.subscribers.remove_relay(relay);
        }
        if let Some(slot) = self
            .signals
            .get_mut(parent)
            .and_then(|node| node.slots.get_mut(slot))
            .filter(|slot| slot.relay == Some(relay))
        {
            slot.relay = None;
        }
        debug!(?parent, ?child, ?relay, "relay detached");
    }

    /// Forward a settle of `child` to the parent behind `relay`.
    pub(crate) fn bubble(&mut self, relay: RelayId, child: &Signal, old: &Record) {
        let Some(&Relay { parent, slot, .. }) = self.relays.get(relay) else {
            if let Some(node) = self.signals.get_mut(child.id()) {
                node.subscribers.remove_relay(relay);
            }
            return;
        };
        let Some(key) = self
            .signals
            .get(parent)
            .and_then(|node| node.slots.get(slot))
            .map(|slot| slot.name.clone())
        else {
            return;
        };
        self.stage(
            parent,
            key,
            Value::Signal(child.clone()),
            OldValue::Given(Value::Record(old.clone())),
        );
    }
}
