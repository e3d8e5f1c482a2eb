#![forbid(unsafe_code)]

//! Update scheduler.
//!
//! Owns the signal and relay arenas, the double-buffered pending queue and
//! the epoch counter. Writes never touch committed values directly: they
//! land in a signal's staging buffer and enqueue the signal. A tick then
//! runs two phases over the queue it swapped out:
//!
//! 1. **Commit** every queued signal, most recently enqueued first.
//! 2. **Notify** the subscribers of every committed signal, in the same
//!    order, with the old-value snapshot taken during commit.
//!
//! Committing everything before notifying anyone means a callback always
//! reads the post-tick value of every signal that changed in the tick.
//!
//! [`Runtime::update_all`] repeats ticks until the live queue stays empty.
//! Writes made by callbacks go into the fresh live buffer and commit in the
//! following tick of the same settle.
//!
//! # Invariants
//!
//! 1. Outside a commit, every slot's committed value and the signal's
//!    old-value snapshot reflect the last completed commit.
//! 2. The epoch increments exactly once per tick.
//! 3. A signal enqueued in a later epoch than the tick being run stays
//!    dirty and commits in the next tick.
//! 4. A settle runs at most `max_ticks` ticks.
//!
//! # Failure Modes
//!
//! - **Cyclic write graph**: a callback that always writes back into a
//!   signal it observes never reaches quiescence. `update_all` stops after
//!   `max_ticks` and returns [`FlowError::RunawayChain`].
//! - **Re-entrant settle**: `update_all` called from inside a callback keeps
//!   draining the same live queue and shares the outer settle's tick budget.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use slotmap::SlotMap;
use tracing::{debug, error, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{FlowError, Result, SubscriberFailure};
use crate::registry::{self, Subscriber};
use crate::relay::{Relay, RelayId};
use crate::signal::{Signal, SignalId, SignalNode};
use crate::value::{Record, SlotKind, Value};

/// Where the old value of a staged key comes from.
#[derive(Debug, Clone)]
pub(crate) enum OldValue {
    /// The slot's committed value.
    Current,
    /// An explicit snapshot, used when a child bubbles up.
    Given(Value),
    /// The slot's committed value unless it is unset, else the given one.
    /// Used for writes mirrored across a link.
    CurrentOr(Value),
}

struct PendingWrite {
    target: SignalId,
    key: Rc<str>,
    value: Value,
    old: OldValue,
}

/// Arena and queue state. Always accessed through `Shared::engine`.
pub(crate) struct Engine {
    pub(crate) signals: SlotMap<SignalId, SignalNode>,
    pub(crate) relays: SlotMap<RelayId, Relay>,
    /// Receives enqueues.
    live: Vec<SignalId>,
    /// Second buffer, swapped in as `live` at the start of a tick.
    spare: Vec<SignalId>,
    epoch: u64,
    next_subscription: u64,
}

impl Engine {
    fn new() -> Self {
        Self {
            signals: SlotMap::with_key(),
            relays: SlotMap::with_key(),
            live: Vec::new(),
            spare: Vec::new(),
            epoch: 1,
            next_subscription: 0,
        }
    }

    pub(crate) fn next_subscription_id(&mut self) -> registry::SubscriptionId {
        self.next_subscription += 1;
        registry::SubscriptionId(self.next_subscription)
    }

    /// Stage `value` under `key` of `target` and mirror it to link peers.
    ///
    /// A write whose value is already staged on a signal stops there: it is
    /// either a duplicate or a mirrored write coming back around a link.
    pub(crate) fn stage(&mut self, target: SignalId, key: Rc<str>, value: Value, old: OldValue) {
        let mut work = vec![PendingWrite {
            target,
            key,
            value,
            old,
        }];

        while let Some(PendingWrite {
            target,
            key,
            value,
            old,
        }) = work.pop()
        {
            let epoch = self.epoch;
            let Some(node) = self.signals.get_mut(target) else {
                continue;
            };
            let Some(index) = node.index_of(&key) else {
                debug!(signal = ?target, %key, "link peer has no such key, not mirrored");
                continue;
            };
            let slot = &mut node.slots[index];
            if !slot.kind.accepts(&value) {
                debug!(
                    signal = ?target,
                    %key,
                    slot = slot.kind.as_str(),
                    found = value.kind_name(),
                    "link peer slot kind differs, not mirrored"
                );
                continue;
            }
            if slot.staged.as_ref().is_some_and(|staged| staged.same(&value)) {
                continue;
            }

            if slot.staged.is_none() {
                slot.staged_old = Some(match old {
                    OldValue::Current => slot.current.clone(),
                    OldValue::Given(old) => old,
                    OldValue::CurrentOr(fallback) if slot.current.is_unset() => fallback,
                    OldValue::CurrentOr(_) => slot.current.clone(),
                });
            }
            let mirror_old = slot.current.clone();
            let child = match (&value, slot.kind) {
                (Value::Signal(child), SlotKind::Nested) => Some(child.id()),
                _ => None,
            };
            slot.staged = Some(value.clone());

            node.dirty = true;
            node.enqueued_epoch = epoch;
            for &peer in &node.links {
                work.push(PendingWrite {
                    target: peer,
                    key: Rc::clone(&key),
                    value: value.clone(),
                    old: OldValue::CurrentOr(mirror_old.clone()),
                });
            }
            self.live.push(target);

            if let Some(child) = child {
                self.ensure_relay(target, index, child);
            }
        }
    }

    /// Swap the live queue out and advance the epoch.
    fn begin_tick(&mut self) -> (Vec<SignalId>, u64) {
        let mut processing = std::mem::take(&mut self.spare);
        std::mem::swap(&mut processing, &mut self.live);
        let epoch = self.epoch;
        self.epoch += 1;
        (processing, epoch)
    }

    fn end_tick(&mut self, mut processing: Vec<SignalId>) {
        processing.clear();
        self.spare = processing;
    }

    /// Commit phase: move staged values into committed slots and take the
    /// old-value snapshot.
    fn commit(&mut self, processing: &[SignalId], epoch: u64) {
        let mut rewire = Vec::new();
        for &id in processing.iter().rev() {
            let Some(node) = self.signals.get_mut(id) else {
                continue;
            };
            if !node.dirty || node.enqueued_epoch > epoch {
                continue;
            }
            node.dirty = false;

            let mut old = Record::with_capacity(node.slots.len());
            for (index, slot) in node.slots.iter_mut().enumerate() {
                let previous = match slot.staged.take() {
                    Some(value) => {
                        let previous = std::mem::replace(&mut slot.current, value);
                        if let (SlotKind::Nested, Value::Signal(child)) = (slot.kind, &slot.current)
                        {
                            rewire.push((id, index, child.id()));
                        }
                        slot.staged_old.take().unwrap_or(previous)
                    }
                    None => slot.current.clone(),
                };
                old.insert(slot.name.as_ref(), previous);
            }
            // A signal committed twice before it got to notify keeps the
            // snapshot from its first commit.
            if !node.should_notify {
                node.old = old;
            }
            node.should_notify = true;
        }
        for (parent, slot, child) in rewire {
            self.ensure_relay(parent, slot, child);
        }
    }

    pub(crate) fn remove_signal(&mut self, id: SignalId) -> Option<SignalNode> {
        let node = self.signals.remove(id)?;
        for relay in node
            .subscribers
            .relay_ids()
            .chain(node.slots.iter().filter_map(|slot| slot.relay))
        {
            self.detach_relay(relay);
        }
        Some(node)
    }
}

pub(crate) struct Shared {
    pub(crate) engine: RefCell<Engine>,
    /// Signals whose last handle dropped while the engine was borrowed.
    graveyard: RefCell<Vec<SignalId>>,
    collecting: Cell<bool>,
    settle_depth: Cell<u32>,
    settle_ticks: Cell<u32>,
    config: SchedulerConfig,
}

impl Shared {
    pub(crate) fn release(&self, id: SignalId) {
        self.graveyard.borrow_mut().push(id);
        self.collect();
    }

    /// Remove released signals from the arena.
    ///
    /// Dropping a node may release its children, which land back in the
    /// graveyard and are handled by the same loop.
    pub(crate) fn collect(&self) {
        if self.collecting.get() {
            return;
        }
        self.collecting.set(true);
        loop {
            let next = self.graveyard.borrow_mut().pop();
            let Some(id) = next else {
                break;
            };
            let node = match self.engine.try_borrow_mut() {
                Ok(mut engine) => engine.remove_signal(id),
                Err(_) => {
                    debug!(signal = ?id, "engine busy, release deferred");
                    self.graveyard.borrow_mut().push(id);
                    break;
                }
            };
            drop(node);
        }
        self.collecting.set(false);
    }
}

/// A scheduler instance.
///
/// Cloning a `Runtime` creates a new handle to the **same** scheduler.
/// Signals keep their runtime alive.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Rc<Shared>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("epoch", &self.epoch())
            .field("pending", &self.pending())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Runtime configured from the environment, falling back to defaults
    /// when the environment holds an invalid configuration.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(SchedulerConfig::from_env()).unwrap_or_else(|err| {
            warn!(%err, "falling back to default scheduler config");
            Self::new()
        })
    }

    fn build(config: SchedulerConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                engine: RefCell::new(Engine::new()),
                graveyard: RefCell::new(Vec::new()),
                collecting: Cell::new(false),
                settle_depth: Cell::new(0),
                settle_ticks: Cell::new(0),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.shared.config
    }

    /// Current epoch. Increments once per tick.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.shared.engine.borrow().epoch
    }

    /// Number of entries in the live pending queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.engine.borrow().live.len()
    }

    /// Number of signals alive in this runtime.
    #[must_use]
    pub fn live_signals(&self) -> usize {
        self.shared.engine.borrow().signals.len()
    }

    /// Number of installed bubbling relays.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.shared.engine.borrow().relays.len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run exactly one tick.
    ///
    /// Returns [`FlowError::Subscribers`] if any callback failed; all other
    /// callbacks still ran.
    pub fn update(&self) -> Result<()> {
        let failures = self.tick();
        self.shared.collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Subscribers { failures })
        }
    }

    /// Run ticks until no signal is pending.
    ///
    /// Subscriber failures are collected across the whole settle and
    /// returned at the end. A runaway chain aborts the settle immediately.
    pub fn update_all(&self) -> Result<()> {
        let shared = &self.shared;
        let depth = shared.settle_depth.get();
        if depth == 0 {
            shared.settle_ticks.set(0);
        }
        shared.settle_depth.set(depth + 1);
        let result = self.settle();
        shared.settle_depth.set(depth);
        result
    }

    fn settle(&self) -> Result<()> {
        let shared = &self.shared;
        let limit = shared.config.max_ticks;
        let mut failures = Vec::new();
        loop {
            let ticks = shared.settle_ticks.get();
            if ticks >= limit {
                error!(limit, pending = self.pending(), "too long update chain");
                return Err(FlowError::RunawayChain { limit });
            }
            shared.settle_ticks.set(ticks + 1);
            failures.extend(self.tick());
            shared.collect();
            if self.pending() == 0 {
                break;
            }
        }
        debug!(
            ticks = shared.settle_ticks.get(),
            depth = shared.settle_depth.get(),
            "settled"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Subscribers { failures })
        }
    }

    fn tick(&self) -> Vec<SubscriberFailure> {
        let (processing, epoch) = self.shared.engine.borrow_mut().begin_tick();
        trace!(epoch, queued = processing.len(), "tick");

        self.shared.engine.borrow_mut().commit(&processing, epoch);

        let mut failures = Vec::new();
        for &id in processing.iter().rev() {
            self.notify(id, &mut failures);
        }

        self.shared.engine.borrow_mut().end_tick(processing);
        failures
    }

    /// Notify phase for one signal. No engine borrow is held while a
    /// callback runs.
    fn notify(&self, id: SignalId, failures: &mut Vec<SubscriberFailure>) {
        let prepared = {
            let mut engine = self.shared.engine.borrow_mut();
            let Some(node) = engine.signals.get_mut(id) else {
                return;
            };
            if !node.should_notify {
                return;
            }
            node.should_notify = false;
            node.handle()
                .map(|signal| (signal, node.old.clone(), node.subscribers.snapshot()))
        };
        let Some((signal, old, subscribers)) = prepared else {
            return;
        };

        for subscriber in &subscribers {
            match subscriber {
                Subscriber::Callback { id, tag, callback } => {
                    if let Some(failure) =
                        registry::invoke(*id, tag.as_ref(), callback, &signal, &old)
                    {
                        warn!(signal = ?signal.id(), %failure, "subscriber failed");
                        failures.push(failure);
                    }
                }
                Subscriber::Relay(relay) => {
                    self.shared.engine.borrow_mut().bubble(*relay, &signal, &old);
                }
            }
        }
    }

    /// Wrap `record` as a signal owned by this runtime.
    ///
    /// Every key is classified once; nested records become child signals
    /// relaying into this one. Fails with
    /// [`FlowError::UnsupportedValueKind`] if any value cannot be stored.
    pub fn signal(&self, record: Record) -> Result<Signal> {
        Signal::create(self, record)
    }

    /// Promote a value written into a nested slot into a child signal of
    /// this runtime.
    pub(crate) fn adopt(&self, key: &str, value: Value) -> Result<Signal> {
        match value {
            Value::Record(record) => self.signal(record),
            Value::Signal(signal) if signal.runtime_ptr_eq(self) => Ok(signal),
            Value::Signal(_) => Err(FlowError::ForeignRuntime),
            Value::Opaque(opaque) => Err(FlowError::UnsupportedValueKind {
                key: key.to_owned(),
                kind: opaque.type_name(),
            }),
            other => Err(FlowError::KindMismatch {
                key: key.to_owned(),
                expected: SlotKind::Nested.as_str(),
                found: other.kind_name(),
            }),
        }
    }
}
