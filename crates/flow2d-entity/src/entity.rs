#![forbid(unsafe_code)]

//! Entities: ordered sets of named components.
//!
//! An entity is a signal `{ components }` whose value is the list of its
//! component signals, plus a name-keyed lookup kept beside the signal.
//! Membership changes rewrite the whole list, so subscribers of the entity
//! see one notification per settle with the previous list as old value.
//!
//! # Ownership
//!
//! An entity holds its components and each member holds the entity through
//! its `parent` key. The pair stays alive until the component is removed
//! with [`Entity::remove_component`] or [`Entity::clear`].

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use flow2d_signal::{Record, Result, Runtime, Signal, SubscriptionHandle, Value, record};
use tracing::debug;

use crate::component::Component;

#[derive(Debug, Default)]
struct Membership {
    order: Vec<Component>,
    by_name: AHashMap<String, Component>,
}

impl Membership {
    fn as_value(&self) -> Value {
        Value::List(Rc::new(self.order.iter().map(Value::from).collect()))
    }
}

/// Handle to an entity. Clones share the signal and the lookup.
#[derive(Debug, Clone)]
pub struct Entity {
    signal: Signal,
    members: Rc<RefCell<Membership>>,
}

impl Entity {
    /// Create an entity owning `components`, on the thread's default
    /// runtime.
    pub fn new(components: impl IntoIterator<Item = Component>) -> Result<Self> {
        Self::new_in(&flow2d_signal::runtime(), components)
    }

    pub fn new_in(
        runtime: &Runtime,
        components: impl IntoIterator<Item = Component>,
    ) -> Result<Self> {
        let signal = runtime.signal(record! { components: Value::List(Rc::default()) })?;
        let entity = Self {
            signal,
            members: Rc::default(),
        };
        for component in components {
            entity.adopt(component)?;
        }
        entity.publish()?;
        Ok(entity)
    }

    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Components as of the last commit, in insertion order.
    #[must_use]
    pub fn components(&self) -> Vec<Component> {
        self.signal
            .get("components")
            .ok()
            .and_then(|list| {
                list.as_list().map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_signal)
                        .map(|signal| Component::from_signal(signal.clone()))
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    /// Member registered under `name`. Reflects additions immediately.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<Component> {
        self.members.borrow().by_name.get(name).cloned()
    }

    /// Add `component` and stage the new member list.
    ///
    /// A later component with the same name replaces the earlier one in the
    /// lookup; both stay in the list.
    pub fn add_component(&self, component: Component) -> Result<()> {
        self.adopt(component)?;
        self.publish()
    }

    /// Remove exactly `component`. Returns whether it was a member.
    pub fn remove_component(&self, component: &Component) -> Result<bool> {
        let removed = {
            let mut members = self.members.borrow_mut();
            let Some(index) = members.order.iter().position(|c| c.ptr_eq(component)) else {
                return Ok(false);
            };
            let removed = members.order.remove(index);
            // The lookup is keyed by the name at insertion time, which a
            // rename since then does not change.
            members.by_name.retain(|_, c| !c.ptr_eq(&removed));
            removed
        };
        removed.clear_parent()?;
        debug!(entity = ?self.signal.id(), component = %removed.name(), "component removed");
        self.publish()?;
        Ok(true)
    }

    /// Remove every component.
    pub fn clear(&self) -> Result<()> {
        let removed = std::mem::take(&mut *self.members.borrow_mut());
        for component in &removed.order {
            component.clear_parent()?;
        }
        self.publish()
    }

    pub fn on(&self, callback: impl Fn(&Signal, &Record) + 'static) -> SubscriptionHandle {
        self.signal.on(callback)
    }

    fn adopt(&self, component: Component) -> Result<()> {
        component.set_parent(self)?;
        let mut members = self.members.borrow_mut();
        members.by_name.insert(component.name(), component.clone());
        members.order.push(component);
        Ok(())
    }

    fn publish(&self) -> Result<()> {
        let list = self.members.borrow().as_value();
        self.signal.set("components", list)
    }
}
