#![forbid(unsafe_code)]

//! Named components.
//!
//! A component is a signal `{ parent, name }`. `parent` starts as an empty
//! record and holds the owning entity's signal once the component is added
//! to an entity; since it is a nested slot, every settle of the entity also
//! notifies its components.

use flow2d_signal::{Record, Result, Runtime, Signal, SubscriptionHandle, Value, record};

use crate::entity::Entity;

/// A named signal that can belong to one [`Entity`].
///
/// Cloning yields another handle to the same component.
#[derive(Debug, Clone)]
pub struct Component {
    signal: Signal,
}

impl Component {
    /// Create a component on the thread's default runtime.
    pub fn new(name: &str) -> Result<Self> {
        Self::new_in(&flow2d_signal::runtime(), name)
    }

    pub fn new_in(runtime: &Runtime, name: &str) -> Result<Self> {
        let signal = runtime.signal(record! { parent: Record::new(), name: name })?;
        Ok(Self { signal })
    }

    /// Wrap an existing signal, e.g. one read back out of an entity's
    /// component list.
    #[must_use]
    pub fn from_signal(signal: Signal) -> Self {
        Self { signal }
    }

    #[must_use]
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Committed name.
    #[must_use]
    pub fn name(&self) -> String {
        self.signal
            .get("name")
            .ok()
            .and_then(|name| name.as_str().map(str::to_owned))
            .unwrap_or_default()
    }

    /// Committed owner, or `None` while the parent is still the empty
    /// placeholder.
    #[must_use]
    pub fn parent(&self) -> Option<Signal> {
        let parent = self.signal.get("parent").ok()?;
        let parent = parent.as_signal()?;
        (!parent.keys().is_empty()).then(|| parent.clone())
    }

    /// Stage `entity` as this component's owner.
    pub fn set_parent(&self, entity: &Entity) -> Result<()> {
        self.signal.set("parent", entity.signal())
    }

    /// Stage an empty placeholder as the owner.
    pub fn clear_parent(&self) -> Result<()> {
        self.signal.set("parent", Record::new())
    }

    /// Stage a new name.
    pub fn rename(&self, name: &str) -> Result<()> {
        self.signal.set("name", name)
    }

    pub fn on(&self, callback: impl Fn(&Component, &Record) + 'static) -> SubscriptionHandle {
        self.signal
            .on(move |signal, old| callback(&Component::from_signal(signal.clone()), old))
    }

    /// Same component, compared by signal identity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.signal.ptr_eq(&other.signal)
    }
}

impl From<&Component> for Value {
    fn from(component: &Component) -> Self {
        Value::Signal(component.signal.clone())
    }
}
