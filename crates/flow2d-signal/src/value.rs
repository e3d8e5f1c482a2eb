#![forbid(unsafe_code)]

//! Dynamic values stored in signal slots.
//!
//! A signal wraps a record whose keys are fixed at construction. Each key's
//! value is classified exactly once into a [`SlotKind`]:
//!
//! | Variant                                        | Slot kind            |
//! |------------------------------------------------|----------------------|
//! | `Unset`, `Bool`, `Number`, `Text`, `List`, `Method` | [`SlotKind::Primitive`] |
//! | `Record`, `Signal`                             | [`SlotKind::Nested`] |
//! | `Opaque`                                       | rejected             |
//!
//! # Equality
//!
//! `Value` has two notions of equality:
//!
//! - [`PartialEq`] is structural and is what callers and tests want.
//! - [`Value::same`] is identity: numbers compare by bit pattern, lists and
//!   methods by shared allocation, signals by arena slot. The staging buffer
//!   uses it to recognise a mirrored write coming back around a link.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::{FlowError, Result};
use crate::signal::Signal;

/// Body of an executable value. Receives the owning signal as receiver.
pub type MethodFn = dyn Fn(&Signal, &[Value]) -> Result<Value>;

/// Executable value stored in a signal slot.
///
/// Invoked through [`Signal::call`] with the owning signal bound as the
/// receiver, so a method can read and write sibling keys.
#[derive(Clone)]
pub struct Method(Rc<MethodFn>);

impl Method {
    /// Wrap a closure as a method value.
    pub fn new(f: impl Fn(&Signal, &[Value]) -> Result<Value> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the method with `receiver` bound.
    pub fn invoke(&self, receiver: &Signal, args: &[Value]) -> Result<Value> {
        (self.0)(receiver, args)
    }

    /// Whether both handles point to the same closure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method(..)")
    }
}

/// A host object the engine cannot look inside.
///
/// Opaque values can be carried around in records but never stored in a
/// signal slot; construction fails with
/// [`FlowError::UnsupportedValueKind`].
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    value: Rc<dyn Any>,
}

impl Opaque {
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Rc::new(value),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

/// A value held by a record or a signal slot.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Unset,
    Bool(bool),
    Number(f64),
    Text(Rc<str>),
    /// Ordered sequence. Written as a whole, never observed element-wise.
    List(Rc<Vec<Value>>),
    Method(Method),
    /// Plain record, promoted to a child signal when adopted by a slot.
    Record(Record),
    Signal(Signal),
    Opaque(Opaque),
}

/// Write strategy chosen for a key when its signal is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Stage the raw value.
    Primitive,
    /// Promote to a child signal, stage it and relay its settles upward.
    Nested,
}

impl SlotKind {
    /// Classify the initial value of `key`.
    pub(crate) fn classify(key: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Unset
            | Value::Bool(_)
            | Value::Number(_)
            | Value::Text(_)
            | Value::List(_)
            | Value::Method(_) => Ok(Self::Primitive),
            Value::Record(_) | Value::Signal(_) => Ok(Self::Nested),
            Value::Opaque(opaque) => Err(FlowError::UnsupportedValueKind {
                key: key.to_owned(),
                kind: opaque.type_name(),
            }),
        }
    }

    /// Whether a later write of `value` fits this slot.
    pub(crate) fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Primitive => !matches!(
                value,
                Value::Record(_) | Value::Signal(_) | Value::Opaque(_)
            ),
            Self::Nested => matches!(value, Value::Record(_) | Value::Signal(_)),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primitive => "primitive",
            Self::Nested => "nested",
        }
    }
}

impl Value {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Method(_) => "method",
            Self::Record(_) => "record",
            Self::Signal(_) => "signal",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Identity comparison used by the staging buffer.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => a.ptr_eq(b),
            (Self::Signal(a), Self::Signal(b)) => a.ptr_eq(b),
            (Self::Opaque(a), Self::Opaque(b)) => Rc::ptr_eq(&a.value, &b.value),
            // Plain records are promoted before staging, so two of them are
            // never the same staged value.
            _ => false,
        }
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(&**s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_signal(&self) -> Option<&Signal> {
        match self {
            Self::Signal(signal) => Some(signal),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Self::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Read `key` from a record or from a signal's committed values.
    ///
    /// Returns `None` for every other variant and for missing keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Record(record) => record.get(key).cloned(),
            Self::Signal(signal) => signal.get(key).ok(),
            _ => None,
        }
    }

    /// Follow a key path through nested records and signals.
    #[must_use]
    pub fn path(&self, keys: &[&str]) -> Option<Value> {
        let mut current = self.clone();
        for key in keys {
            current = current.get(key)?;
        }
        Some(current)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Method(a), Self::Method(b)) => a.ptr_eq(b),
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Signal(a), Self::Signal(b)) => a.ptr_eq(b),
            (Self::Opaque(a), Self::Opaque(b)) => Rc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        self.as_f64() == Some(*other)
    }
}

impl PartialEq<i32> for Value {
    fn eq(&self, other: &i32) -> bool {
        self.as_f64() == Some(f64::from(*other))
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        self.as_bool() == Some(*other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

/// Values beyond ±2^53 are rounded to the nearest representable `f64`.
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(Rc::from(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(Rc::new(values.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unset, Into::into)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<Signal> for Value {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<&Signal> for Value {
    fn from(signal: &Signal) -> Self {
        Self::Signal(signal.clone())
    }
}

impl From<Method> for Value {
    fn from(method: Method) -> Self {
        Self::Method(method)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Self::Opaque(opaque)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Ordered key/value record.
///
/// Used both as the literal a signal is built from and as the old-value
/// snapshot handed to subscribers. Key order is insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether `key` is missing or holds [`Value::Unset`].
    #[must_use]
    pub fn is_absent(&self, key: &str) -> bool {
        self.get(key).is_none_or(Value::is_unset)
    }

    /// Follow a key path through nested records and signals.
    #[must_use]
    pub fn path(&self, keys: &[&str]) -> Option<Value> {
        let (first, rest) = keys.split_first()?;
        self.get(first)?.path(rest)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Build a [`Record`] from `key: value` pairs.
///
/// ```
/// use flow2d_signal::record;
///
/// let r = record! { value: 42, nested: record! { flag: true } };
/// assert_eq!(r.len(), 2);
/// assert_eq!(r.path(&["nested", "flag"]).unwrap(), true);
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($key:ident : $value:expr),+ $(,)?) => {
        $crate::Record::new()$(.with(stringify!($key), $value))+
    };
}
