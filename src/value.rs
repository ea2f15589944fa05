//! Dynamic values exchanged between tasks, promises and the scheduler.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Fault;

/// Key of a [`Keyed`] collection entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Index(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(value)
    }
}

impl core::fmt::Display for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Ordered collection with unique keys.
///
/// Entries keep insertion order. [`Keyed::push`] appends under the next free
/// index, one past the largest index key seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    entries: Vec<(Key, T)>,
    next_index: usize,
}

impl<T> Keyed<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `value` under the next free index and returns that key.
    pub fn push(&mut self, value: T) -> Key {
        let key = Key::Index(self.next_index);
        self.next_index += 1;
        self.entries.push((key.clone(), value));
        key
    }

    /// Inserts `value` at `key`, returning the value it replaced.
    /// A replaced entry keeps its position.
    pub fn insert(&mut self, key: impl Into<Key>, value: T) -> Option<T> {
        let key = key.into();
        if let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(core::mem::replace(slot, value));
        }

        if let Key::Index(index) = key {
            self.next_index = self.next_index.max(index + 1);
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&T> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &T)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Transforms every value, keeping keys and order.
    pub fn map<U>(self, mut f: impl FnMut(&Key, T) -> U) -> Keyed<U> {
        Keyed {
            entries: self
                .entries
                .into_iter()
                .map(|(k, v)| {
                    let u = f(&k, v);
                    (k, u)
                })
                .collect(),
            next_index: self.next_index,
        }
    }
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<Key>, T> FromIterator<(K, T)> for Keyed<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut keyed = Keyed::new();
        for (k, v) in iter {
            keyed.insert(k, v);
        }
        keyed
    }
}

impl<K: Into<Key>, T, const N: usize> From<[(K, T); N]> for Keyed<T> {
    fn from(value: [(K, T); N]) -> Self {
        value.into_iter().collect()
    }
}

impl<T> From<Vec<T>> for Keyed<T> {
    fn from(value: Vec<T>) -> Self {
        let mut keyed = Keyed::new();
        for v in value {
            keyed.push(v);
        }
        keyed
    }
}

impl<T> IntoIterator for Keyed<T> {
    type Item = (Key, T);
    type IntoIter = alloc::vec::IntoIter<(Key, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Value produced by tasks and carried by promises.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(Keyed<Value>),
    /// Fault carried as data, e.g. a rejected join member.
    Fault(Fault),
}

impl Value {
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Keyed<Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            Value::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Splits fault-typed values off into `Err`.
    pub fn into_result(self) -> Result<Value, Fault> {
        match self {
            Value::Fault(fault) => Err(fault),
            value => Ok(value),
        }
    }
}

impl From<Result<Value, Fault>> for Value {
    fn from(value: Result<Value, Fault>) -> Self {
        value.unwrap_or_else(Value::Fault)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Keyed<Value>> for Value {
    fn from(value: Keyed<Value>) -> Self {
        Value::Map(value)
    }
}

impl From<Fault> for Value {
    fn from(value: Fault) -> Self {
        Value::Fault(value)
    }
}
