//! Typed attribute bags carried by every item node.
//!
//! Keys are unique and keep their insertion order, so an item that is decoded and
//! written back emits its attributes in the same sequence it was read with.

use serde::{Deserialize, Serialize};

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
    Flag(bool),
}

impl AttributeValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AttributeValue::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

/// Insertion-ordered map of attribute name to value.
///
/// Bags are small (a handful of entries per item), so a vector with linear lookup
/// beats a hash map here and keeps ordering for free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMap {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`. An existing key keeps its position and the previous
    /// value is returned.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let key = key.into();
        let value = value.into();
        if let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(slot, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for AttributeMap
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
