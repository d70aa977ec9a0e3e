//! Ordered property mappings and the override merge

use serde::ser::{Serialize, SerializeMap, Serializer};

/// An ordered mapping from property key to property value.
///
/// Keys are unique. Iteration follows first insertion order, which is also
/// the order fields are written out in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    entries: Vec<(String, String)>,
}

impl PropertyMap {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Set a value. An existing key keeps its position; a new key is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate over `(key, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

impl<K, V> FromIterator<(K, V)> for PropertyMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for PropertyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Merge overrides onto a base mapping, returning a new mapping.
///
/// Overridden keys keep their position in `base`, untouched keys keep their
/// value, and keys unknown to `base` are appended in the order supplied.
/// `base` itself is never modified.
pub fn merge<'a, I>(base: &PropertyMap, overrides: I) -> PropertyMap
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key, value);
    }
    merged
}
