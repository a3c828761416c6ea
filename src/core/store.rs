//! Keyed state store shared by all engines.
//!
//! A thin wrapper over an insertion-ordered map so that every full scan and
//! every introspection listing visits keys in first-seen order.

use crate::source::types::GroupKey;
use indexmap::IndexMap;

/// Mapping from group key to per-key engine state.
#[derive(Debug, Clone)]
pub struct KeyedStore<S> {
    entries: IndexMap<GroupKey, S>,
}

impl<S> Default for KeyedStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> KeyedStore<S> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Get the state for `key`, creating it with `init` on first reference.
    pub fn fetch_or_create(&mut self, key: &str, init: impl FnOnce() -> S) -> &mut S {
        match self.entries.get_index_of(key) {
            Some(index) => &mut self.entries[index],
            None => self.entries.entry(key.to_owned()).or_insert_with(init),
        }
    }

    pub fn get(&self, key: &str) -> Option<&S> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &S> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
