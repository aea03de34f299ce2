/// Per-dump storage for computed fields.
///
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::field::Field;

/// A cache of fields computed for a single dump.
///
/// Unlike a general purpose cache, nothing is ever evicted. A dump's cache only grows over its
/// lifetime and an entry, once stored, never changes. Callers are handed the stored `Arc`, so
/// repeated lookups of the same key return the same allocation.
///
/// The cache is thread safe. If two threads race to store the same key, the first one to take the
/// lock wins and both get back the winner's value.
///
#[derive(Default)]
pub struct FieldCache {
    entries: Mutex<HashMap<String, Arc<Field>>>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Field>> {
        self.entries.lock().get(key).map(Arc::clone)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Store `field` under `key`, unless something is already stored there.
    ///
    /// Returns whatever is stored under `key` after the call.
    ///
    pub fn insert(&self, key: &str, field: Field) -> Arc<Field> {
        let mut entries = self.entries.lock();
        let stored = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(field));

        Arc::clone(stored)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Names of all stored entries, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// A point in time copy of the stored entries. The fields themselves are shared, not copied.
    pub fn entries(&self) -> Vec<(String, Arc<Field>)> {
        self.entries
            .lock()
            .iter()
            .map(|(key, field)| (key.clone(), Arc::clone(field)))
            .collect()
    }
}
