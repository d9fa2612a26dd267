//! In-memory cache of live save records
//!
//! Holds one shared instance per (record type, save name) so repeated loads
//! hand out the same object instead of reading the disk again.

use super::types::Shared;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type CacheKey = (TypeId, String);

#[derive(Default)]
pub struct SaveCache {
    entries: RwLock<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>,
}

impl SaveCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record of type `T` for `name`, if any
    pub fn try_get<T: Send + 'static>(&self, name: &str) -> Option<Shared<T>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&(TypeId::of::<T>(), name.to_string()))?;
        Arc::clone(entry).downcast::<std::sync::Mutex<T>>().ok()
    }

    /// Replaces the cached record of type `T` for `name`
    pub fn set<T: Send + 'static>(&self, name: &str, record: Shared<T>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (TypeId::of::<T>(), name.to_string()),
            record as Arc<dyn Any + Send + Sync>,
        );
    }

    /// Returns the cached record, inserting the one built by `make` if absent
    ///
    /// The boolean is `true` when the record was already cached.
    pub fn get_or_insert_with<T, F>(&self, name: &str, make: F) -> (Shared<T>, bool)
    where
        T: Send + 'static,
        F: FnOnce() -> Shared<T>,
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = (TypeId::of::<T>(), name.to_string());

        if let Some(existing) = entries.get(&key) {
            if let Ok(record) = Arc::clone(existing).downcast::<std::sync::Mutex<T>>() {
                return (record, true);
            }
        }

        let record = make();
        entries.insert(key, Arc::clone(&record) as Arc<dyn Any + Send + Sync>);
        (record, false)
    }

    /// Drops every cached record stored under `name`, whatever its type
    pub fn evict(&self, name: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(_, key_name), _| key_name != name);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SaveCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCache").field("entries", &self.len()).finish()
    }
}
