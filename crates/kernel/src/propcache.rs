// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Per-task mediator between command handlers and the property store.
//!
//! Every read and write of persistent property state during a task goes through its
//! [`PropCache`]. Lookups are memoized, including negative ones, so a task never asks the store
//! about the same key twice. Arrays and objects handed out by the cache may be mutated in place
//! (see [`PropCache::value_mut`]); each such value carries a snapshot taken when it was loaded or
//! stored, and the entry is dirty when the two no longer compare equal. Dirty entries are
//! written back in one pass by [`PropCache::write_all_dirty`] when the task resolves.

use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use twine_common::model::{PropKey, PropQuery};
use twine_db::{PropStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PropCacheError {
    /// A write was attempted against a read-only collection. This is a bug in the calling
    /// handler; the store is never touched.
    #[error("{0} is in a read-only collection")]
    NotWritable(PropKey),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Opaque name for a found cache entry, handed out in place of the value's identity. Handles are
/// never reused within a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropHandle(u64);

fn is_mutable(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

#[derive(Debug)]
pub struct PropEntry {
    key: PropKey,
    query: PropQuery,
    /// `None` when the store has no document for the key.
    value: Option<Value>,
    handle: Option<PropHandle>,
    /// Present only for found arrays and objects.
    snapshot: Option<Value>,
}

impl PropEntry {
    fn found(key: PropKey, value: Value, handle: PropHandle) -> Self {
        let query = key.query();
        let snapshot = is_mutable(&value).then(|| value.clone());
        Self {
            key,
            query,
            value: Some(value),
            handle: Some(handle),
            snapshot,
        }
    }

    fn not_found(key: PropKey) -> Self {
        let query = key.query();
        Self {
            key,
            query,
            value: None,
            handle: None,
            snapshot: None,
        }
    }

    pub fn key(&self) -> &PropKey {
        &self.key
    }

    pub fn query(&self) -> &PropQuery {
        &self.query
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn handle(&self) -> Option<PropHandle> {
        self.handle
    }

    /// The value no longer equals its snapshot. Changes that leave the value comparing equal
    /// (e.g. a float rewritten with the same magnitude) are not detected.
    pub fn is_dirty(&self) -> bool {
        match (&self.value, &self.snapshot) {
            (Some(value), Some(snapshot)) => value != snapshot,
            (Some(value), None) => is_mutable(value),
            _ => false,
        }
    }

    fn refresh_snapshot(&mut self) {
        self.snapshot = self
            .value
            .as_ref()
            .filter(|v| is_mutable(v))
            .cloned();
    }
}

pub struct PropCache {
    store: Arc<dyn PropStore>,
    by_key: HashMap<PropKey, PropEntry>,
    by_handle: HashMap<PropHandle, PropKey>,
    next_handle: u64,
}

impl PropCache {
    pub fn new(store: Arc<dyn PropStore>) -> Self {
        Self {
            store,
            by_key: HashMap::new(),
            by_handle: HashMap::new(),
            next_handle: 1,
        }
    }

    fn mint_handle(next_handle: &mut u64) -> PropHandle {
        let handle = PropHandle(*next_handle);
        *next_handle += 1;
        handle
    }

    /// Look `key` up, going to the store only if the cache has never seen it. The answer,
    /// positive or negative, is cached for the rest of the task.
    ///
    /// When `dependencies` is given the key is recorded in it before the lookup, so it is
    /// recorded even if the lookup fails.
    pub fn get(
        &mut self,
        key: &PropKey,
        dependencies: Option<&mut HashSet<PropKey>>,
    ) -> Result<&PropEntry, PropCacheError> {
        if let Some(dependencies) = dependencies {
            dependencies.insert(key.clone());
        }
        match self.by_key.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(slot) => {
                let entry = match self.store.find(&key.query())? {
                    Some(value) => {
                        let handle = Self::mint_handle(&mut self.next_handle);
                        self.by_handle.insert(handle, key.clone());
                        PropEntry::found(key.clone(), value, handle)
                    }
                    None => PropEntry::not_found(key.clone()),
                };
                Ok(&*slot.insert(entry))
            }
        }
    }

    /// Shorthand for `get(..)?.value()`.
    pub fn get_value(
        &mut self,
        key: &PropKey,
        dependencies: Option<&mut HashSet<PropKey>>,
    ) -> Result<Option<&Value>, PropCacheError> {
        Ok(self.get(key, dependencies)?.value())
    }

    pub fn get_by_handle(&self, handle: PropHandle) -> Option<&PropEntry> {
        self.by_handle
            .get(&handle)
            .and_then(|key| self.by_key.get(key))
    }

    /// Mutable access to a cached array or object, for in-place edits that will be picked up by
    /// [`PropCache::write_all_dirty`]. Scalars are replaced with [`PropCache::set`] instead.
    pub fn value_mut(&mut self, handle: PropHandle) -> Option<&mut Value> {
        let key = self.by_handle.get(&handle)?;
        self.by_key
            .get_mut(key)
            .and_then(|entry| entry.value.as_mut())
            .filter(|value| is_mutable(value))
    }

    /// Store `value` under `key` right away and cache it.
    ///
    /// If the cache already holds an equal, clean value for the key, nothing is written and the
    /// existing handle is returned.
    pub fn set(&mut self, key: &PropKey, value: Value) -> Result<PropHandle, PropCacheError> {
        if !key.is_writable() {
            error!(%key, "Attempted write to a read-only collection");
            return Err(PropCacheError::NotWritable(key.clone()));
        }
        if let Some(entry) = self.by_key.get(key)
            && let (Some(handle), Some(current)) = (entry.handle, &entry.value)
            && !entry.is_dirty()
            && *current == value
        {
            return Ok(handle);
        }
        self.discard(key);
        self.store.upsert(&key.query(), &value)?;
        let handle = Self::mint_handle(&mut self.next_handle);
        self.by_handle.insert(handle, key.clone());
        self.by_key
            .insert(key.clone(), PropEntry::found(key.clone(), value, handle));
        Ok(handle)
    }

    /// Remove `key` from the store and cache its absence. Nothing happens if it is already known
    /// to be absent.
    pub fn delete(&mut self, key: &PropKey) -> Result<(), PropCacheError> {
        if !key.is_writable() {
            error!(%key, "Attempted delete from a read-only collection");
            return Err(PropCacheError::NotWritable(key.clone()));
        }
        if self.by_key.get(key).is_some_and(|e| !e.is_found()) {
            return Ok(());
        }
        self.discard(key);
        self.store.remove(&key.query())?;
        self.by_key
            .insert(key.clone(), PropEntry::not_found(key.clone()));
        Ok(())
    }

    fn discard(&mut self, key: &PropKey) {
        if let Some(entry) = self.by_key.remove(key)
            && let Some(handle) = entry.handle
        {
            self.by_handle.remove(&handle);
        }
    }

    pub fn has_dirty(&self) -> bool {
        self.by_key.values().any(PropEntry::is_dirty)
    }

    pub fn dirty_keys(&self) -> Vec<PropKey> {
        self.by_key
            .values()
            .filter(|e| e.is_dirty())
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Write every dirty writable entry back to the store and re-snapshot it. Dirty entries in
    /// read-only collections are re-snapshotted without being written.
    ///
    /// A failed write does not stop the pass; the first failure is returned once every entry has
    /// been tried. On success, the number of entries written.
    pub fn write_all_dirty(&mut self) -> Result<usize, PropCacheError> {
        let mut written = 0;
        let mut first_failure = None;
        for entry in self.by_key.values_mut().filter(|e| e.is_dirty()) {
            if !entry.key.is_writable() {
                warn!(key = %entry.key, "Discarding change to a read-only property");
                entry.refresh_snapshot();
                continue;
            }
            let Some(value) = &entry.value else {
                continue;
            };
            match self.store.upsert(&entry.query, value) {
                Ok(()) => {
                    entry.refresh_snapshot();
                    written += 1;
                }
                Err(e) => {
                    error!(key = %entry.key, "Failed to write back property: {e}");
                    first_failure.get_or_insert(PropCacheError::Store(e));
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Release the cache. Dirty entries still present at this point are lost; they are logged
    /// and counted.
    pub fn finalize(self) -> usize {
        let dirty = self.dirty_keys();
        if !dirty.is_empty() {
            error!(count = dirty.len(), keys = ?dirty, "Property cache released with unwritten changes");
        }
        debug!(entries = self.by_key.len(), "Property cache released");
        dirty.len()
    }
}
