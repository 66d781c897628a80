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

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use twine_common::model::{PropKey, PropQuery};
use twine_db::{MemoryStore, PropStore, StoreError};

/// An in-memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct TestStore {
    inner: MemoryStore,
    finds: AtomicUsize,
    upserts: AtomicUsize,
    removes: AtomicUsize,
    down: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a document in place without counting it as a write.
    pub fn seed(&self, key: &PropKey, value: Value) {
        self.inner
            .upsert(&key.query(), &value)
            .expect("memory store never fails");
    }

    pub fn stored(&self, key: &PropKey) -> Option<Value> {
        self.inner
            .find(&key.query())
            .expect("memory store never fails")
    }

    /// While down, every call fails as if the store were unreachable.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail upserts of properties with this name.
    pub fn fail_writes_to(&self, name: &str) {
        self.failing_writes.lock().unwrap().insert(name.to_string());
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("test store is down".to_string()));
        }
        Ok(())
    }
}

impl PropStore for TestStore {
    fn find(&self, query: &PropQuery) -> Result<Option<Value>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        self.inner.find(query)
    }

    fn upsert(&self, query: &PropQuery, value: &Value) -> Result<(), StoreError> {
        self.check_up()?;
        if self.failing_writes.lock().unwrap().contains(&query.key) {
            return Err(StoreError::Unavailable(format!("write to {query} refused")));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(query, value)
    }

    fn remove(&self, query: &PropQuery) -> Result<(), StoreError> {
        self.check_up()?;
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(query)
    }
}
