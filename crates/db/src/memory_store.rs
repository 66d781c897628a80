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

use crate::{PropStore, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use twine_common::model::PropQuery;

/// Non-durable store, for tests and throwaway worlds.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<PropQuery, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropStore for MemoryStore {
    fn find(&self, query: &PropQuery) -> Result<Option<Value>, StoreError> {
        Ok(self.documents.lock().unwrap().get(query).cloned())
    }

    fn upsert(&self, query: &PropQuery, value: &Value) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap()
            .insert(query.clone(), value.clone());
        Ok(())
    }

    fn remove(&self, query: &PropQuery) -> Result<(), StoreError> {
        self.documents.lock().unwrap().remove(query);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twine_common::model::{Collection, PropKey};

    #[test]
    fn upsert_find_remove() {
        let store = MemoryStore::new();
        let query = PropKey::new(Collection::InstanceProp, 1, 2, "door").query();
        assert_eq!(store.find(&query).unwrap(), None);

        store.upsert(&query, &json!("open")).unwrap();
        store.upsert(&query, &json!("closed")).unwrap();
        assert_eq!(store.find(&query).unwrap(), Some(json!("closed")));
        assert_eq!(store.len(), 1);

        store.remove(&query).unwrap();
        assert!(store.is_empty());
        // Removing an absent document is fine.
        store.remove(&query).unwrap();
    }
}
