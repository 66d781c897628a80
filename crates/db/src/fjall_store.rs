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
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use strum::IntoEnumIterator;
use tracing::{error, info};
use twine_common::model::{Collection, PropQuery};

/// Durable store: one fjall partition per collection. Documents are keyed by
/// `id1 (u64 BE) ++ id2 (u64 BE) ++ key (utf-8)` and hold the value as JSON.
pub struct FjallStore {
    keyspace: Keyspace,
    partitions: HashMap<Collection, PartitionHandle>,
}

fn unavailable(e: fjall::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn document_key(query: &PropQuery) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + query.key.len());
    key.extend_from_slice(&query.id1.1.0.to_be_bytes());
    key.extend_from_slice(&query.id2.1.0.to_be_bytes());
    key.extend_from_slice(query.key.as_bytes());
    key
}

impl FjallStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let keyspace = Config::new(path).open().map_err(unavailable)?;
        let fresh = keyspace.partition_count() == 0;
        let mut partitions = HashMap::new();
        for collection in Collection::iter() {
            let name: &'static str = collection.into();
            let partition = keyspace
                .open_partition(name, PartitionCreateOptions::default())
                .map_err(unavailable)?;
            partitions.insert(collection, partition);
        }
        info!(?path, fresh, "Opened property store");
        Ok(Self {
            keyspace,
            partitions,
        })
    }

    fn partition(&self, collection: Collection) -> Result<&PartitionHandle, StoreError> {
        self.partitions
            .get(&collection)
            .ok_or_else(|| StoreError::Unavailable(format!("no partition for {collection}")))
    }
}

impl PropStore for FjallStore {
    fn find(&self, query: &PropQuery) -> Result<Option<Value>, StoreError> {
        let partition = self.partition(query.collection)?;
        let Some(bytes) = partition.get(document_key(query)).map_err(unavailable)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|e| {
            error!(%query, "Failed to decode stored value: {e}");
            StoreError::Decode(query.to_string())
        })?;
        Ok(Some(value))
    }

    fn upsert(&self, query: &PropQuery, value: &Value) -> Result<(), StoreError> {
        let partition = self.partition(query.collection)?;
        let bytes = serde_json::to_vec(value).map_err(|e| {
            error!(%query, "Failed to encode value: {e}");
            StoreError::Encode(query.to_string())
        })?;
        partition
            .insert(document_key(query), bytes)
            .map_err(unavailable)
    }

    fn remove(&self, query: &PropQuery) -> Result<(), StoreError> {
        let partition = self.partition(query.collection)?;
        partition.remove(document_key(query)).map_err(unavailable)
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use twine_common::model::PropKey;

    #[test]
    fn open_reopen() {
        let tmpdir = tempfile::tempdir().unwrap();
        let key = PropKey::new(Collection::IPlayerProp, 3, 4, "inventory");
        {
            let store = FjallStore::open(tmpdir.path()).unwrap();
            assert_eq!(store.find(&key.query()).unwrap(), None);
            store
                .upsert(&key.query(), &json!(["lamp", {"coins": 3}]))
                .unwrap();
            store.sync().unwrap();
        }
        let store = FjallStore::open(tmpdir.path()).unwrap();
        assert_eq!(
            store.find(&key.query()).unwrap(),
            Some(json!(["lamp", {"coins": 3}]))
        );
    }

    #[test]
    fn collections_do_not_share_documents() {
        let tmpdir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(tmpdir.path()).unwrap();
        let instance = PropKey::new(Collection::InstanceProp, 1, 1, "x").query();
        let player = PropKey::new(Collection::IPlayerProp, 1, 1, "x").query();
        store.upsert(&instance, &json!(1)).unwrap();
        assert_eq!(store.find(&player).unwrap(), None);

        store.remove(&instance).unwrap();
        assert_eq!(store.find(&instance).unwrap(), None);
    }
}
