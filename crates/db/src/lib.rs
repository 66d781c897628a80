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

//! The document store that persistent properties live in. Engine code never talks to it
//! directly; all access goes through the kernel's per-task property cache.

mod fjall_store;
mod memory_store;

pub use fjall_store::FjallStore;
pub use memory_store::MemoryStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use twine_common::model::PropQuery;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("could not encode value for {0}")]
    Encode(String),
    #[error("could not decode stored value for {0}")]
    Decode(String),
}

/// One lookup, upsert or removal per call, each addressing a single document by collection,
/// id pair and key.
pub trait PropStore: Send + Sync {
    fn find(&self, query: &PropQuery) -> Result<Option<Value>, StoreError>;

    fn upsert(&self, query: &PropQuery, value: &Value) -> Result<(), StoreError>;

    fn remove(&self, query: &PropQuery) -> Result<(), StoreError>;

    /// Make everything written so far durable.
    fn sync(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Fjall,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Where the fjall keyspace lives. Ignored for in-memory stores.
    pub path: PathBuf,
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn PropStore>, StoreError> {
    match config.kind {
        StoreKind::Fjall => Ok(Arc::new(FjallStore::open(&config.path)?)),
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
