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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

/// The four property collections of the document store.
///
/// Each collection addresses its documents by a pair of ids; which pair depends on the
/// collection (see [`Collection::id_fields`]).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Collection {
    /// World-level properties, per location.
    WorldProp,
    /// Instance-level properties, per location.
    InstanceProp,
    /// World-level properties, per player.
    WPlayerProp,
    /// Instance-level properties, per player.
    IPlayerProp,
}

impl Collection {
    /// Only instance-scoped collections may be written at runtime. World-scoped data is
    /// authored elsewhere and is read-only to the engine.
    pub fn is_writable(&self) -> bool {
        matches!(self, Collection::InstanceProp | Collection::IPlayerProp)
    }

    /// The document field names that `id1` and `id2` correspond to.
    pub fn id_fields(&self) -> (&'static str, &'static str) {
        match self {
            Collection::WorldProp => ("wid", "locid"),
            Collection::InstanceProp => ("iid", "locid"),
            Collection::WPlayerProp => ("wid", "uid"),
            Collection::IPlayerProp => ("iid", "uid"),
        }
    }
}

/// Identifier of a document (world, instance, location or user) in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub u64);

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for DocId {
    fn from(value: u64) -> Self {
        DocId(value)
    }
}

/// Names one stored property value. Two keys are equal exactly when they name the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropKey {
    pub collection: Collection,
    pub id1: DocId,
    pub id2: DocId,
    pub name: String,
}

impl PropKey {
    pub fn new(
        collection: Collection,
        id1: impl Into<DocId>,
        id2: impl Into<DocId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            collection,
            id1: id1.into(),
            id2: id2.into(),
            name: name.into(),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.collection.is_writable()
    }

    /// The store-level query for this key, with the id fields named the way the collection
    /// names them.
    pub fn query(&self) -> PropQuery {
        let (f1, f2) = self.collection.id_fields();
        PropQuery {
            collection: self.collection,
            id1: (f1, self.id1),
            id2: (f2, self.id2),
            key: self.name.clone(),
        }
    }
}

impl Display for PropKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}, {}, {:?})",
            self.collection, self.id1, self.id2, self.name
        )
    }
}

/// A single-document lookup against one collection of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropQuery {
    pub collection: Collection,
    pub id1: (&'static str, DocId),
    pub id2: (&'static str, DocId),
    pub key: String,
}

impl PropQuery {
    /// The query rendered as a document selector, e.g. `{"iid": 1, "locid": 2, "key": "x"}`.
    pub fn selector(&self) -> Map<String, Value> {
        let mut selector = Map::new();
        selector.insert(self.id1.0.to_string(), json!(self.id1.1.0));
        selector.insert(self.id2.0.to_string(), json!(self.id2.1.0));
        selector.insert("key".to_string(), Value::String(self.key.clone()));
        selector
    }
}

impl Display for PropQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            self.collection,
            Value::Object(self.selector())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use test_case::test_case;

    #[test_case(Collection::WorldProp, false, "wid", "locid"; "worldprop")]
    #[test_case(Collection::InstanceProp, true, "iid", "locid"; "instanceprop")]
    #[test_case(Collection::WPlayerProp, false, "wid", "uid"; "wplayerprop")]
    #[test_case(Collection::IPlayerProp, true, "iid", "uid"; "iplayerprop")]
    fn collection_shape(c: Collection, writable: bool, f1: &str, f2: &str) {
        assert_eq!(c.is_writable(), writable);
        assert_eq!(c.id_fields(), (f1, f2));
    }

    #[test]
    fn collection_names_round_trip() {
        assert_eq!(Collection::WPlayerProp.to_string(), "wplayerprop");
        assert_eq!(
            Collection::from_str("iplayerprop").unwrap(),
            Collection::IPlayerProp
        );
        let parsed: Collection = serde_json::from_value(json!("instanceprop")).unwrap();
        assert_eq!(parsed, Collection::InstanceProp);
    }

    #[test]
    fn keys_compare_structurally() {
        let a = PropKey::new(Collection::InstanceProp, 1, 2, "lamp");
        let b = PropKey::new(Collection::InstanceProp, 1, 2, "lamp".to_string());
        let c = PropKey::new(Collection::IPlayerProp, 1, 2, "lamp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn query_names_id_fields_per_collection() {
        let key = PropKey::new(Collection::IPlayerProp, 7, 9, "score");
        let query = key.query();
        assert_eq!(query.id1, ("iid", DocId(7)));
        assert_eq!(query.id2, ("uid", DocId(9)));
        assert_eq!(
            Value::Object(query.selector()),
            json!({"iid": 7, "uid": 9, "key": "score"})
        );
    }
}
