//! Local key-value store seen by the link layer

use std::collections::{HashMap, HashSet};

use catbus_core::{CatbusError, CatbusResult, KeyHash};
use catbus_wire::{DataItem, TagQuery};
use parking_lot::RwLock;

/// Current value of a key together with its content hash
#[derive(Clone, Debug, PartialEq)]
pub struct ItemSnapshot {
    pub value: DataItem,
    pub content_hash: u64,
}

/// The database a `LinkManager` replicates from and into
pub trait Database: Send + Sync {
    fn contains(&self, key: KeyHash) -> bool;

    /// True when every tag in `query` is in the local tag set
    fn query(&self, query: &TagQuery) -> bool;

    fn get_item(&self, key: KeyHash) -> CatbusResult<ItemSnapshot>;

    /// Assign an existing key. The type must match the stored one.
    fn set(&self, key: KeyHash, value: DataItem) -> CatbusResult<()>;
}

/// In-process `Database` backed by hash maps
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    items: RwLock<HashMap<KeyHash, DataItem>>,
    tags: RwLock<HashSet<KeyHash>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let db = Self::new();
        for tag in tags {
            db.add_tag(tag.as_ref());
        }
        db
    }

    pub fn add_tag(&self, tag: &str) {
        self.tags.write().insert(KeyHash::from_name(tag));
    }

    /// Create or replace a key, whatever its previous type
    pub fn insert(&self, name: &str, value: DataItem) -> KeyHash {
        let key = KeyHash::from_name(name);
        self.items.write().insert(key, value);
        key
    }

    pub fn remove(&self, key: KeyHash) -> Option<DataItem> {
        self.items.write().remove(&key)
    }

    pub fn value(&self, key: KeyHash) -> Option<DataItem> {
        self.items.read().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl Database for MemoryDatabase {
    fn contains(&self, key: KeyHash) -> bool {
        self.items.read().contains_key(&key)
    }

    fn query(&self, query: &TagQuery) -> bool {
        let tags = self.tags.read();
        query.tags().all(|tag| tags.contains(&tag))
    }

    fn get_item(&self, key: KeyHash) -> CatbusResult<ItemSnapshot> {
        let items = self.items.read();
        let value = items.get(&key).ok_or(CatbusError::KeyNotFound(key))?;
        Ok(ItemSnapshot {
            content_hash: value.content_hash(),
            value: value.clone(),
        })
    }

    fn set(&self, key: KeyHash, value: DataItem) -> CatbusResult<()> {
        let mut items = self.items.write();
        let slot = items.get_mut(&key).ok_or(CatbusError::KeyNotFound(key))?;
        if slot.data_type != value.data_type {
            return Err(CatbusError::TypeMismatch {
                key,
                expected: slot.data_type.to_byte(),
                actual: value.data_type.to_byte(),
            });
        }
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catbus_wire::DataType;

    #[test]
    fn test_query_requires_every_tag() {
        let db = MemoryDatabase::with_tags(&["kitchen", "sensor"]);
        assert!(db.query(&TagQuery::from_tags(&["kitchen"])));
        assert!(db.query(&TagQuery::from_tags(&["sensor", "kitchen"])));
        assert!(!db.query(&TagQuery::from_tags(&["kitchen", "garage"])));
        // empty query matches everyone
        assert!(db.query(&TagQuery::default()));
    }

    #[test]
    fn test_set_existing_key_only() {
        let db = MemoryDatabase::new();
        let missing = KeyHash::from_name("missing");
        assert!(matches!(
            db.set(missing, DataItem::int32(1)),
            Err(CatbusError::KeyNotFound(_))
        ));

        let key = db.insert("level", DataItem::int32(1));
        db.set(key, DataItem::int32(7)).unwrap();
        assert_eq!(db.value(key), Some(DataItem::int32(7)));
    }

    #[test]
    fn test_set_rejects_type_change() {
        let db = MemoryDatabase::new();
        let key = db.insert("level", DataItem::int32(1));
        let err = db.set(key, DataItem::float(1.0)).unwrap_err();
        assert!(matches!(
            err,
            CatbusError::TypeMismatch { expected, actual, .. }
                if expected == DataType::Int32.to_byte() && actual == DataType::Float.to_byte()
        ));
    }

    #[test]
    fn test_snapshot_hash_follows_value() {
        let db = MemoryDatabase::new();
        let key = db.insert("level", DataItem::int32(1));
        let first = db.get_item(key).unwrap();
        db.set(key, DataItem::int32(2)).unwrap();
        let second = db.get_item(key).unwrap();
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.value, DataItem::int32(2));
    }
}
