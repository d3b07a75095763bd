//! Persistence boundary used by root transactions.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Persisted state of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object identity.
    pub id: EntityId,
    /// Property values by name.
    pub properties: BTreeMap<String, String>,
    /// Single-valued relation end points by name.
    pub relations: BTreeMap<String, Option<EntityId>>,
}

impl ObjectRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Adds a property value.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Adds a relation end point.
    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, target: Option<EntityId>) -> Self {
        self.relations.insert(name.into(), target);
        self
    }
}

/// A change written by a root transaction's commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedChange {
    /// Insert or replace the object.
    Upsert(ObjectRecord),
    /// Remove the object.
    Delete(EntityId),
}

/// The storage layer that root transactions load from and commit into.
///
/// Sub-transactions never talk to the store; they pull data from their
/// parent transaction instead.
pub trait ObjectStore: Send + Sync {
    /// Loads the given objects.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotFound` for the first id that does not exist.
    fn load(&self, ids: &[EntityId]) -> CoreResult<Vec<ObjectRecord>>;

    /// Applies a batch of committed changes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be applied.
    fn save(&self, changes: &[PersistedChange]) -> CoreResult<()>;
}

/// An in-memory object store.
///
/// Suitable for tests and for ephemeral hierarchies that do not need
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<EntityId, ObjectRecord>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: ObjectRecord) {
        self.objects.write().insert(record.id, record);
    }

    /// Returns a copy of the stored record.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<ObjectRecord> {
        self.objects.read().get(&id).cloned()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn load(&self, ids: &[EntityId]) -> CoreResult<Vec<ObjectRecord>> {
        let objects = self.objects.read();
        ids.iter()
            .map(|id| {
                objects
                    .get(id)
                    .cloned()
                    .ok_or(CoreError::ObjectNotFound { id: *id })
            })
            .collect()
    }

    fn save(&self, changes: &[PersistedChange]) -> CoreResult<()> {
        let mut objects = self.objects.write();
        for change in changes {
            match change {
                PersistedChange::Upsert(record) => {
                    objects.insert(record.id, record.clone());
                }
                PersistedChange::Delete(id) => {
                    objects.remove(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_records_in_request_order() {
        let store = MemoryObjectStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        store.insert(ObjectRecord::new(a).with_property("name", "a"));
        store.insert(ObjectRecord::new(b).with_property("name", "b"));

        let records = store.load(&[b, a]).unwrap();
        assert_eq!(records[0].id, b);
        assert_eq!(records[1].properties["name"], "a");
    }

    #[test]
    fn load_missing_fails() {
        let store = MemoryObjectStore::new();
        let missing = EntityId::new();
        let err = store.load(&[missing]).unwrap_err();
        assert_eq!(err, CoreError::ObjectNotFound { id: missing });
    }

    #[test]
    fn save_applies_upserts_and_deletes() {
        let store = MemoryObjectStore::new();
        let a = EntityId::new();
        let b = EntityId::new();
        store.insert(ObjectRecord::new(a));

        store
            .save(&[
                PersistedChange::Delete(a),
                PersistedChange::Upsert(ObjectRecord::new(b).with_property("x", "1")),
            ])
            .unwrap();

        assert!(store.get(a).is_none());
        assert_eq!(store.get(b).unwrap().properties["x"], "1");
        assert_eq!(store.len(), 1);
    }
}
