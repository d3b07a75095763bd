//! Per-transaction object data.

use crate::entity::{EntityId, ObjectRecord};
use std::collections::{BTreeMap, HashMap, HashSet};

/// State of an object's data within one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataState {
    /// Created in this transaction, never persisted.
    New,
    /// Loaded and not modified.
    Unchanged,
    /// Loaded and modified.
    Changed,
    /// Marked for deletion.
    Deleted,
}

/// The data of one object as seen by one transaction.
#[derive(Debug, Clone)]
pub struct DataContainer {
    id: EntityId,
    state: DataState,
    properties: BTreeMap<String, String>,
    relations: BTreeMap<String, Option<EntityId>>,
    original_properties: BTreeMap<String, String>,
    original_relations: BTreeMap<String, Option<EntityId>>,
}

impl DataContainer {
    /// Creates the container of a newly created object.
    #[must_use]
    pub fn new_object(id: EntityId) -> Self {
        Self {
            id,
            state: DataState::New,
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
            original_properties: BTreeMap::new(),
            original_relations: BTreeMap::new(),
        }
    }

    /// Creates an unchanged container from loaded data.
    #[must_use]
    pub fn from_record(record: ObjectRecord) -> Self {
        Self {
            id: record.id,
            state: DataState::Unchanged,
            original_properties: record.properties.clone(),
            original_relations: record.relations.clone(),
            properties: record.properties,
            relations: record.relations,
        }
    }

    /// Returns the object id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DataState {
        self.state
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Returns a relation end point. `None` if the end point was never set.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<Option<EntityId>> {
        self.relations.get(name).copied()
    }

    /// Returns a snapshot of the current data.
    #[must_use]
    pub fn to_record(&self) -> ObjectRecord {
        ObjectRecord {
            id: self.id,
            properties: self.properties.clone(),
            relations: self.relations.clone(),
        }
    }

    /// State the container would have after setting `name` to `value`.
    #[must_use]
    pub fn state_with_property(&self, name: &str, value: &str) -> DataState {
        match self.state {
            DataState::New | DataState::Deleted => self.state,
            _ => {
                let mut properties = self.properties.clone();
                properties.insert(name.to_string(), value.to_string());
                self.modified_state(&properties, &self.relations)
            }
        }
    }

    /// State the container would have after pointing `name` at `target`.
    #[must_use]
    pub fn state_with_relation(&self, name: &str, target: Option<EntityId>) -> DataState {
        match self.state {
            DataState::New | DataState::Deleted => self.state,
            _ => {
                let mut relations = self.relations.clone();
                relations.insert(name.to_string(), target);
                self.modified_state(&self.properties, &relations)
            }
        }
    }

    fn modified_state(
        &self,
        properties: &BTreeMap<String, String>,
        relations: &BTreeMap<String, Option<EntityId>>,
    ) -> DataState {
        if properties == &self.original_properties && relations == &self.original_relations {
            DataState::Unchanged
        } else {
            DataState::Changed
        }
    }

    pub(crate) fn set_property(&mut self, name: &str, value: &str) {
        self.state = self.state_with_property(name, value);
        self.properties.insert(name.to_string(), value.to_string());
    }

    pub(crate) fn set_relation(&mut self, name: &str, target: Option<EntityId>) {
        self.state = self.state_with_relation(name, target);
        self.relations.insert(name.to_string(), target);
    }

    pub(crate) fn replace_data(&mut self, record: ObjectRecord) {
        self.properties = record.properties;
        self.relations = record.relations;
        if self.state != DataState::New {
            self.state = self.modified_state(&self.properties, &self.relations);
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = DataState::Deleted;
    }

    /// Accepts the current data as the new baseline.
    pub(crate) fn accept(&mut self) {
        self.original_properties = self.properties.clone();
        self.original_relations = self.relations.clone();
        self.state = DataState::Unchanged;
    }

    /// Restores the baseline data.
    pub(crate) fn revert(&mut self) {
        self.properties = self.original_properties.clone();
        self.relations = self.original_relations.clone();
        self.state = DataState::Unchanged;
    }
}

/// The registered object data and invalid-object marks of one transaction.
#[derive(Debug, Default)]
pub struct DataManager {
    containers: HashMap<EntityId, DataContainer>,
    invalid: HashSet<EntityId>,
}

impl DataManager {
    /// Creates an empty data manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the container of an object, if registered.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&DataContainer> {
        self.containers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut DataContainer> {
        self.containers.get_mut(&id)
    }

    /// Returns true if the object's data is registered.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.containers.contains_key(&id)
    }

    /// Returns true if the object is marked invalid.
    #[must_use]
    pub fn is_invalid(&self, id: EntityId) -> bool {
        self.invalid.contains(&id)
    }

    /// Returns the number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns true if no container is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Returns the ids of all containers in the given state, sorted.
    #[must_use]
    pub fn ids_in_state(&self, state: DataState) -> Vec<EntityId> {
        let mut ids: Vec<_> = self
            .containers
            .values()
            .filter(|c| c.state() == state)
            .map(DataContainer::id)
            .collect();
        ids.sort();
        ids
    }

    /// Iterates all registered containers.
    pub fn containers(&self) -> impl Iterator<Item = &DataContainer> {
        self.containers.values()
    }

    pub(crate) fn register(&mut self, container: DataContainer) {
        self.containers.insert(container.id(), container);
    }

    pub(crate) fn unregister(&mut self, id: EntityId) -> Option<DataContainer> {
        self.containers.remove(&id)
    }

    pub(crate) fn mark_invalid(&mut self, id: EntityId) -> bool {
        self.invalid.insert(id)
    }

    pub(crate) fn mark_not_invalid(&mut self, id: EntityId) -> bool {
        self.invalid.remove(&id)
    }
}
