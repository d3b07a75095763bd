//! Storage of transaction nodes and the operations that run against them.

use crate::config::Config;
use crate::entity::{
    DataContainer, DataManager, DataState, EntityId, MemoryObjectStore, ObjectRecord,
    ObjectStore, PersistedChange,
};
use crate::error::{CoreError, CoreResult};
use crate::events::TransactionEvents;
use crate::listener::{ListenerBroker, TransactionListener};
use crate::transaction::hierarchy::{ActivationScope, TransactionHierarchy};
use crate::transaction::manager::TransactionHierarchyManager;
use crate::transaction::state::Transaction;
use crate::types::TransactionId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Owner of every transaction node created from it.
///
/// Nodes are addressed by [`TransactionId`]. Parent and child links are
/// stored as ids, so the arena is the only owner of node state. Discarded
/// nodes stay in the arena so their ids keep reporting `TransactionDiscarded`.
///
/// Every modification is dispatched through the node's listeners before any
/// state changes, which is where the read-only and load-mode rules apply.
pub struct TransactionArena {
    config: Config,
    store: Arc<dyn ObjectStore>,
    next_id: TransactionId,
    transactions: HashMap<TransactionId, Transaction>,
}

impl TransactionArena {
    /// Creates an arena backed by an empty in-memory store.
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryObjectStore::new()))
    }

    /// Creates an arena whose root transactions load from and commit into
    /// `store`.
    pub fn with_store(config: Config, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            next_id: TransactionId::new(1),
            transactions: HashMap::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Returns the number of nodes, discarded ones included.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Returns true if no transaction was ever created.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    // ========================================================================
    // Creation and discard
    // ========================================================================

    /// Creates a root transaction with a fresh hierarchy.
    ///
    /// # Errors
    ///
    /// Propagates errors from `transaction_initialize` listeners.
    pub fn create_root(&mut self) -> CoreResult<TransactionId> {
        let id = self.allocate_id();
        let manager = Arc::new(TransactionHierarchyManager::new_root(
            id,
            self.new_events(id),
            &self.config,
        ));
        self.insert(manager)?;
        debug!(transaction = %id, "root transaction created");
        Ok(id)
    }

    /// Builds a child node of `parent` without linking it into the hierarchy.
    ///
    /// This is the default sub-transaction factory. Call it from a factory
    /// passed to [`create_sub_transaction_with`](Self::create_sub_transaction_with).
    ///
    /// # Errors
    ///
    /// Returns `TransactionDiscarded` if `parent` was discarded, or the first
    /// failing `SubTransactionInitialize` handler of the parent.
    pub fn create_child(&mut self, parent: TransactionId) -> CoreResult<TransactionId> {
        let parent_manager = Arc::clone(self.active(parent)?.manager());
        let id = self.allocate_id();
        let manager = Arc::new(TransactionHierarchyManager::new_child(
            id,
            self.new_events(id),
            parent_manager,
        ));
        manager.on_before_transaction_initialize()?;
        self.insert(manager)?;
        Ok(id)
    }

    /// Creates and links a sub-transaction of `tx` using the default factory.
    ///
    /// # Errors
    ///
    /// See [`TransactionHierarchyManager::create_sub_transaction`].
    pub fn create_sub_transaction(&mut self, tx: TransactionId) -> CoreResult<TransactionId> {
        self.create_sub_transaction_with(tx, |arena, parent| arena.create_child(parent))
    }

    /// Creates and links a sub-transaction of `tx` using `factory`.
    ///
    /// # Errors
    ///
    /// See [`TransactionHierarchyManager::create_sub_transaction`].
    pub fn create_sub_transaction_with<F>(
        &mut self,
        tx: TransactionId,
        factory: F,
    ) -> CoreResult<TransactionId>
    where
        F: FnOnce(&mut TransactionArena, TransactionId) -> CoreResult<TransactionId>,
    {
        let manager = Arc::clone(self.active(tx)?.manager());
        manager.create_sub_transaction(self, factory)
    }

    /// Discards `tx` together with every sub-transaction below it.
    ///
    /// The sub-transaction chain goes first, then `tx` is unlinked from its
    /// parent. New objects held by `tx` are unregistered so that ancestors
    /// mark them invalid. Discarding twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id, or any listener error.
    pub fn discard(&mut self, tx: TransactionId) -> CoreResult<()> {
        let node = self.node(tx)?;
        if !node.is_active() {
            return Ok(());
        }
        let manager = Arc::clone(node.manager());
        manager.on_transaction_discard(self)?;

        for id in self.node(tx)?.data.ids_in_state(DataState::New) {
            self.unregister_container(tx, id)?;
        }
        self.notify(tx, |listener, arena| listener.transaction_discard(arena, tx))?;
        self.node_mut(tx)?.mark_discarded();
        debug!(transaction = %tx, "transaction discarded");
        Ok(())
    }

    fn allocate_id(&mut self) -> TransactionId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn new_events(&self, id: TransactionId) -> Arc<TransactionEvents> {
        Arc::new(TransactionEvents::new(id, self.config.event_history))
    }

    fn insert(&mut self, manager: Arc<TransactionHierarchyManager>) -> CoreResult<()> {
        let id = manager.transaction();
        let mut listeners = ListenerBroker::new();
        manager.install_listeners(&mut listeners)?;
        self.transactions.insert(id, Transaction::new(manager, listeners));
        self.notify(id, |listener, arena| listener.transaction_initialize(arena, id))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the node of `tx`, discarded or not.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id.
    pub fn transaction(&self, tx: TransactionId) -> CoreResult<&Transaction> {
        self.node(tx)
    }

    /// Returns the hierarchy manager of `tx`.
    pub fn manager(&self, tx: TransactionId) -> CoreResult<Arc<TransactionHierarchyManager>> {
        Ok(Arc::clone(self.node(tx)?.manager()))
    }

    /// Returns the event sink of `tx`.
    pub fn events(&self, tx: TransactionId) -> CoreResult<Arc<TransactionEvents>> {
        Ok(Arc::clone(self.node(tx)?.events()))
    }

    /// Returns the hierarchy `tx` belongs to.
    pub fn hierarchy(&self, tx: TransactionId) -> CoreResult<Arc<TransactionHierarchy>> {
        Ok(Arc::clone(self.node(tx)?.manager().hierarchy()))
    }

    /// Makes `tx` the active transaction of its hierarchy until the scope is
    /// released.
    ///
    /// # Errors
    ///
    /// Returns `NotInHierarchy` if `tx` is not linked into its hierarchy.
    pub fn activate(&self, tx: TransactionId) -> CoreResult<ActivationScope> {
        self.hierarchy(tx)?.activate_transaction(tx)
    }

    /// Returns the parent of `tx`.
    pub fn parent(&self, tx: TransactionId) -> CoreResult<Option<TransactionId>> {
        Ok(self.node(tx)?.parent())
    }

    /// Returns the live sub-transaction of `tx`.
    pub fn sub_transaction(&self, tx: TransactionId) -> CoreResult<Option<TransactionId>> {
        Ok(self.node(tx)?.manager().sub_transaction())
    }

    /// Returns true if `tx` accepts modifications.
    pub fn is_writeable(&self, tx: TransactionId) -> CoreResult<bool> {
        Ok(self.node(tx)?.manager().is_writeable())
    }

    /// Returns true if `tx` was discarded.
    pub fn is_discarded(&self, tx: TransactionId) -> CoreResult<bool> {
        Ok(!self.node(tx)?.is_active())
    }

    /// Returns true if `tx` holds data for `id`.
    pub fn is_loaded(&self, tx: TransactionId, id: EntityId) -> CoreResult<bool> {
        Ok(self.node(tx)?.data.contains(id))
    }

    /// Returns true if `id` is marked invalid in `tx`.
    pub fn is_invalid(&self, tx: TransactionId, id: EntityId) -> CoreResult<bool> {
        Ok(self.node(tx)?.data.is_invalid(id))
    }

    /// Returns the state of `id` in `tx`, if loaded.
    pub fn data_state(&self, tx: TransactionId, id: EntityId) -> CoreResult<Option<DataState>> {
        Ok(self.node(tx)?.data.get(id).map(DataContainer::state))
    }

    /// Returns the object data of `tx`.
    pub fn data(&self, tx: TransactionId) -> CoreResult<&DataManager> {
        Ok(&self.node(tx)?.data)
    }

    /// Returns true if any live sub-transaction below `tx` holds data for
    /// `id`.
    pub fn is_loaded_in_descendant(&self, tx: TransactionId, id: EntityId) -> CoreResult<bool> {
        let mut current = self.sub_transaction(tx)?;
        while let Some(sub) = current {
            if self.is_loaded(sub, id)? {
                return Ok(true);
            }
            current = self.sub_transaction(sub)?;
        }
        Ok(false)
    }

    /// Appends a listener to `tx`, after the built-in ones.
    pub fn add_listener(
        &mut self,
        tx: TransactionId,
        listener: Arc<dyn TransactionListener>,
    ) -> CoreResult<()> {
        self.node_mut(tx)?.listeners.add_listener(listener);
        Ok(())
    }

    /// Dispatches a notification to every listener of `tx`, stopping at the
    /// first error.
    pub(crate) fn notify<F>(&mut self, tx: TransactionId, mut notification: F) -> CoreResult<()>
    where
        F: FnMut(&dyn TransactionListener, &mut TransactionArena) -> CoreResult<()>,
    {
        let listeners = self.node(tx)?.listeners.listeners().to_vec();
        for listener in &listeners {
            notification(listener.as_ref(), self)?;
        }
        Ok(())
    }

    fn node(&self, tx: TransactionId) -> CoreResult<&Transaction> {
        self.transactions
            .get(&tx)
            .ok_or(CoreError::TransactionNotFound { transaction: tx })
    }

    fn node_mut(&mut self, tx: TransactionId) -> CoreResult<&mut Transaction> {
        self.transactions
            .get_mut(&tx)
            .ok_or(CoreError::TransactionNotFound { transaction: tx })
    }

    fn active(&self, tx: TransactionId) -> CoreResult<&Transaction> {
        let node = self.node(tx)?;
        if node.is_active() {
            Ok(node)
        } else {
            Err(CoreError::TransactionDiscarded { transaction: tx })
        }
    }

    fn container(&self, tx: TransactionId, id: EntityId) -> CoreResult<&DataContainer> {
        self.node(tx)?
            .data
            .get(id)
            .ok_or(CoreError::ObjectNotFound { id })
    }

    fn container_mut(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<&mut DataContainer> {
        self.node_mut(tx)?
            .data
            .get_mut(id)
            .ok_or(CoreError::ObjectNotFound { id })
    }

    // ========================================================================
    // Object data
    // ========================================================================

    /// Creates a new object in `tx`.
    ///
    /// # Errors
    ///
    /// Returns the listener error if `tx` is read-only.
    pub fn new_object(&mut self, tx: TransactionId) -> CoreResult<EntityId> {
        self.new_object_with_id(tx, EntityId::new())
    }

    /// Creates a new object with a caller-chosen id in `tx`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `tx` already holds data for `id`, or the
    /// listener error if `tx` is read-only.
    pub fn new_object_with_id(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<EntityId> {
        self.active(tx)?;
        if self.is_loaded(tx, id)? {
            return Err(CoreError::invalid_operation(format!(
                "object '{id}' already exists in {tx}"
            )));
        }
        self.notify(tx, |listener, arena| listener.new_object_creating(arena, tx, id))?;
        self.mark_not_invalid(tx, id)?;
        self.register_container(tx, DataContainer::new_object(id))?;
        Ok(id)
    }

    /// Deletes an object in `tx`, loading it first if needed.
    ///
    /// A new object disappears and becomes invalid in `tx`; any other object
    /// is marked deleted until commit or rollback.
    ///
    /// # Errors
    ///
    /// Returns `ObjectDeleted` if it is already deleted, `ObjectInvalid` if it
    /// is invalid, or the listener error if `tx` is read-only.
    pub fn delete_object(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<()> {
        let state = self.ensure_mutable(tx, id)?;
        self.notify(tx, |listener, arena| listener.object_deleting(arena, tx, id))?;

        if state == DataState::New {
            self.unregister_container(tx, id)?;
            self.mark_invalid(tx, id)?;
        } else {
            self.notify(tx, |listener, arena| {
                listener.data_container_state_updated(arena, tx, id, DataState::Deleted)
            })?;
            self.container_mut(tx, id)?.mark_deleted();
        }

        self.notify(tx, |listener, arena| listener.object_deleted(arena, tx, id))
    }

    /// Sets a property of an object in `tx`, loading it first if needed.
    ///
    /// # Errors
    ///
    /// Returns `ObjectDeleted`, `ObjectInvalid`, `ObjectNotFound`, or the
    /// listener error if the modification is not permitted.
    pub fn set_property(
        &mut self,
        tx: TransactionId,
        id: EntityId,
        property: &str,
        value: &str,
    ) -> CoreResult<()> {
        let old_state = self.ensure_mutable(tx, id)?;
        let container = self.container(tx, id)?;
        let old_value = container.property(property).map(str::to_owned);
        let new_state = container.state_with_property(property, value);

        self.notify(tx, |listener, arena| {
            listener.property_value_changing(arena, tx, id, property, old_value.as_deref(), value)
        })?;
        if new_state != old_state {
            self.notify(tx, |listener, arena| {
                listener.data_container_state_updated(arena, tx, id, new_state)
            })?;
        }
        self.container_mut(tx, id)?.set_property(property, value);
        Ok(())
    }

    /// Points a relation end point of an object in `tx` at `target`.
    ///
    /// # Errors
    ///
    /// Same as [`set_property`](Self::set_property).
    pub fn set_relation(
        &mut self,
        tx: TransactionId,
        id: EntityId,
        end_point: &str,
        target: Option<EntityId>,
    ) -> CoreResult<()> {
        let old_state = self.ensure_mutable(tx, id)?;
        let new_state = self
            .container(tx, id)?
            .state_with_relation(end_point, target);

        self.notify(tx, |listener, arena| {
            listener.relation_changing(arena, tx, id, end_point, target)
        })?;
        if new_state != old_state {
            self.notify(tx, |listener, arena| {
                listener.data_container_state_updated(arena, tx, id, new_state)
            })?;
        }
        self.container_mut(tx, id)?.set_relation(end_point, target);
        Ok(())
    }

    /// Reads a property of an object in `tx`, loading it first if needed.
    ///
    /// # Errors
    ///
    /// Returns `ObjectInvalid` or `ObjectNotFound`.
    pub fn get_property(
        &mut self,
        tx: TransactionId,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Option<String>> {
        self.ensure_loaded(tx, id)?;
        self.notify(tx, |listener, arena| {
            listener.property_value_reading(arena, tx, id, property)
        })?;
        let value = self
            .container(tx, id)?
            .property(property)
            .map(str::to_owned);
        self.notify(tx, |listener, arena| {
            listener.property_value_read(arena, tx, id, property, value.as_deref())
        })?;
        Ok(value)
    }

    /// Reads a relation end point of an object in `tx`, loading it first if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `ObjectInvalid` or `ObjectNotFound`.
    pub fn get_relation(
        &mut self,
        tx: TransactionId,
        id: EntityId,
        end_point: &str,
    ) -> CoreResult<Option<EntityId>> {
        self.ensure_loaded(tx, id)?;
        self.notify(tx, |listener, arena| {
            listener.relation_reading(arena, tx, id, end_point)
        })?;
        Ok(self.container(tx, id)?.relation(end_point).flatten())
    }

    /// Marks `id` invalid in `tx`.
    pub fn mark_invalid(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<()> {
        if self.node_mut(tx)?.data.mark_invalid(id) {
            self.notify(tx, |listener, arena| {
                listener.object_marked_invalid(arena, tx, id)
            })?;
        }
        Ok(())
    }

    /// Clears the invalid mark of `id` in `tx`.
    pub fn mark_not_invalid(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<()> {
        if self.node_mut(tx)?.data.mark_not_invalid(id) {
            self.notify(tx, |listener, arena| {
                listener.object_marked_not_invalid(arena, tx, id)
            })?;
        }
        Ok(())
    }

    fn ensure_loaded(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<()> {
        self.active(tx)?;
        if self.is_invalid(tx, id)? {
            return Err(CoreError::ObjectInvalid { id, transaction: tx });
        }
        self.load_objects(tx, &[id])
    }

    fn ensure_mutable(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<DataState> {
        self.ensure_loaded(tx, id)?;
        match self.container(tx, id)?.state() {
            DataState::Deleted => Err(CoreError::ObjectDeleted { id }),
            state => Ok(state),
        }
    }

    fn register_container(
        &mut self,
        tx: TransactionId,
        container: DataContainer,
    ) -> CoreResult<()> {
        let id = container.id();
        let state = container.state();
        self.notify(tx, |listener, arena| {
            listener.data_container_map_registering(arena, tx, id, state)
        })?;
        self.node_mut(tx)?.data.register(container);
        Ok(())
    }

    fn unregister_container(&mut self, tx: TransactionId, id: EntityId) -> CoreResult<()> {
        let Some(state) = self.data_state(tx, id)? else {
            return Ok(());
        };
        self.notify(tx, |listener, arena| {
            listener.data_container_map_unregistering(arena, tx, id, state)
        })?;
        self.node_mut(tx)?.data.unregister(id);
        Ok(())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads the given objects into `tx`. Objects already held are skipped.
    ///
    /// # Errors
    ///
    /// See [`load_objects_with`](Self::load_objects_with).
    pub fn load_objects(&mut self, tx: TransactionId, ids: &[EntityId]) -> CoreResult<()> {
        self.load_objects_with(tx, ids, |_, _| Ok(()))
    }

    /// Loads the given objects into `tx`, running `on_registered` for each
    /// object right after its data is registered.
    ///
    /// While the batch is in flight `tx` is in load mode: even if it is
    /// read-only, the objects of the batch may be modified (typically from
    /// `on_registered`), and nothing else may.
    ///
    /// A root loads from the object store. A sub-transaction takes its
    /// parent's current data, loading into the parent first if needed.
    ///
    /// # Errors
    ///
    /// - `ObjectInvalid` if any id is invalid in `tx` or its parent
    /// - `ObjectNotFound` if the store or parent does not know an id
    /// - `ObjectDeleted` if the parent deleted an id
    /// - `ConcurrentLoadConflict` if the parent is loading any of the ids
    pub fn load_objects_with<F>(
        &mut self,
        tx: TransactionId,
        ids: &[EntityId],
        mut on_registered: F,
    ) -> CoreResult<()>
    where
        F: FnMut(&mut TransactionArena, EntityId) -> CoreResult<()>,
    {
        self.active(tx)?;
        let mut pending: Vec<EntityId> = Vec::new();
        for &id in ids {
            if self.is_invalid(tx, id)? {
                return Err(CoreError::ObjectInvalid { id, transaction: tx });
            }
            if !self.is_loaded(tx, id)? && !pending.contains(&id) {
                pending.push(id);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let manager = self.manager(tx)?;
        manager.on_before_object_registration(&pending)?;
        let result = self.register_loaded(tx, &pending, &mut on_registered);
        manager.on_after_object_registration(&pending);
        result
    }

    fn register_loaded<F>(
        &mut self,
        tx: TransactionId,
        ids: &[EntityId],
        on_registered: &mut F,
    ) -> CoreResult<()>
    where
        F: FnMut(&mut TransactionArena, EntityId) -> CoreResult<()>,
    {
        self.notify(tx, |listener, arena| listener.objects_loading(arena, tx, ids))?;
        let records = self.fetch(tx, ids)?;
        for record in records {
            let id = record.id;
            self.register_container(tx, DataContainer::from_record(record))?;
            on_registered(self, id)?;
        }
        self.notify(tx, |listener, arena| listener.objects_loaded(arena, tx, ids))?;
        debug!(transaction = %tx, count = ids.len(), "objects loaded");
        Ok(())
    }

    fn fetch(&mut self, tx: TransactionId, ids: &[EntityId]) -> CoreResult<Vec<ObjectRecord>> {
        let Some(parent) = self.parent(tx)? else {
            return self.store.load(ids);
        };

        self.load_objects(parent, ids)?;
        let parent_data = &self.node(parent)?.data;
        ids.iter()
            .map(|&id| match parent_data.get(id) {
                Some(container) if container.state() == DataState::Deleted => {
                    Err(CoreError::ObjectDeleted { id })
                }
                Some(container) => Ok(container.to_record()),
                None => Err(CoreError::ObjectNotFound { id }),
            })
            .collect()
    }

    // ========================================================================
    // Commit and rollback
    // ========================================================================

    /// Commits the changes of `tx`.
    ///
    /// A sub-transaction writes its changes into its parent, which is
    /// unlocked for the duration. A root writes them to the object store.
    /// Afterwards every object held by `tx` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the listener error if `tx` is read-only, or any error raised
    /// while writing the changes.
    pub fn commit(&mut self, tx: TransactionId) -> CoreResult<()> {
        self.active(tx)?;
        self.notify(tx, |listener, arena| listener.transaction_committing(arena, tx))?;
        let changed = self.changed_ids(tx)?;
        self.notify(tx, |listener, arena| {
            listener.transaction_commit_validate(arena, tx, &changed)
        })?;

        match self.parent(tx)? {
            None => {
                let data = &self.node(tx)?.data;
                let changes: Vec<PersistedChange> = changed
                    .iter()
                    .filter_map(|&id| data.get(id))
                    .map(|container| match container.state() {
                        DataState::Deleted => PersistedChange::Delete(container.id()),
                        _ => PersistedChange::Upsert(container.to_record()),
                    })
                    .collect();
                self.store.save(&changes)?;
            }
            Some(parent) => {
                let parent_manager = self.manager(parent)?;
                let mut unlock = parent_manager.unlock()?;
                let result = self.write_into_parent(tx, parent, &changed);
                unlock.release();
                result?;
            }
        }

        for &id in &changed {
            if self.container(tx, id)?.state() == DataState::Deleted {
                self.unregister_container(tx, id)?;
                self.mark_invalid(tx, id)?;
            } else {
                self.container_mut(tx, id)?.accept();
            }
        }

        self.notify(tx, |listener, arena| {
            listener.transaction_committed(arena, tx, &changed)
        })?;
        debug!(transaction = %tx, count = changed.len(), "transaction committed");
        Ok(())
    }

    fn write_into_parent(
        &mut self,
        tx: TransactionId,
        parent: TransactionId,
        changed: &[EntityId],
    ) -> CoreResult<()> {
        for &id in changed {
            let container = self.container(tx, id)?;
            let state = container.state();
            let record = container.to_record();

            match state {
                DataState::New => {
                    self.mark_not_invalid(parent, id)?;
                    self.notify(parent, |listener, arena| {
                        listener.new_object_creating(arena, parent, id)
                    })?;
                    self.register_container(parent, DataContainer::new_object(id))?;
                    self.container_mut(parent, id)?.replace_data(record);
                }
                DataState::Changed => {
                    let target = self.container(parent, id)?;
                    let mut updated = target.clone();
                    updated.replace_data(record);
                    let new_state = updated.state();
                    if new_state != target.state() {
                        self.notify(parent, |listener, arena| {
                            listener.data_container_state_updated(arena, parent, id, new_state)
                        })?;
                    }
                    *self.container_mut(parent, id)? = updated;
                }
                DataState::Deleted => self.delete_object(parent, id)?,
                DataState::Unchanged => {}
            }
        }
        Ok(())
    }

    /// Discards the changes of `tx`.
    ///
    /// New objects are removed (and become invalid), every other object
    /// returns to its loaded data.
    ///
    /// # Errors
    ///
    /// Returns the listener error if `tx` is read-only.
    pub fn rollback(&mut self, tx: TransactionId) -> CoreResult<()> {
        self.active(tx)?;
        self.notify(tx, |listener, arena| listener.transaction_rolling_back(arena, tx))?;
        let changed = self.changed_ids(tx)?;

        for &id in &changed {
            if self.container(tx, id)?.state() == DataState::New {
                self.unregister_container(tx, id)?;
                self.mark_invalid(tx, id)?;
            } else {
                self.container_mut(tx, id)?.revert();
            }
        }

        self.notify(tx, |listener, arena| {
            listener.transaction_rolled_back(arena, tx, &changed)
        })?;
        debug!(transaction = %tx, count = changed.len(), "transaction rolled back");
        Ok(())
    }

    fn changed_ids(&self, tx: TransactionId) -> CoreResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .node(tx)?
            .data
            .containers()
            .filter(|container| container.state() != DataState::Unchanged)
            .map(DataContainer::id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl Default for TransactionArena {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for TransactionArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionArena")
            .field("config", &self.config)
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}
