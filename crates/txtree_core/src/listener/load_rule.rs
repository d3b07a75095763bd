//! The read-only guard extended with load-mode rules.

use super::{ReadOnlyListener, TransactionListener};
use crate::entity::{DataState, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionArena;
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Guard installed on every transaction by its hierarchy manager.
///
/// Outside of load mode this behaves exactly like [`ReadOnlyListener`]. While
/// objects are being loaded into a locked transaction, those objects (and
/// only those) may still be modified, as long as no sub-transaction has
/// already pulled down their data.
#[derive(Debug, Default)]
pub struct LoadRuleListener {
    base: ReadOnlyListener,
    currently_loading: RwLock<BTreeSet<EntityId>>,
}

impl LoadRuleListener {
    /// Creates a guard that is not in load mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while at least one object is being loaded.
    pub fn is_in_load_mode(&self) -> bool {
        !self.currently_loading.read().is_empty()
    }

    /// Returns the objects currently being loaded, sorted.
    pub fn currently_loading(&self) -> Vec<EntityId> {
        self.currently_loading.read().iter().copied().collect()
    }

    /// Returns true if `id` is currently being loaded.
    pub fn is_loading(&self, id: EntityId) -> bool {
        self.currently_loading.read().contains(&id)
    }

    pub(crate) fn add_currently_loading(&self, ids: &[EntityId]) {
        self.currently_loading.write().extend(ids.iter().copied());
    }

    pub(crate) fn remove_currently_loading(&self, ids: &[EntityId]) {
        let mut loading = self.currently_loading.write();
        for id in ids {
            loading.remove(id);
        }
    }

    fn ensure_modifiable(
        &self,
        arena: &TransactionArena,
        tx: TransactionId,
        id: EntityId,
        operation: &str,
    ) -> CoreResult<()> {
        if arena.is_writeable(tx)? {
            return Ok(());
        }

        let loading = self.currently_loading();
        if loading.is_empty() {
            return Err(CoreError::read_only(tx, operation));
        }
        if !loading.contains(&id) {
            return Err(CoreError::load_mode_scope(loading, operation));
        }
        if arena.is_loaded_in_descendant(tx, id)? {
            return Err(CoreError::StaleWriteAfterDescendantLoad { id });
        }
        Ok(())
    }
}

impl TransactionListener for LoadRuleListener {
    fn name(&self) -> &str {
        "load_rule"
    }

    fn sub_transaction_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.base.sub_transaction_creating(arena, tx)
    }

    fn new_object_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        self.ensure_modifiable(arena, tx, id, "new_object_creating")
    }

    fn object_deleting(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        self.ensure_modifiable(arena, tx, id, "object_deleting")
    }

    fn property_value_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        _property: &str,
        _old_value: Option<&str>,
        _new_value: &str,
    ) -> CoreResult<()> {
        self.ensure_modifiable(arena, tx, id, "property_value_changing")
    }

    fn relation_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        _end_point: &str,
        _new_target: Option<EntityId>,
    ) -> CoreResult<()> {
        self.ensure_modifiable(arena, tx, id, "relation_changing")
    }

    fn data_container_state_updated(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        _new_state: DataState,
    ) -> CoreResult<()> {
        self.ensure_modifiable(arena, tx, id, "data_container_state_updated")
    }

    fn transaction_committing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.base.transaction_committing(arena, tx)
    }

    fn transaction_rolling_back(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.base.transaction_rolling_back(arena, tx)
    }
}
