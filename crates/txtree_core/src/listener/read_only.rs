//! The read-only guard.

use super::TransactionListener;
use crate::entity::{DataState, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionArena;
use crate::types::TransactionId;

/// Rejects every user modification of a transaction that is not writeable.
///
/// Infrastructure signals (initialize, discard, loading, reads, map
/// registration, invalid marks, commit validation and completion) pass
/// through regardless of writeability.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyListener;

impl ReadOnlyListener {
    /// Creates the guard.
    pub fn new() -> Self {
        Self
    }

    /// Fails with `ReadOnlyViolation` if `tx` is not writeable.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnlyViolation` naming `operation`, or `TransactionNotFound`.
    pub fn ensure_writeable(
        &self,
        arena: &TransactionArena,
        tx: TransactionId,
        operation: &str,
    ) -> CoreResult<()> {
        if arena.is_writeable(tx)? {
            Ok(())
        } else {
            Err(CoreError::read_only(tx, operation))
        }
    }
}

impl TransactionListener for ReadOnlyListener {
    fn name(&self) -> &str {
        "read_only"
    }

    fn sub_transaction_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "sub_transaction_creating")
    }

    fn new_object_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        _id: EntityId,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "new_object_creating")
    }

    fn object_deleting(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        _id: EntityId,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "object_deleting")
    }

    fn property_value_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        _id: EntityId,
        _property: &str,
        _old_value: Option<&str>,
        _new_value: &str,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "property_value_changing")
    }

    fn relation_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        _id: EntityId,
        _end_point: &str,
        _new_target: Option<EntityId>,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "relation_changing")
    }

    fn data_container_state_updated(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        _id: EntityId,
        _new_state: DataState,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "data_container_state_updated")
    }

    fn transaction_committing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "transaction_committing")
    }

    fn transaction_rolling_back(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.ensure_writeable(arena, tx, "transaction_rolling_back")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writeable_transaction_passes() {
        let mut arena = TransactionArena::default();
        let root = arena.create_root().unwrap();
        let guard = ReadOnlyListener::new();

        guard
            .property_value_changing(&mut arena, root, EntityId::new(), "name", None, "x")
            .unwrap();
        guard.transaction_committing(&mut arena, root).unwrap();
    }

    #[test]
    fn locked_transaction_rejects_mutations() {
        let mut arena = TransactionArena::default();
        let root = arena.create_root().unwrap();
        arena.create_sub_transaction(root).unwrap();
        let guard = ReadOnlyListener::new();

        let err = guard
            .object_deleting(&mut arena, root, EntityId::new())
            .unwrap_err();
        assert_eq!(err, CoreError::read_only(root, "object_deleting"));
        assert!(err
            .to_string()
            .contains("probably because it has an open subtransaction"));
        assert!(err.to_string().contains("object_deleting"));
    }

    #[test]
    fn infrastructure_signals_never_fail() {
        let mut arena = TransactionArena::default();
        let root = arena.create_root().unwrap();
        arena.create_sub_transaction(root).unwrap();
        let guard = ReadOnlyListener::new();
        let id = EntityId::new();

        guard.transaction_initialize(&mut arena, root).unwrap();
        guard.transaction_discard(&mut arena, root).unwrap();
        guard.objects_loading(&mut arena, root, &[id]).unwrap();
        guard.objects_loaded(&mut arena, root, &[id]).unwrap();
        guard
            .property_value_reading(&mut arena, root, id, "name")
            .unwrap();
        guard.relation_reading(&mut arena, root, id, "owner").unwrap();
        guard
            .data_container_map_registering(&mut arena, root, id, DataState::New)
            .unwrap();
        guard
            .data_container_map_unregistering(&mut arena, root, id, DataState::New)
            .unwrap();
        guard.object_marked_invalid(&mut arena, root, id).unwrap();
        guard
            .transaction_commit_validate(&mut arena, root, &[id])
            .unwrap();
        guard.transaction_committed(&mut arena, root, &[id]).unwrap();
        guard.transaction_rolled_back(&mut arena, root, &[id]).unwrap();
    }
}
