//! Propagation of invalid marks to ancestor transactions.

use super::TransactionListener;
use crate::entity::{DataState, EntityId};
use crate::error::CoreResult;
use crate::transaction::TransactionArena;
use crate::types::TransactionId;
use tracing::trace;

/// Marks objects invalid in ancestors that must not know them.
///
/// An object created in a sub-transaction has never existed for the
/// transactions above it. Whenever such an object enters or leaves a
/// transaction's data, every ancestor that has not loaded its own instance of
/// that identity gets an invalid mark. The walk stops at the first ancestor
/// that has it loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationListener;

impl InvalidationListener {
    /// Creates the listener.
    pub fn new() -> Self {
        Self
    }

    fn invalidate_in_ancestors(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        let mut current = arena.parent(tx)?;
        while let Some(ancestor) = current {
            if arena.is_loaded(ancestor, id)? {
                break;
            }
            trace!(%id, transaction = %ancestor, "invalidating object in ancestor");
            arena.mark_invalid(ancestor, id)?;
            current = arena.parent(ancestor)?;
        }
        Ok(())
    }
}

impl TransactionListener for InvalidationListener {
    fn name(&self) -> &str {
        "invalidation"
    }

    fn data_container_map_registering(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        state: DataState,
    ) -> CoreResult<()> {
        if state == DataState::New {
            self.invalidate_in_ancestors(arena, tx, id)?;
        }
        Ok(())
    }

    fn data_container_map_unregistering(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        state: DataState,
    ) -> CoreResult<()> {
        if state == DataState::New {
            self.invalidate_in_ancestors(arena, tx, id)?;
        }
        Ok(())
    }
}
