//! Transaction listeners.
//!
//! Every modification and every infrastructure signal of a transaction is
//! dispatched to the listeners registered on its [`ListenerBroker`], in
//! registration order. A listener returning an error aborts the operation
//! before any state changes.
//!
//! The hierarchy manager installs two listeners on every transaction:
//! - [`LoadRuleListener`], the read-only guard extended with load-mode rules
//! - [`InvalidationListener`], which keeps ancestors from seeing objects that
//!   only ever existed below them

mod invalidation;
mod load_rule;
mod read_only;

pub use invalidation::InvalidationListener;
pub use load_rule::LoadRuleListener;
pub use read_only::ReadOnlyListener;

use crate::entity::{DataState, EntityId};
use crate::error::CoreResult;
use crate::transaction::TransactionArena;
use crate::types::TransactionId;
use std::sync::Arc;

/// Receiver of transaction notifications.
///
/// All methods default to doing nothing. The arena is passed mutably so that
/// listeners can query the hierarchy and update ancestors.
#[allow(unused_variables)]
pub trait TransactionListener: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The transaction finished construction.
    fn transaction_initialize(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction is being discarded.
    fn transaction_discard(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction is about to create a sub-transaction.
    fn sub_transaction_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A sub-transaction of the transaction was created.
    fn sub_transaction_created(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        child: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A new object is about to be created.
    fn new_object_creating(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A batch of objects is about to be loaded.
    fn objects_loading(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A batch of objects was loaded.
    fn objects_loaded(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object is about to be deleted.
    fn object_deleting(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object was deleted.
    fn object_deleted(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object was marked invalid.
    fn object_marked_invalid(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object's invalid mark was cleared.
    fn object_marked_not_invalid(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A property value is about to be read.
    fn property_value_reading(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        property: &str,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A property value was read.
    fn property_value_read(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        property: &str,
        value: Option<&str>,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A property value is about to change.
    fn property_value_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        property: &str,
        old_value: Option<&str>,
        new_value: &str,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A relation end point is about to be read.
    fn relation_reading(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        end_point: &str,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// A relation end point is about to change.
    fn relation_changing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        end_point: &str,
        new_target: Option<EntityId>,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object's data is about to be registered with the transaction.
    fn data_container_map_registering(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        state: DataState,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object's data is about to be removed from the transaction.
    fn data_container_map_unregistering(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        state: DataState,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// An object's data is about to change state.
    fn data_container_state_updated(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        id: EntityId,
        new_state: DataState,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction is about to commit.
    fn transaction_committing(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The objects about to be committed are being validated.
    fn transaction_commit_validate(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction committed.
    fn transaction_committed(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction is about to roll back.
    fn transaction_rolling_back(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// The transaction rolled back.
    fn transaction_rolled_back(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Ordered collection of the listeners registered on one transaction.
#[derive(Clone, Default)]
pub struct ListenerBroker {
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl ListenerBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn add_listener(&mut self, listener: Arc<dyn TransactionListener>) {
        self.listeners.push(listener);
    }

    /// Returns the registered listeners in dispatch order.
    pub fn listeners(&self) -> &[Arc<dyn TransactionListener>] {
        &self.listeners
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for ListenerBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name()))
            .finish()
    }
}
