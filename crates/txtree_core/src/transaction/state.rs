//! Transaction node state.

use crate::entity::DataManager;
use crate::events::TransactionEvents;
use crate::listener::ListenerBroker;
use crate::transaction::manager::TransactionHierarchyManager;
use crate::types::TransactionId;
use std::sync::Arc;

/// Lifecycle state of a transaction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction can be used.
    Active,
    /// Transaction has been discarded.
    Discarded,
}

/// One node of a transaction hierarchy, stored in a
/// [`TransactionArena`](crate::TransactionArena).
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Parent transaction, if this is a sub-transaction.
    parent: Option<TransactionId>,
    /// Hierarchy bookkeeping for this node.
    manager: Arc<TransactionHierarchyManager>,
    /// Registered listeners, built-in ones first.
    pub(crate) listeners: ListenerBroker,
    /// Object data seen by this transaction.
    pub(crate) data: DataManager,
    /// Current state.
    state: TransactionState,
}

impl Transaction {
    /// Creates a new active transaction node.
    pub(crate) fn new(
        manager: Arc<TransactionHierarchyManager>,
        listeners: ListenerBroker,
    ) -> Self {
        Self {
            id: manager.transaction(),
            parent: manager.parent_transaction(),
            manager,
            listeners,
            data: DataManager::new(),
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the parent transaction.
    #[must_use]
    pub fn parent(&self) -> Option<TransactionId> {
        self.parent
    }

    /// Returns the hierarchy manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<TransactionHierarchyManager> {
        &self.manager
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<TransactionEvents> {
        self.manager.events()
    }

    /// Returns the listeners.
    #[must_use]
    pub fn listeners(&self) -> &ListenerBroker {
        &self.listeners
    }

    /// Returns the object data.
    #[must_use]
    pub fn data(&self) -> &DataManager {
        &self.data
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if the transaction can still be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub(crate) fn mark_discarded(&mut self) {
        self.state = TransactionState::Discarded;
    }
}
