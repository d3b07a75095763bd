//! Sub-transaction lifecycle events.
//!
//! Every transaction owns a [`TransactionEvents`] sink. The hierarchy manager
//! raises three notifications on it:
//!
//! - `SubTransactionCreating` before the transaction is locked for a child
//! - `SubTransactionInitialize` from inside the child's construction
//! - `SubTransactionCreated` once the child is linked into the hierarchy
//!
//! Handlers run synchronously in subscription order. The first handler error
//! aborts the raise and is returned to the hierarchy operation in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! use txtree_core::{TransactionArena, TransactionEvent};
//!
//! let mut arena = TransactionArena::default();
//! let root = arena.create_root()?;
//! arena.events(root)?.subscribe(|event: &TransactionEvent| {
//!     println!("{event:?}");
//!     Ok(())
//! });
//! ```

use crate::error::CoreResult;
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::sync::Arc;

/// A notification raised on a transaction's event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The transaction is about to create a sub-transaction.
    SubTransactionCreating {
        /// The parent transaction.
        transaction: TransactionId,
    },
    /// A sub-transaction of the transaction is being initialized.
    SubTransactionInitialize {
        /// The parent transaction.
        transaction: TransactionId,
        /// The sub-transaction under construction.
        child: TransactionId,
    },
    /// A sub-transaction was created and linked.
    SubTransactionCreated {
        /// The parent transaction.
        transaction: TransactionId,
        /// The new sub-transaction.
        child: TransactionId,
    },
}

/// Subscriber of a transaction's lifecycle events.
pub trait TransactionEventHandler: Send + Sync {
    /// Handles an event. Returning an error aborts the operation raising it.
    fn handle(&self, event: &TransactionEvent) -> CoreResult<()>;
}

impl<F> TransactionEventHandler for F
where
    F: Fn(&TransactionEvent) -> CoreResult<()> + Send + Sync,
{
    fn handle(&self, event: &TransactionEvent) -> CoreResult<()> {
        self(event)
    }
}

/// The event sink of one transaction.
pub struct TransactionEvents {
    transaction: TransactionId,
    /// Subscribers, in subscription order.
    handlers: RwLock<Vec<Arc<dyn TransactionEventHandler>>>,
    /// Recently raised events.
    history: RwLock<Vec<TransactionEvent>>,
    max_history: usize,
}

impl TransactionEvents {
    /// Creates the sink of `transaction`, retaining up to `max_history` events.
    pub fn new(transaction: TransactionId, max_history: usize) -> Self {
        Self {
            transaction,
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Returns the transaction this sink belongs to.
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Subscribes a handler.
    pub fn subscribe(&self, handler: impl TransactionEventHandler + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Subscribes a shared handler.
    pub fn subscribe_shared(&self, handler: Arc<dyn TransactionEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Returns the number of subscribers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Raises "sub-transaction creating".
    pub fn raise_sub_transaction_creating(&self) -> CoreResult<()> {
        self.raise(TransactionEvent::SubTransactionCreating {
            transaction: self.transaction,
        })
    }

    /// Raises "sub-transaction initialize" for `child`.
    pub fn raise_sub_transaction_initialize(&self, child: TransactionId) -> CoreResult<()> {
        self.raise(TransactionEvent::SubTransactionInitialize {
            transaction: self.transaction,
            child,
        })
    }

    /// Raises "sub-transaction created" for `child`.
    pub fn raise_sub_transaction_created(&self, child: TransactionId) -> CoreResult<()> {
        self.raise(TransactionEvent::SubTransactionCreated {
            transaction: self.transaction,
            child,
        })
    }

    /// Records the event and dispatches it to every subscriber.
    ///
    /// The handler list is snapshotted first so handlers may subscribe further
    /// handlers or raise events on other sinks.
    pub fn raise(&self, event: TransactionEvent) -> CoreResult<()> {
        if self.max_history > 0 {
            let mut history = self.history.write();
            history.push(event);
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(&event)?;
        }
        Ok(())
    }

    /// Returns the retained events, oldest first.
    pub fn history(&self) -> Vec<TransactionEvent> {
        self.history.read().clone()
    }

    /// Clears the retained events.
    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl std::fmt::Debug for TransactionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEvents")
            .field("transaction", &self.transaction)
            .field("handler_count", &self.handler_count())
            .finish_non_exhaustive()
    }
}
