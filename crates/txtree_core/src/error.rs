//! Error types for the transaction hierarchy.

use crate::entity::EntityId;
use crate::types::TransactionId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in txtree core operations.
///
/// Every variant describes a usage error. None of them is retryable and none
/// leaves the hierarchy in an unusable state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A leaf was appended whose parent is not the current leaf.
    #[error(
        "the new leaf transaction {new_leaf} must have the previous leaf transaction {leaf} as its \
         parent"
    )]
    InvalidHierarchyLink {
        /// The current leaf.
        leaf: TransactionId,
        /// The transaction that was offered as the new leaf.
        new_leaf: TransactionId,
    },

    /// The root was asked to leave its own hierarchy.
    #[error("cannot remove the root transaction {root} from its hierarchy")]
    NotRemovableRoot {
        /// The root transaction.
        root: TransactionId,
    },

    /// A transaction outside the root-to-leaf chain was activated.
    #[error("the activated transaction {transaction} must be from this hierarchy")]
    NotInHierarchy {
        /// The rejected transaction.
        transaction: TransactionId,
    },

    /// An activation scope was released while a more recent one was open.
    #[error(
        "the activation scopes of a transaction hierarchy must be disposed inside out (scope for \
         {expected} released while {actual} is active)"
    )]
    OutOfOrderRelease {
        /// The transaction the released scope activated.
        expected: TransactionId,
        /// The transaction that was active at release time.
        actual: TransactionId,
    },

    /// A sub-transaction factory produced a transaction with the wrong parent.
    #[error("the given factory did not create a sub-transaction for transaction {parent}")]
    FactoryContractViolation {
        /// The transaction that asked for a sub-transaction.
        parent: TransactionId,
    },

    /// `unlock` was called on a transaction that is already writeable.
    #[error(
        "{transaction} cannot be made writeable twice. A common reason for this error is that a \
         subtransaction is accessed while its parent transaction is engaged in an infrastructure \
         operation. During such an operation, the subtransaction cannot be used."
    )]
    AlreadyWriteable {
        /// The transaction that was already writeable.
        transaction: TransactionId,
    },

    /// A guarded modification hit a read-only transaction.
    #[error(
        "the operation cannot be executed because {transaction} is read-only, probably because it \
         has an open subtransaction. Offending transaction modification: {operation}."
    )]
    ReadOnlyViolation {
        /// The read-only transaction.
        transaction: TransactionId,
        /// Name of the rejected notification.
        operation: String,
    },

    /// The same objects were loaded into a transaction and one of its subtransactions.
    #[error(
        "It's not possible to load objects into a subtransaction while they are being loaded into \
         a parent transaction: {}.",
        format_ids(.ids)
    )]
    ConcurrentLoadConflict {
        /// The overlapping identities.
        ids: Vec<EntityId>,
    },

    /// An object outside the loading set was modified while a load was in flight.
    #[error("{}", load_scope_message(.loading, .operation))]
    LoadModeScopeViolation {
        /// Identities currently being loaded.
        loading: Vec<EntityId>,
        /// Name of the rejected notification.
        operation: String,
    },

    /// An object was modified after a descendant already pulled its data.
    #[error(
        "the object '{id}' can no longer be changed because its data has already been loaded into \
         the subtransaction"
    )]
    StaleWriteAfterDescendantLoad {
        /// The object whose data is cached below.
        id: EntityId,
    },

    /// No transaction with this id exists.
    #[error("transaction not found: {transaction}")]
    TransactionNotFound {
        /// The missing transaction.
        transaction: TransactionId,
    },

    /// The transaction has been discarded.
    #[error("{transaction} has been discarded and can no longer be used")]
    TransactionDiscarded {
        /// The discarded transaction.
        transaction: TransactionId,
    },

    /// The object does not exist in the transaction or the store.
    #[error("object not found: {id}")]
    ObjectNotFound {
        /// The missing object.
        id: EntityId,
    },

    /// The object is invalid in this transaction.
    #[error("object '{id}' is invalid in {transaction}")]
    ObjectInvalid {
        /// The invalid object.
        id: EntityId,
        /// The transaction in which it is invalid.
        transaction: TransactionId,
    },

    /// The object has been deleted in this transaction.
    #[error("object '{id}' is already deleted")]
    ObjectDeleted {
        /// The deleted object.
        id: EntityId,
    },

    /// An event handler aborted the operation in progress.
    #[error("event handler failed: {message}")]
    EventHandler {
        /// Message supplied by the handler.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a read-only violation error.
    pub fn read_only(transaction: TransactionId, operation: impl Into<String>) -> Self {
        Self::ReadOnlyViolation {
            transaction,
            operation: operation.into(),
        }
    }

    /// Creates a load-mode scope violation error.
    pub fn load_mode_scope(loading: Vec<EntityId>, operation: impl Into<String>) -> Self {
        Self::LoadModeScopeViolation {
            loading,
            operation: operation.into(),
        }
    }

    /// Creates an event handler error.
    pub fn event_handler(message: impl Into<String>) -> Self {
        Self::EventHandler {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

fn format_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn load_scope_message(loading: &[EntityId], operation: &str) -> String {
    if loading.len() == 1 {
        format!(
            "While the object {} is being loaded, only this object can be modified. \
             (Modifying operation: {operation}.)",
            format_ids(loading)
        )
    } else {
        format!(
            "While the objects {} are being loaded, only these objects can be modified. \
             (Modifying operation: {operation}.)",
            format_ids(loading)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_scope_message_singular() {
        let id = EntityId::from_bytes([1; 16]);
        let err = CoreError::load_mode_scope(vec![id], "property_value_changing");
        let msg = err.to_string();
        assert!(msg.contains(&format!("While the object '{id}' is being loaded")));
        assert!(msg.contains("only this object can be modified"));
        assert!(msg.contains("property_value_changing"));
    }

    #[test]
    fn load_scope_message_plural() {
        let a = EntityId::from_bytes([1; 16]);
        let b = EntityId::from_bytes([2; 16]);
        let msg = CoreError::load_mode_scope(vec![a, b], "object_deleting").to_string();
        assert!(msg.contains(&format!("While the objects '{a}', '{b}' are being loaded")));
        assert!(msg.contains("only these objects can be modified"));
    }

    #[test]
    fn concurrent_load_lists_ids() {
        let a = EntityId::from_bytes([7; 16]);
        let msg = CoreError::ConcurrentLoadConflict { ids: vec![a] }.to_string();
        assert!(msg.starts_with(
            "It's not possible to load objects into a subtransaction while they are being loaded into a parent transaction"
        ));
        assert!(msg.contains(&a.to_string()));
    }

    #[test]
    fn read_only_mentions_subtransaction() {
        let err = CoreError::read_only(TransactionId::new(3), "new_object_creating");
        let msg = err.to_string();
        assert!(msg.contains("txn:3 is read-only"));
        assert!(msg.contains("probably because it has an open subtransaction"));
        assert!(msg.ends_with("Offending transaction modification: new_object_creating."));
    }

    #[test]
    fn already_writeable_names_transaction() {
        let msg = CoreError::AlreadyWriteable {
            transaction: TransactionId::new(9),
        }
        .to_string();
        assert!(msg.starts_with("txn:9 cannot be made writeable twice."));
    }
}
