//! Hierarchical transactions.
//!
//! A root transaction and its chain of sub-transactions form one hierarchy:
//! - only the leaf accepts modifications, every ancestor is locked
//! - the shared [`TransactionHierarchy`] knows the root, the leaf and the
//!   active transaction
//! - activation scopes must be released inside out

mod arena;
mod hierarchy;
mod manager;
mod state;

pub use arena::TransactionArena;
pub use hierarchy::{ActivationScope, TransactionHierarchy};
pub use manager::{TransactionHierarchyManager, UnlockToken, WriteFlag};
pub use state::{Transaction, TransactionState};
