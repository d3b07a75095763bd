//! # txtree Core
//!
//! Hierarchical transaction manager.
//!
//! This crate provides:
//! - Root and sub-transactions stored in a [`TransactionArena`]
//! - Write-lock transfer from a parent to its live sub-transaction
//! - An activation stack with inside-out scope release
//! - Read-only and load-mode guards on every modification
//! - Invalidation of objects that only exist below a transaction
//! - Commit into the parent transaction or into an [`ObjectStore`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txtree_core::{EntityId, TransactionArena};
//!
//! let mut arena = TransactionArena::default();
//! let root = arena.create_root()?;
//! let sub = arena.create_sub_transaction(root)?;
//!
//! let id = arena.new_object(sub)?;
//! arena.set_property(sub, id, "name", "draft")?;
//! arena.commit(sub)?;
//! arena.discard(sub)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod events;
mod listener;
mod transaction;
mod types;

pub use config::{Config, ScopeReleasePolicy};
pub use entity::{
    DataContainer, DataManager, DataState, EntityId, MemoryObjectStore, ObjectRecord,
    ObjectStore, PersistedChange,
};
pub use error::{CoreError, CoreResult};
pub use events::{TransactionEvent, TransactionEventHandler, TransactionEvents};
pub use listener::{
    InvalidationListener, ListenerBroker, LoadRuleListener, ReadOnlyListener, TransactionListener,
};
pub use transaction::{
    ActivationScope, Transaction, TransactionArena, TransactionHierarchy,
    TransactionHierarchyManager, TransactionState, UnlockToken, WriteFlag,
};
pub use types::TransactionId;
