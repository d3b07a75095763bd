//! Entity identity, per-transaction object data and the persistence boundary.

mod data;
mod id;
mod store;

pub use data::{DataContainer, DataManager, DataState};
pub use id::EntityId;
pub use store::{MemoryObjectStore, ObjectRecord, ObjectStore, PersistedChange};
