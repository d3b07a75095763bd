//! Test fixtures and hierarchy helpers.
//!
//! Provides ready-made hierarchies, seeded stores and event handlers that
//! record or veto sub-transaction events.

use parking_lot::Mutex;
use std::sync::Arc;
use txtree_core::{
    ActivationScope, Config, CoreError, CoreResult, EntityId, MemoryObjectStore, ObjectRecord,
    TransactionArena, TransactionEvent, TransactionEventHandler, TransactionId,
};

/// A root transaction with a chain of nested sub-transactions.
pub struct TestTree {
    /// The arena owning every node.
    pub arena: TransactionArena,
    /// The store behind the root.
    pub store: Arc<MemoryObjectStore>,
    /// Root first, deepest sub-transaction last.
    chain: Vec<TransactionId>,
}

impl TestTree {
    /// Creates a root with `depth` nested sub-transactions over an empty
    /// store.
    pub fn new(depth: usize) -> Self {
        Self::with_store(Config::default(), Arc::new(MemoryObjectStore::new()), depth)
    }

    /// Creates a tree with the given configuration.
    pub fn with_config(config: Config, depth: usize) -> Self {
        Self::with_store(config, Arc::new(MemoryObjectStore::new()), depth)
    }

    /// Creates a tree over `store`.
    pub fn with_store(config: Config, store: Arc<MemoryObjectStore>, depth: usize) -> Self {
        let mut arena = TransactionArena::with_store(config, store.clone());
        let root = arena.create_root().expect("Failed to create root transaction");
        let mut chain = vec![root];
        for _ in 0..depth {
            let leaf = *chain.last().expect("Chain always holds the root");
            let sub = arena
                .create_sub_transaction(leaf)
                .expect("Failed to create sub-transaction");
            chain.push(sub);
        }
        Self {
            arena,
            store,
            chain,
        }
    }

    /// Returns the root transaction.
    pub fn root(&self) -> TransactionId {
        self.chain[0]
    }

    /// Returns the deepest transaction created by the fixture.
    pub fn leaf(&self) -> TransactionId {
        self.chain[self.chain.len() - 1]
    }

    /// Returns the transaction at `level` (0 is the root).
    pub fn at(&self, level: usize) -> TransactionId {
        self.chain[level]
    }

    /// Returns the transactions created by the fixture, root first.
    pub fn chain(&self) -> &[TransactionId] {
        &self.chain
    }

    /// Activates the transaction at `level`.
    pub fn activate(&self, level: usize) -> ActivationScope {
        self.arena
            .activate(self.chain[level])
            .expect("Failed to activate transaction")
    }
}

impl std::ops::Deref for TestTree {
    type Target = TransactionArena;

    fn deref(&self) -> &Self::Target {
        &self.arena
    }
}

impl std::ops::DerefMut for TestTree {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.arena
    }
}

/// Runs a test against a root with `depth` nested sub-transactions.
///
/// # Example
///
/// ```rust,ignore
/// use txtree_testkit::with_tree;
///
/// #[test]
/// fn my_test() {
///     with_tree(2, |tree| {
///         assert!(tree.is_writeable(tree.leaf()).unwrap());
///     });
/// }
/// ```
pub fn with_tree<F, R>(depth: usize, f: F) -> R
where
    F: FnOnce(&mut TestTree) -> R,
{
    let mut tree = TestTree::new(depth);
    f(&mut tree)
}

/// Creates a store holding one record per id, each with a `name` property.
pub fn seeded_store(ids: &[EntityId]) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    for (index, id) in ids.iter().enumerate() {
        store.insert(ObjectRecord::new(*id).with_property("name", format!("object_{index}")));
    }
    store
}

/// Event handler that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<TransactionEvent>>,
}

impl RecordingHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events, oldest first.
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forgets the recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TransactionEventHandler for RecordingHandler {
    fn handle(&self, event: &TransactionEvent) -> CoreResult<()> {
        self.events.lock().push(*event);
        Ok(())
    }
}

/// The event a [`FailingHandler`] rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// `SubTransactionCreating`.
    Creating,
    /// `SubTransactionInitialize`.
    Initialize,
    /// `SubTransactionCreated`.
    Created,
    /// Every event.
    Any,
}

impl FailOn {
    fn matches(self, event: &TransactionEvent) -> bool {
        matches!(
            (self, event),
            (FailOn::Any, _)
                | (FailOn::Creating, TransactionEvent::SubTransactionCreating { .. })
                | (FailOn::Initialize, TransactionEvent::SubTransactionInitialize { .. })
                | (FailOn::Created, TransactionEvent::SubTransactionCreated { .. })
        )
    }
}

/// Event handler that aborts the operation raising a chosen event.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    fail_on: FailOn,
    message: String,
}

impl FailingHandler {
    /// Creates a handler failing on `fail_on` with `message`.
    pub fn new(fail_on: FailOn, message: impl Into<String>) -> Self {
        Self {
            fail_on,
            message: message.into(),
        }
    }

    /// Returns the error this handler produces.
    pub fn error(&self) -> CoreError {
        CoreError::event_handler(self.message.clone())
    }
}

impl TransactionEventHandler for FailingHandler {
    fn handle(&self, event: &TransactionEvent) -> CoreResult<()> {
        if self.fail_on.matches(event) {
            Err(self.error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_has_requested_depth() {
        let tree = TestTree::new(3);
        assert_eq!(tree.chain().len(), 4);
        assert_eq!(tree.hierarchy(tree.root()).unwrap().leaf_transaction(), tree.leaf());
        assert!(tree.is_writeable(tree.leaf()).unwrap());
        assert!(!tree.is_writeable(tree.at(1)).unwrap());
    }

    #[test]
    fn seeded_store_holds_every_id() {
        let ids = [EntityId::new(), EntityId::new()];
        let store = seeded_store(&ids);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get(ids[1]).unwrap().properties["name"],
            "object_1"
        );
    }

    #[test]
    fn recording_handler_sees_creation_events() {
        with_tree(0, |tree| {
            let recorder = Arc::new(RecordingHandler::new());
            let root = tree.root();
            tree.events(root).unwrap().subscribe_shared(recorder.clone());

            let sub = tree.create_sub_transaction(root).unwrap();
            assert_eq!(
                recorder.events(),
                vec![
                    TransactionEvent::SubTransactionCreating { transaction: root },
                    TransactionEvent::SubTransactionInitialize {
                        transaction: root,
                        child: sub
                    },
                    TransactionEvent::SubTransactionCreated {
                        transaction: root,
                        child: sub
                    },
                ]
            );
        });
    }

    #[test]
    fn failing_handler_vetoes_only_its_event() {
        let handler = FailingHandler::new(FailOn::Initialize, "no");
        let creating = TransactionEvent::SubTransactionCreating {
            transaction: TransactionId::new(1),
        };
        let initialize = TransactionEvent::SubTransactionInitialize {
            transaction: TransactionId::new(1),
            child: TransactionId::new(2),
        };
        assert!(handler.handle(&creating).is_ok());
        assert_eq!(handler.handle(&initialize).unwrap_err(), handler.error());
    }

    #[test]
    fn activate_by_level() {
        let tree = TestTree::new(2);
        let scope = tree.activate(1);
        assert_eq!(
            tree.hierarchy(tree.root()).unwrap().active_transaction(),
            tree.at(1)
        );
        drop(scope);
        assert_eq!(
            tree.hierarchy(tree.root()).unwrap().active_transaction(),
            tree.root()
        );
    }
}
