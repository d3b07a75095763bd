//! Property-based test generators using proptest.
//!
//! Provides strategies for entity ids and random hierarchy operation
//! sequences, plus a driver that applies such sequences and checks the
//! hierarchy invariants after every step.

use crate::fixtures::TestTree;
use proptest::prelude::*;
use txtree_core::{ActivationScope, EntityId, TransactionId};

/// Strategy for generating entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityId::from_bytes)
}

/// Strategy for generating small sets of distinct entity IDs.
pub fn entity_id_set_strategy(max: usize) -> impl Strategy<Value = Vec<EntityId>> {
    prop::collection::btree_set(entity_id_strategy(), 1..=max.max(1))
        .prop_map(|ids| ids.into_iter().collect())
}

/// A random step applied to a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyOp {
    /// Create a sub-transaction below the leaf.
    CreateSub,
    /// Discard the transaction at this position of the chain (never the root).
    Discard(usize),
    /// Activate the transaction at this position of the chain.
    Activate(usize),
    /// Release the most recent open scope.
    ReleaseInner,
    /// Release the oldest open scope, out of order if others are open.
    ReleaseOuter,
    /// Unlock the transaction at this position and lock it again.
    UnlockCycle(usize),
    /// Put ids into the load set of the transaction at this position and take
    /// them out again.
    LoadCycle(usize, Vec<EntityId>),
}

/// Strategy for generating hierarchy operations.
pub fn hierarchy_op_strategy() -> impl Strategy<Value = HierarchyOp> {
    prop_oneof![
        4 => Just(HierarchyOp::CreateSub),
        2 => any::<usize>().prop_map(HierarchyOp::Discard),
        3 => any::<usize>().prop_map(HierarchyOp::Activate),
        2 => Just(HierarchyOp::ReleaseInner),
        1 => Just(HierarchyOp::ReleaseOuter),
        1 => any::<usize>().prop_map(HierarchyOp::UnlockCycle),
        1 => (any::<usize>(), entity_id_set_strategy(3))
            .prop_map(|(level, ids)| HierarchyOp::LoadCycle(level, ids)),
    ]
}

/// Strategy for generating a sequence of hierarchy operations.
pub fn hierarchy_ops_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<HierarchyOp>> {
    prop::collection::vec(hierarchy_op_strategy(), min_ops..max_ops)
}

/// Applies [`HierarchyOp`]s to a single hierarchy.
pub struct HierarchyDriver {
    /// The hierarchy under test.
    pub tree: TestTree,
    scopes: Vec<ActivationScope>,
}

impl HierarchyDriver {
    /// Creates a driver over a lone root.
    pub fn new() -> Self {
        Self {
            tree: TestTree::new(0),
            scopes: Vec::new(),
        }
    }

    /// Returns the live root-to-leaf chain.
    pub fn chain(&self) -> Vec<TransactionId> {
        self.tree
            .hierarchy(self.tree.root())
            .expect("Root always exists")
            .chain()
    }

    /// Returns the number of scopes not yet released.
    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }

    fn pick(&self, position: usize) -> TransactionId {
        let chain = self.chain();
        chain[position % chain.len()]
    }

    /// Applies one operation. Operations that do not apply to the current
    /// shape (discarding with only a root) are skipped.
    pub fn apply(&mut self, op: &HierarchyOp) {
        match op {
            HierarchyOp::CreateSub => {
                let leaf = *self.chain().last().expect("Chain always holds the root");
                self.tree
                    .create_sub_transaction(leaf)
                    .expect("Leaf can always create a sub-transaction");
            }
            HierarchyOp::Discard(position) => {
                let chain = self.chain();
                if chain.len() > 1 {
                    let target = chain[1 + position % (chain.len() - 1)];
                    self.tree.discard(target).expect("Failed to discard");
                }
            }
            HierarchyOp::Activate(position) => {
                let target = self.pick(*position);
                let scope = self
                    .tree
                    .arena
                    .activate(target)
                    .expect("Chain members can always be activated");
                self.scopes.push(scope);
            }
            // After an out-of-order release the frames no longer follow the
            // opening order, so either release may report an error. Each
            // one still consumes exactly one frame.
            HierarchyOp::ReleaseInner => {
                if let Some(mut scope) = self.scopes.pop() {
                    let _ = scope.release();
                    assert!(scope.is_released());
                }
            }
            HierarchyOp::ReleaseOuter => {
                if !self.scopes.is_empty() {
                    let mut scope = self.scopes.remove(0);
                    let _ = scope.release();
                    assert!(scope.is_released());
                }
            }
            HierarchyOp::UnlockCycle(position) => {
                let target = self.pick(*position);
                let manager = self.tree.manager(target).expect("Chain member exists");
                let was_writeable = manager.is_writeable();
                let token = manager.unlock_if_required();
                assert!(manager.is_writeable());
                drop(token);
                assert_eq!(manager.is_writeable(), was_writeable);
            }
            HierarchyOp::LoadCycle(position, ids) => {
                let target = self.pick(*position);
                let manager = self.tree.manager(target).expect("Chain member exists");
                let listener = manager.read_only_listener();
                let before = listener.currently_loading();
                if manager.on_before_object_registration(ids).is_ok() {
                    assert!(listener.is_in_load_mode());
                    manager.on_after_object_registration(ids);
                }
                assert_eq!(listener.currently_loading(), before);
            }
        }
    }

    /// Releases every open scope, innermost first.
    pub fn release_all(&mut self) {
        while let Some(mut scope) = self.scopes.pop() {
            let _ = scope.release();
        }
    }

    /// Checks the hierarchy invariants, returning a description of the first
    /// violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let chain = self.chain();
        let leaf = *chain.last().ok_or("empty chain")?;
        let hierarchy = self
            .tree
            .hierarchy(self.tree.root())
            .map_err(|e| e.to_string())?;

        for (index, tx) in chain.iter().enumerate() {
            let writeable = self.tree.is_writeable(*tx).map_err(|e| e.to_string())?;
            let sub = self.tree.sub_transaction(*tx).map_err(|e| e.to_string())?;
            if writeable != (*tx == leaf) {
                return Err(format!("{tx} writeable = {writeable}, leaf is {leaf}"));
            }
            if sub != chain.get(index + 1).copied() {
                return Err(format!("{tx} has sub-transaction {sub:?}"));
            }
            if self
                .tree
                .manager(*tx)
                .map_err(|e| e.to_string())?
                .read_only_listener()
                .is_in_load_mode()
            {
                return Err(format!("{tx} left in load mode"));
            }
        }

        if hierarchy.activation_depth() != self.scopes.len() {
            return Err(format!(
                "activation depth {} with {} open scopes",
                hierarchy.activation_depth(),
                self.scopes.len()
            ));
        }
        if self.scopes.is_empty() && hierarchy.active_transaction() != self.tree.root() {
            return Err("active transaction not restored to root".to_string());
        }
        Ok(())
    }
}

impl Default for HierarchyDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
