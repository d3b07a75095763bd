//! Root/leaf/active bookkeeping shared by every transaction of one hierarchy.

use crate::config::ScopeReleasePolicy;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{trace, warn};

/// The shared view of one root transaction and its chain of sub-transactions.
///
/// A hierarchy tracks:
/// - the root, fixed at construction
/// - the leaf, the deepest transaction appended so far
/// - the activation stack, whose top is the active transaction
///
/// Every manager descended from the root holds the same `Arc`, so distant
/// descendants and the root always agree about the leaf and the active
/// transaction.
pub struct TransactionHierarchy {
    root: TransactionId,
    policy: ScopeReleasePolicy,
    state: RwLock<HierarchyState>,
}

#[derive(Debug)]
struct HierarchyState {
    /// Root first, leaf last.
    chain: Vec<TransactionId>,
    /// Root first, active last. Never empty.
    active_stack: Vec<ActivationFrame>,
    /// Token handed to the next activation scope.
    next_token: u64,
}

/// One entry of the activation stack.
///
/// Every open scope owns exactly one frame, identified by its token. The
/// root frame has token 0, which no scope ever receives.
#[derive(Debug, Clone, Copy)]
struct ActivationFrame {
    token: u64,
    transaction: TransactionId,
}

impl HierarchyState {
    fn active(&self, root: TransactionId) -> TransactionId {
        self.active_stack
            .last()
            .map_or(root, |frame| frame.transaction)
    }

    fn top_token(&self) -> u64 {
        self.active_stack.last().map_or(0, |frame| frame.token)
    }
}

impl TransactionHierarchy {
    /// Creates a hierarchy containing only `root`.
    pub fn new(root: TransactionId, policy: ScopeReleasePolicy) -> Self {
        Self {
            root,
            policy,
            state: RwLock::new(HierarchyState {
                chain: vec![root],
                active_stack: vec![ActivationFrame {
                    token: 0,
                    transaction: root,
                }],
                next_token: 1,
            }),
        }
    }

    /// Returns the root transaction.
    pub fn root_transaction(&self) -> TransactionId {
        self.root
    }

    /// Returns the deepest transaction of the hierarchy.
    pub fn leaf_transaction(&self) -> TransactionId {
        let state = self.state.read();
        *state.chain.last().unwrap_or(&self.root)
    }

    /// Returns the transaction on top of the activation stack.
    pub fn active_transaction(&self) -> TransactionId {
        self.state.read().active(self.root)
    }

    /// Returns the root-to-leaf chain.
    pub fn chain(&self) -> Vec<TransactionId> {
        self.state.read().chain.clone()
    }

    /// Returns the number of open activation scopes.
    pub fn activation_depth(&self) -> usize {
        self.state.read().active_stack.len() - 1
    }

    /// Returns true if `transaction` is on the root-to-leaf chain.
    pub fn contains(&self, transaction: TransactionId) -> bool {
        self.state.read().chain.contains(&transaction)
    }

    /// Returns the scope release policy.
    pub fn scope_release_policy(&self) -> ScopeReleasePolicy {
        self.policy
    }

    /// Appends `new_leaf`, whose parent must be the current leaf.
    ///
    /// The active transaction is unaffected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHierarchyLink` if `parent` is not the current leaf.
    pub fn append_leaf_transaction(
        &self,
        new_leaf: TransactionId,
        parent: Option<TransactionId>,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        let leaf = *state.chain.last().unwrap_or(&self.root);
        if parent != Some(leaf) {
            return Err(CoreError::InvalidHierarchyLink { leaf, new_leaf });
        }
        state.chain.push(new_leaf);
        Ok(())
    }

    /// Removes the leaf, making its parent the new leaf.
    ///
    /// Returns the removed transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotRemovableRoot` if the leaf is the root.
    pub fn remove_leaf_transaction(&self) -> CoreResult<TransactionId> {
        let mut state = self.state.write();
        if state.chain.len() <= 1 {
            return Err(CoreError::NotRemovableRoot { root: self.root });
        }
        state
            .chain
            .pop()
            .ok_or(CoreError::NotRemovableRoot { root: self.root })
    }

    /// Makes `transaction` the active transaction until the returned scope is
    /// released.
    ///
    /// # Errors
    ///
    /// Returns `NotInHierarchy` if `transaction` is not on the root-to-leaf
    /// chain. The active transaction is left unchanged.
    pub fn activate_transaction(
        self: &Arc<Self>,
        transaction: TransactionId,
    ) -> CoreResult<ActivationScope> {
        let mut state = self.state.write();
        if !state.chain.contains(&transaction) {
            return Err(CoreError::NotInHierarchy { transaction });
        }
        let previous_active = state.active(self.root);
        let token = state.next_token;
        state.next_token += 1;
        state.active_stack.push(ActivationFrame { token, transaction });
        let depth = state.active_stack.len() - 1;
        trace!(%transaction, %previous_active, depth, "transaction activated");

        Ok(ActivationScope {
            hierarchy: Arc::clone(self),
            activated: transaction,
            previous_active,
            token,
            released: false,
        })
    }

    /// Releases the frame owned by the scope holding `token`.
    ///
    /// Only the top frame releases cleanly. Otherwise, under `AlwaysPop` the
    /// top frame is popped anyway and its token passes to the releasing
    /// scope's frame, so each open scope still owns one frame. Under `Strict`
    /// nothing changes unless the scope is being dropped, in which case its
    /// own frame is removed.
    ///
    /// Returns whether the scope is now consumed alongside the outcome.
    fn release_scope(
        &self,
        token: u64,
        activated: TransactionId,
        dropping: bool,
    ) -> (bool, CoreResult<()>) {
        let mut state = self.state.write();
        if state.top_token() == token {
            state.active_stack.pop();
            trace!(transaction = %activated, "activation scope released");
            return (true, Ok(()));
        }

        let actual = state.active(self.root);
        let consumed = match (self.policy, dropping) {
            (ScopeReleasePolicy::AlwaysPop, _) => {
                if state.active_stack.len() > 1 {
                    if let Some(popped) = state.active_stack.pop() {
                        if let Some(own) = state
                            .active_stack
                            .iter_mut()
                            .find(|frame| frame.token == token)
                        {
                            own.token = popped.token;
                        }
                    }
                }
                true
            }
            (ScopeReleasePolicy::Strict, true) => {
                if let Some(position) = state
                    .active_stack
                    .iter()
                    .position(|frame| frame.token == token)
                {
                    state.active_stack.remove(position);
                }
                true
            }
            (ScopeReleasePolicy::Strict, false) => false,
        };
        warn!(
            expected = %activated,
            %actual,
            policy = ?self.policy,
            "activation scope released out of order"
        );
        (
            consumed,
            Err(CoreError::OutOfOrderRelease {
                expected: activated,
                actual,
            }),
        )
    }
}

impl std::fmt::Debug for TransactionHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TransactionHierarchy")
            .field("root", &self.root)
            .field("chain", &state.chain)
            .field("active", &state.active(self.root))
            .field("activation_depth", &(state.active_stack.len() - 1))
            .finish()
    }
}

/// Handle returned by [`TransactionHierarchy::activate_transaction`].
///
/// Releasing the scope restores the previously active transaction. Scopes must
/// be released inside out; dropping an unreleased scope releases it and logs
/// any error.
#[must_use = "dropping the scope immediately restores the previous active transaction"]
pub struct ActivationScope {
    hierarchy: Arc<TransactionHierarchy>,
    activated: TransactionId,
    previous_active: TransactionId,
    token: u64,
    released: bool,
}

impl ActivationScope {
    /// Returns the transaction this scope activated.
    pub fn activated_transaction(&self) -> TransactionId {
        self.activated
    }

    /// Returns the transaction that was active before this scope.
    pub fn previous_active(&self) -> TransactionId {
        self.previous_active
    }

    /// Returns true once the scope has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Releases the scope. Releasing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrderRelease` if a more recently created scope is still
    /// open. Under [`ScopeReleasePolicy::AlwaysPop`] the activation stack is
    /// still popped by one level and the scope counts as released.
    pub fn release(&mut self) -> CoreResult<()> {
        if self.released {
            return Ok(());
        }
        let (consumed, result) = self
            .hierarchy
            .release_scope(self.token, self.activated, false);
        self.released = consumed;
        result
    }
}

impl Drop for ActivationScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let (_, result) = self
            .hierarchy
            .release_scope(self.token, self.activated, true);
        self.released = true;
        if let Err(err) = result {
            warn!(error = %err, "activation scope dropped with an error");
        }
    }
}

impl std::fmt::Debug for ActivationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationScope")
            .field("activated", &self.activated)
            .field("previous_active", &self.previous_active)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    /// Root 1 with leaves 2 and 3 appended.
    fn three_levels(policy: ScopeReleasePolicy) -> Arc<TransactionHierarchy> {
        let hierarchy = Arc::new(TransactionHierarchy::new(tx(1), policy));
        hierarchy.append_leaf_transaction(tx(2), Some(tx(1))).unwrap();
        hierarchy.append_leaf_transaction(tx(3), Some(tx(2))).unwrap();
        hierarchy
    }

    #[test]
    fn new_hierarchy_points_at_root() {
        let hierarchy = TransactionHierarchy::new(tx(1), ScopeReleasePolicy::default());
        assert_eq!(hierarchy.root_transaction(), tx(1));
        assert_eq!(hierarchy.leaf_transaction(), tx(1));
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn append_requires_leaf_as_parent() {
        let hierarchy = TransactionHierarchy::new(tx(1), ScopeReleasePolicy::default());
        let err = hierarchy
            .append_leaf_transaction(tx(3), Some(tx(2)))
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidHierarchyLink {
                leaf: tx(1),
                new_leaf: tx(3)
            }
        );
        assert_eq!(hierarchy.leaf_transaction(), tx(1));
    }

    #[test]
    fn append_does_not_change_active() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        assert_eq!(hierarchy.leaf_transaction(), tx(3));
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn remove_leaf_restores_previous_leaf() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        assert_eq!(hierarchy.remove_leaf_transaction().unwrap(), tx(3));
        assert_eq!(hierarchy.leaf_transaction(), tx(2));
    }

    #[test]
    fn removing_root_fails_without_side_effects() {
        let hierarchy = TransactionHierarchy::new(tx(1), ScopeReleasePolicy::default());
        let err = hierarchy.remove_leaf_transaction().unwrap_err();
        assert_eq!(err, CoreError::NotRemovableRoot { root: tx(1) });
        assert_eq!(hierarchy.chain(), vec![tx(1)]);
    }

    #[test]
    fn activate_and_release_restores_active() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        let mut scope = hierarchy.activate_transaction(tx(2)).unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(2));
        assert_eq!(scope.previous_active(), tx(1));

        scope.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(1));
        assert!(scope.is_released());
    }

    #[test]
    fn activating_foreign_transaction_fails() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        let err = hierarchy.activate_transaction(tx(9)).unwrap_err();
        assert_eq!(err, CoreError::NotInHierarchy { transaction: tx(9) });
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn double_release_is_noop() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        let mut outer = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut inner = hierarchy.activate_transaction(tx(3)).unwrap();
        inner.release().unwrap();
        inner.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(2));
        outer.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn drop_releases_scope() {
        let hierarchy = three_levels(ScopeReleasePolicy::default());
        {
            let _scope = hierarchy.activate_transaction(tx(3)).unwrap();
            assert_eq!(hierarchy.active_transaction(), tx(3));
        }
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn out_of_order_release_pops_and_reports() {
        let hierarchy = three_levels(ScopeReleasePolicy::AlwaysPop);
        let mut scope1 = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut scope2 = hierarchy.activate_transaction(tx(3)).unwrap();

        let err = scope1.release().unwrap_err();
        assert!(err.to_string().contains("must be disposed inside out"));
        assert_eq!(hierarchy.active_transaction(), tx(2));

        // scope2 now owns the frame scope1 left behind.
        assert!(scope2.release().is_ok());
        assert_eq!(hierarchy.active_transaction(), tx(1));
        assert_eq!(hierarchy.activation_depth(), 0);
    }

    #[test]
    fn stale_scope_cannot_release_a_newer_scope() {
        let hierarchy = three_levels(ScopeReleasePolicy::AlwaysPop);
        let mut scope1 = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut scope2 = hierarchy.activate_transaction(tx(3)).unwrap();
        assert!(scope1.release().is_err());

        // scope3 lands at the height scope2 was opened at.
        let mut scope3 = hierarchy.activate_transaction(tx(3)).unwrap();
        assert!(matches!(
            scope2.release(),
            Err(CoreError::OutOfOrderRelease { .. })
        ));
        assert_eq!(hierarchy.activation_depth(), 1);

        scope3.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(1));
        assert_eq!(hierarchy.activation_depth(), 0);
    }

    #[test]
    fn strict_policy_refuses_out_of_order_release() {
        let hierarchy = three_levels(ScopeReleasePolicy::Strict);
        let mut scope1 = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut scope2 = hierarchy.activate_transaction(tx(3)).unwrap();

        assert!(scope1.release().is_err());
        assert!(!scope1.is_released());
        assert_eq!(hierarchy.active_transaction(), tx(3));

        scope2.release().unwrap();
        scope1.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn strict_drop_out_of_order_still_unwinds() {
        let hierarchy = three_levels(ScopeReleasePolicy::Strict);
        let scope1 = hierarchy.activate_transaction(tx(2)).unwrap();
        let scope2 = hierarchy.activate_transaction(tx(3)).unwrap();

        drop(scope1);
        assert_eq!(hierarchy.active_transaction(), tx(3));
        assert_eq!(hierarchy.activation_depth(), 1);

        drop(scope2);
        assert_eq!(hierarchy.active_transaction(), tx(1));
        assert_eq!(hierarchy.activation_depth(), 0);
    }

    #[test]
    fn strict_drop_after_refused_release_removes_own_frame() {
        let hierarchy = three_levels(ScopeReleasePolicy::Strict);
        let mut scope1 = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut scope2 = hierarchy.activate_transaction(tx(3)).unwrap();
        assert!(scope1.release().is_err());
        drop(scope1);

        scope2.release().unwrap();
        assert_eq!(hierarchy.active_transaction(), tx(1));
    }

    #[test]
    fn root_frame_is_never_popped() {
        let hierarchy = three_levels(ScopeReleasePolicy::AlwaysPop);
        let mut a = hierarchy.activate_transaction(tx(2)).unwrap();
        let mut b = hierarchy.activate_transaction(tx(3)).unwrap();
        let mut c = hierarchy.activate_transaction(tx(3)).unwrap();
        let _ = a.release();
        let _ = b.release();
        let _ = c.release();
        assert_eq!(hierarchy.active_transaction(), tx(1));
        assert_eq!(hierarchy.activation_depth(), 0);
    }

    proptest! {
        #[test]
        fn nested_scopes_released_inside_out_restore_root(
            targets in prop::collection::vec(1u64..=3, 0..8)
        ) {
            let hierarchy = three_levels(ScopeReleasePolicy::default());
            let mut scopes = Vec::new();
            for target in &targets {
                scopes.push(hierarchy.activate_transaction(tx(*target)).unwrap());
                prop_assert_eq!(hierarchy.active_transaction(), tx(*target));
            }
            while let Some(mut scope) = scopes.pop() {
                let previous = scope.previous_active();
                prop_assert!(scope.release().is_ok());
                prop_assert_eq!(hierarchy.active_transaction(), previous);
            }
            prop_assert_eq!(hierarchy.active_transaction(), tx(1));
        }

        #[test]
        fn any_release_order_keeps_one_frame_per_open_scope(
            steps in prop::collection::vec((any::<bool>(), any::<usize>(), any::<bool>()), 0..24),
            strict in any::<bool>(),
        ) {
            let policy = if strict {
                ScopeReleasePolicy::Strict
            } else {
                ScopeReleasePolicy::AlwaysPop
            };
            let hierarchy = three_levels(policy);
            let mut open: Vec<ActivationScope> = Vec::new();
            for (activate, pick, dropping) in steps {
                if activate || open.is_empty() {
                    let target = tx(1 + pick as u64 % 3);
                    open.push(hierarchy.activate_transaction(target).unwrap());
                } else {
                    let mut scope = open.remove(pick % open.len());
                    if dropping {
                        drop(scope);
                    } else {
                        let _ = scope.release();
                        if !scope.is_released() {
                            open.push(scope);
                        }
                    }
                }
                prop_assert_eq!(hierarchy.activation_depth(), open.len());
            }

            drop(open);
            prop_assert_eq!(hierarchy.active_transaction(), tx(1));
            prop_assert_eq!(hierarchy.activation_depth(), 0);
        }
    }
}
