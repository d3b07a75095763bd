//! Per-transaction hierarchy manager.

use crate::config::Config;
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::events::TransactionEvents;
use crate::listener::{InvalidationListener, ListenerBroker, LoadRuleListener};
use crate::transaction::hierarchy::TransactionHierarchy;
use crate::transaction::TransactionArena;
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The writeable flag of one transaction.
///
/// Cloning shares the flag, which lets unlock tokens outlive any borrow of
/// the arena. The epoch advances whenever the sub-transaction is removed, so
/// tokens taken before that no longer own the flag.
#[derive(Debug, Clone)]
pub struct WriteFlag(Arc<FlagState>);

#[derive(Debug)]
struct FlagState {
    writeable: AtomicBool,
    epoch: AtomicU64,
}

impl WriteFlag {
    fn new(writeable: bool) -> Self {
        Self(Arc::new(FlagState {
            writeable: AtomicBool::new(writeable),
            epoch: AtomicU64::new(0),
        }))
    }

    /// Returns true if the transaction accepts modifications.
    pub fn get(&self) -> bool {
        self.0.writeable.load(Ordering::SeqCst)
    }

    fn set(&self, writeable: bool) {
        self.0.writeable.store(writeable, Ordering::SeqCst);
    }

    fn epoch(&self) -> u64 {
        self.0.epoch.load(Ordering::SeqCst)
    }

    /// Sets the flag and detaches every outstanding unlock token.
    fn reset(&self, writeable: bool) {
        self.0.epoch.fetch_add(1, Ordering::SeqCst);
        self.set(writeable);
    }
}

/// Token returned by [`TransactionHierarchyManager::unlock`].
///
/// While the token is held the transaction is writeable. Releasing it (or
/// dropping it) makes the transaction read-only again, unless its
/// sub-transaction was removed in the meantime.
#[must_use = "dropping the token immediately locks the transaction again"]
pub struct UnlockToken {
    transaction: TransactionId,
    flag: Option<(WriteFlag, u64)>,
}

impl UnlockToken {
    fn new(transaction: TransactionId, flag: WriteFlag) -> Self {
        let epoch = flag.epoch();
        Self {
            transaction,
            flag: Some((flag, epoch)),
        }
    }

    fn noop(transaction: TransactionId) -> Self {
        Self {
            transaction,
            flag: None,
        }
    }

    /// Returns the unlocked transaction.
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Returns true once the token has been released, or if it never held
    /// anything.
    pub fn is_released(&self) -> bool {
        self.flag.is_none()
    }

    /// Locks the transaction again. Releasing twice is a no-op.
    pub fn release(&mut self) {
        if let Some((flag, epoch)) = self.flag.take() {
            if flag.epoch() == epoch {
                flag.set(false);
                trace!(transaction = %self.transaction, "transaction locked again");
            } else {
                trace!(transaction = %self.transaction, "sub-transaction gone, lock not restored");
            }
        }
    }
}

impl Drop for UnlockToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for UnlockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockToken")
            .field("transaction", &self.transaction)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Holds a transaction locked while its sub-transaction is being built.
///
/// Unless [`keep`](Self::keep) is called, dropping the guard restores the
/// previous writeability, so every failure path leaves the parent unlocked.
struct CreationLock {
    flag: WriteFlag,
    previous: bool,
    kept: bool,
}

impl CreationLock {
    fn acquire(flag: &WriteFlag) -> Self {
        let previous = flag.get();
        flag.set(false);
        Self {
            flag: flag.clone(),
            previous,
            kept: false,
        }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for CreationLock {
    fn drop(&mut self) {
        if !self.kept {
            self.flag.set(self.previous);
        }
    }
}

/// Coordinates one transaction with its parent, its sub-transaction and the
/// shared [`TransactionHierarchy`].
///
/// The manager owns the transaction's writeable flag and its load-rule
/// guard. A child's manager keeps its parent's manager alive; the parent only
/// refers to its child by id.
pub struct TransactionHierarchyManager {
    this_transaction: TransactionId,
    this_events: Arc<TransactionEvents>,
    parent_transaction: Option<TransactionId>,
    parent_manager: Option<Arc<TransactionHierarchyManager>>,
    parent_events: Option<Arc<TransactionEvents>>,
    sub_transaction: RwLock<Option<TransactionId>>,
    hierarchy: Arc<TransactionHierarchy>,
    read_only_listener: Arc<LoadRuleListener>,
    writeable: WriteFlag,
    listeners_installed: AtomicBool,
}

impl TransactionHierarchyManager {
    /// Creates the manager of a root transaction, with a fresh hierarchy.
    pub fn new_root(
        this_transaction: TransactionId,
        this_events: Arc<TransactionEvents>,
        config: &Config,
    ) -> Self {
        Self {
            this_transaction,
            this_events,
            parent_transaction: None,
            parent_manager: None,
            parent_events: None,
            sub_transaction: RwLock::new(None),
            hierarchy: Arc::new(TransactionHierarchy::new(
                this_transaction,
                config.scope_release,
            )),
            read_only_listener: Arc::new(LoadRuleListener::new()),
            writeable: WriteFlag::new(true),
            listeners_installed: AtomicBool::new(false),
        }
    }

    /// Creates the manager of a sub-transaction of `parent`.
    ///
    /// The hierarchy is shared with the parent, never copied.
    pub fn new_child(
        this_transaction: TransactionId,
        this_events: Arc<TransactionEvents>,
        parent: Arc<TransactionHierarchyManager>,
    ) -> Self {
        Self {
            this_transaction,
            this_events,
            parent_transaction: Some(parent.this_transaction),
            parent_events: Some(Arc::clone(&parent.this_events)),
            hierarchy: Arc::clone(&parent.hierarchy),
            parent_manager: Some(parent),
            sub_transaction: RwLock::new(None),
            read_only_listener: Arc::new(LoadRuleListener::new()),
            writeable: WriteFlag::new(true),
            listeners_installed: AtomicBool::new(false),
        }
    }

    /// Returns the managed transaction.
    pub fn transaction(&self) -> TransactionId {
        self.this_transaction
    }

    /// Returns the parent transaction, if any.
    pub fn parent_transaction(&self) -> Option<TransactionId> {
        self.parent_transaction
    }

    /// Returns the parent's manager, if any.
    pub fn parent_manager(&self) -> Option<&Arc<TransactionHierarchyManager>> {
        self.parent_manager.as_ref()
    }

    /// Returns the live sub-transaction, if any.
    pub fn sub_transaction(&self) -> Option<TransactionId> {
        *self.sub_transaction.read()
    }

    /// Returns the shared hierarchy.
    pub fn hierarchy(&self) -> &Arc<TransactionHierarchy> {
        &self.hierarchy
    }

    /// Returns the transaction's own event sink.
    pub fn events(&self) -> &Arc<TransactionEvents> {
        &self.this_events
    }

    /// Returns the load-rule guard installed on this transaction.
    pub fn read_only_listener(&self) -> &Arc<LoadRuleListener> {
        &self.read_only_listener
    }

    /// Returns true if the transaction accepts modifications.
    pub fn is_writeable(&self) -> bool {
        self.writeable.get()
    }

    /// Returns a shared handle to the writeable flag.
    pub fn write_flag(&self) -> WriteFlag {
        self.writeable.clone()
    }

    /// Registers the load-rule guard and the invalidation listener, in that
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the listeners were already installed.
    pub fn install_listeners(&self, broker: &mut ListenerBroker) -> CoreResult<()> {
        if self.listeners_installed.swap(true, Ordering::SeqCst) {
            return Err(CoreError::invalid_operation(format!(
                "the hierarchy listeners of {} are already installed",
                self.this_transaction
            )));
        }
        broker.add_listener(self.read_only_listener.clone());
        broker.add_listener(Arc::new(InvalidationListener::new()));
        Ok(())
    }

    /// Tells the parent that this sub-transaction is being initialized.
    ///
    /// Runs while the parent is already locked.
    ///
    /// # Errors
    ///
    /// Propagates the first failing handler of the parent's event sink.
    pub fn on_before_transaction_initialize(&self) -> CoreResult<()> {
        match &self.parent_events {
            Some(parent_events) => {
                parent_events.raise_sub_transaction_initialize(self.this_transaction)
            }
            None => Ok(()),
        }
    }

    /// Discards the sub-transaction chain below this transaction, then
    /// unlinks this transaction from its parent.
    ///
    /// # Errors
    ///
    /// Propagates errors raised while discarding the sub-transaction.
    pub fn on_transaction_discard(&self, arena: &mut TransactionArena) -> CoreResult<()> {
        if let Some(sub) = self.sub_transaction() {
            arena.discard(sub)?;
        }
        if let Some(parent) = &self.parent_manager {
            if self.hierarchy.contains(self.this_transaction) {
                parent.remove_sub_transaction()?;
            }
        }
        Ok(())
    }

    /// Creates a sub-transaction through `factory` and links it as the new
    /// leaf.
    ///
    /// This transaction is locked before the factory runs. If anything fails
    /// before the child is linked, it is unlocked again and keeps no
    /// sub-transaction.
    ///
    /// # Errors
    ///
    /// - `ReadOnlyViolation` if this transaction is not writeable
    /// - `FactoryContractViolation` if the factory returned a transaction
    ///   that is not a child of this one
    /// - any error from an event handler, a listener or the factory
    pub fn create_sub_transaction<F>(
        &self,
        arena: &mut TransactionArena,
        factory: F,
    ) -> CoreResult<TransactionId>
    where
        F: FnOnce(&mut TransactionArena, TransactionId) -> CoreResult<TransactionId>,
    {
        let tx = self.this_transaction;
        arena.notify(tx, |listener, arena| {
            listener.sub_transaction_creating(arena, tx)
        })?;
        self.this_events.raise_sub_transaction_creating()?;

        let lock = CreationLock::acquire(&self.writeable);
        let child = factory(arena, tx)?;
        self.ensure_child_of_this(arena, child)?;
        self.hierarchy.append_leaf_transaction(child, Some(tx))?;
        *self.sub_transaction.write() = Some(child);
        lock.keep();
        debug!(transaction = %tx, %child, "sub-transaction created");

        self.this_events.raise_sub_transaction_created(child)?;
        arena.notify(tx, |listener, arena| {
            listener.sub_transaction_created(arena, tx, child)
        })?;
        Ok(child)
    }

    fn ensure_child_of_this(
        &self,
        arena: &TransactionArena,
        child: TransactionId,
    ) -> CoreResult<()> {
        let linked = match arena.manager(child) {
            Ok(manager) => {
                manager.parent_transaction == Some(self.this_transaction)
                    && Arc::ptr_eq(&manager.hierarchy, &self.hierarchy)
            }
            Err(_) => false,
        };
        if linked {
            Ok(())
        } else {
            Err(CoreError::FactoryContractViolation {
                parent: self.this_transaction,
            })
        }
    }

    /// Unlinks the leaf below this transaction and makes this transaction
    /// writeable again.
    ///
    /// No-op if this transaction is already the leaf.
    ///
    /// # Errors
    ///
    /// Returns `NotRemovableRoot` if the hierarchy's leaf is its root.
    pub fn remove_sub_transaction(&self) -> CoreResult<()> {
        if self.hierarchy.leaf_transaction() == self.this_transaction {
            return Ok(());
        }
        let removed = self.hierarchy.remove_leaf_transaction()?;
        *self.sub_transaction.write() = None;
        self.writeable.reset(true);
        debug!(transaction = %self.this_transaction, sub = %removed, "sub-transaction removed");
        Ok(())
    }

    /// Makes this locked transaction writeable until the token is released.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyWriteable` if the transaction is already writeable.
    pub fn unlock(&self) -> CoreResult<UnlockToken> {
        if self.writeable.get() {
            return Err(CoreError::AlreadyWriteable {
                transaction: self.this_transaction,
            });
        }
        self.writeable.set(true);
        trace!(transaction = %self.this_transaction, "transaction unlocked");
        Ok(UnlockToken::new(self.this_transaction, self.writeable.clone()))
    }

    /// Like [`unlock`](Self::unlock), but returns a token that does nothing if
    /// the transaction is already writeable.
    pub fn unlock_if_required(&self) -> UnlockToken {
        if self.writeable.get() {
            return UnlockToken::noop(self.this_transaction);
        }
        self.writeable.set(true);
        UnlockToken::new(self.this_transaction, self.writeable.clone())
    }

    /// Enters load mode for `ids`.
    ///
    /// The parent is asked first so that it can reject objects it is loading
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentLoadConflict` if the parent is loading any of `ids`.
    pub fn on_before_object_registration(&self, ids: &[EntityId]) -> CoreResult<()> {
        if let Some(parent) = &self.parent_manager {
            parent.on_before_sub_transaction_object_registration(ids)?;
        }
        self.read_only_listener.add_currently_loading(ids);
        Ok(())
    }

    /// Leaves load mode for `ids`.
    pub fn on_after_object_registration(&self, ids: &[EntityId]) {
        self.read_only_listener.remove_currently_loading(ids);
    }

    /// Rejects a sub-transaction load that overlaps this transaction's own.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentLoadConflict` listing the overlapping ids.
    pub fn on_before_sub_transaction_object_registration(
        &self,
        ids: &[EntityId],
    ) -> CoreResult<()> {
        let mut conflicts: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|id| self.read_only_listener.is_loading(*id))
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }
        conflicts.sort();
        conflicts.dedup();
        warn!(
            transaction = %self.this_transaction,
            count = conflicts.len(),
            "sub-transaction load overlaps a load in progress"
        );
        Err(CoreError::ConcurrentLoadConflict { ids: conflicts })
    }
}

impl std::fmt::Debug for TransactionHierarchyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHierarchyManager")
            .field("transaction", &self.this_transaction)
            .field("parent", &self.parent_transaction)
            .field("sub_transaction", &self.sub_transaction())
            .field("writeable", &self.is_writeable())
            .finish_non_exhaustive()
    }
}
