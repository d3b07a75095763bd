//! End-to-end hierarchy scenarios.

use parking_lot::Mutex;
use std::sync::Arc;
use txtree_core::{
    Config, CoreError, CoreResult, EntityId, MemoryObjectStore, ObjectRecord,
    ScopeReleasePolicy, TransactionArena, TransactionEvent, TransactionId, TransactionListener,
};

fn id(byte: u8) -> EntityId {
    EntityId::from_bytes([byte; 16])
}

fn arena_with(ids: &[EntityId], config: Config) -> TransactionArena {
    let store = Arc::new(MemoryObjectStore::new());
    for id in ids {
        store.insert(ObjectRecord::new(*id).with_property("name", "stored"));
    }
    TransactionArena::with_store(config, store)
}

/// Root `R` with `S1` and `S2` nested below it.
fn two_levels(arena: &mut TransactionArena) -> (TransactionId, TransactionId, TransactionId) {
    let root = arena.create_root().unwrap();
    let s1 = arena.create_sub_transaction(root).unwrap();
    let s2 = arena.create_sub_transaction(s1).unwrap();
    (root, s1, s2)
}

#[test]
fn fresh_root_is_root_leaf_and_active() {
    let mut arena = TransactionArena::default();
    let root = arena.create_root().unwrap();
    let hierarchy = arena.hierarchy(root).unwrap();

    assert_eq!(hierarchy.root_transaction(), root);
    assert_eq!(hierarchy.leaf_transaction(), root);
    assert_eq!(hierarchy.active_transaction(), root);
    assert!(arena.is_writeable(root).unwrap());
}

#[test]
fn leaf_follows_sub_transactions_but_active_stays_at_root() {
    let mut arena = TransactionArena::default();
    let (root, _, s2) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    assert_eq!(hierarchy.leaf_transaction(), s2);
    assert_eq!(hierarchy.active_transaction(), root);
}

#[test]
fn activation_scope_restores_root() {
    let mut arena = TransactionArena::default();
    let (root, s1, _) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    let mut scope1 = hierarchy.activate_transaction(s1).unwrap();
    assert_eq!(hierarchy.active_transaction(), s1);
    scope1.release().unwrap();
    assert_eq!(hierarchy.active_transaction(), root);
}

#[test]
fn out_of_order_release_reports_and_still_unwinds() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    let mut scope1 = hierarchy.activate_transaction(s1).unwrap();
    let mut scope2 = hierarchy.activate_transaction(s2).unwrap();

    let err = scope1.release().unwrap_err();
    assert!(err.to_string().contains("must be disposed inside out"));
    let _ = scope2.release();
    assert_eq!(hierarchy.active_transaction(), root);
}

#[test]
fn strict_release_policy_keeps_the_stack() {
    let mut arena = TransactionArena::new(Config::new().scope_release(ScopeReleasePolicy::Strict));
    let (root, s1, s2) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    let mut scope1 = hierarchy.activate_transaction(s1).unwrap();
    let mut scope2 = hierarchy.activate_transaction(s2).unwrap();
    assert!(matches!(
        scope1.release(),
        Err(CoreError::OutOfOrderRelease { .. })
    ));
    assert_eq!(hierarchy.active_transaction(), s2);

    scope2.release().unwrap();
    scope1.release().unwrap();
    assert_eq!(hierarchy.active_transaction(), root);
}

#[test]
fn stale_scope_release_is_reported_on_that_scope() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    let mut scope1 = hierarchy.activate_transaction(s1).unwrap();
    let mut scope2 = hierarchy.activate_transaction(s2).unwrap();
    assert!(scope1.release().is_err());
    let mut scope3 = hierarchy.activate_transaction(s2).unwrap();

    assert!(matches!(
        scope2.release(),
        Err(CoreError::OutOfOrderRelease { .. })
    ));
    assert!(scope3.release().is_ok());
    assert_eq!(hierarchy.active_transaction(), root);
}

#[test]
fn strict_policy_scopes_dropped_out_of_order_restore_root() {
    let mut arena = TransactionArena::new(Config::new().scope_release(ScopeReleasePolicy::Strict));
    let (root, s1, s2) = two_levels(&mut arena);
    let hierarchy = arena.hierarchy(root).unwrap();

    let scope1 = hierarchy.activate_transaction(s1).unwrap();
    let scope2 = hierarchy.activate_transaction(s2).unwrap();
    drop(scope1);
    drop(scope2);

    assert_eq!(hierarchy.active_transaction(), root);
    assert_eq!(hierarchy.activation_depth(), 0);
}

#[test]
fn load_mode_permits_only_the_loading_objects() {
    let (a, b, c) = (id(1), id(2), id(3));
    let mut arena = arena_with(&[a, b, c], Config::default());
    let t = arena.create_root().unwrap();
    arena.load_objects(t, &[c]).unwrap();
    arena.create_sub_transaction(t).unwrap();
    assert!(!arena.is_writeable(t).unwrap());

    let mut rejected = None;
    arena
        .load_objects_with(t, &[a, b], |arena, loaded| {
            arena.set_property(t, loaded, "name", "defaulted")?;
            if rejected.is_none() {
                rejected = Some(arena.set_property(t, c, "name", "x").unwrap_err());
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(
        arena.get_property(t, a, "name").unwrap().as_deref(),
        Some("defaulted")
    );
    assert_eq!(
        arena.get_property(t, b, "name").unwrap().as_deref(),
        Some("defaulted")
    );
    let err = rejected.unwrap();
    assert_eq!(
        err,
        CoreError::LoadModeScopeViolation {
            loading: vec![a, b],
            operation: "property_value_changing".to_string(),
        }
    );
    let message = err.to_string();
    assert!(message.contains("only these objects can be modified"));
    assert!(message.contains(&a.to_string()));
    assert!(message.contains(&b.to_string()));

    // Load mode is over, so the locked transaction rejects everything again.
    assert_eq!(
        arena.set_property(t, a, "name", "late").unwrap_err(),
        CoreError::read_only(t, "property_value_changing")
    );
}

#[test]
fn object_pulled_into_sub_transaction_is_stale_in_parent() {
    let a = id(1);
    let mut arena = arena_with(&[a], Config::default());
    let t = arena.create_root().unwrap();
    arena.load_objects(t, &[a]).unwrap();
    let sub = arena.create_sub_transaction(t).unwrap();
    arena.load_objects(sub, &[a]).unwrap();

    let manager = arena.manager(t).unwrap();
    manager.on_before_object_registration(&[a]).unwrap();
    let err = arena.set_property(t, a, "name", "x").unwrap_err();
    manager.on_after_object_registration(&[a]);

    assert_eq!(err, CoreError::StaleWriteAfterDescendantLoad { id: a });
    assert!(err
        .to_string()
        .contains("already been loaded into the subtransaction"));
}

#[test]
fn stale_check_covers_distant_descendants() {
    let a = id(1);
    let mut arena = arena_with(&[a], Config::default());
    let (root, _, s2) = two_levels(&mut arena);
    arena.get_property(s2, a, "name").unwrap();

    let manager = arena.manager(root).unwrap();
    manager.on_before_object_registration(&[a]).unwrap();
    let err = arena.delete_object(root, a).unwrap_err();
    manager.on_after_object_registration(&[a]);
    assert_eq!(err, CoreError::StaleWriteAfterDescendantLoad { id: a });
}

#[test]
fn loading_into_sub_while_parent_loads_the_same_object_fails() {
    let a = id(1);
    let mut arena = arena_with(&[a], Config::default());
    let root = arena.create_root().unwrap();
    let sub = arena.create_sub_transaction(root).unwrap();

    let err = arena
        .load_objects_with(root, &[a], |arena, _| arena.load_objects(sub, &[a]))
        .unwrap_err();
    assert_eq!(err, CoreError::ConcurrentLoadConflict { ids: vec![a] });
    assert!(err
        .to_string()
        .contains("while they are being loaded into a parent transaction"));
    assert!(!arena.manager(root).unwrap().read_only_listener().is_in_load_mode());
    assert!(!arena.manager(sub).unwrap().read_only_listener().is_in_load_mode());
}

#[test]
fn exactly_the_leaf_is_writeable() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);

    let writeable: Vec<_> = [root, s1, s2]
        .into_iter()
        .filter(|tx| arena.is_writeable(*tx).unwrap())
        .collect();
    assert_eq!(writeable, vec![s2]);
}

#[test]
fn unlock_opens_a_second_writer_window_temporarily() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);
    let manager = arena.manager(s1).unwrap();

    {
        let _token = manager.unlock().unwrap();
        assert!(arena.is_writeable(s1).unwrap());
        assert!(arena.is_writeable(s2).unwrap());
        assert!(!arena.is_writeable(root).unwrap());
    }
    assert!(!arena.is_writeable(s1).unwrap());
}

#[test]
fn discarding_the_leaf_hands_the_lock_back() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);

    arena.discard(s2).unwrap();
    assert!(arena.is_writeable(s1).unwrap());
    assert!(!arena.is_writeable(root).unwrap());
    assert_eq!(arena.hierarchy(root).unwrap().leaf_transaction(), s1);

    arena.discard(s1).unwrap();
    assert!(arena.is_writeable(root).unwrap());
    assert_eq!(arena.hierarchy(root).unwrap().leaf_transaction(), root);
}

/// Records the hierarchy chain seen when its transaction is discarded.
#[derive(Default)]
struct ChainAtDiscard(Mutex<Vec<Vec<TransactionId>>>);

impl TransactionListener for ChainAtDiscard {
    fn transaction_discard(
        &self,
        arena: &mut TransactionArena,
        tx: TransactionId,
    ) -> CoreResult<()> {
        self.0.lock().push(arena.hierarchy(tx)?.chain());
        Ok(())
    }
}

#[test]
fn children_are_discarded_before_their_parent_unlinks() {
    let mut arena = TransactionArena::default();
    let (root, s1, s2) = two_levels(&mut arena);
    let leaf_listener = Arc::new(ChainAtDiscard::default());
    let middle_listener = Arc::new(ChainAtDiscard::default());
    arena.add_listener(s2, leaf_listener.clone()).unwrap();
    arena.add_listener(s1, middle_listener.clone()).unwrap();

    arena.discard(s1).unwrap();

    assert!(arena.is_discarded(s2).unwrap());
    // The leaf is gone first; its parent is still linked at that point.
    assert_eq!(*leaf_listener.0.lock(), vec![vec![root, s1]]);
    assert_eq!(*middle_listener.0.lock(), vec![vec![root]]);
    assert_eq!(arena.hierarchy(root).unwrap().chain(), vec![root]);
}

#[test]
fn initialize_handler_failure_aborts_creation() {
    let mut arena = TransactionArena::default();
    let root = arena.create_root().unwrap();
    arena
        .events(root)
        .unwrap()
        .subscribe(|event: &TransactionEvent| -> CoreResult<()> {
            if matches!(event, TransactionEvent::SubTransactionInitialize { .. }) {
                return Err(CoreError::event_handler("initialize vetoed"));
            }
            Ok(())
        });

    let err = arena.create_sub_transaction(root).unwrap_err();
    assert_eq!(err, CoreError::event_handler("initialize vetoed"));
    assert!(arena.is_writeable(root).unwrap());
    assert_eq!(arena.sub_transaction(root).unwrap(), None);
}

#[test]
fn created_handler_failure_keeps_the_child_linked() {
    let mut arena = TransactionArena::default();
    let root = arena.create_root().unwrap();
    arena
        .events(root)
        .unwrap()
        .subscribe(|event: &TransactionEvent| -> CoreResult<()> {
            if matches!(event, TransactionEvent::SubTransactionCreated { .. }) {
                return Err(CoreError::event_handler("created vetoed"));
            }
            Ok(())
        });

    assert!(arena.create_sub_transaction(root).is_err());
    let sub = arena.sub_transaction(root).unwrap().unwrap();
    assert!(!arena.is_writeable(root).unwrap());
    assert_eq!(arena.hierarchy(root).unwrap().leaf_transaction(), sub);
}
