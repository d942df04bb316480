//! Tests for rollback behavior.
//!
//! Rejecting or exiting a scope (explicitly or by dropping it) must leave
//! committed state untouched, and pending reference additions must never
//! become visible afterwards.

use tessera::{ContainerStore, Error, Value};

fn fixture() -> (ContainerStore, tessera::Uid, tessera::Uid) {
    let mut store = ContainerStore::new();
    store.registry_mut().define_complex("item", []).unwrap();
    let item = store.new_complex("item", []).unwrap();
    let list = store.new_list("item").unwrap();
    (store, item, list)
}

#[test]
fn reject_discards_changes_and_references() {
    let (mut store, item, list) = fixture();

    let mut scope = store.transact();
    scope.list_add(list, Value::Container(item)).unwrap();
    let err = scope.reject(Error::other("validation failed upstream"));
    assert!(matches!(err, Error::Other(_)), "the error is handed back");

    assert_eq!(store.len(list).unwrap(), 0);
    assert!(store.references(item).unwrap().is_empty());
    assert_eq!(store.version(list).unwrap(), 0);
}

#[test]
fn exit_is_an_implicit_rollback_without_error() {
    let (mut store, item, list) = fixture();

    let mut scope = store.transact();
    scope.list_add(list, Value::Container(item)).unwrap();
    scope.exit();

    assert_eq!(store.len(list).unwrap(), 0);
    assert!(store.references(item).unwrap().is_empty());
}

#[test]
fn dropping_a_scope_rolls_back() {
    let (mut store, item, list) = fixture();

    {
        let mut scope = store.transact();
        scope.list_add(list, Value::Container(item)).unwrap();
        assert_eq!(scope.len(list).unwrap(), 1);
    }

    assert_eq!(store.len(list).unwrap(), 0);
    assert!(store.references(item).unwrap().is_empty());
    assert!(!store.in_transaction());
}

#[test]
fn rollback_restores_previously_committed_state() {
    let (mut store, _item, list) = fixture();
    store.list_add(list, Value::from("committed")).unwrap();
    let version = store.version(list).unwrap();

    {
        let mut scope = store.transact();
        scope.list_remove(list, &Value::from("committed")).unwrap();
        scope.list_add(list, Value::from("pending")).unwrap();
        assert_eq!(scope.len(list).unwrap(), 1);
        assert_eq!(scope.at(list, 0).unwrap(), Some(Value::from("pending")));
        // dropped: rollback
    }

    assert_eq!(store.len(list).unwrap(), 1);
    assert_eq!(store.at(list, 0).unwrap(), Some(Value::from("committed")));
    assert_eq!(store.version(list).unwrap(), version);
}

#[test]
fn clear_changes_twice_equals_once() {
    let (mut store, _item, list) = fixture();

    let mut scope = store.transact();
    scope.list_add(list, Value::from("a")).unwrap();
    scope.clear_changes(list).unwrap();
    let after_once = scope.len(list).unwrap();
    scope.clear_changes(list).unwrap();
    assert_eq!(scope.len(list).unwrap(), after_once);
    assert!(!scope.has_changes(list));
    let _ = scope.accept().unwrap();

    assert_eq!(store.len(list).unwrap(), 0);
}

#[test]
fn clear_changes_reverts_ambient_reads_to_committed_state() {
    let (mut store, _item, list) = fixture();
    store.list_add(list, Value::from("committed")).unwrap();

    let mut scope = store.transact();
    scope.list_add(list, Value::from("pending")).unwrap();
    assert_eq!(scope.len(list).unwrap(), 2);

    scope.clear_changes(list).unwrap();
    assert_eq!(scope.len(list).unwrap(), 1, "ambient reads revert");
    assert_eq!(
        scope.at(list, 0).unwrap(),
        Some(Value::from("committed")),
        "previously committed state wins again"
    );
    scope.exit();
}

#[test]
fn property_rollback_restores_old_reference() {
    let mut store = ContainerStore::new();
    store.registry_mut().define_complex("leaf", []).unwrap();
    store
        .registry_mut()
        .define_complex(
            "holder",
            [tessera::types::PropertyDescriptor::new("leaf", "leaf")],
        )
        .unwrap();
    let old = store.new_complex("leaf", []).unwrap();
    let new = store.new_complex("leaf", []).unwrap();
    let holder = store.new_complex("holder", []).unwrap();
    store.set(holder, "leaf", Value::Container(old)).unwrap();

    {
        let mut scope = store.transact();
        scope.set(holder, "leaf", Value::Container(new)).unwrap();
        assert!(scope.references(old).unwrap().is_empty());
        assert_eq!(scope.references(new).unwrap().len(), 1);
        // dropped: rollback
    }

    assert_eq!(store.references(old).unwrap().len(), 1);
    assert!(store.references(new).unwrap().is_empty());
    assert_eq!(
        store.property(holder, "leaf").unwrap(),
        Some(Value::Container(old))
    );
}
