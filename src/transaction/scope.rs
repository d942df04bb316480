// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::CommitOutcome;
use crate::{Result, error::Error, store::ContainerStore};
use std::ops::{Deref, DerefMut};

/// The handle for one entered transaction.
///
/// A scope exclusively borrows the store (it dereferences to it, so every
/// read and mutator is available on the scope itself) and must resolve one
/// of three ways:
///
/// - [`accept`](Scope::accept): commit — or, for a nested scope, merge into
///   the enclosing transaction;
/// - [`reject`](Scope::reject): discard with an error the caller gets back;
/// - [`exit`](Scope::exit): discard without an error.
///
/// Dropping a scope without resolving it is an implicit [`exit`](Scope::exit),
/// so every exit path — success, early return or panic unwind — pops the
/// transaction it pushed.
///
/// # Example
///
/// ```rust
/// use tessera::{ContainerStore, Value};
///
/// let mut store = ContainerStore::new();
/// store.registry_mut().define_complex("item", []).unwrap();
/// let list = store.new_list("item").unwrap();
///
/// let mut scope = store.transact();
/// scope.list_add(list, Value::from("a")).unwrap();
/// let outcome = scope.accept().unwrap();
/// assert!(outcome.is_committed());
/// ```
#[must_use = "an unused scope exits (rolls back) immediately"]
pub struct Scope<'s> {
    store: &'s mut ContainerStore,
    resolved: bool,
}

impl<'s> Scope<'s> {
    pub(crate) fn new(store: &'s mut ContainerStore) -> Self {
        Self {
            store,
            resolved: false,
        }
    }

    /// Accepts the transaction.
    ///
    /// For the outermost scope this drives the commit protocol and reports
    /// [`CommitOutcome::Committed`] or the soft [`CommitOutcome::Canceled`];
    /// a phase listener failure rejects the transaction and surfaces here as
    /// the error. For a nested scope, changes merge into the enclosing
    /// transaction and the outcome is [`CommitOutcome::MergedIntoParent`].
    pub fn accept(mut self) -> Result<CommitOutcome> {
        self.resolved = true;
        self.store.accept_innermost()
    }

    /// Rejects the transaction: all pending changes and reference additions
    /// are discarded, `change:finally` fires with the error, and the error
    /// is handed back so the caller can propagate it.
    pub fn reject(mut self, error: Error) -> Error {
        self.resolved = true;
        self.store.reject_innermost(error)
    }

    /// Leaves the transaction without accepting or rejecting: ambient values
    /// revert, no error is raised.
    pub fn exit(mut self) {
        self.resolved = true;
        self.store.exit_innermost();
    }
}

impl Deref for Scope<'_> {
    type Target = ContainerStore;

    fn deref(&self) -> &ContainerStore {
        self.store
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut ContainerStore {
        self.store
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.store.exit_innermost();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn fixture() -> (ContainerStore, crate::Uid) {
        let mut store = ContainerStore::new();
        store.registry_mut().define_complex("item", []).unwrap();
        let list = store.new_list("item").unwrap();
        (store, list)
    }

    #[test]
    fn drop_is_implicit_exit() {
        let (mut store, list) = fixture();
        {
            let mut scope = store.transact();
            scope.list_add(list, Value::from("a")).unwrap();
            assert_eq!(scope.len(list).unwrap(), 1);
        }
        assert!(!store.in_transaction());
        assert_eq!(store.len(list).unwrap(), 0);
    }

    #[test]
    fn nested_scopes_pop_in_order() {
        let (mut store, list) = fixture();
        let mut outer = store.transact();
        assert_eq!(outer.transaction_depth(), 1);
        {
            let mut inner = outer.transact();
            assert_eq!(inner.transaction_depth(), 2);
            inner.list_add(list, Value::from("a")).unwrap();
            // dropped unresolved: the inner transaction rolls back
        }
        assert_eq!(outer.transaction_depth(), 1);
        assert_eq!(outer.len(list).unwrap(), 0);
        outer.exit();
        assert!(!store.in_transaction());
    }

    #[test]
    fn ambient_reads_revert_after_exit() {
        let (mut store, list) = fixture();
        store.list_add(list, Value::from("committed")).unwrap();

        let mut scope = store.transact();
        scope.list_add(list, Value::from("pending")).unwrap();
        assert_eq!(scope.len(list).unwrap(), 2);
        scope.exit();

        assert_eq!(store.len(list).unwrap(), 1);
        assert_eq!(store.at(list, 0).unwrap(), Some(Value::from("committed")));
    }
}
