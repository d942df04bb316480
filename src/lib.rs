// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Tessera: A Transactional Type Metamodel for Composite Data Models
//!
//! This crate provides the core of a reflective modeling layer: a small type
//! system for describing data-bound models (typed composites, lists and
//! scalar values), and a transactional change-management engine that coalesces
//! mutations into atomic, reversible updates.
//!
//! The primary goal of this library is to let interactive applications stage
//! many small edits against a shared object graph, observe them through a
//! uniform event protocol, and then commit or discard them as one unit.
//!
//! Unlike libraries that expose a single "Document" type, tessera provides a
//! set of composable primitives. Containers live in a [`ContainerStore`] — an
//! arena keyed by [`Uid`] — and reference each other by id, which makes
//! arbitrarily cyclic model graphs representable without ownership cycles.
//!
//! ## Core Concepts
//!
//! - [`ContainerStore`]: the arena owning every container state, the committed
//!   back-reference lists, and the stack of open transactions.
//! - **Complex** and **List** containers: mutable composites with a
//!   process-unique [`Uid`], a commit version, and a list of committed
//!   back-references answering "who points at me".
//! - [`Value`]: a slot value — either a [`Simple`] scalar (with an optional
//!   formatted label) or the [`Uid`] of another container.
//! - [`Scope`](transaction::Scope): the handle returned by entering a
//!   transaction. Mutations made while a scope is open are captured as
//!   [`Change`](transaction::Change) records in per-container
//!   [`Changeset`](transaction::Changeset)s instead of touching committed
//!   state; `accept` applies them atomically, `reject`/`exit` discard them.
//! - [`EventSource`](events::EventSource): priority-ordered, cancelable event
//!   dispatch, used both for container change notifications and for
//!   user-level actions.
//! - [`Target`](action::Target): the four-phase (`init`/`will`/`do`/`finally`)
//!   cancelable action-execution protocol, with synchronous or asynchronous
//!   `do`-phase fan-out.
//!
//! ## Transactions
//!
//! All modifications flow through a changeset. Mutating a container while no
//! transaction is open enters a one-shot scope that is accepted immediately,
//! so committed state is only ever written by the commit routine.
//!
//! ```rust
//! use tessera::{ContainerStore, Value};
//!
//! let mut store = ContainerStore::new();
//! store.registry_mut().define_complex("sample", []).unwrap();
//!
//! let row = store.new_complex("sample", []).unwrap();
//! let list = store.new_list("sample").unwrap();
//!
//! // Stage changes inside an explicit scope...
//! let mut scope = store.transact();
//! scope.list_add(list, Value::Container(row)).unwrap();
//! assert_eq!(scope.len(list).unwrap(), 1); // ambient reads see pending changes
//!
//! // ...and commit them as one atomic unit.
//! let outcome = scope.accept().unwrap();
//! assert!(outcome.is_committed());
//! ```
//!
//! Dropping a scope without accepting it rolls every staged change back,
//! including any back-reference additions it caused:
//!
//! ```rust
//! # use tessera::{ContainerStore, Value};
//! # let mut store = ContainerStore::new();
//! # store.registry_mut().define_complex("sample", []).unwrap();
//! # let row = store.new_complex("sample", []).unwrap();
//! # let list = store.new_list("sample").unwrap();
//! {
//!     let mut scope = store.transact();
//!     scope.list_add(list, Value::Container(row)).unwrap();
//!     // no accept: implicit rollback
//! }
//! assert_eq!(store.len(list).unwrap(), 0);
//! assert!(store.references(row).unwrap().is_empty());
//! ```
//!
//! ## Scope of this Crate
//!
//! This crate provides the metamodel, the transaction engine and the phase
//! protocol. It does not render anything, own a network protocol, or manage a
//! widget lifecycle; view layers are expected to consume the public contract
//! (construct values, stage changes, listen to `change:*` events, and inspect
//! `uid`/`version`/`references` to decide whether to re-render).
//!
//! ## Features
//!
//! - `json`: serialization of values and type descriptors to and from
//!   `serde_json::Value`. Enabled by default.
//! - `serde`: `serde` support for value, type and change types.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{
    hash::BuildHasher,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing so tests and benchmarks iterate maps in a
// stable order.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(7, 2203, 31, 89);

pub mod error;
pub use error::{Error, Result, ValidationError, ValidationErrors};
pub mod events;
pub use events::{Cancelable, EventSource, Listener, ListenerHandle, Phase};
pub mod values;
pub use values::{Simple, SimpleValue, Value};
pub mod types;
pub use types::{TypeDescriptor, TypeRegistry};
pub mod store;
pub use store::{ContainerStore, Reference, ReferenceList, Uid};
/// Transactional change management: stacked ambient transactions, changesets
/// and scopes.
///
/// See the [`transaction`] module documentation for details and examples.
pub mod transaction;
pub use transaction::{Change, Changeset, CommitOutcome, Scope};
pub mod action;
pub use action::{Action, Execution, Target};
#[cfg(feature = "json")]
pub mod json;

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all data structures behave deterministically.
///
/// This should only be enabled for testing, as it increases the odds of DoS
/// scenarios.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
///
/// Should be used internally and for testing.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

/// Create a random state for a hashmap.
/// If `enable_determinism` has been used, this will return a deterministic
/// decidedly non-random RandomState, useful in tests.
#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

fn create_map<K, V>() -> std::collections::HashMap<K, V, TesseraRandomState> {
    std::collections::HashMap::with_hasher(TesseraRandomState::default())
}

/// This is a small wrapper around the standard RandomState.
/// This allows us to easily switch to a non-random RandomState for use in tests.
#[derive(Clone)]
pub struct TesseraRandomState {
    inner: RandomState,
}

// Implement default, falling back on regular ahash::RandomState except
// when 'enable_determinism' has been called, in which case a static
// only-for-test RandomState is used.
impl Default for TesseraRandomState {
    #[inline]
    fn default() -> Self {
        Self {
            inner: make_random_state(),
        }
    }
}

// All we do is delegate to the wrapped 'inner' RandomState. Since
// TesseraRandomState implements Default, the user doesn't have to do anything
// more than specialize their hashmap using TesseraRandomState instead of
// RandomState.
impl BuildHasher for TesseraRandomState {
    type Hasher = <RandomState as BuildHasher>::Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.inner.build_hasher()
    }
}
