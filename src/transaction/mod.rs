// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Transactional change management.
//!
//! This module provides the machinery that turns individual mutations into
//! atomic, reversible updates:
//!
//! - **Stacked ambient transactions.** [`ContainerStore::transact`] pushes a
//!   transaction and returns a [`Scope`]; the innermost open transaction is
//!   the *ambient* one, and every mutation stages into it. Scopes borrow the
//!   store mutably, so entering and leaving them follows a strict push/pop
//!   discipline that the borrow checker enforces — there is no way to leave
//!   a parent scope while a child is open, and dropping a scope is the
//!   guaranteed pop on every exit path.
//! - **Per-container changesets.** The first mutation of a container inside
//!   a transaction creates its [`Changeset`]; later mutations append
//!   [`Change`] records in order.
//! - **A reference-delta ledger.** Staging a change that embeds or removes a
//!   container records a pending back-reference addition or removal, tagged
//!   with the changeset that caused it. Ambient
//!   [`references`](ContainerStore::references) reads fold these deltas over
//!   the committed list; rejection discards them, so an added reference
//!   never becomes visible, not even transiently.
//!
//! # Example
//!
//! ```rust
//! use tessera::{ContainerStore, Value};
//!
//! let mut store = ContainerStore::new();
//! store.registry_mut().define_complex("item", []).unwrap();
//! let item = store.new_complex("item", []).unwrap();
//! let list = store.new_list("item").unwrap();
//!
//! let mut scope = store.transact();
//! scope.list_add(list, Value::Container(item)).unwrap();
//!
//! // Ambient reads see the pending change; committed state is untouched.
//! assert_eq!(scope.len(list).unwrap(), 1);
//! assert_eq!(scope.references(item).unwrap().len(), 1);
//!
//! let outcome = scope.accept().unwrap();
//! assert!(outcome.is_committed());
//! assert_eq!(store.len(list).unwrap(), 1);
//! ```
//!
//! # Nesting
//!
//! A nested scope's `accept` does not commit to real container state: it
//! merges the child's changesets and reference deltas into the parent
//! transaction, which then carries them until the outermost scope commits.
//! The parent's own changes stay ordered before the child's.
//!
//! ```rust
//! # use tessera::{ContainerStore, Value};
//! # let mut store = ContainerStore::new();
//! # store.registry_mut().define_complex("item", []).unwrap();
//! # let list = store.new_list("item").unwrap();
//! let mut outer = store.transact();
//! outer.list_add(list, Value::from("a")).unwrap();
//! {
//!     let mut inner = outer.transact();
//!     inner.list_add(list, Value::from("b")).unwrap();
//!     inner.accept().unwrap(); // merged into the outer transaction
//! }
//! outer.accept().unwrap();
//! assert_eq!(store.len(list).unwrap(), 2);
//! ```
//!
//! # Commit protocol
//!
//! The outermost `accept` drives the change phases, in the `"change:<phase>"`
//! event naming convention:
//!
//! 1. `change:init` per touched container — a listener error rejects the
//!    whole transaction.
//! 2. `change:will` per touched container — cancelable; a cancellation makes
//!    the transaction *canceled* (a soft outcome, not an error) and nothing
//!    commits.
//! 3. apply — a fresh transaction version is assigned; every change is
//!    applied to committed state in staging order; containers whose
//!    changeset had changes get the new version; reference deltas merge
//!    into the committed reference lists.
//! 4. `change:finally` per touched container — always fires, also on
//!    rejection, cancellation and plain exit; cannot cancel; listener
//!    errors are logged and swallowed.
//!
//! The finally event carries a single terminal [`Disposition`]. Its
//! [`is_canceled`](crate::events::Cancelable::is_canceled) reading means
//! "this transaction will not (or did not) commit", so it is true for
//! canceled, rejected and exited transactions alike, while the disposition
//! keeps the three distinguishable.

mod changeset;
mod scope;

pub use changeset::{Change, Changeset};
pub use scope::Scope;

use crate::{
    Result,
    error::Error,
    events::{Cancelable, Phase},
    store::{ContainerStore, Reference, ReferenceList, Uid},
};
use std::collections::HashMap;

/// The base event type name for container change events.
pub const CHANGE_EVENT: &str = "change";

/// One atomic batch of pending mutations across arbitrarily many containers.
#[derive(Debug, Default)]
pub(crate) struct Transaction {
    pub(crate) changesets: HashMap<Uid, Changeset, crate::TesseraRandomState>,
    pub(crate) ref_deltas: Vec<RefDelta>,
}

impl Transaction {
    /// The existing changeset for `target`, or a fresh one registered under
    /// the container's identity.
    pub(crate) fn ensure_changeset(&mut self, target: Uid) -> &mut Changeset {
        self.changesets
            .entry(target)
            .or_insert_with(|| Changeset::new(target))
    }

    fn sorted_targets(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.changesets.keys().copied().collect();
        uids.sort_unstable();
        uids
    }
}

/// A pending back-reference addition or removal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RefDelta {
    /// The container being referenced.
    pub(crate) target: Uid,
    pub(crate) reference: Reference,
    pub(crate) kind: RefDeltaKind,
    /// The container whose changeset caused this delta. Clearing that
    /// changeset removes the delta, whatever the change kind was.
    pub(crate) source: Uid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefDeltaKind {
    Added,
    Removed,
}

impl RefDelta {
    pub(crate) fn added(target: Uid, reference: Reference, source: Uid) -> Self {
        Self {
            target,
            reference,
            kind: RefDeltaKind::Added,
            source,
        }
    }

    pub(crate) fn removed(target: Uid, reference: Reference, source: Uid) -> Self {
        Self {
            target,
            reference,
            kind: RefDeltaKind::Removed,
            source,
        }
    }

    pub(crate) fn apply(&self, refs: &mut ReferenceList) {
        match self.kind {
            RefDeltaKind::Added => refs.add(self.reference.clone()),
            RefDeltaKind::Removed => refs.remove(&self.reference),
        }
    }
}

/// How an accepted scope resolved.
///
/// A canceled outcome means the transaction did not commit; callers that
/// care must inspect it rather than discard it.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Changes were applied to committed state under this transaction
    /// version.
    Committed { version: u64 },
    /// A nested scope merged its changes into the enclosing transaction;
    /// nothing reached committed state yet.
    MergedIntoParent,
    /// A `change:will` listener canceled; nothing was applied. Soft: not an
    /// error.
    Canceled { reason: Option<String> },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CommitOutcome::Canceled { .. })
    }
}

/// The terminal state a `change:finally` event reports.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Committed { version: u64 },
    Canceled { reason: Option<String> },
    Rejected { error: Error },
    Exited,
}

impl Disposition {
    /// Whether the transaction reached committed state.
    pub fn is_committed(&self) -> bool {
        matches!(self, Disposition::Committed { .. })
    }
}

/// The event delivered to `change:init`, `change:will` and `change:finally`
/// listeners of one container.
///
/// Listeners receive the staged changes for their container, may cancel the
/// transaction during `init`/`will`, and observe the terminal
/// [`Disposition`] during `finally`.
#[derive(Debug)]
pub struct ChangeEvent {
    target: Uid,
    phase: Phase,
    changes: Vec<Change>,
    cancel_reason: Option<String>,
    error: Option<Error>,
    disposition: Option<Disposition>,
}

impl ChangeEvent {
    fn new(target: Uid, phase: Phase, changes: Vec<Change>) -> Self {
        Self {
            target,
            phase,
            changes,
            cancel_reason: None,
            error: None,
            disposition: None,
        }
    }

    fn closing(target: Uid, changes: Vec<Change>, disposition: Disposition) -> Self {
        Self {
            target,
            phase: Phase::Finally,
            changes,
            cancel_reason: None,
            error: None,
            disposition: Some(disposition),
        }
    }

    /// The container whose changes are being reported.
    pub fn target(&self) -> Uid {
        self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The staged changes for the target container, in staging order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Cancels the transaction. Effective during `init` and `will` only;
    /// the first cancellation wins.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        match self.phase {
            Phase::Init | Phase::Will => {
                if self.cancel_reason.is_none() {
                    self.cancel_reason = Some(reason.into());
                }
            }
            Phase::Do | Phase::Finally => {
                tracing::debug!(phase = %self.phase, "cancel after the will phase is ignored");
            }
        }
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// The listener failure that is rejecting the transaction, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The terminal disposition; only present during `finally`.
    pub fn disposition(&self) -> Option<&Disposition> {
        self.disposition.as_ref()
    }

    /// Records a listener failure; the first failure wins.
    pub(crate) fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl Cancelable for ChangeEvent {
    /// "This transaction will not commit": true once canceled or failed,
    /// and during `finally` for every disposition except a commit.
    fn is_canceled(&self) -> bool {
        self.cancel_reason.is_some()
            || self.error.is_some()
            || self
                .disposition
                .as_ref()
                .is_some_and(|d| !d.is_committed())
    }
}

enum PhaseVerdict {
    Proceed,
    Canceled(Option<String>),
    Failed(Error),
}

impl ContainerStore {
    /// Enters a new transaction and returns its scope. The new transaction
    /// is ambient until the scope accepts, rejects or exits.
    pub fn transact(&mut self) -> Scope<'_> {
        self.txns.push(Transaction::default());
        Scope::new(self)
    }

    /// Whether any transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.txns.is_empty()
    }

    /// How deep the transaction stack currently is.
    pub fn transaction_depth(&self) -> usize {
        self.txns.len()
    }

    /// The container's changeset in the ambient transaction, if any.
    pub fn changeset(&self, uid: Uid) -> Option<&Changeset> {
        self.txns.last()?.changesets.get(&uid)
    }

    /// Whether the ambient transaction holds changes for this container.
    pub fn has_changes(&self, uid: Uid) -> bool {
        self.changeset(uid).is_some_and(Changeset::has_changes)
    }

    /// Discards the ambient transaction's pending changes for one container,
    /// and the reference deltas that changeset caused — for every change
    /// kind, not just list insertions. Sibling changesets are untouched and
    /// the transaction stays open. Idempotent.
    pub fn clear_changes(&mut self, target: Uid) -> Result<()> {
        self.require(target)?;
        if let Some(txn) = self.txns.last_mut() {
            txn.changesets.remove(&target);
            txn.ref_deltas.retain(|d| d.source != target);
        }
        Ok(())
    }

    /// Stages a change, entering a one-shot auto-accepted scope when no
    /// transaction is open. Mutators must funnel through here so committed
    /// state is only ever written by the commit routine.
    pub(crate) fn apply_staged(
        &mut self,
        target: Uid,
        change: Change,
        deltas: Vec<RefDelta>,
    ) -> Result<()> {
        if self.txns.is_empty() {
            self.txns.push(Transaction::default());
            self.stage(target, change, deltas);
            match self.accept_innermost() {
                Ok(CommitOutcome::Canceled { reason }) => Err(Error::Canceled { reason }),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            self.stage(target, change, deltas);
            Ok(())
        }
    }

    fn stage(&mut self, target: Uid, change: Change, deltas: Vec<RefDelta>) {
        let txn = self.txns.last_mut().expect("an ambient transaction is open");
        txn.ensure_changeset(target).push(change);
        txn.ref_deltas.extend(deltas);
    }

    /// Accepts the innermost transaction: merges a nested one into its
    /// parent, or commits the outermost one through the phase protocol.
    pub(crate) fn accept_innermost(&mut self) -> Result<CommitOutcome> {
        debug_assert!(!self.txns.is_empty(), "accept without an open transaction");
        if self.txns.len() > 1 {
            let child = self.txns.pop().expect("depth checked above");
            let parent = self.txns.last_mut().expect("depth checked above");
            for (uid, changeset) in child.changesets {
                parent.ensure_changeset(uid).absorb(changeset);
            }
            parent.ref_deltas.extend(child.ref_deltas);
            return Ok(CommitOutcome::MergedIntoParent);
        }

        let txn = self.txns.pop().expect("depth checked above");

        for phase in [Phase::Init, Phase::Will] {
            match self.emit_change_phase(&txn, phase) {
                PhaseVerdict::Proceed => {}
                PhaseVerdict::Canceled(reason) => {
                    self.emit_change_finally(
                        &txn,
                        &Disposition::Canceled {
                            reason: reason.clone(),
                        },
                    );
                    return Ok(CommitOutcome::Canceled { reason });
                }
                PhaseVerdict::Failed(error) => {
                    self.emit_change_finally(
                        &txn,
                        &Disposition::Rejected {
                            error: error.clone(),
                        },
                    );
                    return Err(error);
                }
            }
        }

        self.next_version += 1;
        let version = self.next_version;
        for uid in txn.sorted_targets() {
            let changeset = &txn.changesets[&uid];
            if !changeset.has_changes() {
                continue;
            }
            let state = self
                .containers
                .get_mut(&uid)
                .expect("staged containers exist");
            debug_assert_eq!(state.uid, uid, "changesets anchor to container identity");
            for change in changeset.changes() {
                change.apply(&mut state.kind);
            }
            state.version = version;
        }
        for delta in &txn.ref_deltas {
            if let Some(state) = self.containers.get_mut(&delta.target) {
                delta.apply(&mut state.refs);
            }
        }

        self.emit_change_finally(&txn, &Disposition::Committed { version });
        Ok(CommitOutcome::Committed { version })
    }

    /// Rejects the innermost transaction: every changeset and the whole
    /// reference delta are discarded, `finally` fires with the error, and
    /// the error is handed back for the caller to propagate.
    pub(crate) fn reject_innermost(&mut self, error: Error) -> Error {
        let Some(txn) = self.txns.pop() else {
            return error;
        };
        if self.txns.is_empty() {
            self.emit_change_finally(
                &txn,
                &Disposition::Rejected {
                    error: error.clone(),
                },
            );
        }
        error
    }

    /// Leaves the innermost transaction without accept or reject: an
    /// implicit rollback that raises no error.
    pub(crate) fn exit_innermost(&mut self) {
        let Some(txn) = self.txns.pop() else {
            return;
        };
        if self.txns.is_empty() {
            self.emit_change_finally(&txn, &Disposition::Exited);
        }
    }

    fn emit_change_phase(&self, txn: &Transaction, phase: Phase) -> PhaseVerdict {
        let ty = phase.event_type(CHANGE_EVENT);
        for uid in txn.sorted_targets() {
            let Some(events) = self.change_sources.get(&uid) else {
                continue;
            };
            if !events.has_listeners(&ty) {
                continue;
            }
            let mut event = ChangeEvent::new(uid, phase, txn.changesets[&uid].changes().to_vec());
            events.emit_phase(&ty, &mut event, |e, ev| ev.fail(e));
            if let Some(error) = event.error {
                return PhaseVerdict::Failed(error);
            }
            if let Some(reason) = event.cancel_reason {
                return PhaseVerdict::Canceled(Some(reason));
            }
        }
        PhaseVerdict::Proceed
    }

    fn emit_change_finally(&self, txn: &Transaction, disposition: &Disposition) {
        let ty = Phase::Finally.event_type(CHANGE_EVENT);
        for uid in txn.sorted_targets() {
            let Some(events) = self.change_sources.get(&uid) else {
                continue;
            };
            if !events.has_listeners(&ty) {
                continue;
            }
            let mut event = ChangeEvent::closing(
                uid,
                txn.changesets[&uid].changes().to_vec(),
                disposition.clone(),
            );
            events.emit_closing(&ty, &mut event);
        }
    }
}
