// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::Action;
use crate::{error::Error, events::Cancelable, events::Phase, values::Value};
use std::fmt;

/// The observable state of one action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Unstarted,
    Init,
    Will,
    Do,
    Finally,
    /// Terminal: every phase completed and no listener rejected or canceled.
    Done,
    /// Terminal: canceled during `init` or `will`. Soft — not an error.
    Canceled,
    /// Terminal: a listener failed or explicitly rejected. Hard — carries
    /// the original error.
    Rejected,
}

/// One in-flight (or settled) execution of an [`Action`].
///
/// Created per invocation around a private clone of the action and handed to
/// every phase listener. Listeners read the action, may [`cancel`] during
/// `init`/`will`, may [`reject`] up to and including `do`, and may record a
/// [`result`].
///
/// [`cancel`]: Execution::cancel
/// [`reject`]: Execution::reject
/// [`result`]: Execution::result
#[must_use = "inspect the execution to distinguish done, canceled and rejected"]
pub struct Execution<A: Action> {
    action: A,
    phase: Option<Phase>,
    settled: bool,
    cancel_reason: Option<String>,
    error: Option<Error>,
    result: Option<Value>,
}

impl<A: Action> Execution<A> {
    pub(crate) fn new(action: A) -> Self {
        Self {
            action,
            phase: None,
            settled: false,
            cancel_reason: None,
            error: None,
            result: None,
        }
    }

    /// The private clone of the action being executed.
    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn state(&self) -> ExecutionState {
        if self.settled {
            if self.error.is_some() {
                ExecutionState::Rejected
            } else if self.cancel_reason.is_some() {
                ExecutionState::Canceled
            } else {
                ExecutionState::Done
            }
        } else {
            match self.phase {
                None => ExecutionState::Unstarted,
                Some(Phase::Init) => ExecutionState::Init,
                Some(Phase::Will) => ExecutionState::Will,
                Some(Phase::Do) => ExecutionState::Do,
                Some(Phase::Finally) => ExecutionState::Finally,
            }
        }
    }

    /// Cancels the execution: `do` is skipped and the terminal state is
    /// [`ExecutionState::Canceled`]. Effective during `init` and `will`
    /// only; the first cancellation wins.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        match self.phase {
            Some(Phase::Init) | Some(Phase::Will) => {
                if self.cancel_reason.is_none() {
                    self.cancel_reason = Some(reason.into());
                }
            }
            _ => {
                tracing::debug!(
                    state = ?self.state(),
                    "cancel outside the init/will phases is ignored"
                );
            }
        }
    }

    /// Rejects the execution with a hard error. Effective through the `do`
    /// phase; the first error wins. During `finally` the outcome is already
    /// fixed and the call is ignored.
    pub fn reject(&mut self, error: Error) {
        match self.phase {
            Some(Phase::Init) | Some(Phase::Will) | Some(Phase::Do) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
            }
            _ => {
                tracing::debug!(
                    state = ?self.state(),
                    error = %error,
                    "reject outside the init/will/do phases is ignored"
                );
            }
        }
    }

    /// Records the execution's result value. Typically called by a `do`
    /// listener.
    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The cancellation reason, when the execution was canceled.
    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    /// The rejection error, when the execution failed.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn is_done(&self) -> bool {
        self.state() == ExecutionState::Done
    }

    pub fn was_canceled(&self) -> bool {
        self.state() == ExecutionState::Canceled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == ExecutionState::Rejected
    }

    pub(crate) fn begin(&mut self, phase: Phase) {
        self.phase = Some(phase);
    }

    pub(crate) fn settle(&mut self) {
        self.settled = true;
    }
}

impl<A: Action> Cancelable for Execution<A> {
    /// "This execution will not complete its work": true once canceled *or*
    /// rejected, which is what stops phase dispatch early. The precise
    /// outcome stays distinguishable through [`Execution::state`].
    fn is_canceled(&self) -> bool {
        self.cancel_reason.is_some() || self.error.is_some()
    }
}

impl<A: Action> fmt::Debug for Execution<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("action", &self.action)
            .field("state", &self.state())
            .field("cancel_reason", &self.cancel_reason)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Noop;

    impl Action for Noop {
        fn action_type(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn state_follows_phases_then_flags() {
        let mut exec = Execution::new(Noop);
        assert_eq!(exec.state(), ExecutionState::Unstarted);
        exec.begin(Phase::Init);
        assert_eq!(exec.state(), ExecutionState::Init);
        exec.begin(Phase::Do);
        assert_eq!(exec.state(), ExecutionState::Do);
        exec.settle();
        assert_eq!(exec.state(), ExecutionState::Done);
    }

    #[test]
    fn cancel_only_during_init_and_will() {
        let mut exec = Execution::new(Noop);
        exec.cancel("too early");
        assert!(exec.cancellation_reason().is_none(), "unstarted: ignored");

        exec.begin(Phase::Do);
        exec.cancel("too late");
        assert!(exec.cancellation_reason().is_none(), "do phase: ignored");

        let mut exec = Execution::new(Noop);
        exec.begin(Phase::Will);
        exec.cancel("first");
        exec.cancel("second");
        assert_eq!(exec.cancellation_reason(), Some("first"));
    }

    #[test]
    fn reject_is_ignored_during_finally() {
        let mut exec = Execution::new(Noop);
        exec.begin(Phase::Finally);
        exec.reject(Error::other("too late"));
        exec.settle();
        assert!(exec.is_done());
    }

    #[test]
    fn canceled_and_rejected_are_distinct_terminals() {
        let mut canceled = Execution::new(Noop);
        canceled.begin(Phase::Will);
        canceled.cancel("no need");
        canceled.settle();
        assert!(canceled.was_canceled());
        assert!(canceled.error().is_none());

        let mut rejected = Execution::new(Noop);
        rejected.begin(Phase::Do);
        rejected.reject(Error::other("broke"));
        rejected.settle();
        assert!(rejected.is_rejected());
        assert!(rejected.error().is_some());
        assert!(rejected.cancellation_reason().is_none());
    }
}
