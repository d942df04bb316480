// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The four-phase action-execution protocol.
//!
//! An [`Action`] is a value-like request object: cheap to clone, carrying
//! everything needed to perform one user-level operation (select a value,
//! edit a mapping, refresh a view). Executing one drives four phases in
//! strict order, under the `"<action_type>:<phase>"` event naming
//! convention:
//!
//! 1. **init** — listeners prepare or veto; an error rejects the execution.
//! 2. **will** — cancelable; a listener may call
//!    [`Execution::cancel`] and the `do` phase never runs.
//! 3. **do** — the work. For a synchronous action kind
//!    (`Action::IS_SYNC == true`) every listener must complete before the
//!    call returns; for an asynchronous kind, listeners may return deferred
//!    replies and the execution resolves once all of them complete.
//! 4. **finally** — always runs, even after cancellation or failure; cannot
//!    cancel; listener errors are logged and swallowed so the outcome is
//!    never disturbed.
//!
//! Cancellation and rejection are distinct terminal outcomes: canceled is
//! soft ("not performed", with an optional reason), rejected is a hard
//! failure carrying the original error. See [`Execution`] for the state
//! machine and [`Target`] for the drivers.
//!
//! The same protocol shape drives structural changes: transaction commits
//! emit `change:init` / `change:will` / `change:finally` on touched
//! containers, with the apply step standing in for `do`. See
//! [`transaction`](crate::transaction).
//!
//! # Example
//!
//! ```rust
//! use tessera::{Listener, Value};
//! use tessera::action::{Action, Dispatcher, Execution, Target};
//!
//! #[derive(Debug, Clone)]
//! struct Select {
//!     key: String,
//! }
//!
//! impl Action for Select {
//!     fn action_type(&self) -> &str {
//!         "select"
//!     }
//! }
//!
//! let dispatcher = Dispatcher::<Select>::new();
//! let doer = Listener::new(|e: &mut Execution<Select>| {
//!     let key = e.action().key.clone();
//!     e.set_result(Value::from(key));
//! });
//! let _h = dispatcher.on_action("select:do", &doer, 0);
//!
//! let action = Select { key: "north".into() };
//! let execution = dispatcher.act(&action);
//! assert!(execution.is_done());
//! assert_eq!(execution.result(), Some(&Value::from("north")));
//! // the caller's action is untouched and can be executed again
//! let again = dispatcher.act(&action);
//! assert!(again.is_done());
//! ```

mod execution;
mod target;

pub use execution::{Execution, ExecutionState};
pub use target::{Dispatcher, Target};

use std::fmt;

/// A value-like request object.
///
/// Executing an action clones it, so the caller's original is unaffected
/// and reusable. The `action_type` names the event family the execution
/// emits under.
pub trait Action: Clone + fmt::Debug + 'static {
    /// Whether `do`-phase listeners must complete synchronously. When
    /// `false`, execute through [`Target::act_async`].
    const IS_SYNC: bool = true;

    /// The base event type name, e.g. `"select"` emitting `"select:will"`.
    fn action_type(&self) -> &str;
}
