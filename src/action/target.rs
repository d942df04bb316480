// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Action, Execution};
use crate::{
    error::Error,
    events::{EventSource, Listener, ListenerHandle, Phase},
};
use futures::future::LocalBoxFuture;
use std::fmt;

/// Something actions can be executed against.
///
/// Implementors provide the event source; the phase drivers come as
/// provided methods, so a target only wires listeners and calls
/// [`act`](Target::act) or [`act_async`](Target::act_async) — the single
/// mutation entry points the surrounding application layers use.
pub trait Target<A: Action> {
    /// The event source action executions of this target emit through.
    fn action_events(&self) -> &EventSource<Execution<A>>;

    /// Registers an action listener; event type names follow the
    /// `"<action_type>:<phase>"` convention, e.g. `"select:will"`.
    fn on_action(
        &self,
        types: &str,
        listener: &Listener<Execution<A>>,
        priority: i32,
    ) -> ListenerHandle {
        self.action_events().on(types, listener, priority)
    }

    /// Executes a synchronous action through init → will → do → finally and
    /// returns the settled execution.
    ///
    /// The action is cloned first, so the caller's original can be reused
    /// and re-executed. An asynchronous action kind is rejected outright
    /// (no phase runs): execute it through [`act_async`](Target::act_async).
    fn act(&self, action: &A) -> Execution<A> {
        let mut execution = Execution::new(action.clone());
        if !A::IS_SYNC {
            execution.begin(Phase::Init);
            execution.reject(Error::operation(format!(
                "action `{}` is asynchronous; execute it through act_async",
                action.action_type()
            )));
            execution.settle();
            return execution;
        }
        drive_sync(self.action_events(), execution)
    }

    /// Executes an action of either kind; `do`-phase listeners may return
    /// deferred replies, and the returned future resolves only once every
    /// one of them has completed.
    fn act_async(&self, action: &A) -> LocalBoxFuture<'static, Execution<A>> {
        let events = self.action_events().clone();
        let execution = Execution::new(action.clone());
        Box::pin(async move { drive_async(&events, execution).await })
    }
}

fn drive_sync<A: Action>(
    events: &EventSource<Execution<A>>,
    mut execution: Execution<A>,
) -> Execution<A> {
    let base = execution.action().action_type().to_string();

    for phase in [Phase::Init, Phase::Will, Phase::Do] {
        execution.begin(phase);
        events.emit_phase(&phase.event_type(&base), &mut execution, |e, ex| {
            ex.reject(e)
        });
    }

    execution.begin(Phase::Finally);
    events.emit_closing(&Phase::Finally.event_type(&base), &mut execution);
    execution.settle();
    execution
}

async fn drive_async<A: Action>(
    events: &EventSource<Execution<A>>,
    mut execution: Execution<A>,
) -> Execution<A> {
    let base = execution.action().action_type().to_string();

    for phase in [Phase::Init, Phase::Will] {
        execution.begin(phase);
        events.emit_phase(&phase.event_type(&base), &mut execution, |e, ex| {
            ex.reject(e)
        });
    }

    execution.begin(Phase::Do);
    events
        .emit_phase_all(&Phase::Do.event_type(&base), &mut execution, |e, ex| {
            ex.reject(e)
        })
        .await;

    execution.begin(Phase::Finally);
    events.emit_closing(&Phase::Finally.event_type(&base), &mut execution);
    execution.settle();
    execution
}

/// A standalone [`Target`]: an event source and nothing else.
///
/// Useful on its own for user-level actions, and as the building block for
/// richer targets that embed one.
pub struct Dispatcher<A: Action> {
    events: EventSource<Execution<A>>,
}

impl<A: Action> Dispatcher<A> {
    pub fn new() -> Self {
        Self {
            events: EventSource::new(),
        }
    }
}

impl<A: Action> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> Target<A> for Dispatcher<A> {
    fn action_events(&self) -> &EventSource<Execution<A>> {
        &self.events
    }
}

impl<A: Action> fmt::Debug for Dispatcher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.events)
            .finish()
    }
}
