// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Priority-ordered, cancelable event dispatch.
//!
//! An [`EventSource`] maps event type names (plain names like `"change"`, or
//! phase-qualified names like `"change:will"`) to queues of [`Listener`]s.
//! Listeners run highest priority first, ties broken by registration order,
//! and dispatch stops as soon as the event reports itself canceled.
//!
//! The dispatch loop snapshots the queue before notifying anyone: listeners
//! added during an emission only see *subsequent* emissions, and a listener
//! removed mid-dispatch is still notified for the emission that had already
//! snapshotted it.
//!
//! # Replies
//!
//! Every listener returns a [`Reply`]. Most return `Reply::Done` — built for
//! you by [`Listener::new`] and [`Listener::fallible`] — while `do`-phase
//! listeners of asynchronous actions may return `Reply::Deferred` with a
//! future ([`Listener::deferred`]). Phases other than `do` must complete
//! synchronously, so a deferred reply there is routed to the phase error
//! handler instead of being silently dropped.
//!
//! # Example
//!
//! ```rust
//! use tessera::events::{Cancelable, EventSource, Listener};
//!
//! struct Ping(u32, bool);
//! impl Cancelable for Ping {
//!     fn is_canceled(&self) -> bool {
//!         self.1
//!     }
//! }
//!
//! let source = EventSource::new();
//! let bump = Listener::new(|e: &mut Ping| e.0 += 1);
//! let _handle = source.on("ping", &bump, 0);
//!
//! let out = source.emit("ping", Ping(0, false)).unwrap().unwrap();
//! assert_eq!(out.0, 1);
//! ```

use crate::error::Error;
use futures::future::{LocalBoxFuture, join_all};
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

/// Result type returned by listeners; an `Err` rejects the in-flight
/// execution when emitted through a phase.
pub type ListenerResult = std::result::Result<(), Error>;

/// One of the four phases of the action-execution protocol.
///
/// `init` and `will` run before any state is touched and may cancel; `do`
/// performs the work (and is the only phase allowed to suspend); `finally`
/// always runs, cannot cancel, and cannot fail the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Will,
    Do,
    Finally,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Will => "will",
            Phase::Do => "do",
            Phase::Finally => "finally",
        }
    }

    /// The full event type name for this phase of `base`, e.g. `"change:will"`.
    pub fn event_type(self, base: &str) -> String {
        format!("{base}:{}", self.as_str())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that can report mid-dispatch that no further listeners should run.
///
/// For executions this means "will not commit": a rejected execution reports
/// itself canceled for dispatch purposes even though rejection and
/// cancellation remain distinguishable outcomes.
pub trait Cancelable {
    fn is_canceled(&self) -> bool;
}

/// A listener's answer to one notification.
pub enum Reply {
    /// The listener completed synchronously.
    Done(ListenerResult),
    /// The listener started asynchronous work; only legal in the `do` phase.
    Deferred(LocalBoxFuture<'static, ListenerResult>),
}

impl From<ListenerResult> for Reply {
    fn from(r: ListenerResult) -> Self {
        Reply::Done(r)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Done(r) => f.debug_tuple("Reply::Done").field(r).finish(),
            Reply::Deferred(_) => f.write_str("Reply::Deferred(..)"),
        }
    }
}

/// A cheaply cloneable handle to a listener callback.
///
/// Cloning the handle does not clone the callback: all clones share one
/// underlying function, and registering the *same* handle twice for the same
/// event type replaces its priority instead of duplicating the entry.
pub struct Listener<E> {
    f: Rc<RefCell<dyn FnMut(&mut E) -> Reply>>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            f: Rc::clone(&self.f),
        }
    }
}

impl<E> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.f))
    }
}

impl<E> Listener<E> {
    /// An infallible synchronous listener.
    pub fn new(mut f: impl FnMut(&mut E) + 'static) -> Self {
        Self::fallible(move |e| {
            f(e);
            Ok(())
        })
    }

    /// A synchronous listener whose `Err` rejects the in-flight execution.
    pub fn fallible(mut f: impl FnMut(&mut E) -> ListenerResult + 'static) -> Self {
        Self {
            f: Rc::new(RefCell::new(move |e: &mut E| Reply::Done(f(e)))),
        }
    }

    /// A listener that starts asynchronous work. Only meaningful for the
    /// `do` phase of asynchronous actions.
    pub fn deferred(
        mut f: impl FnMut(&mut E) -> LocalBoxFuture<'static, ListenerResult> + 'static,
    ) -> Self {
        Self {
            f: Rc::new(RefCell::new(move |e: &mut E| Reply::Deferred(f(e)))),
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }

    fn invoke(&self, event: &mut E) -> Reply {
        let mut f = self.f.borrow_mut();
        (&mut *f)(event)
    }
}

struct Entry<E> {
    id: u64,
    priority: i32,
    seq: u64,
    listener: Listener<E>,
}

struct Queues<E> {
    map: HashMap<String, Vec<Entry<E>>, crate::TesseraRandomState>,
    next_id: u64,
    next_seq: u64,
}

impl<E> Default for Queues<E> {
    fn default() -> Self {
        Self {
            map: crate::create_map(),
            next_id: 0,
            next_seq: 0,
        }
    }
}

/// A disposable registration handle.
///
/// Registering for several (comma-delimited) event types yields one composite
/// handle whose [`remove`](ListenerHandle::remove) unregisters every
/// constituent registration. Dropping the handle without calling `remove`
/// leaves the listener registered.
#[must_use = "dropping the handle does not unregister the listener; call remove()"]
pub struct ListenerHandle {
    removers: Vec<Box<dyn FnOnce()>>,
}

impl ListenerHandle {
    /// Unregisters every registration this handle stands for.
    pub fn remove(self) {
        for r in self.removers {
            r();
        }
    }

    /// How many registrations this handle stands for.
    pub fn registration_count(&self) -> usize {
        self.removers.len()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({} registrations)", self.removers.len())
    }
}

/// Priority-ordered pub/sub over named event types.
///
/// Cloning an `EventSource` yields another handle onto the same registry, so
/// a store can hand sources out while retaining the ability to emit.
pub struct EventSource<E> {
    inner: Rc<RefCell<Queues<E>>>,
}

impl<E> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.inner.borrow();
        let total: usize = q.map.values().map(Vec::len).sum();
        write!(f, "EventSource({} listeners)", total)
    }
}

impl<E> EventSource<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Queues::default())),
        }
    }

    /// Registers `listener` for one or more comma-delimited event type names.
    ///
    /// Higher `priority` runs first; ties break by registration order.
    /// Registering the same listener again for a type it is already
    /// registered for replaces its priority without duplicating the entry.
    pub fn on(&self, types: &str, listener: &Listener<E>, priority: i32) -> ListenerHandle
    where
        E: 'static,
    {
        let mut removers: Vec<Box<dyn FnOnce()>> = Vec::new();
        for ty in types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let id = self.register(ty, listener, priority);
            let weak: Weak<RefCell<Queues<E>>> = Rc::downgrade(&self.inner);
            let ty = ty.to_string();
            removers.push(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut q = inner.borrow_mut();
                    if let Some(v) = q.map.get_mut(&ty) {
                        v.retain(|e| e.id != id);
                    }
                }
            }));
        }
        ListenerHandle { removers }
    }

    fn register(&self, ty: &str, listener: &Listener<E>, priority: i32) -> u64 {
        let mut guard = self.inner.borrow_mut();
        let q = &mut *guard;
        let vec = q.map.entry(ty.to_string()).or_default();
        let id = if let Some(existing) = vec.iter_mut().find(|e| e.listener.ptr_eq(listener)) {
            // Re-registration: keep the original registration order, adopt
            // the new priority.
            existing.priority = priority;
            existing.id
        } else {
            q.next_id += 1;
            q.next_seq += 1;
            vec.push(Entry {
                id: q.next_id,
                priority,
                seq: q.next_seq,
                listener: listener.clone(),
            });
            q.next_id
        };
        vec.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        id
    }

    /// Unregisters `listener` from `event_type`. Listeners already included
    /// in an in-flight dispatch snapshot are still notified once.
    pub fn off(&self, event_type: &str, listener: &Listener<E>) {
        let mut q = self.inner.borrow_mut();
        if let Some(v) = q.map.get_mut(event_type) {
            v.retain(|e| !e.listener.ptr_eq(listener));
        }
    }

    /// O(1) check used to avoid building event objects nobody will see.
    pub fn has_listeners(&self, event_type: &str) -> bool {
        self.inner
            .borrow()
            .map
            .get(event_type)
            .is_some_and(|v| !v.is_empty())
    }

    fn snapshot(&self, event_type: &str) -> Vec<Listener<E>> {
        self.inner
            .borrow()
            .map
            .get(event_type)
            .map(|v| v.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default()
    }

    /// Notifies the snapshotted queue for `event_type` in priority order,
    /// stopping early the moment the event reports itself canceled.
    ///
    /// Returns the (possibly mutated) event, `Ok(None)` if it was canceled
    /// before or during dispatch, or the first listener error. Deferred
    /// replies are not allowed here.
    pub fn emit(&self, event_type: &str, mut event: E) -> crate::Result<Option<E>>
    where
        E: Cancelable,
    {
        if event.is_canceled() {
            return Ok(None);
        }
        for listener in self.snapshot(event_type) {
            if event.is_canceled() {
                return Ok(None);
            }
            match listener.invoke(&mut event) {
                Reply::Done(Ok(())) => {}
                Reply::Done(Err(e)) => return Err(e),
                Reply::Deferred(_) => {
                    return Err(Error::ListenerDeferred {
                        event_type: event_type.to_string(),
                    });
                }
            }
        }
        if event.is_canceled() {
            Ok(None)
        } else {
            Ok(Some(event))
        }
    }

    /// Phase emission: does nothing when the event is already canceled;
    /// routes listener errors (and illegal deferred replies) to `on_error`
    /// instead of aborting dispatch outright, and re-checks cancellation
    /// between listeners.
    ///
    /// The conventional `on_error` rejects the in-flight execution, which in
    /// turn makes the event report itself canceled and stops the loop.
    pub fn emit_phase<F>(&self, event_type: &str, event: &mut E, mut on_error: F)
    where
        E: Cancelable,
        F: FnMut(Error, &mut E),
    {
        if event.is_canceled() {
            return;
        }
        for listener in self.snapshot(event_type) {
            if event.is_canceled() {
                return;
            }
            match listener.invoke(event) {
                Reply::Done(Ok(())) => {}
                Reply::Done(Err(e)) => on_error(e, event),
                Reply::Deferred(_) => on_error(
                    Error::ListenerDeferred {
                        event_type: event_type.to_string(),
                    },
                    event,
                ),
            }
        }
    }

    /// Like [`emit_phase`](Self::emit_phase), but listeners may return
    /// deferred replies. Listeners are *invoked* in priority order; their
    /// futures are then aggregated, and the call resolves only once every
    /// one of them has completed. Errors, synchronous or asynchronous, are
    /// routed to `on_error`.
    pub async fn emit_phase_all<F>(&self, event_type: &str, event: &mut E, mut on_error: F)
    where
        E: Cancelable,
        F: FnMut(Error, &mut E),
    {
        if event.is_canceled() {
            return;
        }
        let mut pending = Vec::new();
        for listener in self.snapshot(event_type) {
            if event.is_canceled() {
                break;
            }
            match listener.invoke(event) {
                Reply::Done(Ok(())) => {}
                Reply::Done(Err(e)) => on_error(e, event),
                Reply::Deferred(fut) => pending.push(fut),
            }
        }
        for result in join_all(pending).await {
            if let Err(e) = result {
                on_error(e, event);
            }
        }
    }

    /// Closing emission for the `finally` phase: runs unconditionally (even
    /// for canceled events), swallows listener errors after logging them,
    /// and ignores deferred replies. By the time this runs the outcome is
    /// already fixed and must not be disturbed.
    pub fn emit_closing(&self, event_type: &str, event: &mut E) {
        for listener in self.snapshot(event_type) {
            match listener.invoke(event) {
                Reply::Done(Ok(())) => {}
                Reply::Done(Err(e)) => {
                    tracing::warn!(event_type, error = %e, "finally listener failed; ignoring");
                }
                Reply::Deferred(_) => {
                    tracing::warn!(event_type, "finally listener deferred; ignoring");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, Default)]
    struct Probe {
        order: Vec<&'static str>,
        canceled: bool,
    }

    impl Cancelable for Probe {
        fn is_canceled(&self) -> bool {
            self.canceled
        }
    }

    fn tag(name: &'static str) -> Listener<Probe> {
        Listener::new(move |e: &mut Probe| e.order.push(name))
    }

    #[test]
    fn priority_order_highest_first() {
        let source = EventSource::new();
        let a = tag("a");
        let b = tag("b");
        let _ha = source.on("ev", &a, 10);
        let _hb = source.on("ev", &b, 0);

        let out = source.emit("ev", Probe::default()).unwrap().unwrap();
        assert_eq!(out.order, vec!["a", "b"]);
    }

    #[test]
    fn ties_break_by_registration_order() {
        let source = EventSource::new();
        let first = tag("first");
        let second = tag("second");
        let _h1 = source.on("ev", &first, 5);
        let _h2 = source.on("ev", &second, 5);

        let out = source.emit("ev", Probe::default()).unwrap().unwrap();
        assert_eq!(out.order, vec!["first", "second"]);
    }

    #[test]
    fn reregistration_replaces_priority_without_duplicating() {
        let source = EventSource::new();
        let a = tag("a");
        let b = tag("b");
        let _ha = source.on("ev", &a, 0);
        let _hb = source.on("ev", &b, 5);
        // bump `a` above `b`; still only one entry for `a`
        let _ha2 = source.on("ev", &a, 10);

        let out = source.emit("ev", Probe::default()).unwrap().unwrap();
        assert_eq!(out.order, vec!["a", "b"]);
    }

    #[test]
    fn cancellation_stops_dispatch() {
        let source = EventSource::new();
        let cancel = Listener::new(|e: &mut Probe| {
            e.order.push("cancel");
            e.canceled = true;
        });
        let after = tag("after");
        let _h1 = source.on("ev", &cancel, 10);
        let _h2 = source.on("ev", &after, 0);

        let out = source.emit("ev", Probe::default()).unwrap();
        assert!(out.is_none(), "canceled emission returns None");
    }

    #[test]
    fn handle_remove_unregisters_all_types() {
        let source = EventSource::new();
        let l = tag("l");
        let handle = source.on("a, b", &l, 0);
        assert_eq!(handle.registration_count(), 2);
        assert!(source.has_listeners("a"));
        assert!(source.has_listeners("b"));

        handle.remove();
        assert!(!source.has_listeners("a"));
        assert!(!source.has_listeners("b"));
    }

    #[test]
    fn off_by_listener() {
        let source = EventSource::new();
        let l = tag("l");
        let _h = source.on("ev", &l, 0);
        source.off("ev", &l);
        assert!(!source.has_listeners("ev"));
    }

    #[test]
    fn listeners_added_during_dispatch_only_see_later_emissions() {
        let source = EventSource::new();
        let late = tag("late");
        let adder = {
            let source = source.clone();
            let late = late.clone();
            Listener::new(move |e: &mut Probe| {
                e.order.push("adder");
                let _ = source.on("ev", &late, 100);
            })
        };
        let _h = source.on("ev", &adder, 0);

        let out = source.emit("ev", Probe::default()).unwrap().unwrap();
        assert_eq!(out.order, vec!["adder"], "late listener not in snapshot");

        let out = source.emit("ev", Probe::default()).unwrap().unwrap();
        assert_eq!(out.order, vec!["late", "adder"]);
    }

    #[test]
    fn emit_phase_routes_errors_without_stopping_other_listeners() {
        let source = EventSource::new();
        let failing = Listener::fallible(|_e: &mut Probe| Err(Error::other("boom")));
        let after = tag("after");
        let _h1 = source.on("ev", &failing, 10);
        let _h2 = source.on("ev", &after, 0);

        let mut seen = Vec::new();
        let mut event = Probe::default();
        source.emit_phase("ev", &mut event, |e, _ev| seen.push(e));
        assert_eq!(seen.len(), 1);
        // the event was not canceled by the error handler, so dispatch went on
        assert_eq!(event.order, vec!["after"]);
    }

    #[test]
    fn emit_phase_skips_when_already_canceled() {
        let source = EventSource::new();
        let l = tag("l");
        let _h = source.on("ev", &l, 0);

        let mut event = Probe {
            canceled: true,
            ..Probe::default()
        };
        source.emit_phase("ev", &mut event, |_e, _ev| panic!("no errors expected"));
        assert!(event.order.is_empty());
    }

    #[test]
    fn deferred_reply_outside_do_phase_is_an_error() {
        let source = EventSource::new();
        let deferred = Listener::deferred(|_e: &mut Probe| Box::pin(async { Ok(()) }));
        let _h = source.on("ev", &deferred, 0);

        let mut errors = Vec::new();
        let mut event = Probe::default();
        source.emit_phase("ev", &mut event, |e, _ev| errors.push(e));
        assert!(matches!(errors.as_slice(), [Error::ListenerDeferred { .. }]));
    }

    #[test]
    fn emit_closing_swallows_errors() {
        let source = EventSource::new();
        let failing = Listener::fallible(|_e: &mut Probe| Err(Error::other("boom")));
        let after = tag("after");
        let _h1 = source.on("ev", &failing, 10);
        let _h2 = source.on("ev", &after, 0);

        let mut event = Probe {
            canceled: true,
            ..Probe::default()
        };
        // runs despite cancellation, and the failure does not propagate
        source.emit_closing("ev", &mut event);
        assert_eq!(event.order, vec!["after"]);
    }

    /// Resolves on its second poll, waking itself in between. Lets tests
    /// exercise genuinely-suspending listeners without a timer.
    struct YieldOnce(bool);

    impl std::future::Future for YieldOnce {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.0 {
                std::task::Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        }
    }

    #[test]
    fn emit_phase_all_waits_for_deferred_listeners() {
        let source = EventSource::new();
        let finished = Rc::new(RefCell::new(false));
        let deferred = {
            let finished = Rc::clone(&finished);
            Listener::deferred(move |_e: &mut Probe| {
                let finished = Rc::clone(&finished);
                Box::pin(async move {
                    YieldOnce(false).await;
                    *finished.borrow_mut() = true;
                    Ok(())
                })
            })
        };
        let sync = tag("sync");
        let _h1 = source.on("ev", &deferred, 10);
        let _h2 = source.on("ev", &sync, 0);

        let mut event = Probe::default();
        futures::executor::block_on(source.emit_phase_all("ev", &mut event, |_e, _ev| {
            panic!("no errors expected")
        }));
        assert!(*finished.borrow(), "deferred work completed before return");
        assert_eq!(event.order, vec!["sync"]);
    }
}
