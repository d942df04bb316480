//! Tests for the action phase engine from a consumer's point of view:
//! ordering across phases, cancellation vs rejection, and asynchronous
//! `do`-phase aggregation.

use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};
use tessera::{
    Error, Listener, Value,
    action::{Action, Dispatcher, Execution, Target},
};

#[derive(Debug, Clone)]
struct Edit {
    field: &'static str,
}

impl Action for Edit {
    fn action_type(&self) -> &str {
        "edit"
    }
}

#[derive(Debug, Clone)]
struct Refresh;

impl Action for Refresh {
    const IS_SYNC: bool = false;

    fn action_type(&self) -> &str {
        "refresh"
    }
}

/// Makes swallowed `finally`-phase listener failures visible when running
/// with `RUST_LOG=tessera=warn`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Resolves on its second poll, waking itself in between; stands in for a
/// listener that genuinely suspends.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[test]
fn all_four_phases_in_order_with_priorities() {
    init_tracing();
    let dispatcher = Dispatcher::<Edit>::new();
    let log: Rc<RefCell<Vec<String>>> = Rc::default();

    for (phase, priority, name) in [
        ("edit:init", 0, "init"),
        ("edit:will", 0, "will-low"),
        ("edit:will", 10, "will-high"),
        ("edit:do", 0, "do"),
        ("edit:finally", 0, "finally"),
    ] {
        let log = Rc::clone(&log);
        let listener = Listener::new(move |_e: &mut Execution<Edit>| {
            log.borrow_mut().push(name.to_string());
        });
        let _handle = dispatcher.on_action(phase, &listener, priority);
    }

    let execution = dispatcher.act(&Edit { field: "side" });
    assert!(execution.is_done());
    assert_eq!(
        &*log.borrow(),
        &["init", "will-high", "will-low", "do", "finally"]
    );
}

#[test]
fn canceled_and_rejected_are_distinguishable_outcomes() {
    // cancellation: soft, reason, no error
    let dispatcher = Dispatcher::<Edit>::new();
    let canceler = Listener::new(|e: &mut Execution<Edit>| e.cancel("nothing to edit"));
    let _h = dispatcher.on_action("edit:will", &canceler, 0);
    let canceled = dispatcher.act(&Edit { field: "side" });
    assert!(canceled.was_canceled());
    assert!(!canceled.is_rejected());
    assert_eq!(canceled.cancellation_reason(), Some("nothing to edit"));
    assert!(canceled.error().is_none());

    // rejection: hard, original error preserved
    let dispatcher = Dispatcher::<Edit>::new();
    let failer = Listener::fallible(|_e: &mut Execution<Edit>| Err(Error::other("backend gone")));
    let _h = dispatcher.on_action("edit:do", &failer, 0);
    let rejected = dispatcher.act(&Edit { field: "side" });
    assert!(rejected.is_rejected());
    assert!(!rejected.was_canceled());
    assert_eq!(rejected.error(), Some(&Error::other("backend gone")));
}

#[test]
fn cancellation_in_will_skips_do_for_lower_priority_listeners_too() {
    let dispatcher = Dispatcher::<Edit>::new();
    let did_run: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let canceler = Listener::new(|e: &mut Execution<Edit>| e.cancel("stop"));
    let late_will = {
        let did_run = Rc::clone(&did_run);
        Listener::new(move |_e: &mut Execution<Edit>| did_run.borrow_mut().push("late-will"))
    };
    let doer = {
        let did_run = Rc::clone(&did_run);
        Listener::new(move |_e: &mut Execution<Edit>| did_run.borrow_mut().push("do"))
    };
    let _h1 = dispatcher.on_action("edit:will", &canceler, 10);
    let _h2 = dispatcher.on_action("edit:will", &late_will, 0);
    let _h3 = dispatcher.on_action("edit:do", &doer, 0);

    let execution = dispatcher.act(&Edit { field: "side" });
    assert!(execution.was_canceled());
    assert!(
        did_run.borrow().is_empty(),
        "neither the remaining will listener nor do ran"
    );
}

#[test]
fn async_do_aggregates_every_listener_before_resolving() {
    init_tracing();
    let dispatcher = Dispatcher::<Refresh>::new();
    let slow_finished = Rc::new(RefCell::new(false));
    let finally_order: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let slow = {
        let slow_finished = Rc::clone(&slow_finished);
        let finally_order = Rc::clone(&finally_order);
        Listener::deferred(move |_e: &mut Execution<Refresh>| {
            let slow_finished = Rc::clone(&slow_finished);
            let finally_order = Rc::clone(&finally_order);
            Box::pin(async move {
                YieldOnce(false).await;
                *slow_finished.borrow_mut() = true;
                finally_order.borrow_mut().push("slow-do");
                Ok(())
            })
        })
    };
    let fast = Listener::new(|e: &mut Execution<Refresh>| e.set_result(Value::from("fresh")));
    let finally = {
        let finally_order = Rc::clone(&finally_order);
        Listener::new(move |_e: &mut Execution<Refresh>| {
            finally_order.borrow_mut().push("finally");
        })
    };
    let _h1 = dispatcher.on_action("refresh:do", &slow, 10);
    let _h2 = dispatcher.on_action("refresh:do", &fast, 0);
    let _h3 = dispatcher.on_action("refresh:finally", &finally, 0);

    let execution = futures::executor::block_on(dispatcher.act_async(&Refresh));
    assert!(execution.is_done());
    assert!(*slow_finished.borrow());
    assert_eq!(execution.result(), Some(&Value::from("fresh")));
    assert_eq!(
        &*finally_order.borrow(),
        &["slow-do", "finally"],
        "finally fired exactly once, after the slow listener completed"
    );
}

#[test]
fn async_rejection_preserves_the_original_cause() {
    let dispatcher = Dispatcher::<Refresh>::new();
    let failing = Listener::deferred(|_e: &mut Execution<Refresh>| {
        Box::pin(async {
            YieldOnce(false).await;
            Err(Error::other("remote refused"))
        })
    });
    let _h = dispatcher.on_action("refresh:do", &failing, 0);

    let execution = futures::executor::block_on(dispatcher.act_async(&Refresh));
    assert!(execution.is_rejected());
    assert_eq!(execution.error(), Some(&Error::other("remote refused")));
}

#[test]
fn sync_actions_also_run_through_act_async() {
    let dispatcher = Dispatcher::<Edit>::new();
    let doer = Listener::new(|e: &mut Execution<Edit>| {
        let field = e.action().field;
        e.set_result(Value::from(field));
    });
    let _h = dispatcher.on_action("edit:do", &doer, 0);

    let execution = futures::executor::block_on(dispatcher.act_async(&Edit { field: "side" }));
    assert!(execution.is_done());
    assert_eq!(execution.result(), Some(&Value::from("side")));
}
