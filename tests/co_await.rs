//! The async/await bridge: frames, awaiters, and frame release.

use tempo::test_utils::{init_test_logging, step_executor};
use tempo::{
    mk_rejected_promise, mk_resolved_notifier, mk_resolved_promise, spawn_co_on,
    spawn_notifier_on, Error, EventError, Outcome, Promise,
};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn awaiting_a_resolved_promise_completes_through_the_executor() {
    init_test_logging();
    tempo::test_phase!("co_resolved");

    let exec = step_executor();
    let out = spawn_co_on(exec.clone(), async { mk_resolved_promise(123).await });

    // The frame ran eagerly but suspended on the await; the continuation is
    // quarantined behind the executor.
    assert!(out.is_empty());
    assert!(exec.len() > 0);

    exec.run_all();
    assert!(out.is_pre_fulfilled());

    let value = Rc::new(Cell::new(0));
    let seen = value.clone();
    out.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert!(out.is_fulfilled());
    assert_eq!(value.get(), 123);
    tempo::test_complete!("co_resolved");
}

#[test]
fn frames_nest() {
    init_test_logging();

    let exec = step_executor();
    let inner_exec = exec.clone();
    let out = spawn_co_on(exec.clone(), async move {
        let inner = spawn_co_on(inner_exec, async { mk_resolved_promise(40).await });
        let mut first = inner.await;
        let mut second = mk_resolved_promise(2).await;
        Outcome::Ok(first.take_value() + second.take_value())
    });

    exec.run_all();

    let value = Rc::new(Cell::new(0));
    let seen = value.clone();
    out.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(value.get(), 42);
}

#[test]
fn sequential_awaits_run_in_order() {
    init_test_logging();

    let exec = step_executor();
    let out = spawn_co_on(exec.clone(), async {
        let mut total = 0;
        for n in [1, 2, 3] {
            let mut outcome = mk_resolved_promise(n).await;
            total += outcome.take_value();
        }
        Outcome::Ok(total)
    });

    exec.run_all();

    let value = Rc::new(Cell::new(0));
    let seen = value.clone();
    out.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(value.get(), 6);
}

#[test]
fn awaited_rejection_flows_back_into_the_frame() {
    init_test_logging();

    let exec = step_executor();
    let out = spawn_co_on(exec.clone(), async {
        let outcome: Outcome<i32> = mk_rejected_promise(Error::syscall(1)).await;
        assert!(outcome.is_err());
        outcome
    });

    exec.run_all();

    let code = Rc::new(Cell::new(0));
    let seen = code.clone();
    out.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_error().code()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(code.get(), 1);
}

#[test]
fn a_suspended_frame_resumes_when_the_promise_settles_later() {
    init_test_logging();

    let exec = step_executor();
    let gate = Promise::<i32>::new();
    let gate_resolver = gate.resolver();

    let out = spawn_co_on(exec.clone(), async move { gate.await });

    exec.run_all();
    assert!(out.is_empty());

    assert!(gate_resolver.resolve(99));
    exec.run_all();
    assert!(out.is_pre_fulfilled());

    let value = Rc::new(Cell::new(0));
    let seen = value.clone();
    out.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(value.get(), 99);
}

#[test]
fn a_panicking_body_rejects_with_the_coroutine_error() {
    init_test_logging();

    let exec = step_executor();
    let out = spawn_co_on(exec.clone(), async {
        panic!("boom");
        #[allow(unreachable_code)]
        Outcome::Ok(0)
    });

    // The body panicked during the eager first poll.
    assert!(out.is_pre_rejected());
    let stored = out.take_result().unwrap();
    let error = stored.error_ref().unwrap();
    assert_eq!(
        error.code(),
        tempo::event_err(EventError::CoroutineException).code()
    );
    assert_eq!(error.information(), "event[coroutine exception]");
    assert_eq!(error.message(), Some("boom"));
}

#[test]
fn cancelling_the_output_promise_releases_the_frame() {
    init_test_logging();

    let exec = step_executor();
    let sentinel = Rc::new(());
    let probe = sentinel.clone();
    let never = Promise::<i32>::new();

    let out = spawn_co_on(exec.clone(), async move {
        let _keep = probe;
        never.await
    });

    exec.run_all();
    assert!(out.is_empty());
    // The suspended frame holds the sentinel.
    assert_eq!(Rc::strong_count(&sentinel), 2);

    out.cancel();
    assert!(out.is_cancelled());
    assert_eq!(Rc::strong_count(&sentinel), 1);
}

#[test]
fn cancelling_the_awaited_promise_releases_the_frame() {
    init_test_logging();

    let exec = step_executor();
    let sentinel = Rc::new(());
    let probe = sentinel.clone();

    let never = Promise::<i32>::new();
    let never_resolver = never.resolver();

    let out = spawn_co_on(exec.clone(), async move {
        let _keep = probe;
        never.await
    });

    exec.run_all();
    assert_eq!(Rc::strong_count(&sentinel), 2);

    // Cancel the promise the frame is parked on.
    never_resolver.cancel();
    assert_eq!(Rc::strong_count(&sentinel), 1);

    // The frame is gone; its output can never settle.
    assert!(out.is_empty());
    exec.run_all();
    assert!(out.is_empty());
}

#[test]
fn notifier_frames_map_errors() {
    init_test_logging();

    let exec = step_executor();
    let ok = spawn_notifier_on(exec.clone(), async {
        let error = mk_resolved_notifier().await;
        assert!(!error.is_set());
        Error::none()
    });
    exec.run_all();

    let fired = Rc::new(RefCell::new(None));
    let seen = fired.clone();
    ok.then_done(
        move |error| *seen.borrow_mut() = Some(error.is_set()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(*fired.borrow(), Some(false));

    let failing = spawn_notifier_on(exec.clone(), async { Error::syscall(5) });
    exec.run_all();

    let code = Rc::new(Cell::new(0));
    let seen = code.clone();
    failing.then_done(move |error| seen.set(error.code()), Some(exec.clone()));
    exec.run_all();
    assert_eq!(code.get(), 5);
}

#[test]
fn a_body_that_never_suspends_settles_eagerly() {
    init_test_logging();

    let exec = step_executor();
    let out = spawn_co_on(exec.clone(), async { Outcome::Ok("direct") });
    assert!(out.is_pre_fulfilled());

    let value = Rc::new(RefCell::new(""));
    let seen = value.clone();
    out.then_done(
        move |mut outcome: Outcome<&'static str>| *seen.borrow_mut() = outcome.take_value(),
        Some(exec.clone()),
    );
    exec.run_all();
    assert_eq!(*value.borrow(), "direct");
}
