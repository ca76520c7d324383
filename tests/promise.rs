//! Promise state machine and chaining behavior.

use tempo::test_utils::{init_test_logging, step_executor};
use tempo::{mk_rejected_promise, mk_resolved_promise, Error, Outcome, Promise, PromiseStatus};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn resolve_runs_continuation_through_the_executor() {
    init_test_logging();
    tempo::test_phase!("basic_then");

    let exec = step_executor();
    let value = Rc::new(Cell::new(0));

    let p1 = Promise::<i32>::new();
    assert!(p1.is_empty());

    let seen = value.clone();
    let p2 = p1.then(
        move |outcome: Outcome<i32>| {
            seen.set(*outcome.value_ref().unwrap());
            Outcome::Ok(())
        },
        Some(exec.clone()),
    );

    assert!(p1.is_empty());
    assert!(p2.is_empty());
    assert_eq!(exec.len(), 0);

    assert!(p1.resolver().resolve(2022));

    // Executor quarantine: the outcome is recorded but nothing has run.
    assert_eq!(exec.len(), 1);
    assert!(p1.is_pending());
    assert!(p1.is_pre_fulfilled());
    assert!(p2.is_empty());
    assert_eq!(value.get(), 0);

    exec.run_all();

    assert_eq!(value.get(), 2022);
    assert!(p1.is_fulfilled());
    // p2 has no continuation of its own, so it stays in the pre phase.
    assert!(p2.is_pre_fulfilled());
    assert!(p2.is_satisfied());
    tempo::test_complete!("basic_then");
}

#[test]
fn continuation_error_rejects_downstream() {
    init_test_logging();

    let exec = step_executor();
    let p1 = Promise::<i32>::new();

    let p2 = p1.then(
        |_: Outcome<i32>| -> Outcome<()> {
            Outcome::Err(Error::general(7, "midway failure", "test"))
        },
        Some(exec.clone()),
    );

    assert!(p1.resolve(2022));
    exec.run_all();

    assert!(p1.is_fulfilled());
    assert!(p2.is_unsatisfied());

    let stored = p2.take_result().unwrap();
    let error = stored.error_ref().unwrap();
    assert_eq!(error.code(), 7);
    assert_eq!(error.message(), Some("midway failure"));
}

#[test]
fn multi_stage_chain_propagates_values() {
    init_test_logging();

    let exec = step_executor();
    let v1 = Rc::new(Cell::new(0));
    let v2 = Rc::new(RefCell::new(String::new()));

    let p1 = Promise::<i32>::new();
    let seen1 = v1.clone();
    let p2 = p1.then(
        move |mut outcome: Outcome<i32>| {
            seen1.set(outcome.take_value());
            Outcome::Ok("hi".to_string())
        },
        Some(exec.clone()),
    );
    let seen2 = v2.clone();
    let p3 = p2.then(
        move |mut outcome: Outcome<String>| {
            *seen2.borrow_mut() = outcome.take_value();
            Outcome::Ok(())
        },
        Some(exec.clone()),
    );

    assert!(p1.resolve(123));
    assert!(p1.is_pending());
    assert!(p2.is_empty());
    assert!(p3.is_empty());

    assert_eq!(exec.executed(), 0);
    exec.run_all();
    assert_eq!(exec.executed(), 2);

    assert!(p1.is_fulfilled());
    assert!(p2.is_fulfilled());
    assert!(p3.is_satisfied());
    assert_eq!(v1.get(), 123);
    assert_eq!(*v2.borrow(), "hi");
}

#[test]
fn dropping_intermediate_handles_keeps_the_chain_alive() {
    init_test_logging();

    let exec = step_executor();
    let value = Rc::new(Cell::new(0));

    let resolver;
    let tail = {
        let p1 = Promise::<i32>::new();
        resolver = p1.resolver();
        let seen = value.clone();
        p1.then(
            move |mut outcome: Outcome<i32>| {
                seen.set(outcome.take_value());
                Outcome::Ok(())
            },
            Some(exec.clone()),
        )
        // p1 dropped here; the tail anchors the chain.
    };

    assert!(!resolver.is_expired());
    assert!(resolver.resolve(111));
    exec.run_all();
    assert!(tail.is_satisfied());
    assert_eq!(value.get(), 111);
}

#[test]
fn nested_promise_settles_the_outer_chain() {
    init_test_logging();

    let exec = step_executor();
    let observed = Rc::new(Cell::new(0));
    let inner_resolver = Rc::new(RefCell::new(None));

    let p1 = Promise::<i32>::new();
    let seen = observed.clone();
    let stash = inner_resolver.clone();
    let wrapper = p1.then_promise(
        move |mut outcome: Outcome<i32>| {
            seen.set(outcome.take_value());
            let inner = Promise::<bool>::new();
            *stash.borrow_mut() = Some(inner.resolver());
            inner
        },
        Some(exec.clone()),
    );

    assert!(p1.resolve(1024));
    assert!(inner_resolver.borrow().is_none());

    exec.run_all();
    assert_eq!(observed.get(), 1024);
    let resolver = inner_resolver.borrow_mut().take().unwrap();

    // The inner promise now drives the wrapper.
    assert!(wrapper.is_empty());
    assert!(resolver.resolve(true));
    assert!(wrapper.is_pre_fulfilled());

    let delivered = Rc::new(Cell::new(false));
    let seen = delivered.clone();
    wrapper.then_done(
        move |mut outcome: Outcome<bool>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );
    exec.run_all();
    assert!(wrapper.is_fulfilled());
    assert!(delivered.get());
}

#[test]
fn late_attachment_to_a_pre_settled_promise() {
    init_test_logging();

    let exec = step_executor();
    let p = mk_resolved_promise(2022);
    assert!(p.is_pending());
    assert!(p.is_pre_fulfilled());

    let value = Rc::new(Cell::new(0));
    let seen = value.clone();
    p.then_done(
        move |mut outcome: Outcome<i32>| seen.set(outcome.take_value()),
        Some(exec.clone()),
    );

    // Still pre-settled until the executor drains.
    assert!(p.is_pre_fulfilled());
    assert_eq!(value.get(), 0);

    exec.run_all();
    assert!(p.is_fulfilled());
    assert_eq!(value.get(), 2022);
}

#[test]
fn rejected_promise_delivers_its_error_downstream() {
    init_test_logging();

    let exec = step_executor();
    let p1 = mk_rejected_promise::<i32>(Error::general(1, "rejected", "test"));
    assert!(p1.is_pre_rejected());

    let code = Rc::new(Cell::new(0));
    let seen = code.clone();
    let p2 = p1.then(
        move |mut outcome: Outcome<i32>| -> Outcome<i32> {
            let error = outcome.take_error();
            seen.set(error.code());
            Outcome::Err(error)
        },
        Some(exec.clone()),
    );

    exec.run_all();
    assert!(p1.is_rejected());
    assert!(p2.is_pre_rejected());
    assert_eq!(code.get(), 1);
}

#[test]
fn settlement_is_at_most_once() {
    init_test_logging();

    let p = Promise::<i32>::new();
    assert!(p.resolve(1));
    assert!(!p.resolve(2));
    assert!(!p.reject(Error::syscall(1)));
    assert_eq!(p.status(), PromiseStatus::PreFulfilled);

    let exec = step_executor();
    p.then_done(|_| {}, Some(exec.clone()));
    exec.run_all();
    assert!(p.is_fulfilled());
    assert!(!p.resolve(3));
}

#[test]
fn resolver_expires_with_its_promise() {
    init_test_logging();

    let resolver = {
        let p = Promise::<i32>::new();
        p.resolver()
    };

    assert!(resolver.is_expired());
    assert!(!resolver.resolve(1));
    assert!(!resolver.reject(Error::syscall(2)));
    assert_eq!(resolver.is_done(), None);
    assert_eq!(resolver.is_empty(), None);
    assert_eq!(resolver.is_settled(), None);
}

#[test]
fn resolver_reports_state_while_alive() {
    init_test_logging();

    let exec = step_executor();
    let p = Promise::<i32>::new();
    let resolver = p.resolver();

    assert_eq!(resolver.is_empty(), Some(true));
    assert!(resolver.resolve(5));
    assert_eq!(resolver.is_settled(), Some(true));
    assert_eq!(resolver.is_satisfied(), Some(true));
    assert_eq!(resolver.is_done(), Some(false));

    p.then_done(|_| {}, Some(exec.clone()));
    exec.run_all();
    assert_eq!(resolver.is_done(), Some(true));
}

#[test]
fn cancel_purges_the_chain_downstream() {
    init_test_logging();

    let exec = step_executor();
    let ran = Rc::new(Cell::new(false));

    let p1 = Promise::<i32>::new();
    let seen = ran.clone();
    let p2 = p1.then(
        move |_: Outcome<i32>| {
            seen.set(true);
            Outcome::Ok(())
        },
        Some(exec.clone()),
    );

    p1.cancel();
    assert!(p1.is_cancelled());
    assert!(p2.is_cancelled());

    // Settling after cancellation is inert.
    assert!(!p1.resolve(1));
    exec.run_all();
    assert!(!ran.get());
}

#[test]
fn cancel_after_resolve_drops_the_pending_callback() {
    init_test_logging();

    let exec = step_executor();
    let ran = Rc::new(Cell::new(false));

    let p = Promise::<i32>::new();
    let seen = ran.clone();
    p.then_done(move |_| seen.set(true), Some(exec.clone()));

    assert!(p.resolve(1));
    assert!(p.is_pending());

    // The trampoline is queued, but cancellation wins.
    p.cancel();
    assert!(p.is_cancelled());
    exec.run_all();
    assert!(!ran.get());
}

#[test]
fn cancel_is_idempotent_and_spares_terminal_states() {
    init_test_logging();

    let exec = step_executor();
    let p = mk_resolved_promise(9);
    p.then_done(|_| {}, Some(exec.clone()));
    exec.run_all();
    assert!(p.is_fulfilled());

    p.cancel();
    p.cancel();
    assert!(p.is_fulfilled());
}

#[test]
fn dropping_a_queued_trampoline_is_silent() {
    init_test_logging();

    let exec = step_executor();
    let ran = Rc::new(Cell::new(false));

    {
        let p = Promise::<i32>::new();
        let seen = ran.clone();
        p.then_done(move |_| seen.set(true), Some(exec.clone()));
        assert!(p.resolve(1));
        assert_eq!(exec.len(), 1);
        // p dropped with its trampoline still queued.
    }

    exec.run_all();
    assert!(!ran.get());
}
