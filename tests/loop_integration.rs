//! End-to-end message loop behavior on real io threads.

use tempo::test_utils::init_test_logging;
use tempo::{
    mk_resolved_promise, spawn_co, EventError, IoThread, IoThreadPool, MessageLoop, Outcome,
    Promise, Severity,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn io_thread_dispatch_round_trip() {
    init_test_logging();
    tempo::test_phase!("io_thread_dispatch");

    let mut io = IoThread::new();
    io.run();
    assert!(io.is_running());

    let (tx, rx) = mpsc::channel();
    let handle = io.handle().expect("loop handle");
    handle.dispatch(move || {
        let current = MessageLoop::current().expect("current loop");
        assert!(current.is_in_loop_thread());
        tx.send(current.is_running()).unwrap();
    });

    assert!(rx.recv_timeout(RECV_TIMEOUT).unwrap());

    io.shutdown();
    io.join();
    assert!(!io.is_running());
    tempo::test_complete!("io_thread_dispatch");
}

#[test]
fn posted_tasks_drain_by_severity() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        // Posted out of order; one task-sched batch drains urgent first.
        let t1 = tx.clone();
        current.post(Box::new(move || t1.send("normal").unwrap()), Severity::Normal);
        let t2 = tx.clone();
        current.post(
            Box::new(move || t2.send("urgent").unwrap()),
            Severity::Urgent,
        );
        let t3 = tx.clone();
        current.post(
            Box::new(move || t3.send("critical").unwrap()),
            Severity::Critical,
        );
    });

    let order: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
        .collect();
    assert_eq!(order, vec!["urgent", "critical", "normal"]);

    io.shutdown();
    io.join();
}

#[test]
fn run_after_fires_on_the_deadline_timer() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        current.run_after(
            move |error| {
                tx.send((error.is_set(), Instant::now())).unwrap();
            },
            Duration::from_millis(30),
        );
    });

    let (had_error, fired_at) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(!had_error);
    assert!(fired_at.duration_since(started) >= Duration::from_millis(25));

    io.shutdown();
    io.join();
}

#[test]
fn wheel_timers_fire_from_the_heartbeat() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        // Token dropped on purpose: dropping does not cancel.
        let _ = current.add_timer_event(
            move |error| {
                tx.send((error.is_set(), Instant::now())).unwrap();
            },
            Duration::from_millis(40),
        );
    });

    let (had_error, fired_at) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert!(!had_error);
    assert!(fired_at.duration_since(started) >= Duration::from_millis(30));

    io.shutdown();
    io.join();
}

#[test]
fn shutdown_cancels_pending_wheel_timers() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    let handle = io.handle().unwrap();
    handle.dispatch(move || {
        let current = MessageLoop::current().unwrap();
        let _ = current.add_timer_event(
            move |error| {
                tx.send((error.code(), error.information())).unwrap();
            },
            Duration::from_secs(3600),
        );
    });

    io.shutdown();
    let (code, information) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(code, tempo::event_err(EventError::LoopShutdown).code());
    assert_eq!(information, "event[eventloop shutdown]");
    io.join();
}

#[test]
fn nested_promise_resolution_waits_for_its_timer() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        let executor = current.executor();

        let outer = mk_resolved_promise(1).then_promise(
            |_: Outcome<i32>| {
                let inner = Promise::<i32>::new();
                let resolver = inner.resolver();
                MessageLoop::current().unwrap().run_after(
                    move |_| {
                        resolver.resolve(123);
                    },
                    Duration::from_millis(100),
                );
                inner
            },
            Some(executor.clone()),
        );

        outer.then_done(
            move |mut outcome: Outcome<i32>| {
                tx.send((outcome.take_value(), Instant::now())).unwrap();
            },
            Some(executor),
        );
    });

    let (value, settled_at) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(value, 123);
    // The outer chain waited for the inner timer, not the outer resolution.
    assert!(settled_at.duration_since(started) >= Duration::from_millis(80));

    io.shutdown();
    io.join();
}

#[test]
fn coroutines_ride_the_loop_executor() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        let executor = current.executor();

        let out = spawn_co(async {
            let gate = Promise::<i32>::new();
            let resolver = gate.resolver();
            MessageLoop::current().unwrap().run_after(
                move |_| {
                    resolver.resolve(20);
                },
                Duration::from_millis(20),
            );
            let mut first = gate.await;
            let mut second = mk_resolved_promise(22).await;
            Outcome::Ok(first.take_value() + second.take_value())
        });

        out.then_done(
            move |mut outcome: Outcome<i32>| {
                tx.send(outcome.take_value()).unwrap();
            },
            Some(executor),
        );
    });

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 42);

    io.shutdown();
    io.join();
}

#[test]
fn cancelled_timer_tokens_never_fire() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();

        let cancelled_flag = std::rc::Rc::new(std::cell::Cell::new(false));
        let flag = cancelled_flag.clone();
        let token = current.add_timer_event(
            move |_| flag.set(true),
            Duration::from_millis(30),
        );
        let cancel = token.into_cancelable();
        cancel.cancel();
        assert!(!cancel.is_fired());

        // A later sentinel proves the cancelled timer's tick has passed.
        current.add_timer_event(
            move |_| tx.send(cancelled_flag.get()).unwrap(),
            Duration::from_millis(120),
        );
    });

    assert!(!rx.recv_timeout(RECV_TIMEOUT).unwrap());

    io.shutdown();
    io.join();
}

#[test]
fn notifier_frames_fire_on_the_loop() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    io.handle().unwrap().dispatch(move || {
        let current = MessageLoop::current().unwrap();
        let executor = current.executor();

        let notifier = tempo::spawn_notifier(async {
            let gate: Promise<()> = Promise::new();
            let resolver = gate.resolver();
            MessageLoop::current().unwrap().run_after(
                move |_| {
                    resolver.resolve(());
                },
                Duration::from_millis(10),
            );
            let outcome = gate.await;
            assert!(outcome.is_ok());
            tempo::Error::none()
        });

        notifier.then_done(move |error| tx.send(error.is_set()).unwrap(), Some(executor));
    });

    assert!(!rx.recv_timeout(RECV_TIMEOUT).unwrap());

    io.shutdown();
    io.join();
}

#[test]
fn same_thread_dispatch_runs_inline() {
    init_test_logging();

    let mut io = IoThread::new();
    io.run();

    let (tx, rx) = mpsc::channel();
    let handle = io.handle().unwrap();
    let inner_handle = handle.clone();
    handle.dispatch(move || {
        assert!(inner_handle.is_loop_thread());
        let flag = Arc::new(AtomicUsize::new(0));
        let seen = flag.clone();
        inner_handle.dispatch(move || {
            seen.store(1, Ordering::SeqCst);
        });
        // Same-thread dispatch ran in place, not through the remote queue.
        tx.send(flag.load(Ordering::SeqCst)).unwrap();
    });

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);

    io.shutdown();
    io.join();
}

#[test]
fn pool_iterates_every_loop() {
    init_test_logging();

    let mut pool = IoThreadPool::new(2);
    assert_eq!(pool.len(), 2);
    pool.run();

    let visits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<()>();
    let tx = std::sync::Mutex::new(tx);
    let counter = visits.clone();
    pool.iterate(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.lock().unwrap().send(()).unwrap();
    });

    for _ in 0..2 {
        rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }
    assert_eq!(visits.load(Ordering::SeqCst), 2);

    pool.shutdown();
    pool.join_all();
    assert!(pool.at(0).is_some_and(|t| !t.is_running()));
    assert!(pool.at(2).is_none());
}
