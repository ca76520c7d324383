//! Lifting promises into `async`/`await` code.
//!
//! [`spawn_co`] drives a future whose output is an [`Outcome`] and exposes
//! its completion as a [`Promise`]; inside such a future, awaiting a promise
//! suspends until the promise settles and resumes through the executor the
//! frame was spawned with. The frame starts eagerly (the future is polled
//! once before `spawn_co` returns) and is destroyed as soon as the body
//! completes.
//!
//! Resumption is driven entirely by the continuation the awaiter installs on
//! the awaited promise, never by the task waker, so frames are polled with
//! [`Waker::noop`]. Awaiting anything other than a tempo promise inside a
//! frame will therefore never be woken; the bridge is for promise-shaped
//! suspension only.
//!
//! # Frame release
//!
//! The suspended frame is dropped deterministically on every abandonment
//! path:
//!
//! - cancelling the frame's own output promise purges the frame slot;
//! - cancelling (or dropping) the awaited promise purges the installed
//!   continuation, whose abandonment guard clears the frame;
//! - a panic inside the body drops the frame and rejects the output promise
//!   with the [`EventError::CoroutineException`] error.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::{Future, IntoFuture};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use tracing::{debug, trace};

use crate::error::{event_err_msg, Error, EventError};
use crate::executor::Executor;
use crate::outcome::Outcome;
use crate::promise::state::{self, PromiseState};
use crate::promise::{Notifier, Promise, PromiseStatus};
use crate::runtime::MessageLoop;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Outcome<T>>>>;

// The per-frame driver. The output promise's state owns the task through its
// frame slot; continuations reach it weakly through the context.
struct CoTask<T: 'static> {
    future: RefCell<Option<BoxFuture<T>>>,
    out: Weak<RefCell<PromiseState<T>>>,
    ctx: RefCell<Option<Rc<CoContext>>>,
}

// What an awaiter needs from the frame it suspends: how to resume it, how to
// release it on abandonment, and which executor continuations run through.
struct CoContext {
    resume: Box<dyn Fn()>,
    release: Rc<dyn Fn()>,
    executor: Rc<dyn Executor>,
}

thread_local! {
    static CURRENT_FRAME: RefCell<Option<Rc<CoContext>>> = const { RefCell::new(None) };
}

fn current_frame() -> Option<Rc<CoContext>> {
    CURRENT_FRAME.with(|c| c.borrow().clone())
}

struct FrameScope {
    prior: Option<Rc<CoContext>>,
}

impl FrameScope {
    fn enter(ctx: Rc<CoContext>) -> Self {
        let prior = CURRENT_FRAME.with(|c| c.borrow_mut().replace(ctx));
        Self { prior }
    }
}

impl Drop for FrameScope {
    fn drop(&mut self) {
        CURRENT_FRAME.with(|c| *c.borrow_mut() = self.prior.take());
    }
}

// Fires `on_abandon` if the owning continuation is dropped without running.
struct AbandonGuard {
    armed: Cell<bool>,
    on_abandon: Rc<dyn Fn()>,
}

impl AbandonGuard {
    fn disarm(&self) {
        self.armed.set(false);
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed.get() {
            trace!("await continuation abandoned; releasing coroutine frame");
            (self.on_abandon)();
        }
    }
}

/// Drives `future` as a coroutine frame on the current loop's executor.
///
/// # Panics
///
/// Panics if the current thread has no message loop; use [`spawn_co_on`] to
/// supply an executor explicitly.
pub fn spawn_co<T: 'static>(future: impl Future<Output = Outcome<T>> + 'static) -> Promise<T> {
    let current = MessageLoop::current().expect("spawn_co requires a message loop on this thread");
    spawn_co_on(current.executor(), future)
}

/// Drives `future` as a coroutine frame resuming through `executor`.
///
/// The future is polled once before this returns; if it completes without
/// suspending, the returned promise is already pre-settled.
pub fn spawn_co_on<T: 'static>(
    executor: Rc<dyn Executor>,
    future: impl Future<Output = Outcome<T>> + 'static,
) -> Promise<T> {
    let promise = Promise::new();
    let task = Rc::new(CoTask {
        future: RefCell::new(Some(Box::pin(future))),
        out: Rc::downgrade(promise.state_rc()),
        ctx: RefCell::new(None),
    });

    let resume_task = Rc::downgrade(&task);
    let release_task = Rc::downgrade(&task);
    let ctx = Rc::new(CoContext {
        resume: Box::new(move || {
            if let Some(task) = resume_task.upgrade() {
                step(&task);
            }
        }),
        release: Rc::new(move || {
            if let Some(task) = release_task.upgrade() {
                // Skipped if the frame is mid-poll; step() sweeps afterwards.
                if let Ok(mut slot) = task.future.try_borrow_mut() {
                    slot.take();
                }
            }
        }),
        executor,
    });
    *task.ctx.borrow_mut() = Some(ctx);

    promise
        .state_rc()
        .borrow_mut()
        .set_frame(Box::new(task.clone()));

    step(&task);
    promise
}

/// Drives an error-returning future as a frame on the current loop's
/// executor, exposing completion as a [`Notifier`].
///
/// The empty error fires the notifier successfully.
///
/// # Panics
///
/// Panics if the current thread has no message loop.
pub fn spawn_notifier(future: impl Future<Output = Error> + 'static) -> Notifier {
    let current =
        MessageLoop::current().expect("spawn_notifier requires a message loop on this thread");
    spawn_notifier_on(current.executor(), future)
}

/// Drives an error-returning future as a frame resuming through `executor`,
/// exposing completion as a [`Notifier`].
pub fn spawn_notifier_on(
    executor: Rc<dyn Executor>,
    future: impl Future<Output = Error> + 'static,
) -> Notifier {
    let mapped = async move {
        let error = future.await;
        if error.is_set() {
            Outcome::Err(error)
        } else {
            Outcome::Ok(())
        }
    };
    let promise = spawn_co_on(executor, mapped);
    Notifier::from_state(promise.state_rc().clone())
}

fn step<T: 'static>(task: &Rc<CoTask<T>>) {
    let ctx = task
        .ctx
        .borrow()
        .clone()
        .expect("coroutine frame context missing");

    let mut slot = task.future.borrow_mut();
    let Some(future) = slot.as_mut() else {
        return;
    };

    let scope = FrameScope::enter(ctx);
    let mut poll_cx = Context::from_waker(Waker::noop());
    let polled = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut poll_cx)));
    drop(scope);

    match polled {
        Ok(Poll::Pending) => {
            // A cancellation that raced with this poll could not clear the
            // frame slot while we held it; honor it now.
            let abandoned = task
                .out
                .upgrade()
                .is_none_or(|out| out.borrow().status() == PromiseStatus::Cancelled);
            if abandoned {
                slot.take();
            }
        }
        Ok(Poll::Ready(outcome)) => {
            slot.take();
            drop(slot);
            finish(task, outcome);
        }
        Err(payload) => {
            slot.take();
            drop(slot);
            let text = panic_text(payload.as_ref());
            debug!(panic = %text, "coroutine body panicked");
            finish(
                task,
                Outcome::Err(event_err_msg(EventError::CoroutineException, text)),
            );
        }
    }
}

fn finish<T: 'static>(task: &Rc<CoTask<T>>, outcome: Outcome<T>) {
    let Some(out) = task.out.upgrade() else {
        return;
    };
    // The frame is complete; drop the state's ownership of it before
    // settling so the continuation runs against a frame-free promise.
    let frame = out.borrow_mut().take_frame();
    drop(frame);
    match outcome {
        Outcome::Ok(value) => {
            let _ = state::resolve(&out, value);
        }
        Outcome::Err(error) => {
            let _ = state::reject(&out, error);
        }
        Outcome::Empty => panic!("a coroutine completed with an empty outcome"),
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Suspends a coroutine frame until a promise settles.
///
/// Produced by awaiting a [`Promise`]; completes with the settled
/// [`Outcome`] after the continuation has run through the frame's executor.
/// A promise that is already terminal completes immediately with whatever
/// storage remains.
pub struct PromiseAwait<T: 'static> {
    promise: Option<Promise<T>>,
    delivered: Rc<RefCell<Option<Outcome<T>>>>,
    attached: bool,
}

impl<T: 'static> Future for PromiseAwait<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(outcome) = this.delivered.borrow_mut().take() {
            this.promise = None;
            return Poll::Ready(outcome);
        }

        if !this.attached {
            let promise = this
                .promise
                .as_ref()
                .expect("promise awaiter polled after completion");

            // Already terminal: the pre-to-terminal trampoline has run, so
            // there is nothing left to quarantine behind the executor.
            if promise.is_done() {
                let outcome = promise.take_result().unwrap_or(Outcome::Empty);
                this.promise = None;
                return Poll::Ready(outcome);
            }

            let frame =
                current_frame().expect("a promise may only be awaited inside a coroutine frame");
            this.attached = true;

            let delivered = this.delivered.clone();
            let guard = AbandonGuard {
                armed: Cell::new(true),
                on_abandon: frame.release.clone(),
            };
            let resume_frame = frame.clone();
            promise.then_done(
                move |outcome| {
                    guard.disarm();
                    *delivered.borrow_mut() = Some(outcome);
                    (resume_frame.resume)();
                },
                Some(frame.executor.clone()),
            );
        }
        Poll::Pending
    }
}

impl<T: 'static> IntoFuture for Promise<T> {
    type Output = Outcome<T>;
    type IntoFuture = PromiseAwait<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseAwait {
            promise: Some(self),
            delivered: Rc::new(RefCell::new(None)),
            attached: false,
        }
    }
}

/// Suspends a coroutine frame until a notifier fires.
///
/// Produced by awaiting a [`Notifier`]; completes with the empty error on
/// success.
pub struct NotifierAwait {
    inner: PromiseAwait<()>,
}

impl Future for NotifierAwait {
    type Output = Error;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().inner).poll(cx) {
            Poll::Ready(Outcome::Err(error)) => Poll::Ready(error),
            Poll::Ready(_) => Poll::Ready(Error::none()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl IntoFuture for Notifier {
    type Output = Error;
    type IntoFuture = NotifierAwait;

    fn into_future(self) -> Self::IntoFuture {
        NotifierAwait {
            inner: PromiseAwait {
                promise: Some(Promise::from_state(self.inner().state_rc().clone())),
                delivered: Rc::new(RefCell::new(None)),
                attached: false,
            },
        }
    }
}
