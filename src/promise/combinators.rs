//! Promise factories and composition combinators.
//!
//! Combinators own their inputs: the input container is moved into the
//! output promise's payload slot, keeping every participant alive until
//! settlement regardless of what the caller does with its own handles.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::handle::Promise;
use super::state::{self, StateRc};
use crate::error::{event_err_msg, Error, EventError};
use crate::executor::Executor;
use crate::outcome::Outcome;

/// A strong settle-with-value handle handed to promise init functions.
///
/// Unlike [`super::Resolver`], this keeps the promise state alive; it is the
/// capture mode combinators use so their output cannot die before the inputs
/// settle.
pub struct ResolveFn<T: 'static> {
    state: StateRc<T>,
}

impl<T: 'static> ResolveFn<T> {
    /// Resolves the promise; false if it is no longer unsettled.
    pub fn call(&self, value: T) -> bool {
        state::resolve(&self.state, value)
    }
}

impl<T: 'static> Clone for ResolveFn<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

/// A strong settle-with-error handle handed to promise init functions.
pub struct RejectFn<T: 'static> {
    state: StateRc<T>,
}

impl<T: 'static> RejectFn<T> {
    /// Rejects the promise; false if it is no longer unsettled.
    pub fn call(&self, error: Error) -> bool {
        state::reject(&self.state, error)
    }
}

impl<T: 'static> Clone for RejectFn<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

/// Creates a promise already resolved with `value`.
///
/// The promise is in the pre-fulfilled phase: a continuation attached later
/// still runs through its executor.
#[must_use]
pub fn mk_resolved_promise<T: 'static>(value: T) -> Promise<T> {
    let p = Promise::new();
    let settled = p.resolve(value);
    debug_assert!(settled);
    p
}

/// Creates a promise already rejected with `error`.
#[must_use]
pub fn mk_rejected_promise<T: 'static>(error: Error) -> Promise<T> {
    let p = Promise::new();
    let settled = p.reject(error);
    debug_assert!(settled);
    p
}

/// Creates a promise and hands its settle functions to `init`.
pub fn mk_promise<T: 'static>(init: impl FnOnce(ResolveFn<T>, RejectFn<T>)) -> Promise<T> {
    let p = Promise::new();
    init(
        ResolveFn {
            state: p.state_rc().clone(),
        },
        RejectFn {
            state: p.state_rc().clone(),
        },
    );
    p
}

/// A weak accessor to a payload parked inside a promise state.
///
/// The payload lives exactly as long as the promise state does; the
/// attachment observes it without extending its lifetime.
pub struct Attachment<P> {
    payload: Weak<RefCell<P>>,
}

impl<P> Attachment<P> {
    /// True while the owning promise state (and thus the payload) is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.payload.strong_count() > 0
    }

    /// Runs `f` against the payload if it is still alive.
    pub fn with<R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        self.payload.upgrade().map(|p| f(&mut p.borrow_mut()))
    }
}

impl<P> Clone for Attachment<P> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
        }
    }
}

/// Creates a promise with `payload` moved into its state, handing the settle
/// functions and the payload to `init`.
///
/// The payload keeps whatever it owns (typically the combinator's input
/// promises) alive until the output settles or is dropped; the returned
/// [`Attachment`] observes it weakly.
pub fn mk_attachment_promise<T: 'static, P: 'static>(
    payload: P,
    init: impl FnOnce(ResolveFn<T>, RejectFn<T>, &mut P),
) -> (Promise<T>, Attachment<P>) {
    let p = Promise::new();
    let payload = Rc::new(RefCell::new(payload));
    let attachment = Attachment {
        payload: Rc::downgrade(&payload),
    };
    init(
        ResolveFn {
            state: p.state_rc().clone(),
        },
        RejectFn {
            state: p.state_rc().clone(),
        },
        &mut payload.borrow_mut(),
    );
    p.state_rc().borrow_mut().set_payload(Box::new(payload));
    (p, attachment)
}

/// Resolves with every input's value, in input order, once all inputs
/// resolve; rejects with the first error and ignores later outcomes.
///
/// An empty input resolves immediately with the empty vector.
#[must_use]
pub fn mk_all_promise<T: 'static>(
    promises: Vec<Promise<T>>,
    executor: Option<Rc<dyn Executor>>,
) -> Promise<Vec<T>> {
    if promises.is_empty() {
        return mk_resolved_promise(Vec::new());
    }

    struct Ctx<T> {
        remaining: usize,
        results: Vec<Option<T>>,
    }

    let count = promises.len();
    let out = Promise::<Vec<T>>::new();
    let resolve = ResolveFn {
        state: out.state_rc().clone(),
    };
    let reject = RejectFn {
        state: out.state_rc().clone(),
    };
    let ctx = Rc::new(RefCell::new(Ctx {
        remaining: count,
        results: (0..count).map(|_| None).collect(),
    }));

    for (idx, p) in promises.iter().enumerate() {
        let ctx = ctx.clone();
        let resolve = resolve.clone();
        let reject = reject.clone();
        p.then_done(
            move |outcome: Outcome<T>| match outcome {
                Outcome::Ok(value) => {
                    let finished = {
                        let mut ctx = ctx.borrow_mut();
                        ctx.results[idx] = Some(value);
                        ctx.remaining -= 1;
                        ctx.remaining == 0
                    };
                    if finished {
                        let values = ctx
                            .borrow_mut()
                            .results
                            .iter_mut()
                            .map(|slot| slot.take().expect("input settled twice"))
                            .collect();
                        let _ = resolve.call(values);
                    }
                }
                Outcome::Err(error) => {
                    let _ = reject.call(error);
                }
                // A settled input never delivers an empty outcome.
                Outcome::Empty => {}
            },
            executor.clone(),
        );
    }

    out.state_rc().borrow_mut().set_payload(Box::new(promises));
    out
}

/// Resolves with the first input to resolve (by settlement order); rejects
/// with a "no resolved promise" error only after every input has rejected.
///
/// An empty input rejects immediately with a "no promise" error.
#[must_use]
pub fn mk_any_promise<T: 'static>(
    promises: Vec<Promise<T>>,
    executor: Option<Rc<dyn Executor>>,
) -> Promise<T> {
    if promises.is_empty() {
        return mk_rejected_promise(event_err_msg(EventError::PromiseAny, "no promise"));
    }

    let out = Promise::<T>::new();
    let resolve = ResolveFn {
        state: out.state_rc().clone(),
    };
    let reject = RejectFn {
        state: out.state_rc().clone(),
    };
    let failures_left = Rc::new(std::cell::Cell::new(promises.len()));

    for p in &promises {
        let failures_left = failures_left.clone();
        let resolve = resolve.clone();
        let reject = reject.clone();
        p.then_done(
            move |outcome: Outcome<T>| match outcome {
                Outcome::Ok(value) => {
                    let _ = resolve.call(value);
                }
                Outcome::Err(_) => {
                    failures_left.set(failures_left.get() - 1);
                    if failures_left.get() == 0 {
                        let _ = reject.call(event_err_msg(
                            EventError::PromiseAny,
                            "no resolved promise",
                        ));
                    }
                }
                Outcome::Empty => {}
            },
            executor.clone(),
        );
    }

    out.state_rc().borrow_mut().set_payload(Box::new(promises));
    out
}

/// Settles with the outcome, success or failure, of the first input to
/// settle.
///
/// An empty input rejects immediately with a "no promise" error.
#[must_use]
pub fn mk_race_promise<T: 'static>(
    promises: Vec<Promise<T>>,
    executor: Option<Rc<dyn Executor>>,
) -> Promise<T> {
    if promises.is_empty() {
        return mk_rejected_promise(event_err_msg(EventError::PromiseRace, "no promise"));
    }

    let out = Promise::<T>::new();
    let resolve = ResolveFn {
        state: out.state_rc().clone(),
    };
    let reject = RejectFn {
        state: out.state_rc().clone(),
    };

    for p in &promises {
        let resolve = resolve.clone();
        let reject = reject.clone();
        p.then_done(
            move |outcome: Outcome<T>| match outcome {
                Outcome::Ok(value) => {
                    let _ = resolve.call(value);
                }
                Outcome::Err(error) => {
                    let _ = reject.call(error);
                }
                Outcome::Empty => {}
            },
            executor.clone(),
        );
    }

    out.state_rc().borrow_mut().set_payload(Box::new(promises));
    out
}
