//! The public promise handle and its weak resolver.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::combinators::{mk_all_promise, mk_any_promise, mk_race_promise, mk_rejected_promise};
use super::state::{self, ChainRc, IntoStateRc, PromiseState, StateRc};
use super::status::PromiseStatus;
use crate::error::Error;
use crate::executor::Executor;
use crate::outcome::Outcome;

/// A move-only handle owning one reference to a promise state.
///
/// Dropping a handle does not break the chain it belongs to: downstream
/// states anchor their predecessors through strong back-references, so the
/// tail keeps everything upstream alive.
pub struct Promise<T: 'static> {
    state: StateRc<T>,
}

impl<T: 'static> Promise<T> {
    /// Creates an unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(PromiseState::new())),
        }
    }

    pub(crate) fn from_state(state: StateRc<T>) -> Self {
        Self { state }
    }

    pub(crate) fn state_rc(&self) -> &StateRc<T> {
        &self.state
    }

    /// Resolves the promise with `value`.
    ///
    /// Returns false if the promise is no longer in its initial state.
    pub fn resolve(&self, value: T) -> bool {
        state::resolve(&self.state, value)
    }

    /// Rejects the promise with `error`.
    ///
    /// Returns false if the promise is no longer in its initial state.
    pub fn reject(&self, error: Error) -> bool {
        state::reject(&self.state, error)
    }

    /// Settles the promise from an outcome.
    ///
    /// # Panics
    ///
    /// Panics on an empty outcome.
    pub fn set(&self, outcome: Outcome<T>) -> bool {
        state::settle(&self.state, outcome)
    }

    /// Cancels this promise and every state downstream of it.
    ///
    /// Cancellation purges callbacks, stored outcomes, and suspended
    /// coroutine frames; terminal states are left untouched. Idempotent.
    pub fn cancel(&self) {
        let chain: ChainRc = self.state.clone();
        state::cancel_chain(chain);
    }

    /// Returns a weak handle able to settle this promise without keeping its
    /// state alive.
    #[must_use]
    pub fn resolver(&self) -> Resolver<T> {
        Resolver {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> PromiseStatus {
        self.state.borrow().status()
    }

    /// True if not settled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().machine().is_empty()
    }

    /// True if the outcome is known but the continuation has not run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.borrow().machine().is_pending()
    }

    /// True if the continuation has run in its executor.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.borrow().machine().is_done()
    }

    /// True if `resolve` has been called.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.state.borrow().machine().is_satisfied()
    }

    /// True if `reject` has been called.
    #[must_use]
    pub fn is_unsatisfied(&self) -> bool {
        self.state.borrow().machine().is_unsatisfied()
    }

    /// True if the outcome has been recorded and the promise not cancelled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.state.borrow().machine().is_settled()
    }

    /// True in the pre-fulfilled phase.
    #[must_use]
    pub fn is_pre_fulfilled(&self) -> bool {
        self.status() == PromiseStatus::PreFulfilled
    }

    /// True once fulfilled terminally.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.status() == PromiseStatus::Fulfilled
    }

    /// True in the pre-rejected phase.
    #[must_use]
    pub fn is_pre_rejected(&self) -> bool {
        self.status() == PromiseStatus::PreRejected
    }

    /// True once rejected terminally.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status() == PromiseStatus::Rejected
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == PromiseStatus::Cancelled
    }

    /// True if a continuation is attached.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.state.borrow().has_handler()
    }

    /// Returns the executor the continuation will run through, if any.
    #[must_use]
    pub fn executor(&self) -> Option<Rc<dyn Executor>> {
        self.state.borrow().executor()
    }

    /// Takes the stored outcome of a settled promise.
    ///
    /// Returns `None` while unsettled or cancelled. A continuation consumes
    /// the storage when it runs, in which case the taken outcome is empty.
    #[must_use]
    pub fn take_result(&self) -> Option<Outcome<T>> {
        self.state.borrow_mut().take_storage()
    }

    /// Chains a mapping continuation; returns the downstream promise.
    ///
    /// When this promise settles, `f` is posted through `executor` (or run
    /// in place if `None`) and its returned outcome settles the new promise.
    pub fn then<U: 'static>(
        &self,
        f: impl FnOnce(Outcome<T>) -> Outcome<U> + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) -> Promise<U> {
        let next = Promise::<U>::new();
        state::attach_map(&self.state, next.state_rc(), f, executor);
        next
    }

    /// Chains a promise-returning continuation; returns the downstream
    /// promise.
    ///
    /// The promise returned by `f` is adopted: its eventual settlement flows
    /// straight through to the returned promise without re-posting.
    pub fn then_promise<U: 'static>(
        &self,
        f: impl FnOnce(Outcome<T>) -> Promise<U> + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) -> Promise<U> {
        let next = Promise::<U>::new();
        state::attach_flat(&self.state, next.state_rc(), f, executor);
        next
    }

    /// Chains a terminal consumer; errors it receives are not forwarded
    /// anywhere.
    pub fn then_done(
        &self,
        f: impl FnOnce(Outcome<T>) + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) {
        state::attach_done(&self.state, f, executor);
    }

    /// Chains a continuation returning a container of promises, all of which
    /// must resolve; the returned promise yields their values in input
    /// order, or the first rejection.
    pub fn then_all<U: 'static>(
        &self,
        f: impl FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) -> Promise<Vec<U>> {
        let combine_executor = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => mk_all_promise(promises, combine_executor),
                Outcome::Err(error) => mk_rejected_promise(error),
                Outcome::Empty => panic!("then_all continuation returned an empty outcome"),
            },
            executor,
        )
    }

    /// Chains a continuation returning a container of promises; the returned
    /// promise yields the first success, or rejects once all inputs fail.
    pub fn then_any<U: 'static>(
        &self,
        f: impl FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) -> Promise<U> {
        let combine_executor = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => mk_any_promise(promises, combine_executor),
                Outcome::Err(error) => mk_rejected_promise(error),
                Outcome::Empty => panic!("then_any continuation returned an empty outcome"),
            },
            executor,
        )
    }

    /// Chains a continuation returning a container of promises; the returned
    /// promise settles with the outcome of the first input to settle.
    pub fn then_race<U: 'static>(
        &self,
        f: impl FnOnce(Outcome<T>) -> Outcome<Vec<Promise<U>>> + 'static,
        executor: Option<Rc<dyn Executor>>,
    ) -> Promise<U> {
        let combine_executor = executor.clone();
        self.then_promise(
            move |outcome| match f(outcome) {
                Outcome::Ok(promises) => mk_race_promise(promises, combine_executor),
                Outcome::Err(error) => mk_rejected_promise(error),
                Outcome::Empty => panic!("then_race continuation returned an empty outcome"),
            },
            executor,
        )
    }
}

impl<T: 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .field("has_handler", &self.has_handler())
            .finish()
    }
}

impl<T: 'static> IntoStateRc<T> for Promise<T> {
    fn into_state_rc(self) -> StateRc<T> {
        self.state
    }
}

/// A weak handle that can settle a promise without keeping its state alive.
///
/// Every operation reports `None` (introspection) or `false` (settlement)
/// once the underlying state has been dropped.
pub struct Resolver<T: 'static> {
    state: Weak<RefCell<PromiseState<T>>>,
}

impl<T: 'static> Resolver<T> {
    /// Creates an unbound resolver; every operation on it is inert.
    #[must_use]
    pub fn unbound() -> Self {
        Self { state: Weak::new() }
    }

    /// Resolves the underlying promise, if it is still alive and unsettled.
    pub fn resolve(&self, value: T) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state::resolve(&state, value))
    }

    /// Rejects the underlying promise, if it is still alive and unsettled.
    pub fn reject(&self, error: Error) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state::reject(&state, error))
    }

    /// Settles the underlying promise from an outcome.
    pub fn set(&self, outcome: Outcome<T>) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state::settle(&state, outcome))
    }

    /// Cancels the underlying promise chain, if still alive.
    pub fn cancel(&self) {
        if let Some(state) = self.state.upgrade() {
            let chain: ChainRc = state;
            state::cancel_chain(chain);
        }
    }

    /// Drops the weak reference, making this resolver inert.
    pub fn reset(&mut self) {
        self.state = Weak::new();
    }

    /// True once the underlying state has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.strong_count() == 0
    }

    /// Whether the continuation has run; `None` if the state is gone.
    #[must_use]
    pub fn is_done(&self) -> Option<bool> {
        self.state.upgrade().map(|s| s.borrow().machine().is_done())
    }

    /// Whether the promise is still unsettled; `None` if the state is gone.
    #[must_use]
    pub fn is_empty(&self) -> Option<bool> {
        self.state
            .upgrade()
            .map(|s| s.borrow().machine().is_empty())
    }

    /// Whether the outcome has been recorded; `None` if the state is gone.
    #[must_use]
    pub fn is_settled(&self) -> Option<bool> {
        self.state
            .upgrade()
            .map(|s| s.borrow().machine().is_settled())
    }

    /// Whether `resolve` was called; `None` if the state is gone.
    #[must_use]
    pub fn is_satisfied(&self) -> Option<bool> {
        self.state
            .upgrade()
            .map(|s| s.borrow().machine().is_satisfied())
    }

    /// Whether `reject` was called; `None` if the state is gone.
    #[must_use]
    pub fn is_unsatisfied(&self) -> Option<bool> {
        self.state
            .upgrade()
            .map(|s| s.borrow().machine().is_unsatisfied())
    }
}

impl<T: 'static> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: 'static> Default for Resolver<T> {
    fn default() -> Self {
        Self::unbound()
    }
}

impl<T: 'static> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("expired", &self.is_expired())
            .finish()
    }
}
