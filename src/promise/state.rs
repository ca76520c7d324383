//! The shared promise state machine and chain plumbing.
//!
//! Every promise handle owns one strong reference to a
//! `Rc<RefCell<PromiseState<T>>>`. Chain links are asymmetric by design:
//! each state holds a *strong* reference to its predecessor (so the tail
//! handle anchors the entire chain) and a *weak*, type-erased reference
//! forward (used for cancellation walks and detach). Value propagation does
//! not go through the weak link: the continuation closure installed by an
//! attach captures a typed `Weak` of the concrete downstream state and
//! settles it directly.
//!
//! Invariants kept here:
//!
//! - storage is non-empty iff the status is pre-settled or terminal with an
//!   unconsumed outcome;
//! - terminal states are reached only inside the executor-posted trampoline,
//!   never synchronously from `resolve`/`reject`;
//! - a callback observing its own promise always sees a terminal state.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::status::{PromiseStatus, StatusMachine};
use crate::bind;
use crate::error::Error;
use crate::executor::Executor;
use crate::outcome::Outcome;

pub(crate) type Callback<T> = Box<dyn FnOnce(Outcome<T>) + 'static>;
pub(crate) type StateRc<T> = Rc<RefCell<PromiseState<T>>>;
pub(crate) type ChainRc = Rc<RefCell<dyn ChainNode>>;
pub(crate) type ChainWeak = Weak<RefCell<dyn ChainNode>>;

/// Type-erased view of a promise state used by chain walks.
pub(crate) trait ChainNode: 'static {
    /// Transitions {init, pre-settled} to cancelled, moving purged callback,
    /// storage, and coroutine frame into `purged` so the caller can drop
    /// them once no state borrows are held. Returns whether a transition
    /// happened.
    fn cancel_self(&mut self, purged: &mut Vec<Box<dyn Any>>) -> bool;

    fn next_node(&self) -> Option<ChainWeak>;

    fn detach_from_chain(&mut self);
}

pub(crate) struct PromiseState<T: 'static> {
    status: StatusMachine,
    storage: Outcome<T>,
    callback: Option<Callback<T>>,
    executor: Option<Rc<dyn Executor>>,
    // Strong backward: the tail of a chain keeps every upstream state alive.
    previous: Option<ChainRc>,
    // Weak forward: cancellation and detach only.
    next: Option<ChainWeak>,
    // Slot for a combinator's input container (or any user payload).
    payload: Option<Box<dyn Any>>,
    // Slot for a suspended coroutine frame awaiting on a chain through this
    // state's promise; purged on cancellation to release the frame.
    frame: Option<Box<dyn Any>>,
}

impl<T: 'static> PromiseState<T> {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusMachine::new(),
            storage: Outcome::Empty,
            callback: None,
            executor: None,
            previous: None,
            next: None,
            payload: None,
            frame: None,
        }
    }

    pub(crate) fn status(&self) -> PromiseStatus {
        self.status.get()
    }

    pub(crate) fn machine(&self) -> StatusMachine {
        self.status
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn executor(&self) -> Option<Rc<dyn Executor>> {
        self.executor.clone()
    }

    pub(crate) fn set_payload(&mut self, payload: Box<dyn Any>) {
        self.payload = Some(payload);
    }

    pub(crate) fn set_frame(&mut self, frame: Box<dyn Any>) {
        self.frame = Some(frame);
    }

    pub(crate) fn take_frame(&mut self) -> Option<Box<dyn Any>> {
        self.frame.take()
    }

    /// Takes the stored outcome of a settled state.
    pub(crate) fn take_storage(&mut self) -> Option<Outcome<T>> {
        if self.status.is_settled() {
            Some(std::mem::take(&mut self.storage))
        } else {
            None
        }
    }
}

impl<T: 'static> ChainNode for PromiseState<T> {
    fn cancel_self(&mut self, purged: &mut Vec<Box<dyn Any>>) -> bool {
        if !(self.status.is_empty() || self.status.is_pending()) {
            return false;
        }
        if let Some(cb) = self.callback.take() {
            purged.push(Box::new(cb));
        }
        let storage = std::mem::take(&mut self.storage);
        if !storage.is_empty() {
            purged.push(Box::new(storage));
        }
        if let Some(frame) = self.frame.take() {
            purged.push(frame);
        }
        let stepped = self.status.to_cancelled();
        debug_assert!(stepped);
        true
    }

    fn next_node(&self) -> Option<ChainWeak> {
        self.next.clone()
    }

    fn detach_from_chain(&mut self) {
        self.next = None;
    }
}

impl<T: 'static> Drop for PromiseState<T> {
    fn drop(&mut self) {
        // When a node goes out of scope the chain unwinds head-to-tail; the
        // predecessor must stop pointing at this state.
        if let Some(prev) = self.previous.take() {
            prev.borrow_mut().detach_from_chain();
        }
    }
}

/// Records a resolved value and posts the continuation trampoline.
///
/// Legal only from `Init`; returns false otherwise.
pub(crate) fn resolve<T: 'static>(state: &StateRc<T>, value: T) -> bool {
    {
        let mut s = state.borrow_mut();
        if !s.status.is_empty() {
            return false;
        }
        s.storage = Outcome::Ok(value);
        let stepped = s.status.to_pre_fulfilled();
        debug_assert!(stepped);
    }
    try_invoke(state);
    true
}

/// Records a rejection error and posts the continuation trampoline.
pub(crate) fn reject<T: 'static>(state: &StateRc<T>, error: Error) -> bool {
    {
        let mut s = state.borrow_mut();
        if !s.status.is_empty() {
            return false;
        }
        trace!(error = %error, "promise rejected");
        s.storage = Outcome::Err(error);
        let stepped = s.status.to_pre_rejected();
        debug_assert!(stepped);
    }
    try_invoke(state);
    true
}

/// Dispatches an outcome to `resolve` or `reject`.
///
/// # Panics
///
/// Panics on an empty outcome; settling with nothing is a programming error.
pub(crate) fn settle<T: 'static>(state: &StateRc<T>, outcome: Outcome<T>) -> bool {
    match outcome {
        Outcome::Ok(value) => resolve(state, value),
        Outcome::Err(error) => reject(state, error),
        Outcome::Empty => panic!("cannot settle a promise with an empty outcome"),
    }
}

/// Walks the chain forward from `start`, cancelling every not-yet-terminal
/// state. Purged callbacks, storage, and coroutine frames are dropped only
/// after the walk so their destructors run with no state borrows held.
pub(crate) fn cancel_chain(start: ChainRc) {
    let mut purged: Vec<Box<dyn Any>> = Vec::new();
    let mut cursor = Some(start);
    let mut cancelled = 0usize;
    while let Some(node) = cursor {
        let next = {
            let mut n = node.borrow_mut();
            if n.cancel_self(&mut purged) {
                cancelled += 1;
            }
            n.next_node()
        };
        cursor = next.and_then(|weak| weak.upgrade());
    }
    if cancelled > 0 {
        debug!(cancelled, "promise chain cancelled");
    }
    drop(purged);
}

/// Installs `cb` (replacing any previous continuation) and the executor it
/// must run through, then posts the trampoline if the outcome is already
/// known.
pub(crate) fn add_callback<T: 'static>(
    state: &StateRc<T>,
    cb: Callback<T>,
    executor: Option<Rc<dyn Executor>>,
) {
    {
        let mut s = state.borrow_mut();
        if s.callback.is_some() {
            debug!("replacing an existing promise continuation");
        }
        s.callback = Some(cb);
        s.executor = executor;
    }
    try_invoke(state);
}

// Posts the pre-to-terminal trampoline through the attached executor. The
// trampoline holds only a weak reference: a continuation whose promise died
// before the executor drained is dropped silently.
fn try_invoke<T: 'static>(state: &StateRc<T>) {
    let executor = {
        let s = state.borrow();
        if s.callback.is_none() || !s.status.is_pending() {
            return;
        }
        s.executor.clone()
    };
    let task = bind::weak_task(Rc::downgrade(state), |state| run_trampoline(&state));
    match executor {
        Some(executor) => executor.post(Box::new(task)),
        None => task(),
    }
}

// First transitions pre -> terminal, then invokes the user callback, with no
// borrow held across the call. A callback observing its own promise's status
// therefore always sees a terminal state.
fn run_trampoline<T: 'static>(state: &StateRc<T>) {
    let invoke = {
        let mut s = state.borrow_mut();
        match s.status.get() {
            PromiseStatus::PreFulfilled => {
                let stepped = s.status.to_fulfilled();
                debug_assert!(stepped);
            }
            PromiseStatus::PreRejected => {
                let stepped = s.status.to_rejected();
                debug_assert!(stepped);
            }
            // Cancelled (or already terminal via a second trampoline): the
            // callback has been purged or consumed; nothing to do.
            _ => return,
        }
        let cb = s.callback.take();
        let outcome = std::mem::take(&mut s.storage);
        cb.map(|cb| (cb, outcome))
    };
    if let Some((cb, outcome)) = invoke {
        cb(outcome);
    }
}

/// Links `next` behind `prev`: `next` owns `prev` strongly, `prev` sees
/// `next` weakly.
pub(crate) fn watch<T: 'static, U: 'static>(next: &StateRc<U>, prev: &StateRc<T>) {
    let prev_chain: ChainRc = prev.clone();
    next.borrow_mut().previous = Some(prev_chain);
    let next_chain: ChainRc = next.clone();
    prev.borrow_mut().next = Some(Rc::downgrade(&next_chain));
}

/// Attaches a terminal continuation: no downstream state, errors consumed by
/// the callback itself.
pub(crate) fn attach_done<T: 'static>(
    state: &StateRc<T>,
    f: impl FnOnce(Outcome<T>) + 'static,
    executor: Option<Rc<dyn Executor>>,
) {
    debug_assert!(
        state.borrow().next.is_none(),
        "terminal continuation on a state with a downstream propagator"
    );
    add_callback(state, Box::new(f), executor);
}

/// Attaches a mapping continuation feeding `next`.
pub(crate) fn attach_map<T: 'static, U: 'static>(
    src: &StateRc<T>,
    next: &StateRc<U>,
    f: impl FnOnce(Outcome<T>) -> Outcome<U> + 'static,
    executor: Option<Rc<dyn Executor>>,
) {
    watch(next, src);
    let weak_next = Rc::downgrade(next);
    let cb: Callback<T> = Box::new(move |outcome| {
        let result = f(outcome);
        if let Some(next) = weak_next.upgrade() {
            let _ = settle(&next, result);
        }
    });
    add_callback(src, cb, executor);
}

/// Attaches a promise-returning continuation feeding `next`.
///
/// The inner promise produced by `f` is adopted by `next` when the
/// continuation runs: see [`adopt_inner`].
pub(crate) fn attach_flat<T: 'static, U: 'static, P>(
    src: &StateRc<T>,
    next: &StateRc<U>,
    f: impl FnOnce(Outcome<T>) -> P + 'static,
    executor: Option<Rc<dyn Executor>>,
) where
    P: IntoStateRc<U> + 'static,
{
    watch(next, src);
    let weak_next = Rc::downgrade(next);
    let cb: Callback<T> = Box::new(move |outcome| {
        let inner = f(outcome).into_state_rc();
        if let Some(next) = weak_next.upgrade() {
            adopt_inner(&next, &inner);
        }
    });
    add_callback(src, cb, executor);
}

/// Extracts the shared state out of a promise-like handle.
pub(crate) trait IntoStateRc<U: 'static> {
    fn into_state_rc(self) -> StateRc<U>;
}

/// Makes the settlement of `inner` propagate straight into `next`.
///
/// The inner state inherits `next`'s chain position (strong back-reference
/// from `next`, weak forward link) and receives a pass-through continuation
/// with *no* executor: the inner promise's own settlement path has already
/// gone through an executor chosen by its creator, so posting again would
/// double-defer.
pub(crate) fn adopt_inner<U: 'static>(next: &StateRc<U>, inner: &StateRc<U>) {
    debug_assert!(
        !inner.borrow().has_handler(),
        "an adopted inner promise must not carry its own continuation"
    );
    watch(next, inner);
    let weak_next = Rc::downgrade(next);
    let cb: Callback<U> = Box::new(move |outcome| {
        if let Some(next) = weak_next.upgrade() {
            let _ = settle(&next, outcome);
        }
    });
    add_callback(inner, cb, None);
}
