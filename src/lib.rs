//! Tempo: a cooperative single-threaded event loop with chainable promises.
//!
//! # Overview
//!
//! Tempo is the asynchronous execution core of a small event-driven systems
//! library. Each OS thread owns at most one [`runtime::MessageLoop`]; within a
//! loop, work is expressed as chainable [`promise::Promise`] values that are
//! settled exactly once and whose continuations always run through an
//! [`executor::Executor`] rather than reentrantly. Deadlines are tracked by a
//! hierarchical [`time::TimerWheel`] that schedules, promotes, and fires
//! millions of pending timers in constant time per operation.
//!
//! # Core Guarantees
//!
//! - **At-most-once settlement**: a promise transitions at most once into its
//!   pre-settled phase and at most once into its terminal phase
//! - **Executor quarantine**: user continuations never run synchronously from
//!   `resolve`/`reject`; they are posted through the attached executor
//! - **Timer ordering**: all events scheduled for tick X fire before any event
//!   scheduled for tick X+1
//! - **Deterministic cancellation**: cancelling a promise purges its callback
//!   and any suspended coroutine frame; cancelling a wheel delivers the cancel
//!   error to every pending event
//! - **Single-threaded by construction**: promise state and timer state are
//!   confined to their loop's thread; only the dispatch path crosses threads
//!
//! # Module Structure
//!
//! - [`error`]: the tagged error value, categories, and event error codes
//! - [`outcome`]: the tri-state result carried by promises
//! - [`bind`]: strong- and weak-captured callable wrappers
//! - [`time`]: the hierarchical timer wheel
//! - [`executor`]: the "post a thunk" capability and queue executors
//! - [`promise`]: the promise state machine, combinators, and notifier
//! - [`co`]: the bridge lifting promises into `async`/`await` code
//! - [`runtime`]: the per-thread message loop, timers, and io threads
//! - [`test_utils`]: logging and assertion helpers shared by the test suite

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod bind;
pub mod co;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod promise;
pub mod runtime;
pub mod test_utils;
pub mod time;

pub use co::{spawn_co, spawn_co_on, spawn_notifier, spawn_notifier_on};
pub use error::{event_err, event_err_msg, Error, ErrorCategory, EventError};
pub use executor::{Executor, InlineExecutor, QueueExecutor, Task};
pub use outcome::Outcome;
pub use promise::{
    mk_all_promise, mk_any_promise, mk_attachment_promise, mk_promise, mk_race_promise,
    mk_rejected_notifier, mk_rejected_promise, mk_resolved_notifier, mk_resolved_promise,
    Attachment, Notifier, NotifierResolver, Promise, PromiseStatus, RejectFn, ResolveFn, Resolver,
};
pub use runtime::{IoThread, IoThreadPool, LoopHandle, LoopState, MessageLoop, Severity, TimerToken};
pub use time::{Tick, TimerEvent, TimerHandle, TimerWheel};
