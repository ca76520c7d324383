//! Chainable, cancel-aware promises.
//!
//! A [`Promise`] is a move-only handle to a reference-counted state machine.
//! Settling it (`resolve`/`reject`) records the outcome and moves the state
//! into a *pre-settled* phase; the attached continuation then runs through
//! the executor chosen at `then` time, which moves the state to its terminal
//! phase. Continuations may return a plain [`crate::Outcome`], another
//! promise (which is adopted so its settlement flows straight through), or
//! nothing (a terminal consumer).
//!
//! Chains are anchored from the tail: every state holds a strong reference
//! to its predecessor and a weak reference forward, so dropping intermediate
//! handles never breaks propagation and no reference cycles form.

mod combinators;
mod handle;
mod notifier;
pub(crate) mod state;
mod status;

pub use combinators::{
    mk_all_promise, mk_any_promise, mk_attachment_promise, mk_promise, mk_race_promise,
    mk_rejected_promise, mk_resolved_promise, Attachment, RejectFn, ResolveFn,
};
pub use handle::{Promise, Resolver};
pub use notifier::{mk_rejected_notifier, mk_resolved_notifier, Notifier, NotifierResolver};
pub use status::PromiseStatus;
