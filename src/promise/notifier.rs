//! A promise specialization carrying only success-or-error.

use std::rc::Rc;

use super::handle::{Promise, Resolver};
use super::state::StateRc;
use super::status::PromiseStatus;
use crate::error::Error;
use crate::executor::Executor;
use crate::outcome::Outcome;

/// A promise whose value is unit: it fires with possibly-an-error.
///
/// The continuation signature is `(Error)`, with the empty error standing
/// for success. A notifier is a unary chain end; it exposes no further
/// chaining.
pub struct Notifier {
    inner: Promise<()>,
}

impl Notifier {
    /// Creates an unfired notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Promise::new(),
        }
    }

    pub(crate) fn from_state(state: StateRc<()>) -> Self {
        Self {
            inner: Promise::from_state(state),
        }
    }

    pub(crate) fn inner(&self) -> &Promise<()> {
        &self.inner
    }

    /// Fires the notifier successfully.
    pub fn resolve(&self) -> bool {
        self.inner.resolve(())
    }

    /// Fires the notifier with an error.
    pub fn reject(&self, error: Error) -> bool {
        self.inner.reject(error)
    }

    /// Cancels the notifier.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns a weak handle able to fire this notifier.
    #[must_use]
    pub fn resolver(&self) -> NotifierResolver {
        NotifierResolver {
            inner: self.inner.resolver(),
        }
    }

    /// Attaches the terminal continuation, invoked with the empty error on
    /// success.
    pub fn then_done(&self, f: impl FnOnce(Error) + 'static, executor: Option<Rc<dyn Executor>>) {
        self.inner.then_done(
            move |outcome: Outcome<()>| match outcome {
                Outcome::Err(error) => f(error),
                _ => f(Error::none()),
            },
            executor,
        );
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> PromiseStatus {
        self.inner.status()
    }

    /// True if not fired yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True if fired but the continuation has not run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }

    /// True once the continuation has run.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    /// True if the outcome has been recorded.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Takes the stored outcome of a fired notifier.
    #[must_use]
    pub fn take_result(&self) -> Option<Outcome<()>> {
        self.inner.take_result()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("status", &self.status())
            .finish()
    }
}

/// A weak handle that can fire a notifier without keeping it alive.
#[derive(Clone, Debug, Default)]
pub struct NotifierResolver {
    inner: Resolver<()>,
}

impl NotifierResolver {
    /// Fires the notifier successfully, if it is still alive and unfired.
    pub fn resolve(&self) -> bool {
        self.inner.resolve(())
    }

    /// Fires the notifier with an error, if it is still alive and unfired.
    pub fn reject(&self, error: Error) -> bool {
        self.inner.reject(error)
    }

    /// Cancels the notifier, if still alive.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// True once the underlying state has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.is_expired()
    }

    /// Whether the continuation has run; `None` if the state is gone.
    #[must_use]
    pub fn is_done(&self) -> Option<bool> {
        self.inner.is_done()
    }

    /// Whether the notifier is unfired; `None` if the state is gone.
    #[must_use]
    pub fn is_empty(&self) -> Option<bool> {
        self.inner.is_empty()
    }

    /// Whether the outcome has been recorded; `None` if the state is gone.
    #[must_use]
    pub fn is_settled(&self) -> Option<bool> {
        self.inner.is_settled()
    }
}

/// Creates a notifier already fired successfully.
#[must_use]
pub fn mk_resolved_notifier() -> Notifier {
    let n = Notifier::new();
    let fired = n.resolve();
    debug_assert!(fired);
    n
}

/// Creates a notifier already fired with `error`.
#[must_use]
pub fn mk_rejected_notifier(error: Error) -> Notifier {
    let n = Notifier::new();
    let fired = n.reject(error);
    debug_assert!(fired);
    n
}
