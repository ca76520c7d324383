//! The loop-facing timer wheel surface: handler events and cancel tokens.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::error::Error;
use crate::time::{Tick, TimerEvent, TimerHandle, TimerWheel};

/// Delays shorter than this are clamped up before entering the wheel.
pub const MIN_TIMER_DELAY: Duration = Duration::from_millis(1);

// A one-shot handler event. The callback is consumed by whichever hook runs
// first; an abort discards it silently.
struct CallbackEvent {
    callback: Option<Box<dyn FnOnce(Error) + 'static>>,
    fired: Rc<Cell<bool>>,
}

impl TimerEvent for CallbackEvent {
    fn fire(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.fired.set(true);
            callback(Error::none());
        }
    }

    fn on_cancel(&mut self, error: Error) {
        if let Some(callback) = self.callback.take() {
            self.fired.set(true);
            callback(error);
        }
    }

    fn on_abort(&mut self) {
        self.callback = None;
    }
}

/// The wheel as owned by a message loop, anchored at a Unix-millisecond
/// tick so wall-clock deadlines convert directly.
pub(crate) struct LoopTimerWheel {
    wheel: Rc<TimerWheel>,
}

impl LoopTimerWheel {
    pub(crate) fn new(now_unix_ms: u64) -> Self {
        Self {
            wheel: Rc::new(TimerWheel::new(now_unix_ms)),
        }
    }

    pub(crate) fn add_timer_event(
        &self,
        handler: impl FnOnce(Error) + 'static,
        delay: Duration,
    ) -> TimerToken {
        let delay = delay.max(MIN_TIMER_DELAY);
        let fired = Rc::new(Cell::new(false));
        let event = CallbackEvent {
            callback: Some(Box::new(handler)),
            fired: fired.clone(),
        };
        let handle = self.wheel.schedule(Box::new(event), delay.as_millis() as Tick);
        TimerToken {
            handle: Some(handle),
            wheel: Rc::downgrade(&self.wheel),
            fired,
        }
    }

    pub(crate) fn advance(&self, ticks: Tick) {
        if ticks > 0 {
            self.wheel.advance(ticks);
        }
    }

    pub(crate) fn cancel(&self, error: Error) {
        self.wheel.cancel(error);
    }

    #[allow(dead_code)]
    pub(crate) fn abort(&self) {
        self.wheel.abort();
    }
}

/// Owns a scheduled wheel event on behalf of the application.
///
/// Dropping the token does not cancel the timer; call [`TimerToken::cancel`]
/// or hand the token to [`TimerToken::into_cancelable`] for shared
/// ownership of the cancel capability.
pub struct TimerToken {
    handle: Option<TimerHandle>,
    wheel: Weak<TimerWheel>,
    fired: Rc<Cell<bool>>,
}

impl TimerToken {
    /// Creates a token owning nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handle: None,
            wheel: Weak::new(),
            fired: Rc::new(Cell::new(false)),
        }
    }

    /// Cancels the underlying event without running its handler, and empties
    /// the token.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Some(wheel) = self.wheel.upgrade() {
                wheel.cancel_event(handle);
            }
        }
    }

    /// True if the token no longer owns an event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// True once the handler has been consumed by a fire or a wheel-wide
    /// cancel.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.get()
    }

    /// Converts the token into a shared, clonable cancel-only handle.
    #[must_use]
    pub fn into_cancelable(self) -> CancelHandle {
        CancelHandle {
            inner: Rc::new(std::cell::RefCell::new(self)),
        }
    }
}

impl Default for TimerToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for TimerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerToken")
            .field("empty", &self.is_empty())
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// A shared cancel-only view of a [`TimerToken`], cheap to capture in
/// closures.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Rc<std::cell::RefCell<TimerToken>>,
}

impl CancelHandle {
    /// Cancels the underlying event, if any.
    pub fn cancel(&self) {
        self.inner.borrow_mut().cancel();
    }

    /// True once the handler has been consumed.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.inner.borrow().is_fired()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish()
    }
}
