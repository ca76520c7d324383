//! Strong- and weak-captured callable wrappers.
//!
//! A callback posted to an executor often belongs to some longer-lived object
//! (a promise state, a connection, a timer owner). These wrappers pair a
//! closure with a handle to that object:
//!
//! - a [`StrongFn`] keeps the object alive until the closure has run;
//! - a [`WeakFn`] silently becomes a no-op once the object is gone, returning
//!   `Default::default()` for non-unit results.
//!
//! The promise trampoline uses [`weak_task`] so that a posted continuation
//! dies together with the state that scheduled it.

use std::rc::{Rc, Weak};

/// Wraps `f` so that it runs with a strong handle to `target`.
///
/// The returned thunk owns `target`; the object cannot be dropped before the
/// thunk has run or been discarded.
pub fn strong_task<O: ?Sized + 'static>(
    target: Rc<O>,
    f: impl FnOnce(Rc<O>) + 'static,
) -> impl FnOnce() {
    move || f(target)
}

/// Wraps `f` so that it runs only while `target` is still alive.
///
/// If every strong handle to the object has been dropped by the time the
/// thunk runs, the thunk does nothing.
pub fn weak_task<O: ?Sized + 'static>(
    target: Weak<O>,
    f: impl FnOnce(Rc<O>) + 'static,
) -> impl FnOnce() {
    move || {
        if let Some(strong) = target.upgrade() {
            f(strong);
        }
    }
}

/// A closure bound to a strong object handle.
pub struct StrongFn<O: ?Sized, F> {
    holder: Rc<O>,
    f: F,
}

impl<O: ?Sized, F> StrongFn<O, F> {
    /// Binds `f` to a strong handle.
    pub fn new(holder: Rc<O>, f: F) -> Self {
        Self { holder, f }
    }

    /// Always false: the bound object is owned and cannot expire.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        false
    }

    /// Invokes the closure with the bound object.
    pub fn call<A, R>(&mut self, arg: A) -> R
    where
        F: FnMut(&O, A) -> R,
    {
        (self.f)(&self.holder, arg)
    }
}

/// A closure bound to a weak object handle.
///
/// Once the object expires the closure is never invoked again; calls return
/// `Default::default()`.
pub struct WeakFn<O: ?Sized, F> {
    target: Weak<O>,
    f: F,
}

impl<O: ?Sized, F> WeakFn<O, F> {
    /// Binds `f` to a weak handle.
    pub fn new(target: Weak<O>, f: F) -> Self {
        Self { target, f }
    }

    /// Returns true once the bound object has been dropped.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.target.strong_count() == 0
    }

    /// Invokes the closure if the object is still alive.
    ///
    /// Returns `Default::default()` when the object has expired.
    pub fn call<A, R>(&mut self, arg: A) -> R
    where
        F: FnMut(&O, A) -> R,
        R: Default,
    {
        match self.target.upgrade() {
            Some(strong) => (self.f)(&strong, arg),
            None => R::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn weak_task_runs_while_alive() {
        let flag = Rc::new(Cell::new(false));
        let task = weak_task(Rc::downgrade(&flag), |f| f.set(true));
        task();
        assert!(flag.get());
    }

    #[test]
    fn weak_task_is_silent_after_drop() {
        let flag = Rc::new(Cell::new(0u32));
        let observer = Rc::new(());
        let seen = flag.clone();
        let task = weak_task(Rc::downgrade(&observer), move |_| {
            seen.set(seen.get() + 1);
        });
        drop(observer);
        task();
        assert_eq!(flag.get(), 0);
    }

    #[test]
    fn strong_task_keeps_target_alive() {
        let target = Rc::new(Cell::new(7));
        let weak = Rc::downgrade(&target);
        let task = strong_task(target, |t| t.set(8));
        // Only the task holds the object now.
        assert_eq!(weak.strong_count(), 1);
        task();
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn weak_fn_returns_default_when_expired() {
        let target = Rc::new(5i32);
        let mut bound = WeakFn::new(Rc::downgrade(&target), |t: &i32, add: i32| t + add);
        assert_eq!(bound.call(3), 8);
        assert!(!bound.is_silent());

        drop(target);
        assert!(bound.is_silent());
        assert_eq!(bound.call(3), 0);
    }

    #[test]
    fn strong_fn_never_silent() {
        let target = Rc::new(Cell::new(1));
        let mut bound = StrongFn::new(target.clone(), |t: &Cell<i32>, add: i32| {
            t.set(t.get() + add);
            t.get()
        });
        assert!(!bound.is_silent());
        assert_eq!(bound.call(2), 3);
    }
}
