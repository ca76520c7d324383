//! The "post this thunk to run later" capability.
//!
//! An [`Executor`] is the only way user continuations ever run: promise
//! settlement posts a trampoline through the executor attached at `then`
//! time, which is what keeps callback invocation out of the `resolve` /
//! `reject` call stack. Executors are shared within one loop's thread as
//! `Rc<dyn Executor>`; they are not thread-safe by design.

use std::cell::RefCell;
use std::collections::VecDeque;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// The execution environment for callbacks.
pub trait Executor {
    /// Queues `task` to run at an appropriate later time.
    fn post(&self, task: Task);
}

/// An executor that runs every posted task in place.
///
/// Useful for pass-through propagation where the posting side has already
/// gone through a real executor; attaching this (or no executor at all) to a
/// promise continuation forfeits the executor-quarantine guarantee.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn post(&self, task: Task) {
        task();
    }
}

/// A FIFO queue executor drained explicitly by its owner.
///
/// This is the building block for the message loop's severity queues and the
/// step-by-step executor used in tests to observe the pre-settled phase.
#[derive(Default)]
pub struct QueueExecutor {
    queue: RefCell<VecDeque<Task>>,
    executed: std::cell::Cell<usize>,
}

impl QueueExecutor {
    /// Creates an empty queue executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Returns how many tasks have been executed so far.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed.get()
    }

    /// Runs the oldest queued task, if any.
    ///
    /// Returns true if a task ran.
    pub fn run_one(&self) -> bool {
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                self.executed.set(self.executed.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks until the queue is empty.
    ///
    /// Tasks posted while draining are run in the same call.
    pub fn run_all(&self) {
        while self.run_one() {}
    }

    /// Removes all queued tasks without running them.
    pub fn take_all(&self) -> Vec<Task> {
        self.queue.borrow_mut().drain(..).collect()
    }
}

impl Executor for QueueExecutor {
    fn post(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }
}

impl std::fmt::Debug for QueueExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueExecutor")
            .field("queued", &self.len())
            .field("executed", &self.executed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn inline_executor_runs_in_place() {
        let hit = Rc::new(Cell::new(false));
        let seen = hit.clone();
        InlineExecutor.post(Box::new(move || seen.set(true)));
        assert!(hit.get());
    }

    #[test]
    fn queue_executor_defers_until_drained() {
        let exec = QueueExecutor::new();
        let hits = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let seen = hits.clone();
            exec.post(Box::new(move || seen.set(seen.get() + 1)));
        }
        assert_eq!(exec.len(), 3);
        assert_eq!(hits.get(), 0);

        assert!(exec.run_one());
        assert_eq!(hits.get(), 1);

        exec.run_all();
        assert_eq!(hits.get(), 3);
        assert_eq!(exec.executed(), 3);
        assert!(exec.is_empty());
    }

    #[test]
    fn run_all_includes_tasks_posted_while_draining() {
        let exec = Rc::new(QueueExecutor::new());
        let hits = Rc::new(Cell::new(0));

        let seen = hits.clone();
        let inner_exec = exec.clone();
        exec.post(Box::new(move || {
            seen.set(seen.get() + 1);
            let seen2 = seen.clone();
            inner_exec.post(Box::new(move || seen2.set(seen2.get() + 1)));
        }));

        exec.run_all();
        assert_eq!(hits.get(), 2);
    }
}
