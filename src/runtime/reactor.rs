//! The blocking face of the loop: a thin pump over the `polling` reactor.
//!
//! The loop consumes exactly two reactor capabilities: a timed wait on the
//! loop thread and a thread-safe wakeup (`notify`) used by cross-thread
//! dispatch. I/O source registration is the business of higher layers.

use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use polling::{Events, Poller};
use tracing::warn;

/// A task posted from another thread.
pub(crate) type RemoteTask = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Reactor {
    poller: Arc<Poller>,
    events: RefCell<Events>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Arc::new(Poller::new()?),
            events: RefCell::new(Events::new()),
        })
    }

    pub(crate) fn poller(&self) -> Arc<Poller> {
        self.poller.clone()
    }

    /// Blocks the loop thread until `timeout` elapses or `notify` is called.
    pub(crate) fn wait(&self, timeout: Option<Duration>) {
        let mut events = self.events.borrow_mut();
        events.clear();
        if let Err(error) = self.poller.wait(&mut events, timeout) {
            if error.kind() != io::ErrorKind::Interrupted {
                warn!(%error, "reactor wait failed");
            }
        }
    }

    /// Wakes the loop thread; callable from any thread through the poller.
    pub(crate) fn notify(&self) {
        if let Err(error) = self.poller.notify() {
            warn!(%error, "reactor notify failed");
        }
    }
}

/// The cross-thread injection queue: lock-free push plus a reactor wakeup.
pub(crate) struct RemoteQueue {
    tasks: SegQueue<RemoteTask>,
    poller: Arc<Poller>,
}

impl RemoteQueue {
    pub(crate) fn new(poller: Arc<Poller>) -> Self {
        Self {
            tasks: SegQueue::new(),
            poller,
        }
    }

    /// Enqueues a task and wakes the owning loop. Thread-safe.
    pub(crate) fn post(&self, task: RemoteTask) {
        self.tasks.push(task);
        if let Err(error) = self.poller.notify() {
            warn!(%error, "remote post could not wake the loop");
        }
    }

    /// Runs every queued task on the calling (loop) thread.
    pub(crate) fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(task) = self.tasks.pop() {
            task();
            count += 1;
        }
        count
    }
}
