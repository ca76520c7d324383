//! OS threads owning one message loop each.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;

use super::message_loop::{LoopHandle, MessageLoop};

/// An OS thread running a dedicated message loop.
///
/// [`IoThread::run`] spawns the thread, constructs the loop on it, and
/// returns once the loop is registered, so the handle is immediately usable
/// for dispatch. [`IoThread::shutdown`] is thread-safe.
pub struct IoThread {
    thread: Option<JoinHandle<()>>,
    handle: Arc<Mutex<Option<LoopHandle>>>,
    running: Arc<AtomicBool>,
}

impl IoThread {
    /// Creates an unstarted io thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            thread: None,
            handle: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the thread and blocks until its loop is ready for dispatch.
    ///
    /// # Panics
    ///
    /// Panics if already started, or if the loop cannot be constructed.
    pub fn run(&mut self) {
        assert!(self.thread.is_none(), "io thread already started");

        let (ready_tx, ready_rx) = mpsc::channel();
        let slot = self.handle.clone();
        let running = self.running.clone();

        self.thread = Some(std::thread::spawn(move || {
            let event_loop = MessageLoop::new().expect("failed to construct the io thread loop");
            *slot.lock() = Some(event_loop.handle());
            running.store(true, Ordering::Release);
            ready_tx.send(()).ok();

            event_loop.run();

            running.store(false, Ordering::Release);
            *slot.lock() = None;
            debug!("io thread loop finished");
        }));

        ready_rx.recv().expect("io thread failed to start");
    }

    /// Schedules a shutdown onto the owned loop. Thread-safe; a no-op when
    /// the loop is not running.
    pub fn shutdown(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        if let Some(handle) = self.handle.lock().clone() {
            handle.shutdown();
        }
    }

    /// Blocks until the thread exits.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.join().expect("io thread panicked");
        }
    }

    /// True while the owned loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Returns a dispatch handle to the owned loop, if it is up.
    #[must_use]
    pub fn handle(&self) -> Option<LoopHandle> {
        self.handle.lock().clone()
    }
}

impl Default for IoThread {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThread")
            .field("running", &self.is_running())
            .finish()
    }
}

/// A fixed-size pool of [`IoThread`]s.
pub struct IoThreadPool {
    threads: Vec<IoThread>,
}

impl IoThreadPool {
    /// Creates a pool of `size` unstarted threads.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            threads: (0..size).map(|_| IoThread::new()).collect(),
        }
    }

    /// Starts every thread in the pool.
    pub fn run(&mut self) {
        for thread in &mut self.threads {
            thread.run();
        }
    }

    /// Dispatches `task` onto every loop in the pool. Thread-safe.
    pub fn iterate(&self, task: impl Fn() + Send + Sync + 'static) {
        let task = Arc::new(task);
        for thread in &self.threads {
            if let Some(handle) = thread.handle() {
                let task = task.clone();
                handle.dispatch(move || task());
            }
        }
    }

    /// Schedules a shutdown on every loop. Thread-safe.
    pub fn shutdown(&self) {
        for thread in &self.threads {
            thread.shutdown();
        }
    }

    /// Blocks until every thread has exited.
    pub fn join_all(&mut self) {
        for thread in &mut self.threads {
            thread.join();
        }
    }

    /// Returns the thread at `index`, if any.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&IoThread> {
        self.threads.get(index)
    }

    /// The number of threads in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// True for a zero-sized pool.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl std::fmt::Debug for IoThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThreadPool")
            .field("size", &self.threads.len())
            .finish()
    }
}
