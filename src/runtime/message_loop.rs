//! The per-thread message loop.
//!
//! Construction registers the loop in thread-local storage; a second loop on
//! the same thread is a programming error and panics. The run loop blocks on
//! the reactor between three recurring duties:
//!
//! - every heartbeat tick (1 ms) the timer wheel advances by the elapsed
//!   wall-clock milliseconds, clamped to at least one, anchoring wheel ticks
//!   to wall time even across reactor stalls;
//! - every task-sched tick (10 ms) the severity queues are drained
//!   urgent-first into a single batch which then runs to completion; tasks
//!   posted while the batch runs wait for the next tick;
//! - one-shot deadline timers (`run_at` / `run_after`) fire as their
//!   monotonic deadlines pass.
//!
//! Shutdown cancels pending deadline timers and the wheel with the
//! loop-shutdown error, stops the reactor wait, and drains the task queues
//! one last time.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use smallvec::SmallVec;
use tracing::{debug, info, trace};

use super::reactor::{Reactor, RemoteQueue};
use super::timer::{LoopTimerWheel, TimerToken};
use crate::error::{event_err, Error, EventError};
use crate::executor::{Executor, QueueExecutor, Task};

/// Wall-clock interval between timer wheel advances.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Interval between task queue drains.
pub const TASK_SCHED_INTERVAL: Duration = Duration::from_millis(10);

/// Task priority classes, drained in declaration order.
///
/// Lower severities may starve under sustained urgent load; urgent tasks are
/// expected to be rare and bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Drained first.
    Urgent,
    /// Drained after urgent.
    Critical,
    /// The default class.
    Normal,
}

/// Lifecycle states of a message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, not yet running.
    Init,
    /// Inside [`MessageLoop::run`].
    Running,
    /// Shut down; `run` returns promptly.
    Shutdown,
}

/// Error constructing a message loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The reactor could not be initialized.
    #[error("failed to initialize the reactor")]
    Reactor(#[from] std::io::Error),
}

thread_local! {
    static CURRENT: RefCell<Option<Weak<MessageLoop>>> = const { RefCell::new(None) };
}

type DeadlineHandler = Box<dyn FnOnce(Error) + 'static>;

/// The per-thread cooperative scheduler.
pub struct MessageLoop {
    state: Cell<LoopState>,
    thread: ThreadId,
    urgent: Rc<QueueExecutor>,
    critical: Rc<QueueExecutor>,
    normal: Rc<QueueExecutor>,
    reactor: Reactor,
    remote: Arc<RemoteQueue>,
    wheel: LoopTimerWheel,
    deadlines: RefCell<BTreeMap<(Instant, u64), DeadlineHandler>>,
    deadline_seq: Cell<u64>,
    wall_anchor: Cell<SystemTime>,
}

impl MessageLoop {
    /// Creates the loop for this thread and registers it as current.
    ///
    /// # Panics
    ///
    /// Panics if the thread already has a live message loop.
    pub fn new() -> Result<Rc<Self>, LoopError> {
        CURRENT.with(|current| {
            let occupied = current
                .borrow()
                .as_ref()
                .is_some_and(|weak| weak.strong_count() > 0);
            assert!(!occupied, "a message loop already exists on this thread");
        });

        let reactor = Reactor::new()?;
        let remote = Arc::new(RemoteQueue::new(reactor.poller()));
        let wall = SystemTime::now();
        let unix_ms = wall
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        let event_loop = Rc::new(Self {
            state: Cell::new(LoopState::Init),
            thread: thread::current().id(),
            urgent: Rc::new(QueueExecutor::new()),
            critical: Rc::new(QueueExecutor::new()),
            normal: Rc::new(QueueExecutor::new()),
            reactor,
            remote,
            wheel: LoopTimerWheel::new(unix_ms),
            deadlines: RefCell::new(BTreeMap::new()),
            deadline_seq: Cell::new(0),
            wall_anchor: Cell::new(wall),
        });

        CURRENT.with(|current| {
            *current.borrow_mut() = Some(Rc::downgrade(&event_loop));
        });
        info!("message loop registered");
        Ok(event_loop)
    }

    /// Returns this thread's loop, if one is alive.
    #[must_use]
    pub fn current() -> Option<Rc<Self>> {
        CURRENT.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
    }

    /// True when called on the thread that owns this loop.
    #[must_use]
    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// True while inside [`MessageLoop::run`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.get() == LoopState::Running
    }

    /// Returns a `Send + Clone` handle for cross-thread dispatch and
    /// shutdown.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            remote: self.remote.clone(),
            thread: self.thread,
        }
    }

    /// Enqueues a task onto one of the local severity queues.
    ///
    /// Not thread-safe; use [`LoopHandle::dispatch`] from other threads.
    pub fn post(&self, task: Task, severity: Severity) {
        match severity {
            Severity::Urgent => self.urgent.post(task),
            Severity::Critical => self.critical.post(task),
            Severity::Normal => self.normal.post(task),
        }
    }

    /// Returns the default (normal severity) executor.
    #[must_use]
    pub fn executor(&self) -> Rc<dyn Executor> {
        self.normal.clone()
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    /// The current monotonic time.
    #[must_use]
    pub fn mono_now(&self) -> Instant {
        Instant::now()
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn unix_now_ms(&self) -> i64 {
        self.wall_now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    /// Arms a one-shot timer firing at the monotonic instant `at`.
    ///
    /// The handler receives the empty error on fire and the loop-shutdown
    /// error if the loop shuts down first.
    pub fn run_at(&self, handler: impl FnOnce(Error) + 'static, at: Instant) {
        let seq = self.deadline_seq.get();
        self.deadline_seq.set(seq + 1);
        self.deadlines
            .borrow_mut()
            .insert((at, seq), Box::new(handler));
    }

    /// Arms a one-shot timer firing `delay` from now.
    pub fn run_after(&self, handler: impl FnOnce(Error) + 'static, delay: Duration) {
        self.run_at(handler, Instant::now() + delay);
    }

    /// Lodges a handler into the timer wheel, due `delay` from now (clamped
    /// to at least one millisecond). Returns a cancellable token.
    pub fn add_timer_event(
        &self,
        handler: impl FnOnce(Error) + 'static,
        delay: Duration,
    ) -> TimerToken {
        self.wheel.add_timer_event(handler, delay)
    }

    /// Lodges a handler into the timer wheel, due at the wall-clock time
    /// `ts`. Past timestamps are clamped to one millisecond from now.
    pub fn add_timer_event_at(
        &self,
        handler: impl FnOnce(Error) + 'static,
        ts: SystemTime,
    ) -> TimerToken {
        let delay = ts
            .duration_since(self.wall_now())
            .unwrap_or(Duration::ZERO);
        self.wheel.add_timer_event(handler, delay)
    }

    /// Runs the loop until shutdown. Blocks the calling thread.
    pub fn run(&self) {
        if self.state.get() != LoopState::Init {
            return;
        }
        self.state.set(LoopState::Running);
        debug!("message loop running");

        let mut next_heartbeat = Instant::now() + HEARTBEAT_INTERVAL;
        let mut next_task_sched = Instant::now() + TASK_SCHED_INTERVAL;

        while self.state.get() == LoopState::Running {
            let now = Instant::now();
            let mut wake_at = next_heartbeat.min(next_task_sched);
            if let Some((first, _)) = self.deadlines.borrow().keys().next() {
                wake_at = wake_at.min(*first);
            }
            self.reactor.wait(Some(wake_at.saturating_duration_since(now)));

            let drained = self.remote.drain();
            if drained > 0 {
                trace!(drained, "ran remote tasks");
            }
            if self.state.get() != LoopState::Running {
                break;
            }

            let now = Instant::now();
            if now >= next_heartbeat {
                self.on_heartbeat();
                next_heartbeat += HEARTBEAT_INTERVAL;
                if next_heartbeat <= now {
                    next_heartbeat = now + HEARTBEAT_INTERVAL;
                }
            }
            if now >= next_task_sched {
                self.run_tasks();
                next_task_sched += TASK_SCHED_INTERVAL;
                if next_task_sched <= now {
                    next_task_sched = now + TASK_SCHED_INTERVAL;
                }
            }
            self.fire_due_deadlines(now);
        }
        debug!("message loop exited");
    }

    /// Shuts the loop down. Must be called on the loop thread; use
    /// [`LoopHandle::shutdown`] from elsewhere.
    ///
    /// # Panics
    ///
    /// Panics when called from a foreign thread.
    pub fn shutdown(&self) {
        assert!(
            self.is_in_loop_thread(),
            "shutdown must run on the loop thread; use LoopHandle::shutdown"
        );
        if self.state.get() == LoopState::Shutdown {
            return;
        }
        info!("message loop shutting down");
        self.state.set(LoopState::Shutdown);

        let pending: Vec<DeadlineHandler> = {
            let mut deadlines = self.deadlines.borrow_mut();
            let drained = std::mem::take(&mut *deadlines);
            drained.into_values().collect()
        };
        for handler in pending {
            handler(event_err(EventError::LoopShutdown));
        }

        self.wheel.cancel(event_err(EventError::LoopShutdown));
        self.reactor.notify();
        self.run_tasks();
    }

    fn on_heartbeat(&self) {
        let wall = self.wall_now();
        let delta = wall
            .duration_since(self.wall_anchor.get())
            .unwrap_or(HEARTBEAT_INTERVAL)
            .max(HEARTBEAT_INTERVAL);
        self.wheel.advance(delta.as_millis() as u64);
        self.wall_anchor.set(wall);
    }

    // Collect everything once per tick, urgent first, then run the batch.
    fn run_tasks(&self) {
        let mut batch: SmallVec<[Task; 8]> = SmallVec::new();
        for queue in [&self.urgent, &self.critical, &self.normal] {
            batch.extend(queue.take_all());
        }
        if !batch.is_empty() {
            trace!(count = batch.len(), "running task batch");
        }
        for task in batch {
            task();
        }
    }

    fn fire_due_deadlines(&self, now: Instant) {
        loop {
            let due = {
                let mut deadlines = self.deadlines.borrow_mut();
                match deadlines.first_key_value() {
                    Some(((at, _), _)) if *at <= now => deadlines.pop_first(),
                    _ => None,
                }
            };
            match due {
                Some((_, handler)) => handler(Error::none()),
                None => break,
            }
        }
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        CURRENT.with(|current| {
            current.borrow_mut().take();
        });
        debug!("message loop unregistered");
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoop")
            .field("state", &self.state.get())
            .finish()
    }
}

/// A `Send + Clone` handle to a message loop.
///
/// Dispatch from the loop's own thread runs the task inline; dispatch from
/// any other thread enqueues onto the loop's remote queue and wakes its
/// reactor. Ordering is preserved per sending thread.
#[derive(Clone)]
pub struct LoopHandle {
    remote: Arc<RemoteQueue>,
    thread: ThreadId,
}

impl LoopHandle {
    /// Runs `task` on the loop: inline if already on its thread, otherwise
    /// through the thread-safe remote queue.
    pub fn dispatch(&self, task: impl FnOnce() + Send + 'static) {
        if thread::current().id() == self.thread {
            task();
        } else {
            self.remote.post(Box::new(task));
        }
    }

    /// Schedules a shutdown onto the loop. Thread-safe.
    pub fn shutdown(&self) {
        self.dispatch(|| {
            if let Some(event_loop) = MessageLoop::current() {
                event_loop.shutdown();
            }
        });
    }

    /// True when called on the loop's own thread.
    #[must_use]
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.thread)
            .finish()
    }
}
