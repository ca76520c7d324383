//! The per-thread cooperative scheduler.
//!
//! A [`MessageLoop`] owns three severity-ordered task queues, a reactor
//! handle, a timer wheel anchored to wall time, and the internal heartbeat
//! and task-sched timers that drive them. Strictly one loop exists per OS
//! thread; [`MessageLoop::current`] retrieves it. Cross-thread work enters
//! through a [`LoopHandle`].

pub mod io_thread;
pub mod message_loop;
pub(crate) mod reactor;
pub mod timer;

pub use io_thread::{IoThread, IoThreadPool};
pub use message_loop::{LoopError, LoopHandle, LoopState, MessageLoop, Severity};
pub use timer::{CancelHandle, TimerToken};
