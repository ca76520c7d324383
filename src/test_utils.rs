//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A step-by-step executor for observing the pre-settled phase
//! - A recording timer event probe
//!
//! # Example
//! ```
//! use tempo::test_utils::init_test_logging;
//!
//! fn my_test() {
//!     init_test_logging();
//!     // test code
//! }
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Once;

use crate::error::Error;
use crate::executor::QueueExecutor;
use crate::time::TimerEvent;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A queue executor drained explicitly by the test, one task or all at once.
///
/// Promises attached through a step executor stay observably pre-settled
/// until the test calls `run_one`/`run_all`.
pub type StepExecutor = QueueExecutor;

/// Creates a shared step executor.
#[must_use]
pub fn step_executor() -> Rc<StepExecutor> {
    Rc::new(StepExecutor::new())
}

/// A timer event that counts which hooks ran.
#[derive(Default)]
pub struct RecordingEvent {
    fired: Rc<Cell<usize>>,
    cancelled: Rc<Cell<usize>>,
    aborted: Rc<Cell<usize>>,
    last_error: Rc<Cell<i32>>,
}

impl RecordingEvent {
    /// Creates a probe and hands back its counters.
    #[must_use]
    pub fn new() -> (Box<dyn TimerEvent>, RecordingCounters) {
        let probe = Self::default();
        let counters = RecordingCounters {
            fired: probe.fired.clone(),
            cancelled: probe.cancelled.clone(),
            aborted: probe.aborted.clone(),
            last_error: probe.last_error.clone(),
        };
        (Box::new(probe), counters)
    }
}

impl TimerEvent for RecordingEvent {
    fn fire(&mut self) {
        self.fired.set(self.fired.get() + 1);
    }

    fn on_cancel(&mut self, error: Error) {
        self.cancelled.set(self.cancelled.get() + 1);
        self.last_error.set(error.code());
    }

    fn on_abort(&mut self) {
        self.aborted.set(self.aborted.get() + 1);
    }
}

/// Counter handles produced by [`RecordingEvent::new`].
#[derive(Clone)]
pub struct RecordingCounters {
    fired: Rc<Cell<usize>>,
    cancelled: Rc<Cell<usize>>,
    aborted: Rc<Cell<usize>>,
    last_error: Rc<Cell<i32>>,
}

impl RecordingCounters {
    /// How many times the event fired.
    #[must_use]
    pub fn fired(&self) -> usize {
        self.fired.get()
    }

    /// How many times the event saw a wheel-wide cancel.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.get()
    }

    /// How many times the event saw a wheel-wide abort.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.aborted.get()
    }

    /// The code of the last cancel error delivered.
    #[must_use]
    pub fn last_error_code(&self) -> i32 {
        self.last_error.get()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
