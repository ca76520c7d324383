//! The tagged error value carried through promises and timers.
//!
//! An [`Error`] is a `(category, code, optional message)` triple. Categories
//! are interned singletons compared by pointer identity: two predefined ones
//! ("syscall" for OS errno values and "boost" for reactor-origin codes), a
//! by-name registry for application categories, and the crate-internal
//! "event" category carrying the well-known [`EventError`] codes.
//!
//! The default presentation of an error is
//! `category.describe(code) + ": " + message`; exit codes, log formats, and
//! retries belong to application code.

use core::fmt;
use std::collections::HashMap;

use parking_lot::Mutex;

/// A classification domain for error codes.
///
/// Categories give meaning to the integer code stored in an [`Error`]. They
/// are registered once and live for the process lifetime; identity is pointer
/// identity, so two errors belong to the same category iff their category
/// references point at the same instance.
pub trait ErrorCategory: Send + Sync {
    /// Returns the category name, e.g. `"syscall"`.
    fn name(&self) -> &str;

    /// Renders a human-readable description of `code` within this category.
    fn describe(&self, code: i32) -> String;
}

struct SyscallCategory;

impl ErrorCategory for SyscallCategory {
    fn name(&self) -> &str {
        "syscall"
    }

    fn describe(&self, code: i32) -> String {
        format!("syscall[error] errno: {code}")
    }
}

struct BoostCategory;

impl ErrorCategory for BoostCategory {
    fn name(&self) -> &str {
        "boost"
    }

    fn describe(&self, code: i32) -> String {
        format!("boost[error] ec: {code}")
    }
}

struct GeneralCategory {
    name: String,
}

impl ErrorCategory for GeneralCategory {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self, code: i32) -> String {
        format!("{}[error] ec: {}", self.name, code)
    }
}

static SYSCALL_CATEGORY: SyscallCategory = SyscallCategory;
static BOOST_CATEGORY: BoostCategory = BoostCategory;

/// Returns the predefined "syscall" category.
#[must_use]
pub fn syscall_category() -> &'static dyn ErrorCategory {
    &SYSCALL_CATEGORY
}

/// Returns the predefined "boost" category used for reactor-origin codes.
#[must_use]
pub fn boost_category() -> &'static dyn ErrorCategory {
    &BOOST_CATEGORY
}

/// Returns the interned general category registered under `name`.
///
/// The first call for a given name creates and leaks the category; later
/// calls return the same instance, so pointer identity holds across the
/// process.
#[must_use]
pub fn general_category(name: &str) -> &'static dyn ErrorCategory {
    static REGISTRY: Mutex<Option<HashMap<String, &'static GeneralCategory>>> = Mutex::new(None);

    let mut guard = REGISTRY.lock();
    let registry = guard.get_or_insert_with(HashMap::new);
    if let Some(cat) = registry.get(name) {
        return *cat;
    }
    let cat: &'static GeneralCategory = Box::leak(Box::new(GeneralCategory {
        name: name.to_owned(),
    }));
    registry.insert(name.to_owned(), cat);
    cat
}

/// A tagged error: category pointer, integer code, optional message.
///
/// The empty error (`Error::none()`) carries no category and converts to
/// `false`-like via [`Error::is_set`]; notifiers deliver it on success.
#[derive(Clone)]
pub struct Error {
    code: i32,
    category: Option<&'static dyn ErrorCategory>,
    message: Option<String>,
}

impl Error {
    /// The code stored by the empty error.
    pub const NO_ERROR_CODE: i32 = 0;

    /// Creates the empty error.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            code: Self::NO_ERROR_CODE,
            category: None,
            message: None,
        }
    }

    /// Creates an error in `category` with the given code.
    #[must_use]
    pub fn new(category: &'static dyn ErrorCategory, code: i32) -> Self {
        Self {
            code,
            category: Some(category),
            message: None,
        }
    }

    /// Creates an error in `category` with a code and message.
    #[must_use]
    pub fn with_message(
        category: &'static dyn ErrorCategory,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            category: Some(category),
            message: Some(message.into()),
        }
    }

    /// Creates a "syscall" error from an OS errno value.
    #[must_use]
    pub fn syscall(errno: i32) -> Self {
        Self::new(syscall_category(), errno)
    }

    /// Creates a "boost" error from a reactor error code.
    ///
    /// Code `0` means success and yields the empty error.
    #[must_use]
    pub fn boost(code: i32, message: impl Into<String>) -> Self {
        if code == 0 {
            return Self::none();
        }
        Self::with_message(boost_category(), code, message)
    }

    /// Creates an error in the general category registered under `category`.
    #[must_use]
    pub fn general(code: i32, message: impl Into<String>, category: &str) -> Self {
        Self::with_message(general_category(category), code, message)
    }

    /// Returns true if this error carries a category (i.e. is non-empty).
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.category.is_some()
    }

    /// Returns true if this error belongs to the "syscall" category.
    #[must_use]
    pub fn is_syscall(&self) -> bool {
        self.category
            .is_some_and(|c| std::ptr::addr_eq(c, syscall_category()))
    }

    /// Returns true if this error belongs to the "boost" category.
    #[must_use]
    pub fn is_boost(&self) -> bool {
        self.category
            .is_some_and(|c| std::ptr::addr_eq(c, boost_category()))
    }

    /// Returns the integer code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Returns the category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&'static dyn ErrorCategory> {
        self.category
    }

    /// Renders the category's description of the code.
    ///
    /// # Panics
    ///
    /// Panics when called on the empty error; check [`Error::is_set`] first.
    #[must_use]
    pub fn information(&self) -> String {
        self.category
            .expect("information() requires a categorized error")
            .describe(self.code)
    }

    /// Returns true if a message is attached.
    #[must_use]
    pub const fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// Returns the attached message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Takes the attached message out of the error.
    #[must_use]
    pub fn take_message(&mut self) -> Option<String> {
        self.message.take()
    }

    /// Renders `"{information}: {message_or_empty}"`.
    #[must_use]
    pub fn details(&self) -> String {
        format!("{}: {}", self.information(), self.message().unwrap_or(""))
    }

    /// Resets this error to the empty state.
    pub fn clear(&mut self) {
        self.code = Self::NO_ERROR_CODE;
        self.category = None;
        self.message = None;
    }
}

impl Default for Error {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}", self.details())
        } else {
            write!(f, "(no error)")
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("category", &self.category.map(ErrorCategory::name))
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for Error {}

/// Well-known error codes raised by the event core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventError {
    /// No input promise resolved (or no input at all) in an any-combinator.
    PromiseAny,
    /// No input promise was given to a race combinator.
    PromiseRace,
    /// The message loop shut down while work was pending.
    LoopShutdown,
    /// Reserved for unsupported event kinds.
    UnsupportedEvent,
    /// An exception escaped a coroutine body.
    CoroutineException,
}

impl EventError {
    const fn text(self) -> &'static str {
        match self {
            Self::PromiseAny => "promise any operation failed",
            Self::PromiseRace => "promise race operation failed",
            Self::LoopShutdown => "eventloop shutdown",
            Self::UnsupportedEvent => "event unsupported",
            Self::CoroutineException => "coroutine exception",
        }
    }

    const fn code(self) -> i32 {
        match self {
            Self::PromiseAny => 0,
            Self::PromiseRace => 1,
            Self::LoopShutdown => 2,
            Self::UnsupportedEvent => 3,
            Self::CoroutineException => 4,
        }
    }
}

struct EventCategory;

impl ErrorCategory for EventCategory {
    fn name(&self) -> &str {
        "event"
    }

    fn describe(&self, code: i32) -> String {
        let text = match code {
            0 => EventError::PromiseAny.text(),
            1 => EventError::PromiseRace.text(),
            2 => EventError::LoopShutdown.text(),
            3 => EventError::UnsupportedEvent.text(),
            4 => EventError::CoroutineException.text(),
            _ => "none",
        };
        format!("event[{text}]")
    }
}

static EVENT_CATEGORY: EventCategory = EventCategory;

/// Returns the crate-internal "event" category.
#[must_use]
pub fn event_category() -> &'static dyn ErrorCategory {
    &EVENT_CATEGORY
}

/// Creates an error for a well-known event condition.
#[must_use]
pub fn event_err(kind: EventError) -> Error {
    Error::new(event_category(), kind.code())
}

/// Creates an error for a well-known event condition with a message.
#[must_use]
pub fn event_err_msg(kind: EventError, message: impl Into<String>) -> Error {
    Error::with_message(event_category(), kind.code(), message)
}
