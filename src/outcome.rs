//! The tri-state result carried by promises.
//!
//! An [`Outcome`] is either empty (nothing stored yet), a value, or an
//! [`Error`]. Promise storage, continuation arguments, and continuation
//! returns all use this type; `Outcome<()>` plays the role of a plain
//! success-or-error result, carrying nothing but the error slot.

use crate::error::Error;

/// Sum over `{empty, value, error}`.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Nothing stored.
    Empty,
    /// A success value.
    Ok(T),
    /// A failure.
    Err(Error),
}

impl<T> Outcome<T> {
    /// Creates a success outcome.
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self::Ok(value)
    }

    /// Creates a failure outcome.
    #[must_use]
    pub fn err(error: Error) -> Self {
        Self::Err(error)
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true if a value is stored.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if an error is stored.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns a reference to the stored value, if any.
    #[must_use]
    pub const fn value_ref(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a reference to the stored error, if any.
    #[must_use]
    pub const fn error_ref(&self) -> Option<&Error> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Takes the stored value, leaving the outcome empty.
    ///
    /// # Panics
    ///
    /// Panics if no value is stored; misuse of a settled result is a
    /// programming error.
    #[must_use]
    pub fn take_value(&mut self) -> T {
        match std::mem::take(self) {
            Self::Ok(v) => v,
            other => {
                *self = other;
                panic!("take_value on an outcome without a value")
            }
        }
    }

    /// Takes the stored error, leaving the outcome empty.
    ///
    /// # Panics
    ///
    /// Panics if no error is stored.
    #[must_use]
    pub fn take_error(&mut self) -> Error {
        match std::mem::take(self) {
            Self::Err(e) => e,
            other => {
                *self = other;
                panic!("take_error on an outcome without an error")
            }
        }
    }

    /// Converts into `Option<T>`, discarding any error.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Converts into `Option<Error>`, discarding any value.
    #[must_use]
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Resets the outcome to empty.
    pub fn clear(&mut self) {
        *self = Self::Empty;
    }

    /// Maps the stored value, preserving empty and error states.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Empty => Outcome::Empty,
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
        }
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T> From<Error> for Outcome<T> {
    fn from(error: Error) -> Self {
        Self::Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::general_category;

    #[test]
    fn default_is_empty() {
        let o: Outcome<i32> = Outcome::default();
        assert!(o.is_empty());
        assert!(!o.is_ok());
        assert!(!o.is_err());
    }

    #[test]
    fn take_value_leaves_empty() {
        let mut o = Outcome::ok(42);
        assert!(o.is_ok());
        assert_eq!(o.take_value(), 42);
        assert!(o.is_empty());
    }

    #[test]
    fn take_error_leaves_empty() {
        let mut o: Outcome<i32> = Outcome::err(Error::new(general_category("t"), 5));
        assert!(o.is_err());
        let e = o.take_error();
        assert_eq!(e.code(), 5);
        assert!(o.is_empty());
    }

    #[test]
    #[should_panic(expected = "take_value")]
    fn take_value_on_error_panics() {
        let mut o: Outcome<i32> = Outcome::err(Error::syscall(1));
        let _ = o.take_value();
    }

    #[test]
    fn map_preserves_error() {
        let o: Outcome<i32> = Outcome::err(Error::syscall(9));
        let mapped = o.map(|v| v.to_string());
        assert_eq!(mapped.error_ref().unwrap().code(), 9);
    }

    #[test]
    fn from_error_builds_err() {
        let o: Outcome<bool> = Error::syscall(3).into();
        assert!(o.is_err());
    }
}
