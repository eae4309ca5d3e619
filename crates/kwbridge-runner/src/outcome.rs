//! Phase outcomes: failures, skips and expected failures.
//!
//! Test code signals an outcome either by returning a [`TestError`] or by
//! calling [`skip`], [`xfail`] or [`fail`], which unwind with a
//! [`TestError`] payload. The runner catches both at the phase boundary, and
//! an ordinary panic (for example a failed `assert!`) becomes a failure with
//! the panic message.

use std::any::Any;
use std::panic;

use thiserror::Error;

/// A failed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure message.
    pub message: String,
    /// `true` when the message was already shown where it happened, for
    /// example inside a nested keyword, and must not be logged again.
    pub reported: bool,
}

/// Non-passing result of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    /// The phase failed.
    #[error("{}", .0.message)]
    Failed(Failure),
    /// The phase asked to skip the test.
    #[error("Skipped: {reason}")]
    Skipped {
        /// Skip reason.
        reason: String,
    },
    /// The test failed in a way it was expected to.
    #[error("XFailed: {reason}")]
    XFailed {
        /// Expected-failure reason; may be empty.
        reason: String,
    },
}

impl TestError {
    /// A failure that has not been logged yet.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(Failure {
            message: message.into(),
            reported: false,
        })
    }

    /// A failure whose message is already in the log.
    #[must_use]
    pub fn already_reported(message: impl Into<String>) -> Self {
        Self::Failed(Failure {
            message: message.into(),
            reported: true,
        })
    }

    /// A skip with `reason`.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// An expected failure with `reason`.
    #[must_use]
    pub fn xfailed(reason: impl Into<String>) -> Self {
        Self::XFailed {
            reason: reason.into(),
        }
    }

    /// Recover the outcome carried by a panic payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_runner::TestError;
    ///
    /// let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
    /// assert_eq!(TestError::from_panic(payload), TestError::failed("boom"));
    /// ```
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        payload
            .downcast::<Self>()
            .map_or_else(|payload| Self::failed(panic_message(&*payload)), |error| *error)
    }
}

/// Stop the running phase and skip the test.
///
/// # Panics
/// Always unwinds; the runner turns the unwind into a skip.
pub fn skip(reason: impl Into<String>) -> ! {
    panic::resume_unwind(Box::new(TestError::skipped(reason)))
}

/// Stop the running phase and record an expected failure.
///
/// # Panics
/// Always unwinds; the runner turns the unwind into an expected failure.
pub fn xfail(reason: impl Into<String>) -> ! {
    panic::resume_unwind(Box::new(TestError::xfailed(reason)))
}

/// Stop the running phase and fail the test.
///
/// # Panics
/// Always unwinds; the runner turns the unwind into a failure.
pub fn fail(message: impl Into<String>) -> ! {
    panic::resume_unwind(Box::new(TestError::failed(message)))
}

/// Format a panic payload into a readable message.
///
/// String payloads are extracted directly; anything else is reported by type.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .or_else(|| payload.downcast_ref::<TestError>().map(ToString::to_string))
        .unwrap_or_else(|| "test panicked with a non-string payload".to_string())
}
