//! Failure and skip signals raised by keywords.

use thiserror::Error;

/// Whether a keyword failed or asked to skip the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The keyword failed.
    Fail,
    /// The keyword requested a skip.
    Skip,
}

/// Error raised by a keyword implementation.
///
/// The engine logs the message of an error the first time it leaves a
/// keyword and then marks it as reported, so enclosing keywords propagate the
/// status without logging the same message again. Code that surfaces a
/// failure it knows was already logged elsewhere can build the error with
/// [`KeywordError::reported`] to get the same effect.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::KeywordError;
///
/// let skip = KeywordError::skip("not on this platform");
/// assert!(skip.is_skip());
/// assert!(!skip.is_reported());
/// assert!(KeywordError::fail("boom").reported().is_reported());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct KeywordError {
    kind: FailureKind,
    message: String,
    reported: bool,
    fatal: bool,
}

impl KeywordError {
    /// A failure with `message`.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fail,
            message: message.into(),
            reported: false,
            fatal: false,
        }
    }

    /// A skip request with `message`.
    #[must_use]
    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Skip,
            message: message.into(),
            reported: false,
            fatal: false,
        }
    }

    /// Mark the error as already logged.
    #[must_use]
    pub fn reported(mut self) -> Self {
        self.reported = true;
        self
    }

    /// Mark the error as fatal: the rest of the run is skipped.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Failure or skip.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// `true` for skip requests.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.kind == FailureKind::Skip
    }

    /// `true` once the message has been written to the log.
    #[must_use]
    pub const fn is_reported(&self) -> bool {
        self.reported
    }

    /// `true` when the run must stop after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
