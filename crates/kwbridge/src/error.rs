//! Bridge error types.
//!
//! Every failure the bridge raises is one of [`BridgeError`]'s variants.
//! Usage and collection errors end the session before any test runs;
//! internal errors mean an invariant between the runner and the engine was
//! broken and ask the user to report a bug.

use kwbridge_engine::{EngineError, KeywordError};
use kwbridge_runner::RunnerError;
use thiserror::Error;

/// Errors raised by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid options, for example one the bridge manages itself.
    #[error("{0}")]
    Usage(String),

    /// The engine could not collect its suites.
    #[error("{0}")]
    Collection(String),

    /// The runner and the engine disagree about the state of the session.
    #[error(
        "something went wrong with kwbridge, please file a bug with the following information:\n\n{0}"
    )]
    Internal(String),

    /// The engine failed outside of a test.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A runner hook failed while the engine was running a test.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Internal-consistency failure described by `message`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<BridgeError> for RunnerError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Usage(message) => Self::Usage(message),
            BridgeError::Collection(message) => Self::Collection(message),
            BridgeError::Engine(EngineError::InvalidOption(message)) => Self::Usage(message),
            BridgeError::Io(source) => Self::Io(source),
            BridgeError::Runner(error) => error,
            internal @ BridgeError::Internal(_) => Self::Internal(internal.to_string()),
            BridgeError::Engine(source) => Self::Plugin {
                plugin: crate::PLUGIN_NAME.to_string(),
                hook: "engine run",
                message: source.to_string(),
            },
        }
    }
}

impl From<BridgeError> for KeywordError {
    fn from(error: BridgeError) -> Self {
        Self::fail(error.to_string()).fatal()
    }
}
