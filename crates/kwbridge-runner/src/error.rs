//! Runner error types and session exit codes.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that end a session before every item has a report.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Invalid configuration or command line.
    #[error("usage error: {0}")]
    Usage(String),

    /// Collection failed.
    #[error("collection error: {0}")]
    Collection(String),

    /// An invariant the runner or a plugin relies on was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// A plugin hook failed.
    #[error("plugin '{plugin}' failed in {hook}: {message}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// Hook that failed.
        hook: &'static str,
        /// Failure description.
        message: String,
    },

    /// A worker process could not be run or returned garbage.
    #[error("worker '{worker}' failed: {message}")]
    Worker {
        /// Worker identifier.
        worker: String,
        /// Failure description.
        message: String,
    },

    /// A worker exchange file could not be read or written.
    #[error("worker exchange file '{path}' failed: {source}")]
    Exchange {
        /// Exchange file.
        path: Utf8PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Exit code a session ending with this error reports.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(_) | Self::Collection(_) => ExitCode::UsageError,
            Self::Internal(_)
            | Self::Plugin { .. }
            | Self::Worker { .. }
            | Self::Exchange { .. }
            | Self::Io(_) => ExitCode::InternalError,
        }
    }
}

/// Session exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExitCode {
    /// Every test passed, skipped or failed as expected.
    Ok,
    /// At least one test failed.
    TestsFailed,
    /// The session was interrupted.
    Interrupted,
    /// An internal error occurred.
    InternalError,
    /// The configuration or command line was invalid.
    UsageError,
    /// No tests were collected.
    NoTestsCollected,
}

impl ExitCode {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::TestsFailed => 1,
            Self::Interrupted => 2,
            Self::InternalError => 3,
            Self::UsageError => 4,
            Self::NoTestsCollected => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RunnerError::Usage("bad".into()), 4)]
    #[case(RunnerError::Collection("dry run failed".into()), 4)]
    #[case(RunnerError::Internal("broken".into()), 3)]
    fn errors_map_to_exit_codes(#[case] error: RunnerError, #[case] expected: i32) {
        assert_eq!(error.exit_code().code(), expected);
    }

    #[test]
    fn plugin_errors_name_the_hook() {
        let error = RunnerError::Plugin {
            plugin: "bridge".into(),
            hook: "runtestloop",
            message: "boom".into(),
        };
        assert_eq!(error.to_string(), "plugin 'bridge' failed in runtestloop: boom");
    }
}
