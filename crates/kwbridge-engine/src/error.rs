//! Engine error types.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::rc;

/// Error returned by listeners and visitors plugged into the engine.
///
/// Extensions live in other crates and carry their own error types; the
/// engine only needs to display them and hand them back to the caller, who
/// may downcast to recover the concrete type.
pub type ExtensionError = Box<dyn std::error::Error>;

/// Errors that stop an engine run or a merge before results are produced.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid test data or an empty run.
    #[error("{0}")]
    Data(String),

    /// A source file could not be parsed.
    #[error("parsing '{path}' failed: {message}")]
    Parse {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// An unknown or malformed option was supplied.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A pre-run or pre-rebot modifier failed.
    #[error("executing model modifier '{name}' failed: {source}")]
    Modifier {
        /// Name reported by the modifier.
        name: String,
        /// Error raised by the modifier.
        source: ExtensionError,
    },

    /// Reading or writing an output file failed.
    #[error(transparent)]
    Output(#[from] OutputError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Return code a command line front end should exit with.
    #[must_use]
    pub fn return_code(&self) -> i32 {
        match self {
            Self::Data(_) | Self::Parse { .. } | Self::InvalidOption(_) | Self::Modifier { .. } => {
                rc::DATA_ERROR
            }
            Self::Output(_) | Self::Io(_) => rc::FRAMEWORK_ERROR,
        }
    }
}

/// Errors raised while reading or writing XML output and HTML pages.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The file could not be read.
    #[error("reading output file '{path}' failed: {source}")]
    Read {
        /// Output file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file was read but is not a valid output file.
    #[error("reading output file '{path}' failed: {message}")]
    Invalid {
        /// Output file.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The file could not be written.
    #[error("writing '{path}' failed: {source}")]
    Write {
        /// Destination file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
