//! Diagnostic logging for the command line front end.
//!
//! Diagnostics go to stderr so they never mix with the session summary on
//! stdout. The library crates log through the `log` facade; the subscriber
//! forwards those records as well.

use clap::ValueEnum;
use eyre::eyre;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log level used when `--log-level` is
/// not given.
pub const LOG_LEVEL_ENV: &str = "KWBRIDGE_LOG_LEVEL";

/// Diagnostic log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    /// Everything, including per-keyword traces.
    Trace,
    /// Option reconciliation, collection and merge details.
    Debug,
    /// Session progress.
    Info,
    /// Problems that do not stop the session.
    #[default]
    Warn,
    /// Failures only.
    Error,
    /// Nothing at all.
    Off,
}

impl LogLevel {
    /// Filter directive for this level.
    #[must_use]
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    /// The command line level when given, otherwise the level named by
    /// `env` (the value of [`LOG_LEVEL_ENV`]), otherwise the default.
    ///
    /// # Errors
    /// An environment value that names no level.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_cli::logging::LogLevel;
    ///
    /// assert_eq!(LogLevel::resolve(None, Some("DEBUG")).ok(), Some(LogLevel::Debug));
    /// assert_eq!(LogLevel::resolve(Some(LogLevel::Error), Some("debug")).ok(), Some(LogLevel::Error));
    /// assert!(LogLevel::resolve(None, Some("loud")).is_err());
    /// ```
    pub fn resolve(cli: Option<Self>, env: Option<&str>) -> eyre::Result<Self> {
        cli.map_or_else(
            || {
                env.map_or(Ok(Self::default()), |value| {
                    Self::from_str(value.trim(), true).map_err(|error| eyre!("{LOG_LEVEL_ENV}: {error}"))
                })
            },
            Ok,
        )
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::new(level.as_filter_str())
}

/// Install the stderr subscriber.
///
/// An already installed subscriber is kept, so calling this more than once
/// (as tests running several sessions do) is harmless.
pub fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
