//! Keyword-driven acceptance test engine.
//!
//! The engine parses `.robot` suite files (and any source a registered
//! [`Parser`] understands) into a [`TestSuite`] tree, lets pre-run
//! [`SuiteVisitor`]s reshape that tree, executes every test's setup, body and
//! teardown keywords while notifying [`Listener`]s, and writes the outcome as
//! an XML output file plus HTML log and report pages. The [`rebot`] module
//! post-processes and merges existing output files.
//!
//! # Examples
//!
//! ```no_run
//! use kwbridge_engine::{Engine, OptionMap};
//!
//! let outcome = Engine::new()
//!     .run(&["tests/suite.robot".into()], &OptionMap::new())
//!     .unwrap();
//! assert_eq!(outcome.return_code, 0);
//! ```

mod builder;
pub mod builtin;
mod context;
mod error;
mod escape;
pub mod html;
mod library;
mod listener;
mod model;
pub mod output;
mod parser;
pub mod rebot;
mod result;
mod runner;
mod select;
pub mod settings;
mod status;
mod visitor;

pub use context::{ExecutionContext, RunningTest};
pub use error::{EngineError, ExtensionError, OutputError};
pub use library::{KeywordLibrary, normalize_name};
pub use listener::{Listener, ListenerFailure, SharedListener};
pub use model::{
    Arg, Keyword, KeywordKind, SuiteResource, TestCase, TestId, TestSuite, UserKeyword,
    printable_name,
};
pub use parser::{Parser, RobotParser};
pub use result::{
    BodyItem, ExecutionResult, KeywordResult, LogLevel, Message, ResultVisitor,
    SharedResultVisitor, Statistics, Status, SuiteResult, TestResult,
};
pub use runner::{Engine, ExtensionRegistry, OutputPaths, RunOutcome};
pub use settings::{
    OptionItem, OptionKind, OptionMap, OptionSpec, OptionValue, ParsedArguments, parse_arguments,
};
pub use status::{FailureKind, KeywordError};
pub use visitor::{SharedVisitor, SuitePath, SuiteVisitor, walk_suite};

/// Return codes used by [`Engine::run`] and [`rebot::Rebot::run`].
pub mod rc {
    /// Every test passed (or was skipped).
    pub const ALL_PASSED: i32 = 0;
    /// Failed-test counts are capped at this value.
    pub const MAX_FAILURES: i32 = 250;
    /// Help or version information was requested.
    pub const INFO_PRINTED: i32 = 251;
    /// Invalid data or command line options.
    pub const DATA_ERROR: i32 = 252;
    /// Execution was stopped by the user.
    pub const STOPPED_BY_USER: i32 = 253;
    /// Unexpected internal error.
    pub const FRAMEWORK_ERROR: i32 = 255;
}

/// Generator string written to every output file.
pub const GENERATOR: &str = concat!("kwbridge-engine ", env!("CARGO_PKG_VERSION"));
