//! Execution results: the tree written to the XML output.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::error::ExtensionError;
use crate::model::{Keyword, KeywordKind, TestCase, TestId, TestSuite};

/// Outcome of a keyword, test or suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Completed successfully.
    Pass,
    /// Failed.
    Fail,
    /// Skipped.
    Skip,
    /// Not executed.
    #[default]
    NotRun,
}

impl Status {
    /// Spelling used in output files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
            Self::NotRun => "NOT RUN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "SKIP" => Ok(Self::Skip),
            "NOT RUN" | "NOT_RUN" => Ok(Self::NotRun),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Severity of a log message, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Most verbose, includes argument dumps.
    Trace,
    /// Diagnostics.
    Debug,
    /// Normal messages.
    #[default]
    Info,
    /// Warnings, also copied to the execution errors.
    Warn,
    /// Errors, also copied to the execution errors.
    Error,
    /// Keyword failure messages.
    Fail,
    /// Keyword skip messages.
    Skip,
    /// Disables logging when used as a threshold.
    None,
}

impl LogLevel {
    /// Spelling used in output files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" | "HTML" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FAIL" => Ok(Self::Fail),
            "SKIP" => Ok(Self::Skip),
            "NONE" => Ok(Self::None),
            _ => Err(format!(
                "invalid log level '{s}', expected one of: TRACE, DEBUG, INFO, WARN, ERROR, NONE"
            )),
        }
    }
}

/// A single log message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub text: String,
    /// `true` when `text` is HTML.
    pub html: bool,
}

impl Message {
    /// Plain-text message.
    #[must_use]
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            html: false,
        }
    }
}

/// Entry in a keyword's body: a nested keyword or a message, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyItem {
    /// A nested keyword call.
    Keyword(KeywordResult),
    /// A message logged directly by this keyword.
    Message(Message),
}

/// Result of one keyword call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordResult {
    /// Keyword name as called.
    pub name: String,
    /// Library that implemented the keyword, when resolved.
    pub library: Option<String>,
    /// Arguments rendered for the log.
    pub args: Vec<String>,
    /// Slot this call occupied.
    pub kind: KeywordKind,
    /// Outcome.
    pub status: Status,
    /// Failure or skip message.
    pub message: String,
    /// Nested keywords and messages.
    pub items: Vec<BodyItem>,
}

impl KeywordResult {
    /// Empty result for `keyword`, not yet run.
    #[must_use]
    pub fn from_keyword(keyword: &Keyword) -> Self {
        Self {
            name: keyword.name.clone(),
            library: None,
            args: keyword.display_args(),
            kind: keyword.kind,
            status: Status::NotRun,
            message: String::new(),
            items: Vec::new(),
        }
    }

    /// Messages logged directly by this keyword.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().filter_map(|item| match item {
            BodyItem::Message(message) => Some(message),
            BodyItem::Keyword(_) => None,
        })
    }

    /// Keywords called directly by this keyword.
    pub fn keywords(&self) -> impl Iterator<Item = &KeywordResult> {
        self.items.iter().filter_map(|item| match item {
            BodyItem::Keyword(keyword) => Some(keyword),
            BodyItem::Message(_) => None,
        })
    }

    /// Full name including the library prefix when known.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.library {
            Some(library) => format!("{library}.{}", self.name),
            None => self.name.clone(),
        }
    }

    fn filter_messages(&mut self, threshold: LogLevel) {
        self.items.retain(|item| match item {
            BodyItem::Message(message) => message.level >= threshold,
            BodyItem::Keyword(_) => true,
        });
        for item in &mut self.items {
            if let BodyItem::Keyword(keyword) = item {
                keyword.filter_messages(threshold);
            }
        }
    }
}

/// Result of one test.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestResult {
    /// Identity of the executed test; absent for results read from files.
    pub id: Option<TestId>,
    /// Test name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// Tags.
    pub tags: Vec<String>,
    /// One-based line of the test.
    pub lineno: Option<u32>,
    /// Outcome.
    pub status: Status,
    /// Failure or skip message.
    pub message: String,
    /// Setup result.
    pub setup: Option<KeywordResult>,
    /// Body step results.
    pub body: Vec<KeywordResult>,
    /// Teardown result.
    pub teardown: Option<KeywordResult>,
}

impl TestResult {
    /// Empty result for `test`, not yet run.
    #[must_use]
    pub fn from_test(test: &TestCase) -> Self {
        Self {
            id: Some(test.id),
            name: test.name.clone(),
            doc: test.doc.clone(),
            tags: test.tags.clone(),
            lineno: test.lineno,
            ..Self::default()
        }
    }

    /// Every keyword result in slot order: setup, body, teardown.
    pub fn keywords(&self) -> impl Iterator<Item = &KeywordResult> {
        self.setup
            .iter()
            .chain(self.body.iter())
            .chain(self.teardown.iter())
    }

    fn filter_messages(&mut self, threshold: LogLevel) {
        for keyword in self
            .setup
            .iter_mut()
            .chain(self.body.iter_mut())
            .chain(self.teardown.iter_mut())
        {
            keyword.filter_messages(threshold);
        }
    }
}

/// Result of one suite.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiteResult {
    /// Suite name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// Source file or directory.
    pub source: Option<Utf8PathBuf>,
    /// `name: value` metadata.
    pub metadata: Vec<(String, String)>,
    /// Outcome.
    pub status: Status,
    /// Failure message of the suite itself.
    pub message: String,
    /// Suite setup result.
    pub setup: Option<KeywordResult>,
    /// Suite teardown result.
    pub teardown: Option<KeywordResult>,
    /// Child suite results.
    pub suites: Vec<SuiteResult>,
    /// Test results.
    pub tests: Vec<TestResult>,
}

impl SuiteResult {
    /// Empty result for `suite`.
    #[must_use]
    pub fn from_suite(suite: &TestSuite) -> Self {
        Self {
            name: suite.name.clone(),
            doc: suite.doc.clone(),
            source: suite.source.clone(),
            metadata: suite.metadata.clone(),
            ..Self::default()
        }
    }

    /// Empty result named `name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Every test result in this suite and its descendants.
    #[must_use]
    pub fn all_tests(&self) -> Vec<&TestResult> {
        let mut tests = Vec::new();
        self.collect_tests(&mut tests);
        tests
    }

    fn collect_tests<'a>(&'a self, into: &mut Vec<&'a TestResult>) {
        for suite in &self.suites {
            suite.collect_tests(into);
        }
        into.extend(self.tests.iter());
    }

    /// Number of tests in this suite and its descendants.
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len() + self.suites.iter().map(Self::test_count).sum::<usize>()
    }

    /// Pass/fail/skip counts over every test in the tree.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for test in self.all_tests() {
            stats.record(test.status);
        }
        stats
    }

    /// Recompute this suite's status from its own keywords and children.
    pub fn update_status(&mut self) {
        for suite in &mut self.suites {
            suite.update_status();
        }
        let own_failure = self
            .setup
            .iter()
            .chain(self.teardown.iter())
            .any(|keyword| keyword.status == Status::Fail);
        let stats = self.statistics();
        self.status = if own_failure || stats.failed > 0 {
            Status::Fail
        } else if stats.passed > 0 {
            Status::Pass
        } else {
            Status::Skip
        };
    }

    /// Find the direct child suite called `name`.
    pub fn suite_mut(&mut self, name: &str) -> Option<&mut Self> {
        self.suites.iter_mut().find(|suite| suite.name == name)
    }

    fn filter_messages(&mut self, threshold: LogLevel) {
        for keyword in self.setup.iter_mut().chain(self.teardown.iter_mut()) {
            keyword.filter_messages(threshold);
        }
        for test in &mut self.tests {
            test.filter_messages(threshold);
        }
        for suite in &mut self.suites {
            suite.filter_messages(threshold);
        }
    }
}

/// Aggregate test counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    /// Passed tests.
    pub passed: usize,
    /// Failed tests.
    pub failed: usize,
    /// Skipped tests.
    pub skipped: usize,
}

impl Statistics {
    /// Count one test with `status`; not-run tests are not counted.
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Pass => self.passed += 1,
            Status::Fail => self.failed += 1,
            Status::Skip => self.skipped += 1,
            Status::NotRun => {}
        }
    }

    /// Total number of counted tests.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// A complete result: top-level suite plus execution errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// Top-level suite.
    pub suite: SuiteResult,
    /// Warnings and errors logged during execution.
    pub errors: Vec<Message>,
    /// Tool that produced the result.
    pub generator: String,
}

impl ExecutionResult {
    /// Wrap a suite result.
    #[must_use]
    pub fn new(suite: SuiteResult) -> Self {
        Self {
            suite,
            errors: Vec::new(),
            generator: crate::GENERATOR.to_string(),
        }
    }

    /// Test statistics of the top-level suite.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.suite.statistics()
    }

    /// Failed-test count capped at the maximum return code.
    #[must_use]
    pub fn return_code(&self) -> i32 {
        i32::try_from(self.statistics().failed)
            .unwrap_or(crate::rc::MAX_FAILURES)
            .min(crate::rc::MAX_FAILURES)
    }

    /// Drop every keyword message below `threshold`.
    pub fn filter_messages(&mut self, threshold: LogLevel) {
        self.suite.filter_messages(threshold);
    }

    /// Walk the result tree with `visitor`.
    ///
    /// # Errors
    /// Propagates the first error returned by the visitor.
    pub fn visit(&mut self, visitor: &mut dyn ResultVisitor) -> Result<(), ExtensionError> {
        walk_result(&mut self.suite, visitor, 0)
    }
}

fn walk_result(
    suite: &mut SuiteResult,
    visitor: &mut dyn ResultVisitor,
    depth: usize,
) -> Result<(), ExtensionError> {
    visitor.start_suite(suite, depth)?;
    for child in &mut suite.suites {
        walk_result(child, visitor, depth + 1)?;
    }
    for test in &mut suite.tests {
        visitor.visit_test(test)?;
    }
    visitor.end_suite(suite, depth)
}

/// Post-processes results before they are written.
#[expect(unused_variables, reason = "default visitor methods ignore their arguments")]
pub trait ResultVisitor {
    /// Name used in error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called before a suite's children; `depth` is 0 for the top-level suite.
    ///
    /// # Errors
    /// Implementations return an error to abort writing.
    fn start_suite(&mut self, suite: &mut SuiteResult, depth: usize) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Called for every test result.
    ///
    /// # Errors
    /// Implementations return an error to abort writing.
    fn visit_test(&mut self, test: &mut TestResult) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Called after a suite's children.
    ///
    /// # Errors
    /// Implementations return an error to abort writing.
    fn end_suite(&mut self, suite: &mut SuiteResult, depth: usize) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Result visitor shared through the option map.
pub type SharedResultVisitor = Rc<RefCell<dyn ResultVisitor>>;
