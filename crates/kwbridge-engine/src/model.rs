//! Executable suite model: suites, tests and keyword calls.
//!
//! Suites form a tree. Each [`TestCase`] carries a process-unique [`TestId`]
//! so that tools holding on to a test across visitor passes can find it again
//! without relying on its position or name.

use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

static NEXT_TEST_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a parsed test.
///
/// Identifiers are allocated when a test is created and survive clones, so a
/// cloned descriptor still refers to the same test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(u64);

impl TestId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_TEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, mainly useful in diagnostics.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One keyword argument.
///
/// A cloaked argument is passed to the keyword unchanged but rendered as an
/// empty string in logs and output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Ordinary argument shown verbatim.
    Value(String),
    /// Argument hidden from logs.
    Cloaked(String),
}

impl Arg {
    /// The value handed to the keyword implementation.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Value(value) | Self::Cloaked(value) => value,
        }
    }

    /// The value written to logs.
    #[must_use]
    pub fn display(&self) -> &str {
        match self {
            Self::Value(value) => value,
            Self::Cloaked(_) => "",
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

/// Position of a keyword call inside its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeywordKind {
    /// Suite or test setup.
    Setup,
    /// Ordinary body step.
    #[default]
    Keyword,
    /// Suite or test teardown.
    Teardown,
}

impl KeywordKind {
    /// Name used in output files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Keyword => "KEYWORD",
            Self::Teardown => "TEARDOWN",
        }
    }

    /// Parse the output-file spelling; unknown values are treated as body steps.
    #[must_use]
    pub fn from_output(value: &str) -> Self {
        match value {
            "SETUP" => Self::Setup,
            "TEARDOWN" => Self::Teardown,
            _ => Self::Keyword,
        }
    }
}

/// A keyword call: name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyword {
    /// Name as written, optionally prefixed with `Library.`.
    pub name: String,
    /// Call arguments.
    pub args: Vec<Arg>,
    /// Slot this call occupies.
    pub kind: KeywordKind,
    /// One-based source line.
    pub lineno: Option<u32>,
}

impl Keyword {
    /// Build a body step with plain arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_engine::Keyword;
    ///
    /// let kw = Keyword::new("Log", ["hello"]);
    /// assert_eq!(kw.args.len(), 1);
    /// assert!(!kw.is_disabled());
    /// ```
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(|arg| Arg::Value(arg.into())).collect(),
            kind: KeywordKind::Keyword,
            lineno: None,
        }
    }

    /// Build a call whose arguments are already [`Arg`]s.
    #[must_use]
    pub fn with_args(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            name: name.into(),
            args,
            kind: KeywordKind::Keyword,
            lineno: None,
        }
    }

    /// Return the call re-slotted as `kind`.
    #[must_use]
    pub fn into_kind(mut self, kind: KeywordKind) -> Self {
        self.kind = kind;
        self
    }

    /// Return the call annotated with a source line.
    #[must_use]
    pub fn at_line(mut self, lineno: u32) -> Self {
        self.lineno = Some(lineno);
        self
    }

    /// `true` for an empty or `NONE` name, which disables the slot.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name.eq_ignore_ascii_case("none")
    }

    /// Argument values rendered for logs.
    #[must_use]
    pub fn display_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| arg.display().to_string()).collect()
    }
}

/// A keyword defined in a `*** Keywords ***` section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserKeyword {
    /// Keyword name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// Argument variables, e.g. `${name}`.
    pub arguments: Vec<String>,
    /// Steps executed in order.
    pub body: Vec<Keyword>,
    /// One-based source line.
    pub lineno: Option<u32>,
}

/// Imports and keywords declared by a suite file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiteResource {
    /// Library names imported with `Library`.
    pub libraries: Vec<String>,
    /// Keywords declared in the file.
    pub keywords: Vec<UserKeyword>,
}

/// A single test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Stable identity, preserved by [`Clone`].
    pub id: TestId,
    /// Test name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// Tags, in declaration order.
    pub tags: Vec<String>,
    /// File the test was read from.
    pub source: Option<Utf8PathBuf>,
    /// One-based line of the test name.
    pub lineno: Option<u32>,
    /// Setup slot.
    pub setup: Option<Keyword>,
    /// Body steps.
    pub body: Vec<Keyword>,
    /// Teardown slot.
    pub teardown: Option<Keyword>,
}

impl TestCase {
    /// Create an empty test with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TestId::fresh(),
            name: name.into(),
            doc: String::new(),
            tags: Vec::new(),
            source: None,
            lineno: None,
            setup: None,
            body: Vec::new(),
            teardown: None,
        }
    }

    /// Add `tag` unless an equal tag (ignoring case) is already present.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            self.tags.push(tag.to_string());
        }
    }

    /// `true` when nothing would run for this test.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.setup.is_none() && self.body.is_empty() && self.teardown.is_none()
    }
}

/// A suite of tests and child suites.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestSuite {
    /// Suite name.
    pub name: String,
    /// Documentation.
    pub doc: String,
    /// File or directory the suite came from.
    pub source: Option<Utf8PathBuf>,
    /// Free-form `name: value` metadata.
    pub metadata: Vec<(String, String)>,
    /// Suite setup.
    pub setup: Option<Keyword>,
    /// Suite teardown.
    pub teardown: Option<Keyword>,
    /// Imports and user keywords in scope for this suite and its children.
    pub resource: SuiteResource,
    /// Child suites, executed before this suite's own tests.
    pub suites: Vec<TestSuite>,
    /// Tests owned directly by this suite.
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    /// Create an empty suite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create an empty suite named after `source`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_engine::TestSuite;
    ///
    /// let suite = TestSuite::from_source("tests/01__login_flow.robot");
    /// assert_eq!(suite.name, "Login Flow");
    /// ```
    #[must_use]
    pub fn from_source(source: impl Into<Utf8PathBuf>) -> Self {
        let source = source.into();
        let mut suite = Self::new(name_from_source(&source));
        suite.source = Some(source);
        suite
    }

    /// Number of tests in this suite and all descendants.
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.tests.len() + self.suites.iter().map(Self::test_count).sum::<usize>()
    }

    /// Every test in execution order: child suites first, then own tests.
    #[must_use]
    pub fn all_tests(&self) -> Vec<&TestCase> {
        let mut tests = Vec::new();
        self.collect_tests(&mut tests);
        tests
    }

    fn collect_tests<'a>(&'a self, into: &mut Vec<&'a TestCase>) {
        for suite in &self.suites {
            suite.collect_tests(into);
        }
        into.extend(self.tests.iter());
    }

    /// Drop descendant suites that no longer contain any test.
    pub fn remove_empty_suites(&mut self) {
        for suite in &mut self.suites {
            suite.remove_empty_suites();
        }
        self.suites.retain(|suite| suite.test_count() > 0);
    }

    /// Add `tags` to every test in the tree.
    pub fn set_tags(&mut self, tags: &[String]) {
        for suite in &mut self.suites {
            suite.set_tags(tags);
        }
        for test in &mut self.tests {
            for tag in tags {
                test.add_tag(tag);
            }
        }
    }
}

fn name_from_source(source: &Utf8Path) -> String {
    let base = match source.file_name() {
        Some(name) => Utf8Path::new(name)
            .file_stem()
            .filter(|_| !is_directory_like(source))
            .unwrap_or(name)
            .to_string(),
        None => source.as_str().to_string(),
    };
    printable_name(&base)
}

fn is_directory_like(source: &Utf8Path) -> bool {
    source.is_dir() || source.extension().is_none()
}

/// Turn a file or directory stem into a suite name.
///
/// An ordering prefix such as `01__` is removed, underscores become spaces
/// and each word starts with an upper-case letter.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::printable_name;
///
/// assert_eq!(printable_name("test_math"), "Test Math");
/// assert_eq!(printable_name("02__checkout"), "Checkout");
/// assert_eq!(printable_name("my_HTTP_api"), "My HTTP Api");
/// ```
#[must_use]
pub fn printable_name(stem: &str) -> String {
    let stem = strip_order_prefix(stem);
    stem.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_order_prefix(stem: &str) -> &str {
    match stem.split_once("__") {
        Some((prefix, rest))
            if !prefix.is_empty() && !rest.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) =>
        {
            rest
        }
        _ => stem,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("test_math", "Test Math")]
    #[case("01__setup", "Setup")]
    #[case("__init__", "Init")]
    #[case("plain", "Plain")]
    #[case("Already Named", "Already Named")]
    fn printable_names(#[case] stem: &str, #[case] expected: &str) {
        assert_eq!(printable_name(stem), expected);
    }

    #[test]
    fn cloned_tests_keep_identity() {
        let test = TestCase::new("a");
        let copy = test.clone();
        assert_eq!(test.id, copy.id);
        assert_ne!(TestCase::new("a").id, test.id);
    }

    #[test]
    fn test_count_and_pruning_cover_nested_suites() {
        let mut root = TestSuite::new("Root");
        let mut child = TestSuite::new("Child");
        child.tests.push(TestCase::new("one"));
        root.suites.push(child);
        root.suites.push(TestSuite::new("Empty"));
        root.tests.push(TestCase::new("two"));
        assert_eq!(root.test_count(), 2);
        root.remove_empty_suites();
        assert_eq!(root.suites.len(), 1);
        let names: Vec<_> = root.all_tests().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn none_keyword_is_disabled() {
        assert!(Keyword::new("NONE", Vec::<String>::new()).is_disabled());
        assert!(Keyword::new("  ", Vec::<String>::new()).is_disabled());
    }

    #[test]
    fn cloaked_arguments_render_empty() {
        let kw = Keyword::with_args("x", vec![Arg::Cloaked("secret".into()), "shown".into()]);
        assert_eq!(kw.display_args(), ["", "shown"]);
        assert_eq!(kw.args.first().map(Arg::value), Some("secret"));
    }
}
