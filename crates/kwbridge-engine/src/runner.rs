//! The engine entry point: build, select, modify, execute and write.

mod execute;

use std::collections::BTreeMap;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::builder::SuiteBuilder;
use crate::builtin::BuiltIn;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::library::{KeywordLibrary, Namespace};
use crate::listener::{ListenerFailure, ListenerSet, SharedListener};
use crate::model::TestSuite;
use crate::output;
use crate::parser::{Parser, RobotParser};
use crate::result::{ExecutionResult, LogLevel, Message, SharedResultVisitor, SuiteResult};
use crate::select::Selection;
use crate::settings::{OptionItem, OptionMap};
use crate::visitor::{SharedVisitor, walk_suite};

use execute::{Executor, RunSettings};

type Factory<T> = Box<dyn Fn() -> T>;

/// Named factories for extensions referenced by text in option lists.
///
/// An option map can carry live extension objects, but command lines and
/// environment variables can only name them. Names are matched ignoring
/// case.
#[derive(Default)]
pub struct ExtensionRegistry {
    listeners: BTreeMap<String, Factory<SharedListener>>,
    visitors: BTreeMap<String, Factory<SharedVisitor>>,
    result_visitors: BTreeMap<String, Factory<SharedResultVisitor>>,
    parsers: BTreeMap<String, Factory<Rc<dyn Parser>>>,
}

impl ExtensionRegistry {
    /// Register a listener factory used for `--listener name`.
    pub fn register_listener(&mut self, name: &str, factory: impl Fn() -> SharedListener + 'static) {
        self.listeners.insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Register a pre-run modifier factory used for `--prerunmodifier name`.
    pub fn register_visitor(&mut self, name: &str, factory: impl Fn() -> SharedVisitor + 'static) {
        self.visitors.insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Register a pre-rebot modifier factory used for `--prerebotmodifier name`.
    pub fn register_result_visitor(
        &mut self,
        name: &str,
        factory: impl Fn() -> SharedResultVisitor + 'static,
    ) {
        self.result_visitors
            .insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Register a parser factory used for `--parser name`.
    pub fn register_parser(&mut self, name: &str, factory: impl Fn() -> Rc<dyn Parser> + 'static) {
        self.parsers.insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    pub(crate) fn listeners(&self, items: &[OptionItem]) -> Result<Vec<SharedListener>, EngineError> {
        resolve(items, "listener", &self.listeners, |item| match item {
            OptionItem::Listener(listener) => Some(Rc::clone(listener)),
            _ => None,
        })
    }

    pub(crate) fn visitors(&self, items: &[OptionItem]) -> Result<Vec<SharedVisitor>, EngineError> {
        resolve(items, "prerunmodifier", &self.visitors, |item| match item {
            OptionItem::Visitor(visitor) => Some(Rc::clone(visitor)),
            _ => None,
        })
    }

    pub(crate) fn result_visitors(
        &self,
        items: &[OptionItem],
    ) -> Result<Vec<SharedResultVisitor>, EngineError> {
        resolve(items, "prerebotmodifier", &self.result_visitors, |item| match item {
            OptionItem::ResultVisitor(visitor) => Some(Rc::clone(visitor)),
            _ => None,
        })
    }

    pub(crate) fn parsers(&self, items: &[OptionItem]) -> Result<Vec<Rc<dyn Parser>>, EngineError> {
        resolve(items, "parser", &self.parsers, |item| match item {
            OptionItem::Parser(parser) => Some(Rc::clone(parser)),
            _ => None,
        })
    }
}

fn resolve<T>(
    items: &[OptionItem],
    option: &str,
    factories: &BTreeMap<String, Factory<T>>,
    live: impl Fn(&OptionItem) -> Option<T>,
) -> Result<Vec<T>, EngineError> {
    items
        .iter()
        .map(|item| {
            if let Some(value) = live(item) {
                return Ok(value);
            }
            let Some(name) = item.as_text() else {
                return Err(EngineError::InvalidOption(format!(
                    "option '--{option}' does not accept {item:?}"
                )));
            };
            factories
                .get(&name.to_ascii_lowercase())
                .map(|factory| factory())
                .ok_or_else(|| {
                    EngineError::Data(format!(
                        "Importing {option} '{name}' failed: No {option} registered with that name."
                    ))
                })
        })
        .collect()
}

/// Files written by a run or a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPaths {
    /// XML output file.
    pub output: Option<Utf8PathBuf>,
    /// HTML log page.
    pub log: Option<Utf8PathBuf>,
    /// HTML report page.
    pub report: Option<Utf8PathBuf>,
}

/// Result of [`Engine::run`].
#[derive(Debug)]
pub struct RunOutcome {
    /// Return code a command line front end should exit with.
    pub return_code: i32,
    /// The complete execution result, after pre-rebot modifiers.
    pub result: ExecutionResult,
    /// Listener methods that returned errors.
    pub listener_failures: Vec<ListenerFailure>,
    /// Files written.
    pub paths: OutputPaths,
}

/// Executes suites.
///
/// An engine knows the parsers and keyword libraries available to a run. The
/// `BuiltIn` library is always in scope; other libraries become visible when
/// a suite imports them.
pub struct Engine {
    libraries: Vec<Rc<dyn KeywordLibrary>>,
    parsers: Vec<Rc<dyn Parser>>,
    registry: ExtensionRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the `.robot` parser and no extra libraries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            libraries: Vec::new(),
            parsers: vec![Rc::new(RobotParser)],
            registry: ExtensionRegistry::default(),
        }
    }

    /// Make `library` importable by suites.
    #[must_use]
    pub fn with_library(mut self, library: Rc<dyn KeywordLibrary>) -> Self {
        self.libraries.push(library);
        self
    }

    /// Add a source parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Rc<dyn Parser>) -> Self {
        self.parsers.push(parser);
        self
    }

    /// Extension factories resolved from text option values.
    pub fn registry_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.registry
    }

    /// Extension factories resolved from text option values.
    #[must_use]
    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Run the suites found in `sources` with `options`.
    ///
    /// Options missing from the map take their catalog default.
    ///
    /// # Errors
    /// Returns an [`EngineError`] when sources cannot be parsed, options are
    /// invalid, a modifier fails, no tests remain and empty runs are not
    /// allowed, or outputs cannot be written. Test failures are not errors;
    /// they are reflected in [`RunOutcome::return_code`].
    pub fn run(&self, sources: &[Utf8PathBuf], options: &OptionMap) -> Result<RunOutcome, EngineError> {
        let (threshold, _) = parse_log_level(&options.text("loglevel").unwrap_or_default())?;
        let mut parsers = self.parsers.clone();
        parsers.extend(self.registry.parsers(&options.list("parser"))?);
        let extensions = options.text("extension").map(|text| {
            text.split(':')
                .filter(|part| !part.is_empty())
                .map(|part| part.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        });

        let mut builder = SuiteBuilder::new(&parsers, extensions);
        let mut suite = builder.build(sources)?;
        let parse_errors = builder.take_errors();
        if options.flag("exitonerror") {
            if let Some(first) = parse_errors.first() {
                return Err(EngineError::Data(first.clone()));
            }
        }

        configure_suite(&mut suite, options);
        let mut selection = Selection::from_options(options)?;
        if let Some(path) = options.text("rerunfailed") {
            selection = selection.with_long_names(failed_long_names(Utf8Path::new(&path))?);
        }
        selection.apply(&mut suite);

        for visitor in self.registry.visitors(&options.list("prerunmodifier"))? {
            let mut visitor = visitor.borrow_mut();
            let name = visitor.name().to_string();
            walk_suite(&mut suite, &mut *visitor).map_err(|source| EngineError::Modifier { name, source })?;
        }
        suite.remove_empty_suites();
        if suite.test_count() == 0 && !options.flag("runemptysuite") {
            return Err(EngineError::Data(format!("Suite '{}' contains no tests.", suite.name)));
        }

        let listeners = ListenerSet::new(self.registry.listeners(&options.list("listener"))?);
        let namespace = Namespace::new(vec![Rc::new(BuiltIn)], self.libraries.clone());
        let ctx = ExecutionContext::new(namespace, listeners, threshold, options.flag("dryrun"));
        let settings = RunSettings::from_options(options);
        log::debug!("running suite '{}' with {} tests", suite.name, suite.test_count());
        let suite_result = Executor::new(&ctx, &settings).run(&suite);

        let mut result = ExecutionResult::new(suite_result);
        result.errors = parse_errors
            .into_iter()
            .map(|text| Message::new(LogLevel::Error, text))
            .collect();
        result.errors.extend(ctx.take_errors());
        apply_result_visitors(&self.registry, &mut result, options)?;

        let output = options
            .text("output")
            .map(|name| output_path(options, &name));
        let paths = write_outputs(&result, options, output, true)?;
        for failure in ctx.listeners().dispatch("close", |listener| listener.close()) {
            log::warn!("{failure}");
        }
        report_console(&result, &paths, options);

        Ok(RunOutcome {
            return_code: status_rc(&result, options),
            listener_failures: ctx.listeners().take_failures(),
            result,
            paths,
        })
    }
}

fn configure_suite(suite: &mut TestSuite, options: &OptionMap) {
    if let Some(name) = options.text("name") {
        suite.name = name;
    }
    if let Some(doc) = options.text("doc") {
        suite.doc = doc;
    }
    for item in options.texts("metadata") {
        let (name, value) = item.split_once(':').unwrap_or((item.as_str(), ""));
        suite.metadata.push((name.to_string(), value.to_string()));
    }
    let tags = options.texts("settag");
    if !tags.is_empty() {
        suite.set_tags(&tags);
    }
}

pub(crate) fn configure_result(suite: &mut SuiteResult, options: &OptionMap) {
    if let Some(name) = options.text("name") {
        suite.name = name;
    }
    if let Some(doc) = options.text("doc") {
        suite.doc = doc;
    }
    for item in options.texts("metadata") {
        let (name, value) = item.split_once(':').unwrap_or((item.as_str(), ""));
        suite.metadata.push((name.to_string(), value.to_string()));
    }
    let tags = options.texts("settag");
    if !tags.is_empty() {
        add_result_tags(suite, &tags);
    }
}

fn add_result_tags(suite: &mut SuiteResult, tags: &[String]) {
    for child in &mut suite.suites {
        add_result_tags(child, tags);
    }
    for test in &mut suite.tests {
        for tag in tags {
            if !test.tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
                test.tags.push(tag.clone());
            }
        }
    }
}

fn failed_long_names(path: &Utf8Path) -> Result<Vec<String>, EngineError> {
    let previous = output::read_output(path)?;
    let mut names = Vec::new();
    collect_failed(&previous.suite, &mut Vec::new(), &mut names);
    if names.is_empty() {
        return Err(EngineError::Data(format!(
            "Collecting failed tests from '{path}' failed: All tests passed."
        )));
    }
    Ok(names)
}

fn collect_failed(suite: &SuiteResult, path: &mut Vec<String>, into: &mut Vec<String>) {
    path.push(suite.name.clone());
    for child in &suite.suites {
        collect_failed(child, path, into);
    }
    for test in &suite.tests {
        if test.status == crate::result::Status::Fail {
            into.push(format!("{}.{}", path.join("."), test.name));
        }
    }
    path.pop();
}

pub(crate) fn apply_result_visitors(
    registry: &ExtensionRegistry,
    result: &mut ExecutionResult,
    options: &OptionMap,
) -> Result<(), EngineError> {
    for visitor in registry.result_visitors(&options.list("prerebotmodifier"))? {
        let mut visitor = visitor.borrow_mut();
        let name = visitor.name().to_string();
        result
            .visit(&mut *visitor)
            .map_err(|source| EngineError::Modifier { name, source })?;
    }
    Ok(())
}

/// Parse a `loglevel` value such as `DEBUG` or `TRACE:INFO` into the
/// threshold and the optional default visible level.
pub(crate) fn parse_log_level(text: &str) -> Result<(LogLevel, Option<LogLevel>), EngineError> {
    let text = if text.is_empty() { "INFO" } else { text };
    let (threshold, visible) = match text.split_once(':') {
        Some((threshold, visible)) => (threshold, Some(visible)),
        None => (text, None),
    };
    let threshold: LogLevel = threshold.parse().map_err(EngineError::InvalidOption)?;
    let visible = visible
        .map(str::parse::<LogLevel>)
        .transpose()
        .map_err(EngineError::InvalidOption)?;
    if visible.is_some_and(|visible| visible < threshold) {
        return Err(EngineError::InvalidOption(format!(
            "invalid log level '{text}': the default visible level cannot be lower than the threshold"
        )));
    }
    Ok((threshold, visible))
}

pub(crate) fn output_path(options: &OptionMap, name: &str) -> Utf8PathBuf {
    let directory = options.text("outputdir").unwrap_or_else(|| ".".to_string());
    Utf8Path::new(&directory).join(name)
}

/// Write the XML output and the HTML pages requested by `options`.
///
/// With `pages_need_output` set, pages are skipped when no output file is
/// written.
pub(crate) fn write_outputs(
    result: &ExecutionResult,
    options: &OptionMap,
    output: Option<Utf8PathBuf>,
    pages_need_output: bool,
) -> Result<OutputPaths, EngineError> {
    let mut paths = OutputPaths::default();
    if let Some(path) = output {
        output::write_output(result, &path)?;
        paths.output = Some(path);
    }
    if pages_need_output && paths.output.is_none() {
        return Ok(paths);
    }
    if let Some(name) = options.text("log") {
        let path = output_path(options, &name);
        crate::html::write_log_file(result, &path, options.text("logtitle").as_deref())?;
        paths.log = Some(path);
    }
    if let Some(name) = options.text("report") {
        let path = output_path(options, &name);
        crate::html::write_report_file(result, &path, options.text("reporttitle").as_deref())?;
        paths.report = Some(path);
    }
    Ok(paths)
}

pub(crate) fn status_rc(result: &ExecutionResult, options: &OptionMap) -> i32 {
    if options.flag("statusrc") {
        result.return_code()
    } else {
        crate::rc::ALL_PASSED
    }
}

pub(crate) fn report_console(result: &ExecutionResult, paths: &OutputPaths, options: &OptionMap) {
    let console = options.text("console").unwrap_or_default().to_ascii_lowercase();
    if console == "quiet" || console == "none" {
        return;
    }
    let stats = result.statistics();
    log::info!(
        "{}: {} tests, {} passed, {} failed, {} skipped",
        result.suite.name,
        stats.total(),
        stats.passed,
        stats.failed,
        stats.skipped
    );
    for (label, path) in [("Output", &paths.output), ("Log", &paths.log), ("Report", &paths.report)] {
        if let Some(path) = path {
            log::info!("{label}: {path}");
        }
    }
}
