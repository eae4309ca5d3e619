//! Post-processing of output files.
//!
//! [`Rebot`] reads one or more XML outputs and either combines them under a
//! new top-level suite or merges them into the first one, then writes the
//! requested output, log and report files.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EngineError;
use crate::output;
use crate::result::{ExecutionResult, SuiteResult, TestResult};
use crate::runner::{
    ExtensionRegistry, OutputPaths, apply_result_visitors, configure_result, output_path,
    parse_log_level, report_console, status_rc, write_outputs,
};
use crate::settings::OptionMap;

/// Outcome of [`Rebot::run`].
#[derive(Debug)]
pub struct RebotOutcome {
    /// Return code a command line front end should exit with.
    pub return_code: i32,
    /// The processed result.
    pub result: ExecutionResult,
    /// Files written.
    pub paths: OutputPaths,
}

/// The output post-processor.
#[derive(Default)]
pub struct Rebot {
    registry: ExtensionRegistry,
}

impl Rebot {
    /// Post-processor without named extensions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post-processor resolving `--prerebotmodifier` names through `registry`.
    #[must_use]
    pub fn with_registry(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    /// Process `inputs` with `options`.
    ///
    /// An XML output is only written when `output` is given explicitly; the
    /// log and report default to `log.html` and `report.html`.
    ///
    /// # Errors
    /// Returns an [`EngineError`] when an input cannot be read, merged
    /// outputs have different top-level suites, no tests remain and empty
    /// results are not allowed, a modifier fails, or files cannot be written.
    pub fn run(&self, inputs: &[Utf8PathBuf], options: &OptionMap) -> Result<RebotOutcome, EngineError> {
        let (threshold, _) = parse_log_level(&options.text("loglevel").unwrap_or_default())?;
        let results = inputs
            .iter()
            .map(|path| output::read_output(path))
            .collect::<Result<Vec<_>, _>>()?;
        let mut result = if options.flag("merge") {
            merge(results)?
        } else {
            combine(results)
        };
        configure_result(&mut result.suite, options);
        result.suite.update_status();
        if result.suite.test_count() == 0 && !options.flag("processemptysuite") {
            return Err(EngineError::Data(format!(
                "Suite '{}' contains no tests.",
                result.suite.name
            )));
        }
        result.filter_messages(threshold);
        apply_result_visitors(&self.registry, &mut result, options)?;

        let output = options
            .contains("output")
            .then(|| options.text("output"))
            .flatten()
            .map(|name| output_path(options, &name));
        let paths = write_outputs(&result, options, output, false)?;
        report_console(&result, &paths, options);
        Ok(RebotOutcome {
            return_code: status_rc(&result, options),
            result,
            paths,
        })
    }
}

/// Name of a suite combining suites called `names`: the distinct names
/// joined with ` & `, in first-seen order.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::rebot::combined_suite_name;
///
/// assert_eq!(combined_suite_name(["Tests", "Tests"]), "Tests");
/// assert_eq!(combined_suite_name(["A", "B", "A"]), "A & B");
/// ```
#[must_use]
pub fn combined_suite_name<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut distinct: Vec<String> = Vec::new();
    for name in names {
        let name = name.as_ref();
        if !distinct.iter().any(|seen| seen == name) {
            distinct.push(name.to_string());
        }
    }
    distinct.join(" & ")
}

fn combine(results: Vec<ExecutionResult>) -> ExecutionResult {
    let mut root = SuiteResult::named(combined_suite_name(
        results.iter().map(|result| result.suite.name.as_str()),
    ));
    let mut errors = Vec::new();
    for result in results {
        root.suites.push(result.suite);
        errors.extend(result.errors);
    }
    let mut combined = ExecutionResult::new(root);
    combined.errors = errors;
    combined
}

fn merge(results: Vec<ExecutionResult>) -> Result<ExecutionResult, EngineError> {
    let mut results = results.into_iter();
    let Some(mut base) = results.next() else {
        return Err(EngineError::Data("No outputs to merge.".into()));
    };
    for other in results {
        if other.suite.name != base.suite.name {
            return Err(EngineError::Data(format!(
                "Cannot merge outputs containing different root suites. Original suite is '{}' and merged is '{}'.",
                base.suite.name, other.suite.name
            )));
        }
        merge_suite(&mut base.suite, other.suite);
        base.errors.extend(other.errors);
    }
    base.generator = crate::GENERATOR.to_string();
    Ok(base)
}

fn merge_suite(into: &mut SuiteResult, other: SuiteResult) {
    for (name, value) in other.metadata {
        if !into.metadata.iter().any(|(existing, _)| *existing == name) {
            into.metadata.push((name, value));
        }
    }
    for child in other.suites {
        match into.suite_mut(&child.name) {
            Some(existing) => merge_suite(existing, child),
            None => into.suites.push(child),
        }
    }
    for test in other.tests {
        merge_test(into, test);
    }
}

fn merge_test(into: &mut SuiteResult, test: TestResult) {
    match into.tests.iter_mut().find(|existing| existing.name == test.name) {
        Some(existing) => *existing = test,
        None => into.tests.push(test),
    }
}

/// Read `path`, rename its top-level suite to `name` and write it back.
///
/// # Errors
/// Returns an [`EngineError`] when the file cannot be read or written.
pub fn rename_root_suite(path: &Utf8Path, name: &str) -> Result<(), EngineError> {
    let mut result = output::read_output(path)?;
    result.suite.name = name.to_string();
    output::write_output(&result, path)?;
    Ok(())
}
