//! Suite and test execution.

use crate::context::{ExecutionContext, RunningTest};
use crate::model::{Keyword, TestCase, TestSuite};
use crate::result::{KeywordResult, Status, SuiteResult, TestResult};
use crate::select::skip_tag;
use crate::settings::OptionMap;
use crate::status::KeywordError;

const FATAL_STOP: &str = "Test execution stopped due to a fatal error.";
const FAILURE_STOP: &str = "Failure occurred and exit-on-failure mode is in use.";
const ERROR_STOP: &str = "Error occurred and exit-on-error mode is in use.";

pub(crate) struct RunSettings {
    skip: Vec<String>,
    skip_on_failure: Vec<String>,
    exit_on_failure: bool,
    exit_on_error: bool,
}

impl RunSettings {
    pub(crate) fn from_options(options: &OptionMap) -> Self {
        Self {
            skip: options.texts("skip"),
            skip_on_failure: options.texts("skiponfailure"),
            exit_on_failure: options.flag("exitonfailure"),
            exit_on_error: options.flag("exitonerror"),
        }
    }
}

/// Failure or skip of a suite setup, seen by every test below it.
#[derive(Clone)]
struct Inherited {
    skip: bool,
    message: String,
}

impl Inherited {
    fn test_outcome(&self) -> (Status, String) {
        if self.skip {
            (Status::Skip, format!("Skipped in parent suite setup:\n{}", self.message))
        } else {
            (Status::Fail, format!("Parent suite setup failed:\n{}", self.message))
        }
    }
}

pub(crate) struct Executor<'a> {
    ctx: &'a ExecutionContext,
    settings: &'a RunSettings,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(ctx: &'a ExecutionContext, settings: &'a RunSettings) -> Self {
        Self { ctx, settings }
    }

    pub(crate) fn run(&self, suite: &TestSuite) -> SuiteResult {
        let mut result = self.run_suite(suite, None);
        result.update_status();
        result
    }

    fn report_listener_failures(&self, failures: Vec<String>) {
        for failure in failures {
            self.ctx.add_error(failure);
        }
    }

    fn run_suite(&self, suite: &TestSuite, inherited: Option<&Inherited>) -> SuiteResult {
        let mut result = SuiteResult::from_suite(suite);
        self.report_listener_failures(
            self.ctx
                .listeners()
                .dispatch("start_suite", |listener| listener.start_suite(suite, &result)),
        );
        self.ctx.push_scope(suite.resource.keywords.clone());
        for library in &suite.resource.libraries {
            if let Err(error) = self.ctx.import_library(library) {
                let source = suite.source.as_ref().map_or_else(String::new, ToString::to_string);
                self.ctx
                    .add_error(format!("Error in file '{source}': {}", error.message()));
            }
        }

        let stopped = self.ctx.stop_reason().is_some();
        let run_fixtures = inherited.is_none() && !stopped;
        let mut own = None;
        if run_fixtures {
            if let Some(setup) = &suite.setup {
                let (keyword, outcome) = self.run_fixture(setup);
                result.setup = Some(keyword);
                if let Err(error) = outcome {
                    own = Some(Inherited {
                        skip: error.is_skip(),
                        message: error.message().to_string(),
                    });
                }
            }
        }
        let inherited = own.as_ref().or(inherited);
        if let Some(failure) = &own {
            if !failure.skip {
                result.message = format!("Suite setup failed:\n{}", failure.message);
            }
        }

        for child in &suite.suites {
            result.suites.push(self.run_suite(child, inherited));
        }
        for test in &suite.tests {
            result.tests.push(self.run_test(test, inherited));
        }

        if run_fixtures {
            if let Some(teardown) = &suite.teardown {
                let (keyword, outcome) = self.run_fixture(teardown);
                result.teardown = Some(keyword);
                if let Err(error) = outcome {
                    if !error.is_skip() {
                        fail_all_tests(&mut result, error.message());
                        let prefix = if result.message.is_empty() { "" } else { "\n\n" };
                        result.message = format!(
                            "{}{prefix}Suite teardown failed:\n{}",
                            result.message,
                            error.message()
                        );
                    }
                }
            }
        }
        self.ctx.pop_scope();
        result.update_status();
        self.report_listener_failures(
            self.ctx
                .listeners()
                .dispatch("end_suite", |listener| listener.end_suite(suite, &result)),
        );
        result
    }

    fn run_fixture(&self, keyword: &Keyword) -> (KeywordResult, Result<(), KeywordError>) {
        let (result, outcome) = self.ctx.execute(keyword);
        if let Err(error) = &outcome {
            if error.is_fatal() {
                self.ctx.request_stop(FATAL_STOP);
            }
        }
        (result, outcome)
    }

    fn run_test(&self, test: &TestCase, inherited: Option<&Inherited>) -> TestResult {
        let mut result = TestResult::from_test(test);
        self.ctx.set_current_test(Some(RunningTest {
            id: test.id,
            name: test.name.clone(),
        }));
        self.report_listener_failures(
            self.ctx
                .listeners()
                .dispatch("start_test", |listener| listener.start_test(test, &result)),
        );

        if let Some(reason) = self.ctx.stop_reason() {
            (result.status, result.message) = (Status::Skip, reason);
        } else if let Some(inherited) = inherited {
            (result.status, result.message) = inherited.test_outcome();
        } else if skip_tag(&self.settings.skip, &test.tags).is_some() {
            (result.status, result.message) = (
                Status::Skip,
                "Test skipped using '--skip' command line option.".to_string(),
            );
        } else if test.is_empty() {
            (result.status, result.message) = (Status::Fail, "Test cannot be empty.".to_string());
        } else {
            self.execute_test(test, &mut result);
        }

        if result.status == Status::Fail && skip_tag(&self.settings.skip_on_failure, &test.tags).is_some() {
            result.status = Status::Skip;
            result.message = format!(
                "Failed test skipped using '--skiponfailure' option.\n\nOriginal failure:\n{}",
                result.message
            );
        }

        self.report_listener_failures(
            self.ctx
                .listeners()
                .dispatch("end_test", |listener| listener.end_test(test, &mut result)),
        );
        if result.status == Status::Fail && self.settings.exit_on_failure {
            self.ctx.request_stop(FAILURE_STOP);
        }
        if self.settings.exit_on_error && self.ctx.has_errors() {
            self.ctx.request_stop(ERROR_STOP);
        }
        self.ctx.set_current_test(None);
        result
    }

    fn execute_test(&self, test: &TestCase, result: &mut TestResult) {
        let mut failure: Option<(KeywordError, bool)> = None;
        if let Some(setup) = &test.setup {
            let (keyword, outcome) = self.run_fixture(setup);
            result.setup = Some(keyword);
            if let Err(error) = outcome {
                failure = Some((error, true));
            }
        }
        if failure.is_none() {
            for step in &test.body {
                let (keyword, outcome) = self.run_fixture(step);
                result.body.push(keyword);
                if let Err(error) = outcome {
                    failure = Some((error, false));
                    break;
                }
            }
        }

        (result.status, result.message) = match &failure {
            None => (Status::Pass, String::new()),
            Some((error, _)) if error.is_skip() => (Status::Skip, error.message().to_string()),
            Some((error, true)) => (Status::Fail, format!("Setup failed:\n{}", error.message())),
            Some((error, false)) => (Status::Fail, error.message().to_string()),
        };

        if let Some(teardown) = &test.teardown {
            let (keyword, outcome) = self.run_fixture(teardown);
            result.teardown = Some(keyword);
            if let Err(error) = outcome {
                apply_teardown_failure(result, &error);
            }
        }
    }
}

fn apply_teardown_failure(result: &mut TestResult, error: &KeywordError) {
    match (result.status, error.is_skip()) {
        (Status::Pass, true) => {
            result.status = Status::Skip;
            result.message = format!("Skipped in teardown:\n{}", error.message());
        }
        (Status::Pass, false) => {
            result.status = Status::Fail;
            result.message = format!("Teardown failed:\n{}", error.message());
        }
        (_, true) => {
            result.message = format!("{}\n\nAlso teardown was skipped:\n{}", result.message, error.message());
        }
        (_, false) => {
            result.status = Status::Fail;
            result.message = format!("{}\n\nAlso teardown failed:\n{}", result.message, error.message());
        }
    }
}

fn fail_all_tests(suite: &mut SuiteResult, message: &str) {
    for child in &mut suite.suites {
        fail_all_tests(child, message);
    }
    for test in &mut suite.tests {
        test.message = if test.status == Status::Fail {
            format!("{}\n\nAlso parent suite teardown failed:\n{message}", test.message)
        } else {
            format!("Parent suite teardown failed:\n{message}")
        };
        test.status = Status::Fail;
    }
}
