//! Sessions with the bridge installed run their items inside the engine.

use std::fs;

use camino::Utf8PathBuf;
use kwbridge::{BridgeConfig, install};
use kwbridge_engine::{ExecutionResult, KeywordResult, LogLevel, OptionMap, Status, TestResult, output};
use kwbridge_runner::{
    ExitCode, Fixture, Mark, Outcome, Phase, RunnerConfig, Session, Summary, TestError, TestFunction,
    TestModule, check,
};
use rstest::{fixture, rstest};
use serial_test::serial;
use tempfile::TempDir;

struct Workspace {
    _root: TempDir,
    _out: TempDir,
    rootdir: Utf8PathBuf,
    outdir: Utf8PathBuf,
}

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    match Utf8PathBuf::from_path_buf(dir.path().to_path_buf()) {
        Ok(path) => path,
        Err(path) => panic!("non UTF-8 temp dir {}", path.display()),
    }
}

fn tempdir() -> TempDir {
    match TempDir::new() {
        Ok(dir) => dir,
        Err(error) => panic!("create temp dir: {error}"),
    }
}

#[fixture]
fn workspace() -> Workspace {
    let root = tempdir();
    let out = tempdir();
    Workspace {
        rootdir: utf8(&root),
        outdir: utf8(&out),
        _root: root,
        _out: out,
    }
}

impl Workspace {
    fn write(&self, name: &str, text: &str) {
        let path = self.rootdir.join(name);
        if let Err(error) = fs::write(&path, text) {
            panic!("write {path}: {error}");
        }
    }

    fn bridge(&self) -> BridgeConfig {
        let mut options = OptionMap::new();
        options.insert("outputdir", self.outdir.as_str());
        BridgeConfig::new(options).with_env_options(None)
    }

    fn config(&self) -> RunnerConfig {
        RunnerConfig {
            rootdir: self.rootdir.clone(),
            ..RunnerConfig::default()
        }
    }

    fn run(&self, modules: Vec<TestModule>, bridge: BridgeConfig) -> (Session, ExitCode) {
        let session = install(Session::builder(self.config()).modules(modules), bridge).build();
        match session.main() {
            Ok(exit) => (session, exit),
            Err(error) => panic!("session failed: {error}"),
        }
    }

    fn output(&self) -> ExecutionResult {
        match output::read_output(&self.outdir.join("output.xml")) {
            Ok(result) => result,
            Err(error) => panic!("read output: {error}"),
        }
    }
}

fn engine_test<'a>(result: &'a ExecutionResult, name: &str) -> &'a TestResult {
    let Some(test) = result.suite.all_tests().into_iter().find(|test| test.name == name) else {
        panic!("engine ran no test named {name}");
    };
    test
}

fn mixed_module() -> TestModule {
    TestModule::new("tests/test_mixed.rs")
        .function(TestFunction::new("test_pass", |ctx| {
            ctx.log(log::Level::Info, "all good");
            Ok(())
        }))
        .function(TestFunction::new("test_fail", |_| Err(TestError::failed("boom"))))
        .function(TestFunction::new("test_skip", |_| Ok(())).mark(Mark::skip("not today")))
        .function(
            TestFunction::new("test_xfail", |_| Err(TestError::failed("still broken"))).mark(Mark::xfail("known bug")),
        )
}

#[rstest]
fn engine_and_runner_agree_on_outcomes(workspace: Workspace) {
    let (session, exit) = workspace.run(vec![mixed_module()], workspace.bridge());
    assert_eq!(exit, ExitCode::TestsFailed);
    assert_eq!(
        session.summary(),
        Summary {
            passed: 1,
            failed: 1,
            skipped: 2,
            errors: 0,
        }
    );

    let result = workspace.output();
    let stats = result.statistics();
    assert_eq!((stats.passed, stats.failed, stats.skipped), (1, 1, 2));
    assert_eq!(engine_test(&result, "test_pass").status, Status::Pass);
    let failed = engine_test(&result, "test_fail");
    assert_eq!(failed.status, Status::Fail);
    assert!(failed.message.contains("boom"), "{}", failed.message);
    let skipped = engine_test(&result, "test_skip");
    assert_eq!(skipped.status, Status::Skip);
    assert!(skipped.message.contains("not today"), "{}", skipped.message);
    let xfailed = engine_test(&result, "test_xfail");
    assert_eq!(xfailed.status, Status::Skip);
    assert_eq!(xfailed.message, "xfail: known bug");
    assert!(workspace.outdir.join("log.html").exists());
    assert!(workspace.outdir.join("report.html").exists());
}

#[rstest]
fn runner_logs_reach_the_engine_log(workspace: Workspace) {
    workspace.run(vec![mixed_module()], workspace.bridge());
    let result = workspace.output();
    let passed = engine_test(&result, "test_pass");
    let logged = passed
        .keywords()
        .flat_map(|keyword| keyword.messages())
        .any(|message| message.text == "all good");
    assert!(logged, "the call phase log message is in the engine result");
}

#[rstest]
fn failed_setup_skips_the_call_but_not_the_teardown(workspace: Workspace) {
    let module = TestModule::new("tests/test_db.rs").function(
        TestFunction::new("test_query", |_| panic!("the call must not run"))
            .fixture(Fixture::new("db", |_| Err(TestError::failed("db down")))),
    );
    let (session, _) = workspace.run(vec![module], workspace.bridge());
    let phases: Vec<(Phase, Outcome)> = session
        .reports()
        .iter()
        .filter(|report| report.nodeid == "tests/test_db.rs::test_query")
        .map(|report| (report.when, report.outcome))
        .collect();
    assert_eq!(phases, [(Phase::Setup, Outcome::Failed), (Phase::Teardown, Outcome::Passed)]);

    let result = workspace.output();
    let test = engine_test(&result, "test_query");
    assert_eq!(test.status, Status::Fail);
    assert!(test.message.starts_with("Setup failed"), "{}", test.message);
    assert!(test.message.contains("db down"), "{}", test.message);
}

#[rstest]
fn error_messages_fail_the_item_that_logged_them(workspace: Workspace) {
    let module = TestModule::new("tests/test_disk.rs").function(TestFunction::new("test_write", |ctx| {
        ctx.log(log::Level::Error, "disk full");
        Ok(())
    }));
    let (session, exit) = workspace.run(vec![module], workspace.bridge());
    assert_eq!(exit, ExitCode::TestsFailed);
    assert_eq!(session.summary().failed, 1);
    let failed = session
        .reports()
        .into_iter()
        .find(|report| report.failed())
        .and_then(|report| report.longrepr_text().map(str::to_string));
    assert!(failed.is_some_and(|text| text.contains("disk full")));
    assert_eq!(engine_test(&workspace.output(), "test_write").status, Status::Fail);
}

const LOGIN_SUITE: &str = "\
*** Test Cases ***
Valid Login
    Log    logging in
    Should Be Equal    admin    admin

Invalid Login
    Fail    wrong password
";

#[rstest]
fn robot_files_are_collected_and_run(workspace: Workspace) {
    workspace.write("login.robot", LOGIN_SUITE);
    let (session, exit) = workspace.run(Vec::new(), workspace.bridge());
    assert_eq!(exit, ExitCode::TestsFailed);
    let nodeids: Vec<String> = session.items().iter().map(|item| item.nodeid().to_string()).collect();
    assert_eq!(nodeids, ["login.robot::Valid Login", "login.robot::Invalid Login"]);
    assert_eq!(
        session.summary(),
        Summary {
            passed: 1,
            failed: 1,
            skipped: 0,
            errors: 0,
        }
    );
    let result = workspace.output();
    let invalid = engine_test(&result, "Invalid Login");
    assert_eq!(invalid.status, Status::Fail);
    assert_eq!(invalid.message, "wrong password");
}

#[rstest]
fn robot_files_and_modules_share_one_run(workspace: Workspace) {
    workspace.write("login.robot", LOGIN_SUITE);
    let (session, _) = workspace.run(vec![mixed_module()], workspace.bridge());
    assert_eq!(session.items().len(), 6);
    assert_eq!(workspace.output().suite.test_count(), 6);
}

#[rstest]
fn explicit_robot_and_module_paths_run_together(workspace: Workspace) {
    workspace.write("login.robot", LOGIN_SUITE);
    let session = install(
        Session::builder(RunnerConfig {
            paths: vec!["login.robot".into(), "tests/test_mixed.rs".into()],
            ..workspace.config()
        })
        .module(mixed_module()),
        workspace.bridge(),
    )
    .build();
    let exit = session.main().unwrap_or_else(|error| panic!("session failed: {error}"));
    assert_eq!(exit, ExitCode::TestsFailed);
    let nodeids: Vec<String> = session.items().iter().map(|item| item.nodeid().to_string()).collect();
    assert_eq!(nodeids.len(), 6);
    assert!(nodeids.iter().any(|nodeid| nodeid == "login.robot::Valid Login"));
    assert!(nodeids.iter().any(|nodeid| nodeid == "login.robot::Invalid Login"));
    assert_eq!(
        session.summary(),
        Summary {
            passed: 2,
            failed: 2,
            skipped: 2,
            errors: 0,
        }
    );
    let result = workspace.output();
    assert_eq!(result.suite.test_count(), 6);
    assert_eq!(engine_test(&result, "Valid Login").status, Status::Pass);
    assert_eq!(engine_test(&result, "Invalid Login").status, Status::Fail);
}

#[rstest]
fn suite_level_errors_become_session_errors(workspace: Workspace) {
    workspace.write(
        "setup.robot",
        "\
*** Settings ***
Suite Setup    Log    suite is misconfigured    level=ERROR

*** Test Cases ***
Still Runs
    No Operation
",
    );
    let (session, exit) = workspace.run(Vec::new(), workspace.bridge());
    assert_eq!(exit, ExitCode::TestsFailed);
    assert_eq!(session.summary().passed, 1);
    let errors = session.session_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.iter().all(|error| error.contains("suite is misconfigured")));
}

#[rstest]
fn keyword_selection_reaches_the_engine(workspace: Workspace) {
    let session = install(
        Session::builder(RunnerConfig {
            keyword: Some("pass".into()),
            ..workspace.config()
        })
        .module(mixed_module()),
        workspace.bridge(),
    )
    .build();
    let exit = session.main().unwrap_or_else(|error| panic!("session failed: {error}"));
    assert_eq!(exit, ExitCode::Ok);
    let names: Vec<String> = workspace
        .output()
        .suite
        .all_tests()
        .iter()
        .map(|test| test.name.clone())
        .collect();
    assert_eq!(names, ["test_pass"]);
}

#[rstest]
fn environment_options_apply_to_the_run(workspace: Workspace) {
    let bridge = workspace.bridge().with_env_options(Some("--name 'Nightly Run'".into()));
    workspace.run(vec![mixed_module()], bridge);
    assert_eq!(workspace.output().suite.name, "Nightly Run");
}

#[rstest]
#[case("--include smoke")]
#[case("--dryrun")]
fn banned_environment_options_are_usage_errors(workspace: Workspace, #[case] env: &str) {
    let bridge = workspace.bridge().with_env_options(Some(env.into()));
    let session = install(Session::builder(workspace.config()).module(mixed_module()), bridge).build();
    let Err(error) = session.main() else {
        panic!("banned options must stop the session");
    };
    assert_eq!(error.exit_code(), ExitCode::UsageError);
}

#[rstest]
fn collect_only_writes_no_output(workspace: Workspace) {
    let session = install(
        Session::builder(RunnerConfig {
            collect_only: true,
            ..workspace.config()
        })
        .module(mixed_module()),
        workspace.bridge(),
    )
    .build();
    assert!(session.main().is_ok());
    assert_eq!(session.items().len(), 4);
    assert!(!workspace.outdir.join("output.xml").exists());
}

#[rstest]
#[serial]
fn outputs_default_to_the_working_directory(workspace: Workspace) {
    let previous = std::env::current_dir().unwrap_or_else(|error| panic!("current dir: {error}"));
    if let Err(error) = std::env::set_current_dir(&workspace.outdir) {
        panic!("change dir: {error}");
    }
    let bridge = BridgeConfig::new(OptionMap::new()).with_env_options(None);
    workspace.run(vec![mixed_module()], bridge);
    let written = workspace.outdir.join("output.xml").exists();
    if let Err(error) = std::env::set_current_dir(previous) {
        panic!("restore dir: {error}");
    }
    assert!(written);
}

fn keyword_names(test: &TestResult) -> Vec<String> {
    test.keywords()
        .flat_map(|keyword| keyword.keywords())
        .map(|keyword| keyword.name.clone())
        .collect()
}

#[rstest]
fn checks_and_keyword_calls_show_up_as_keywords(workspace: Workspace) {
    let module = TestModule::new("tests/test_cart.rs")
        .function(TestFunction::new("test_total", |ctx| {
            let total = 1 + 2;
            check!(ctx, total == 3);
            ctx.run_keyword("Log", &["checked the total".to_string()])
        }))
        .function(TestFunction::new("test_empty", |ctx| {
            let items: Vec<u32> = Vec::new();
            check!(ctx, !items.is_empty(), "cart is empty");
            Ok(())
        }));
    let (session, _) = workspace.run(vec![module], workspace.bridge());
    assert_eq!(session.summary().failed, 1);

    let result = workspace.output();
    assert_eq!(keyword_names(engine_test(&result, "test_total")), ["assert", "Log"]);
    let empty = engine_test(&result, "test_empty");
    assert_eq!(empty.status, Status::Fail);
    assert!(empty.message.starts_with("cart is empty"), "{}", empty.message);
}

#[rstest]
fn hidden_passing_checks_stay_out_of_the_log(workspace: Workspace) {
    let module = TestModule::new("tests/test_quiet.rs").function(TestFunction::new("test_quiet", |ctx| {
        ctx.hide_asserts(|| -> Result<(), TestError> {
            check!(ctx, 2 > 1);
            Ok(())
        })
    }));
    workspace.run(vec![module], workspace.bridge());
    assert!(keyword_names(engine_test(&workspace.output(), "test_quiet")).is_empty());
}

#[rstest]
#[case::full_run(false)]
#[case::setup_only(true)]
fn maxfail_skips_the_rest_in_the_engine(workspace: Workspace, #[case] setup_only: bool) {
    let module = TestModule::new("tests/test_db.rs")
        .function(
            TestFunction::new("test_query", |_| panic!("the call must not run"))
                .fixture(Fixture::new("db", |_| Err(TestError::failed("db down")))),
        )
        .function(TestFunction::new("test_insert", |_| panic!("stopped sessions run nothing else")));
    let session = install(
        Session::builder(RunnerConfig {
            maxfail: Some(1),
            setup_only,
            ..workspace.config()
        })
        .module(module),
        workspace.bridge(),
    )
    .build();
    if let Err(error) = session.main() {
        panic!("session failed: {error}");
    }
    let phases: Vec<(String, Phase, Outcome)> = session
        .reports()
        .iter()
        .map(|report| (report.nodeid.clone(), report.when, report.outcome))
        .collect();
    let query = "tests/test_db.rs::test_query".to_string();
    assert_eq!(
        phases,
        [(query.clone(), Phase::Setup, Outcome::Failed), (query, Phase::Teardown, Outcome::Passed)]
    );
    assert_eq!(session.summary().failed, 1);

    let result = workspace.output();
    assert_eq!(engine_test(&result, "test_query").status, Status::Fail);
    let insert = engine_test(&result, "test_insert");
    assert_eq!(insert.status, Status::Skip);
    assert_eq!(insert.message, "stopping after 1 failures");
}

fn failure_messages(keyword: &KeywordResult, text: &str) -> usize {
    let own = keyword
        .messages()
        .filter(|message| message.level == LogLevel::Fail && message.text == text)
        .count();
    own + keyword.keywords().map(|child| failure_messages(child, text)).sum::<usize>()
}

#[rstest]
fn nested_keyword_failures_are_logged_once(workspace: Workspace) {
    workspace.write(
        "nested.robot",
        "\
*** Test Cases ***
Deep Failure
    Outer Step

*** Keywords ***
Outer Step
    Inner Step

Inner Step
    Fail    inner problem
",
    );
    let (session, exit) = workspace.run(Vec::new(), workspace.bridge());
    assert_eq!(exit, ExitCode::TestsFailed);
    assert_eq!(session.summary().failed, 1);
    let result = workspace.output();
    let test = engine_test(&result, "Deep Failure");
    assert_eq!(test.status, Status::Fail);
    assert_eq!(test.message, "inner problem");
    let logged: usize = test.keywords().map(|keyword| failure_messages(keyword, "inner problem")).sum();
    assert_eq!(logged, 1);
}
