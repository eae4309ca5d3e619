use std::cell::RefCell;
use std::rc::Rc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::mark::Mark;
use crate::module::{Fixture, TestClass, TestFunction};
use crate::{check, fail};

struct Root {
    _dir: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn root() -> Root {
    let dir = match TempDir::new() {
        Ok(dir) => dir,
        Err(err) => panic!("create temp dir: {err}"),
    };
    let Ok(path) = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()) else {
        panic!("temp dir is not UTF-8");
    };
    Root { _dir: dir, path }
}

fn config(root: &Root) -> RunnerConfig {
    RunnerConfig {
        rootdir: root.path.clone(),
        ..RunnerConfig::default()
    }
}

fn pass(_: &TestContext<'_>) -> Result<(), TestError> {
    Ok(())
}

fn boom(_: &TestContext<'_>) -> Result<(), TestError> {
    Err(TestError::failed("boom"))
}

type Trace = Rc<RefCell<Vec<String>>>;

fn recorder(trace: &Trace, label: &'static str) -> impl Fn(&TestContext<'_>) -> Result<(), TestError> + 'static {
    let trace = Rc::clone(trace);
    move |_| {
        trace.borrow_mut().push(label.to_string());
        Ok(())
    }
}

fn run(session: &Session) -> ExitCode {
    match session.main() {
        Ok(exit) => exit,
        Err(err) => panic!("session failed: {err}"),
    }
}

fn phases(session: &Session, nodeid: &str) -> Vec<(Phase, Outcome)> {
    session
        .reports()
        .into_iter()
        .filter(|report| report.nodeid == nodeid)
        .map(|report| (report.when, report.outcome))
        .collect()
}

#[rstest]
fn counts_and_exit_code(root: Root) {
    let module = TestModule::new("test_math.rs")
        .function(TestFunction::new("test_ok", pass))
        .function(TestFunction::new("test_bad", boom))
        .function(TestFunction::new("test_skipped", pass).mark(Mark::skip("later")));
    let session = Session::builder(config(&root)).module(module).build();
    assert_eq!(run(&session), ExitCode::TestsFailed);
    assert_eq!(
        session.summary(),
        Summary {
            passed: 1,
            failed: 1,
            skipped: 1,
            errors: 0,
        }
    );
}

#[rstest]
fn setup_failure_skips_call_but_runs_teardown(root: Root) {
    let trace: Trace = Rc::default();
    let module = TestModule::new("test_setup.rs")
        .setup(|_| Err(TestError::failed("no database")))
        .teardown(recorder(&trace, "module teardown"))
        .function(TestFunction::new("test_it", recorder(&trace, "call")));
    let session = Session::builder(config(&root)).module(module).build();
    assert_eq!(run(&session), ExitCode::TestsFailed);
    assert_eq!(
        phases(&session, "test_setup.rs::test_it"),
        [(Phase::Setup, Outcome::Failed), (Phase::Teardown, Outcome::Passed)]
    );
    // a failed owner setup is not torn down
    assert!(trace.borrow().is_empty());
}

#[rstest]
fn call_failure_still_tears_down(root: Root) {
    let trace: Trace = Rc::default();
    let module = TestModule::new("test_call.rs").function(
        TestFunction::new("test_it", boom).fixture(
            Fixture::new("db", recorder(&trace, "fixture setup"))
                .with_teardown(recorder(&trace, "fixture teardown")),
        ),
    );
    let session = Session::builder(config(&root)).module(module).build();
    run(&session);
    assert_eq!(*trace.borrow(), ["fixture setup", "fixture teardown"]);
    assert_eq!(
        phases(&session, "test_call.rs::test_it"),
        [
            (Phase::Setup, Outcome::Passed),
            (Phase::Call, Outcome::Failed),
            (Phase::Teardown, Outcome::Passed),
        ]
    );
}

#[rstest]
fn owners_set_up_once_and_torn_down_after_their_last_item(root: Root) {
    let trace: Trace = Rc::default();
    let module = TestModule::new("test_owner.rs")
        .setup(recorder(&trace, "module setup"))
        .teardown(recorder(&trace, "module teardown"))
        .class(
            TestClass::new("TestGroup")
                .setup(recorder(&trace, "class setup"))
                .teardown(recorder(&trace, "class teardown"))
                .function(TestFunction::new("test_a", recorder(&trace, "a")))
                .function(TestFunction::new("test_b", recorder(&trace, "b"))),
        )
        .function(TestFunction::new("test_c", recorder(&trace, "c")));
    let session = Session::builder(config(&root)).module(module).build();
    assert_eq!(run(&session), ExitCode::Ok);
    assert_eq!(
        *trace.borrow(),
        [
            "module setup",
            "class setup",
            "a",
            "b",
            "class teardown",
            "c",
            "module teardown",
        ]
    );
}

#[rstest]
fn maxfail_stops_the_loop(root: Root) {
    let module = TestModule::new("test_stop.rs")
        .function(TestFunction::new("test_one", boom))
        .function(TestFunction::new("test_two", boom));
    let session = Session::builder(RunnerConfig {
        maxfail: Some(1),
        ..config(&root)
    })
    .module(module)
    .build();
    run(&session);
    assert_eq!(session.should_stop().as_deref(), Some("stopping after 1 failures"));
    assert!(phases(&session, "test_stop.rs::test_two").is_empty());
}

#[rstest]
#[case(Some("one"), None, &["test_sel.rs::test_one"])]
#[case(Some("not one"), None, &["test_sel.rs::TestSlow::test_two"])]
#[case(None, Some("slow"), &["test_sel.rs::TestSlow::test_two"])]
#[case(Some("TestSlow or one"), None, &["test_sel.rs::test_one", "test_sel.rs::TestSlow::test_two"])]
fn selects_with_expressions(
    root: Root,
    #[case] keyword: Option<&str>,
    #[case] markexpr: Option<&str>,
    #[case] expected: &[&str],
) {
    let module = TestModule::new("test_sel.rs")
        .function(TestFunction::new("test_one", pass))
        .class(
            TestClass::new("TestSlow")
                .mark(Mark::new("slow"))
                .function(TestFunction::new("test_two", pass)),
        );
    let session = Session::builder(RunnerConfig {
        keyword: keyword.map(ToString::to_string),
        markexpr: markexpr.map(ToString::to_string),
        collect_only: true,
        ..config(&root)
    })
    .module(module)
    .build();
    assert_eq!(run(&session), ExitCode::Ok);
    let ids: Vec<String> = session.items().iter().map(|item| item.nodeid().to_string()).collect();
    assert_eq!(ids, expected);
    assert!(session.reports().is_empty());
}

#[rstest]
fn invalid_expression_is_a_usage_error(root: Root) {
    let session = Session::builder(RunnerConfig {
        keyword: Some("a and".into()),
        ..config(&root)
    })
    .build();
    let Err(err) = session.main() else {
        panic!("expected a usage error");
    };
    assert_eq!(err.exit_code(), ExitCode::UsageError);
}

#[rstest]
fn node_id_paths_narrow_collection(root: Root) {
    let module = TestModule::new("test_ids.rs")
        .function(TestFunction::new("test_one", pass))
        .function(TestFunction::new("test_two", pass));
    let session = Session::builder(RunnerConfig {
        paths: vec!["test_ids.rs::test_two".into()],
        ..config(&root)
    })
    .module(module)
    .build();
    run(&session);
    assert_eq!(session.summary().passed, 1);
    assert!(session.item("test_ids.rs::test_two").is_some());
}

#[rstest]
fn setup_only_never_calls(root: Root) {
    let trace: Trace = Rc::default();
    let module = TestModule::new("test_only.rs").function(TestFunction::new("test_it", recorder(&trace, "call")));
    let session = Session::builder(RunnerConfig {
        setup_only: true,
        ..config(&root)
    })
    .module(module)
    .build();
    assert_eq!(run(&session), ExitCode::Ok);
    assert!(trace.borrow().is_empty());
    assert_eq!(
        phases(&session, "test_only.rs::test_it"),
        [(Phase::Setup, Outcome::Passed), (Phase::Teardown, Outcome::Passed)]
    );
}

#[rstest]
fn nothing_collected(root: Root) {
    let session = Session::builder(config(&root)).build();
    assert_eq!(run(&session), ExitCode::NoTestsCollected);
}

#[rstest]
fn xfail_without_run_is_not_run(root: Root) {
    let module = TestModule::new("test_x.rs").function(
        TestFunction::new("test_it", |_| fail("must not run")).mark(Mark::xfail("broken").kwarg("run", "false")),
    );
    let session = Session::builder(config(&root)).module(module).build();
    assert_eq!(run(&session), ExitCode::Ok);
    let reports = session.reports();
    let Some(setup) = reports.first() else {
        panic!("expected a setup report");
    };
    assert!(setup.skipped());
    assert_eq!(setup.wasxfail.as_deref(), Some("[NOTRUN] broken"));
}

#[rstest]
fn panics_and_checks_become_failures(root: Root) {
    let module = TestModule::new("test_p.rs")
        .function(TestFunction::new("test_panic", |_| panic!("kaboom")))
        .function(TestFunction::new("test_check", |ctx| {
            let total = 2;
            check!(ctx, total == 3, "total was {total}");
            Ok(())
        }));
    let session = Session::builder(config(&root)).module(module).build();
    run(&session);
    let texts: Vec<String> = session
        .reports()
        .iter()
        .filter(|report| report.failed())
        .filter_map(|report| report.longrepr_text().map(ToString::to_string))
        .collect();
    assert_eq!(texts, ["kaboom", "total was 2\nassert total == 3"]);
}

#[rstest]
fn session_errors_fail_the_session(root: Root) {
    let module = TestModule::new("test_e.rs").function(TestFunction::new("test_ok", pass));
    let session = Session::builder(config(&root)).module(module).build();
    session.add_session_error("engine exploded");
    assert_eq!(run(&session), ExitCode::TestsFailed);
    assert_eq!(session.summary().errors, 1);
    assert_eq!(session.summary().passed, 1);
}

struct LoopOwner {
    ran: Rc<RefCell<bool>>,
}

impl Plugin for LoopOwner {
    fn name(&self) -> &str {
        "loop-owner"
    }

    fn runtestloop(&self, _: &Session) -> Option<Result<(), RunnerError>> {
        *self.ran.borrow_mut() = true;
        Some(Ok(()))
    }
}

#[rstest]
fn plugins_can_take_over_the_loop(root: Root) {
    let ran = Rc::new(RefCell::new(false));
    let module = TestModule::new("test_l.rs").function(TestFunction::new("test_it", boom));
    let session = Session::builder(config(&root))
        .module(module)
        .plugin(Rc::new(LoopOwner { ran: Rc::clone(&ran) }))
        .build();
    assert_eq!(run(&session), ExitCode::Ok);
    assert!(*ran.borrow());
    assert!(session.reports().is_empty());
}
