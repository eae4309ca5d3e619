//! Running the selected items inside the engine.
//!
//! One engine run covers every selected item: the synthesising parser turns
//! test modules into suites, the filterer drops unselected tests and the
//! injector points each test's slots at the bridge library. Distributed
//! workers make one such run per item instead.

use std::cell::RefCell;
use std::rc::Rc;

use camino::Utf8PathBuf;
use kwbridge_engine::{
    Engine, OptionItem, OptionMap, OptionValue, SharedListener, SharedVisitor,
};
use kwbridge_runner::{Item, Session};

use crate::collection::{ROBOT_EXTENSION, SuiteCollector};
use crate::distributed::{WORKER_METADATA, worker_output_path};
use crate::error::BridgeError;
use crate::filter::TestFilterer;
use crate::injector::ProtocolInjector;
use crate::keys::{ENGINE_ERRORS, REPORTS};
use crate::library::BridgeLibrary;
use crate::options::merge_options;
use crate::reconcile::{ErrorDetector, format_engine_errors};
use crate::replay::RuntestHookReplayer;
use crate::state::BridgeState;
use crate::synth::SynthesizingParser;

/// Directory below the session's temporary directory that empty runs use
/// as their only source.
pub const EMPTY_SUITE_DIR: &str = "kwbridge_empty_suite";

/// Which items an engine run covers.
#[derive(Clone)]
pub enum RunMode {
    /// Every selected item, replaying the protocol chain around each.
    All,
    /// One item, from inside the protocol chain of a distributed worker.
    Single(Item),
    /// No item at all; the run only produces empty outputs.
    Empty,
}

impl RunMode {
    fn single(&self) -> Option<Item> {
        match self {
            Self::Single(item) => Some(item.clone()),
            Self::All | Self::Empty => None,
        }
    }
}

/// Engine that can run the bridge library and the configured libraries.
#[must_use]
pub fn engine_for(session: &Session, state: &Rc<BridgeState>) -> Engine {
    let bridge = Engine::new().with_library(Rc::new(BridgeLibrary::new(session.clone(), Rc::clone(state))));
    state
        .config()
        .libraries
        .iter()
        .fold(bridge, |engine, library| engine.with_library(Rc::clone(library)))
}

/// Sources handed to the engine: collection paths that exist on disk or
/// contain a registered test module.
#[must_use]
pub fn engine_sources(session: &Session) -> Vec<Utf8PathBuf> {
    let rootdir = &session.config().rootdir;
    let modules: Vec<Utf8PathBuf> = session
        .modules()
        .iter()
        .map(|module| rootdir.join(module.path()))
        .collect();
    session
        .collection_paths()
        .into_iter()
        .filter(|path| path.exists() || modules.iter().any(|module| module.starts_with(path)))
        .collect()
}

fn visitor(visitor: impl kwbridge_engine::SuiteVisitor + 'static) -> OptionItem {
    let shared: SharedVisitor = Rc::new(RefCell::new(visitor));
    OptionItem::Visitor(shared)
}

fn run_options(
    session: &Session,
    state: &Rc<BridgeState>,
    mode: &RunMode,
    detector: SharedListener,
) -> Result<OptionMap, BridgeError> {
    let single = mode.single();
    let modifiers = match mode {
        RunMode::Empty => vec![visitor(SuiteCollector::default())],
        RunMode::All | RunMode::Single(_) => vec![
            visitor(TestFilterer::new(session.clone(), Rc::clone(state), single.clone())),
            visitor(ProtocolInjector::new(Rc::clone(state), single.clone())),
        ],
    };
    let mut listeners = vec![OptionItem::Listener(detector)];
    if matches!(mode, RunMode::All) {
        let replayer: SharedListener =
            Rc::new(RefCell::new(RuntestHookReplayer::new(session.clone(), Rc::clone(state))));
        listeners.push(OptionItem::Listener(replayer));
    }
    let parser = Rc::new(SynthesizingParser::new(session.clone(), Rc::clone(state)));
    let mut additions: OptionMap = [
        ("parser", OptionValue::List(vec![OptionItem::Parser(parser)])),
        ("prerunmodifier", OptionValue::List(modifiers)),
        ("listener", OptionValue::List(listeners)),
        ("runemptysuite", true.into()),
        ("extension", format!("rs:{ROBOT_EXTENSION}").as_str().into()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    if let Some(item) = &single {
        let worker = session
            .config()
            .worker
            .as_ref()
            .map_or("worker", |worker| worker.id.as_str());
        let output = worker_output_path(&session.basetemp()?, worker, item);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        additions.insert("output", output.as_str());
        additions.insert("log", "NONE");
        additions.insert("report", "NONE");
        additions.insert("prerebotmodifier", OptionValue::Unset);
        additions.push("metadata", OptionItem::Text(format!("{WORKER_METADATA}:{worker}")));
    }
    Ok(merge_options(&*state.options(session)?, &additions))
}

fn sources_for(session: &Session, mode: &RunMode) -> Result<Vec<Utf8PathBuf>, BridgeError> {
    let sources = engine_sources(session);
    if !sources.is_empty() || !matches!(mode, RunMode::Empty) {
        return Ok(sources);
    }
    let empty = session.basetemp()?.join(EMPTY_SUITE_DIR);
    std::fs::create_dir_all(&empty)?;
    Ok(vec![empty])
}

/// Fail when an item the run covered never reported its setup.
///
/// Items after a requested stop are left out: the engine skips them without
/// calling into the runner.
///
/// # Errors
/// Returns an internal error naming every item without a report.
pub fn check_reports(session: &Session, mode: &RunMode) -> Result<(), BridgeError> {
    if session.should_stop().is_some() {
        return Ok(());
    }
    let items = match mode {
        RunMode::All => session.items().to_vec(),
        RunMode::Single(item) => vec![item.clone()],
        RunMode::Empty => return Ok(()),
    };
    let missing: Vec<&str> = items
        .iter()
        .filter(|item| !item.stash().contains(&REPORTS))
        .map(Item::nodeid)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(BridgeError::internal(format!(
        "the engine run never reached these items: {}",
        missing.join(", ")
    )))
}

/// Run the engine over the session's sources in `mode`.
///
/// Engine errors no item claimed, and errors logged for an item after its
/// last phase was reported, become one session error listing them. An empty
/// run without any source runs over an empty directory, so outputs are still
/// written.
///
/// # Errors
/// The first error raised inside the run (an internal inconsistency or a
/// failing protocol hook), an engine error that stopped the run, or selected
/// items the run never reached.
pub fn run_engine(session: &Session, state: &Rc<BridgeState>, mode: &RunMode) -> Result<(), BridgeError> {
    let sources = sources_for(session, mode)?;
    if sources.is_empty() {
        tracing::warn!("no engine sources to run");
        return check_reports(session, mode);
    }
    let detector = Rc::new(RefCell::new(ErrorDetector::new(Rc::clone(state), mode.single())));
    let shared: SharedListener = detector.clone();
    let options = run_options(session, state, mode, shared)?;
    state.clear_associations();
    let outcome = engine_for(session, state).run(&sources, &options);
    if let Some(error) = state.take_abort() {
        return Err(error);
    }
    let outcome = outcome?;
    tracing::debug!(rc = outcome.return_code, tests = outcome.result.suite.test_count(), "engine run finished");
    let mut errors = state.take_session_errors();
    errors.extend(detector.borrow_mut().unattributed(&outcome.result.errors));
    for item in session.items().iter() {
        errors.extend(item.stash().take(&ENGINE_ERRORS).unwrap_or_default());
    }
    if !errors.is_empty() {
        session.add_session_error(format_engine_errors(&errors));
    }
    check_reports(session, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use kwbridge_runner::{RunnerConfig, TestFunction, TestModule, WorkerInfo};
    use rstest::rstest;

    fn session(config: RunnerConfig) -> Session {
        Session::builder(config)
            .module(TestModule::new("tests/test_login.rs").function(TestFunction::new("test_ok", |_| Ok(()))))
            .build()
    }

    fn state() -> Rc<BridgeState> {
        Rc::new(BridgeState::new(BridgeConfig::new(OptionMap::new()).with_env_options(None)))
    }

    #[rstest]
    #[case(Vec::new(), vec!["/nowhere"])]
    #[case(vec!["tests/test_login.rs".to_string()], vec!["/nowhere/tests/test_login.rs"])]
    #[case(vec!["missing.robot".to_string()], Vec::new())]
    fn sources_include_virtual_modules(#[case] paths: Vec<String>, #[case] expected: Vec<&str>) {
        let session = session(RunnerConfig {
            rootdir: "/nowhere".into(),
            paths,
            ..RunnerConfig::default()
        });
        let sources: Vec<String> = engine_sources(&session).iter().map(ToString::to_string).collect();
        assert_eq!(sources, expected);
    }

    fn detector(state: &Rc<BridgeState>) -> SharedListener {
        Rc::new(RefCell::new(ErrorDetector::new(Rc::clone(state), None)))
    }

    #[test]
    fn full_runs_replay_the_protocol_and_keep_outputs() {
        let state = state();
        let session = session(RunnerConfig::default());
        let Ok(options) = run_options(&session, &state, &RunMode::All, detector(&state)) else {
            panic!("options should build");
        };
        assert_eq!(options.list("listener").len(), 2);
        assert_eq!(options.list("prerunmodifier").len(), 2);
        assert_eq!(options.list("parser").len(), 1);
        assert_eq!(options.text("extension").as_deref(), Some("rs:robot"));
        assert!(options.flag("runemptysuite"));
        assert_eq!(options.text("output").as_deref(), Some("output.xml"));
        assert_eq!(options.text("console").as_deref(), Some("quiet"));
    }

    #[test]
    fn single_item_runs_write_a_worker_output() {
        let dir = tempfile::TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let Ok(basetemp) = Utf8PathBuf::from_path_buf(dir.path().join("gw1")) else {
            panic!("utf-8 temp dir");
        };
        let state = state();
        let session = session(RunnerConfig {
            worker: Some(WorkerInfo {
                id: "gw1".into(),
                basetemp: basetemp.clone(),
            }),
            ..RunnerConfig::default()
        });
        let Ok(()) = session.perform_collect() else {
            panic!("collection should succeed");
        };
        let Some(item) = session.items().first().cloned() else {
            panic!("the module has one item");
        };
        let Ok(options) = run_options(&session, &state, &RunMode::Single(item), detector(&state)) else {
            panic!("options should build");
        };
        assert_eq!(options.list("listener").len(), 1);
        let Some(output) = options.text("output") else {
            panic!("worker runs write an output");
        };
        assert!(output.starts_with(basetemp.join("kwbridge_worker_outputs").as_str()));
        assert_eq!(options.text("log"), None);
        assert_eq!(options.text("report"), None);
        assert_eq!(options.texts("metadata"), ["kwbridge-worker:gw1"]);
    }

    #[test]
    fn empty_runs_only_collect() {
        let state = state();
        let session = session(RunnerConfig::default());
        let Ok(options) = run_options(&session, &state, &RunMode::Empty, detector(&state)) else {
            panic!("options should build");
        };
        assert_eq!(options.list("prerunmodifier").len(), 1);
        assert_eq!(options.list("listener").len(), 1);
    }

    fn collected() -> (Session, Item) {
        let session = session(RunnerConfig::default());
        let Ok(()) = session.perform_collect() else {
            panic!("collection should succeed");
        };
        let Some(item) = session.items().first().cloned() else {
            panic!("the module has one item");
        };
        (session, item)
    }

    #[rstest]
    #[case::full_run(false)]
    #[case::single_item(true)]
    fn items_without_reports_are_internal_errors(#[case] single: bool) {
        let (session, item) = collected();
        let mode = if single { RunMode::Single(item) } else { RunMode::All };
        match check_reports(&session, &mode) {
            Err(BridgeError::Internal(message)) => {
                assert!(message.contains("tests/test_login.rs::test_ok"), "message was: {message}");
            }
            other => panic!("expected an internal error, got {other:?}"),
        }
    }

    #[test]
    fn reported_items_pass_the_check() {
        let (session, item) = collected();
        item.stash().insert(&REPORTS, Vec::new());
        assert!(check_reports(&session, &RunMode::All).is_ok());
        assert!(check_reports(&session, &RunMode::Single(item)).is_ok());
    }

    #[test]
    fn stopped_sessions_skip_the_check() {
        let (session, _) = collected();
        session.request_stop("stopping after 1 failures");
        assert!(check_reports(&session, &RunMode::All).is_ok());
    }

    #[rstest]
    #[case::empty_run(true)]
    #[case::full_run(false)]
    fn runs_without_sources_fall_back_to_an_empty_directory(#[case] empty: bool) {
        let dir = tempfile::TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let Ok(basetemp) = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()) else {
            panic!("utf-8 temp dir");
        };
        let session = session(RunnerConfig {
            rootdir: "/nowhere".into(),
            paths: vec!["missing.robot".to_string()],
            basetemp: Some(basetemp.clone()),
            ..RunnerConfig::default()
        });
        let mode = if empty { RunMode::Empty } else { RunMode::All };
        let sources = sources_for(&session, &mode).unwrap_or_else(|error| panic!("sources: {error}"));
        if empty {
            let fallback = basetemp.join(EMPTY_SUITE_DIR);
            assert_eq!(sources, [fallback.clone()]);
            assert!(fallback.is_dir());
        } else {
            assert!(sources.is_empty());
        }
    }
}
