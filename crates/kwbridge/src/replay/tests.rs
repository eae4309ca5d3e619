use std::cell::RefCell;
use std::rc::Rc;

use kwbridge_engine::OptionMap;
use kwbridge_runner::{ItemBehavior, ItemSpec, RunnerConfig, TestContext, TestError};

use super::*;
use crate::config::BridgeConfig;

type Trace = Rc<RefCell<Vec<String>>>;

struct Noop;

impl ItemBehavior for Noop {
    fn runtest(&self, _: &TestContext<'_>) -> Result<(), TestError> {
        Ok(())
    }
}

fn item() -> Item {
    Item::new(
        ItemSpec {
            nodeid: "t.rs::test_it".into(),
            name: "test_it".into(),
            ..ItemSpec::default()
        },
        Vec::new(),
        Rc::new(Noop),
    )
}

fn plain(trace: &Trace, label: &'static str, opts: HookOpts, result: Option<bool>) -> HookImpl {
    let trace = Rc::clone(trace);
    HookImpl::plain(label, opts, move |_| {
        trace.borrow_mut().push(label.to_string());
        Ok(result)
    })
}

fn wrapper(trace: &Trace, label: &'static str) -> HookImpl {
    let before = Rc::clone(trace);
    let after = Rc::clone(trace);
    HookImpl::wrapper(
        label,
        HookOpts::default(),
        move |_| {
            before.borrow_mut().push(format!("{label} enter"));
            Ok(())
        },
        move |_| {
            after.borrow_mut().push(format!("{label} exit"));
            Ok(())
        },
    )
}

fn mixed_chain(trace: &Trace) -> Vec<HookImpl> {
    let trylast = HookOpts {
        tryfirst: false,
        trylast: true,
    };
    let tryfirst = HookOpts {
        tryfirst: true,
        trylast: false,
    };
    vec![
        plain(trace, "plain", HookOpts::default(), None),
        wrapper(trace, "outer"),
        plain(trace, "late", trylast, None),
        plain(trace, "early", tryfirst, None),
        wrapper(trace, "inner"),
    ]
}

fn protocol_call<R>(session: &Session, item: &Item, body: impl FnOnce(&ProtocolCall<'_>) -> R) -> R {
    body(&ProtocolCall {
        session,
        item,
        nextitem: None,
    })
}

#[test]
fn replay_runs_hooks_in_the_order_the_chain_would() {
    let session = Session::builder(RunnerConfig::default()).build();
    let item = item();

    let direct: Trace = Trace::default();
    let chain = HookChain::from_impls(mixed_chain(&direct));
    let Ok(None) = protocol_call(&session, &item, |call| chain.call(call)) else {
        panic!("no hook returns a result");
    };

    let replayed: Trace = Trace::default();
    let pending = Rc::new(PendingWrappers::default());
    let split = split_chain(&HookChain::from_impls(mixed_chain(&replayed)), &pending);
    let Ok(None) = protocol_call(&session, &item, |call| HookChain::from_impls(split.start).call(call)) else {
        panic!("start hooks return nothing");
    };
    assert_eq!(pending.len(), 2);
    replayed.borrow_mut().push("test".to_string());
    let Ok(None) = protocol_call(&session, &item, |call| HookChain::from_impls(split.end).call(call)) else {
        panic!("end hooks return nothing");
    };
    assert!(pending.is_empty());

    let mut expected = direct.borrow().clone();
    let split_at = expected
        .iter()
        .position(|entry| entry == "late")
        .unwrap_or(expected.len());
    expected.insert(split_at, "test".to_string());
    assert_eq!(*replayed.borrow(), expected);
}

#[test]
fn builtin_protocol_is_not_replayed() {
    let session = Session::builder(RunnerConfig::default()).build();
    let pending = Rc::new(PendingWrappers::default());
    let split = split_chain(session.protocol_chain(), &pending);
    assert!(split.start.is_empty());
    assert!(split.end.is_empty());
}

struct Stubborn;

impl HookGenerator for Stubborn {
    fn resume(&mut self, _: &ProtocolCall<'_>) -> Result<GeneratorState, RunnerError> {
        Ok(GeneratorState::Suspended)
    }
}

#[test]
fn wrappers_that_suspend_twice_are_internal_errors() {
    let session = Session::builder(RunnerConfig::default()).build();
    let item = item();
    let pending = Rc::new(PendingWrappers::default());
    let factory: WrapperHook = Rc::new(|_| Box::new(Stubborn) as Box<dyn HookGenerator>);
    let hook = HookImpl {
        plugin: "stubborn".into(),
        opts: HookOpts::default(),
        function: HookFunction::Wrapper(factory),
    };
    let split = split_chain(&HookChain::from_impls([hook]), &pending);
    let Ok(None) = protocol_call(&session, &item, |call| HookChain::from_impls(split.start).call(call)) else {
        panic!("the wrapper starts");
    };
    let Err(RunnerError::Internal(error)) =
        protocol_call(&session, &item, |call| HookChain::from_impls(split.end).call(call))
    else {
        panic!("resuming a suspended wrapper again must fail");
    };
    assert!(error.contains("yielded more than once"));
}

fn state() -> Rc<BridgeState> {
    Rc::new(BridgeState::new(
        BridgeConfig::new(OptionMap::new()).with_env_options(None),
    ))
}

#[test]
fn a_result_from_a_start_hook_skips_the_end_hooks() {
    let trace: Trace = Trace::default();
    let trylast = HookOpts {
        tryfirst: false,
        trylast: true,
    };
    let session = Session::builder(RunnerConfig::default())
        .protocol_hook(plain(&trace, "late", trylast, None))
        .protocol_hook(wrapper(&trace, "wrap"))
        .protocol_hook(plain(&trace, "done", HookOpts::default(), Some(true)))
        .build();
    let state = state();
    let item = item();
    let test = TestCase::new("test_it");
    state.associate(test.id, &item);
    let mut replayer = RuntestHookReplayer::new(session, Rc::clone(&state));
    let mut result = TestResult::from_test(&test);
    assert!(replayer.start_test(&test, &result).is_ok());
    assert!(replayer.end_test(&test, &mut result).is_ok());
    assert_eq!(*trace.borrow(), ["wrap enter", "done"]);
    assert!(replayer.pending.is_empty());
}

#[test]
fn tests_without_items_fail_the_run() {
    let session = Session::builder(RunnerConfig::default()).build();
    let state = state();
    let mut replayer = RuntestHookReplayer::new(session, Rc::clone(&state));
    let test = TestCase::new("orphan");
    assert!(replayer.start_test(&test, &TestResult::from_test(&test)).is_err());
    assert!(matches!(state.take_abort(), Some(BridgeError::Internal(_))));
}
