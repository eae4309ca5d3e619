use std::cell::RefCell;
use std::rc::Rc;

use rstest::rstest;

use super::*;
use crate::config::RunnerConfig;
use crate::item::{ItemBehavior, ItemSpec};

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

fn wrapper(trace: &Trace, label: &'static str, opts: HookOpts) -> HookImpl {
    let before = Rc::clone(trace);
    let after = Rc::clone(trace);
    HookImpl::wrapper(
        label,
        opts,
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

fn call(chain: &HookChain) -> Result<Option<bool>, RunnerError> {
    let session = Session::builder(RunnerConfig::default()).build();
    let item = item();
    chain.call(&ProtocolCall {
        session: &session,
        item: &item,
        nextitem: None,
    })
}

const FIRST: HookOpts = HookOpts {
    tryfirst: true,
    trylast: false,
};
const LAST: HookOpts = HookOpts {
    tryfirst: false,
    trylast: true,
};

#[test]
fn later_registrations_run_first_within_priority() {
    let trace: Trace = Rc::default();
    let chain = HookChain::from_impls([
        plain(&trace, "last", LAST, None),
        plain(&trace, "a", HookOpts::default(), None),
        plain(&trace, "first", FIRST, None),
        plain(&trace, "b", HookOpts::default(), None),
    ]);
    let plugins: Vec<String> = chain.in_call_order().into_iter().map(|hook| hook.plugin).collect();
    assert_eq!(plugins, ["first", "b", "a", "last"]);
    assert!(matches!(call(&chain), Ok(None)));
    assert_eq!(*trace.borrow(), ["first", "b", "a", "last"]);
}

#[test]
fn first_result_ends_the_chain_and_wrappers_still_exit() {
    let trace: Trace = Rc::default();
    let chain = HookChain::from_impls([
        plain(&trace, "never", LAST, None),
        plain(&trace, "decides", HookOpts::default(), Some(true)),
        wrapper(&trace, "outer", HookOpts::default()),
    ]);
    assert!(matches!(call(&chain), Ok(Some(true))));
    assert_eq!(*trace.borrow(), ["outer enter", "decides", "outer exit"]);
}

#[rstest]
#[case(HookOpts::default())]
#[case(FIRST)]
fn wrappers_run_around_plain_hooks(#[case] opts: HookOpts) {
    let trace: Trace = Rc::default();
    let chain = HookChain::from_impls([
        wrapper(&trace, "w1", opts),
        wrapper(&trace, "w2", HookOpts::default()),
        plain(&trace, "body", HookOpts::default(), None),
    ]);
    assert!(call(&chain).is_ok());
    let Some(first) = trace.borrow().first().cloned() else {
        panic!("no hooks ran");
    };
    assert!(first.ends_with("enter"));
    assert_eq!(trace.borrow().get(2).map(String::as_str), Some("body"));
    assert_eq!(trace.borrow().len(), 5);
}

struct Stubborn;

impl HookGenerator for Stubborn {
    fn resume(&mut self, _: &ProtocolCall<'_>) -> Result<GeneratorState, RunnerError> {
        Ok(GeneratorState::Suspended)
    }
}

#[test]
fn wrapper_yielding_twice_is_internal_error() {
    let chain = HookChain::from_impls([HookImpl {
        plugin: "stubborn".into(),
        opts: HookOpts::default(),
        function: HookFunction::Wrapper(Rc::new(|_| Box::new(Stubborn) as Box<dyn HookGenerator>)),
    }]);
    assert!(matches!(call(&chain), Err(RunnerError::Internal(_))));
}

#[test]
fn removing_a_plugin_drops_its_hooks() {
    let trace: Trace = Rc::default();
    let mut chain = HookChain::from_impls([
        plain(&trace, "runner", HookOpts::default(), Some(true)),
        plain(&trace, "other", HookOpts::default(), None),
    ]);
    chain.remove_plugin("runner");
    assert!(matches!(call(&chain), Ok(None)));
    assert_eq!(*trace.borrow(), ["other"]);
}
