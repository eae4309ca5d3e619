//! Replaying the runner's `runtest_protocol` chain around engine tests.
//!
//! When the engine drives the test loop, the runner never calls its
//! protocol chain. This listener calls the chain's implementations itself,
//! split in two: what would run before the phases runs in `start_test`, what
//! would run after them runs in `end_test`. Wrappers are started before the
//! test and resumed after it.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use kwbridge_engine::{ExtensionError, Listener, TestCase, TestResult};
use kwbridge_runner::plugin::{
    GeneratorState, HookChain, HookFunction, HookGenerator, HookImpl, HookOpts, ProtocolCall,
    WrapperHook,
};
use kwbridge_runner::{BUILTIN_PROTOCOL, Item, RunnerError, Session};

use crate::error::BridgeError;
use crate::state::BridgeState;

/// Wrappers started before the running test, keyed by their position in the
/// chain, waiting to be resumed after it.
#[derive(Default)]
pub struct PendingWrappers {
    generators: RefCell<HashMap<usize, (String, Box<dyn HookGenerator>)>>,
}

impl PendingWrappers {
    fn start(&self, index: usize, plugin: &str, generator: Box<dyn HookGenerator>) {
        self.generators
            .borrow_mut()
            .insert(index, (plugin.to_string(), generator));
    }

    fn take(&self, index: usize) -> Option<(String, Box<dyn HookGenerator>)> {
        self.generators.borrow_mut().remove(&index)
    }

    /// Number of wrappers waiting to be resumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.borrow().len()
    }

    /// `true` when no wrapper is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.borrow().is_empty()
    }

    fn clear(&self) {
        self.generators.borrow_mut().clear();
    }
}

const ENTER: HookOpts = HookOpts {
    tryfirst: true,
    trylast: false,
};
const EXIT: HookOpts = HookOpts {
    tryfirst: false,
    trylast: true,
};

fn enter_half(index: usize, plugin: &str, factory: WrapperHook, pending: Rc<PendingWrappers>) -> HookImpl {
    let name = plugin.to_string();
    HookImpl::plain(plugin, ENTER, move |call| {
        let mut generator = factory(call);
        match generator.resume(call)? {
            GeneratorState::Suspended => {
                pending.start(index, &name, generator);
                Ok(None)
            }
            GeneratorState::Finished => Err(RunnerError::Internal(format!(
                "runtest_protocol wrapper from '{name}' did not yield"
            ))),
        }
    })
}

fn exit_half(index: usize, plugin: &str, pending: Rc<PendingWrappers>) -> HookImpl {
    let name = plugin.to_string();
    HookImpl::plain(plugin, EXIT, move |call| {
        let Some((plugin, mut generator)) = pending.take(index) else {
            return Err(RunnerError::Internal(format!(
                "runtest_protocol wrapper from '{name}' was never started"
            )));
        };
        match generator.resume(call)? {
            GeneratorState::Finished => Ok(None),
            GeneratorState::Suspended => Err(RunnerError::Internal(format!(
                "runtest_protocol wrapper from '{plugin}' yielded more than once"
            ))),
        }
    })
}

/// Hooks running before and after a test, each list in registration order.
pub struct SplitChain {
    /// Plain hooks that are not `trylast`, plus the enter half of wrappers.
    pub start: Vec<HookImpl>,
    /// `trylast` plain hooks, plus the exit half of wrappers.
    pub end: Vec<HookImpl>,
}

/// Split `chain`, minus the runner's builtin protocol and the bridge's own
/// worker protocol, into the hooks that run before and after a test.
#[must_use]
pub fn split_chain(chain: &HookChain, pending: &Rc<PendingWrappers>) -> SplitChain {
    let mut chain = chain.clone();
    chain.remove_plugin(BUILTIN_PROTOCOL);
    chain.remove_plugin(crate::PLUGIN_NAME);
    let mut split = SplitChain {
        start: Vec::new(),
        end: Vec::new(),
    };
    for (index, hook) in chain.in_call_order().into_iter().rev().enumerate() {
        if let HookFunction::Wrapper(factory) = &hook.function {
            split
                .start
                .push(enter_half(index, &hook.plugin, Rc::clone(factory), Rc::clone(pending)));
            split.end.push(exit_half(index, &hook.plugin, Rc::clone(pending)));
        } else if hook.opts.trylast {
            split.end.push(hook);
        } else {
            split.start.push(hook);
        }
    }
    split
}

/// Listener replaying the protocol chain around every engine test.
pub struct RuntestHookReplayer {
    session: Session,
    state: Rc<BridgeState>,
    pending: Rc<PendingWrappers>,
    end: Vec<HookImpl>,
    short_circuited: bool,
}

impl RuntestHookReplayer {
    /// Replayer for the protocol chain of `session`.
    #[must_use]
    pub fn new(session: Session, state: Rc<BridgeState>) -> Self {
        Self {
            session,
            state,
            pending: Rc::new(PendingWrappers::default()),
            end: Vec::new(),
            short_circuited: false,
        }
    }

    fn item(&self, test: &TestCase) -> Result<Item, ExtensionError> {
        self.state.item_for(test.id).ok_or_else(|| {
            let error = BridgeError::internal(format!("engine test '{}' has no runner item", test.name));
            self.state.abort(error).into()
        })
    }

    fn call(&self, hooks: Vec<HookImpl>, item: &Item) -> Result<Option<bool>, ExtensionError> {
        let nextitem = item.nextitem();
        let call = ProtocolCall {
            session: &self.session,
            item,
            nextitem: nextitem.as_ref(),
        };
        HookChain::from_impls(hooks)
            .call(&call)
            .map_err(|error| self.state.abort(BridgeError::Runner(error)).into())
    }
}

impl Listener for RuntestHookReplayer {
    fn name(&self) -> &str {
        "kwbridge runtest hook replayer"
    }

    fn start_test(&mut self, test: &TestCase, _: &TestResult) -> Result<(), ExtensionError> {
        let item = self.item(test)?;
        let split = split_chain(self.session.protocol_chain(), &self.pending);
        self.end = split.end;
        self.short_circuited = self.call(split.start, &item)?.is_some();
        if self.short_circuited {
            tracing::debug!(nodeid = item.nodeid(), "runtest_protocol finished before the test ran");
        }
        self.session.runtest_logstart(&item);
        Ok(())
    }

    fn end_test(&mut self, test: &TestCase, _: &mut TestResult) -> Result<(), ExtensionError> {
        let end = std::mem::take(&mut self.end);
        let short_circuited = std::mem::replace(&mut self.short_circuited, false);
        let outcome = self.item(test).and_then(|item| {
            self.session.runtest_logfinish(&item);
            if short_circuited {
                return Ok(None);
            }
            self.call(end, &item)
        });
        self.pending.clear();
        outcome.map(|_| ())
    }
}

#[cfg(test)]
mod tests;
