//! Plugin hooks and the `runtest_protocol` hook chain.
//!
//! Plugins implement [`Plugin`]; every method has a no-op default. The
//! per-item protocol is separate: it is a chain of [`HookImpl`]s ordered the
//! way a plugin manager orders them, where the first implementation returning
//! a result ends the chain and wrappers run around the plain implementations.

use std::fmt;
use std::rc::Rc;

use camino::Utf8Path;

use crate::context::{AssertionEvent, TestContext};
use crate::error::{ExitCode, RunnerError};
use crate::item::Item;
use crate::outcome::TestError;
use crate::report::{CallInfo, TestReport};
use crate::session::Session;

/// Session hooks.
#[expect(unused_variables, reason = "default hook implementations ignore their arguments")]
pub trait Plugin {
    /// Plugin name, used in error messages.
    fn name(&self) -> &str;

    /// Called once before collection.
    ///
    /// # Errors
    /// Aborts the session.
    fn sessionstart(&self, session: &Session) -> Result<(), RunnerError> {
        Ok(())
    }

    /// Called once before files are collected.
    ///
    /// # Errors
    /// Aborts the session with a collection error.
    fn collection(&self, session: &Session) -> Result<(), RunnerError> {
        Ok(())
    }

    /// Collect the items of a non-module file.
    ///
    /// # Errors
    /// Aborts the session with a collection error.
    fn collect_file(&self, session: &Session, path: &Utf8Path) -> Result<Vec<Item>, RunnerError> {
        Ok(Vec::new())
    }

    /// Reorder or drop collected items after selection.
    ///
    /// # Errors
    /// Aborts the session with a collection error.
    fn collection_modifyitems(
        &self,
        session: &Session,
        items: &mut Vec<Item>,
    ) -> Result<(), RunnerError> {
        Ok(())
    }

    /// Take over running every item. The first plugin returning `Some` wins.
    fn runtestloop(&self, session: &Session) -> Option<Result<(), RunnerError>> {
        None
    }

    /// Called before the phases of `item` run.
    fn runtest_logstart(&self, item: &Item) {}

    /// Called after the phases of `item` ran.
    fn runtest_logfinish(&self, item: &Item) {}

    /// Called after each phase of `item` with its result.
    fn runtest_phase(&self, item: &Item, call: &CallInfo) {}

    /// Adjust the report built for a phase.
    ///
    /// # Errors
    /// Aborts the session.
    fn runtest_makereport(
        &self,
        item: &Item,
        call: &CallInfo,
        report: &mut TestReport,
    ) -> Result<(), RunnerError> {
        Ok(())
    }

    /// Called with every finished report.
    fn runtest_logreport(&self, report: &TestReport) {}

    /// Report a check. The first plugin returning `Some` decides its outcome.
    fn assertion(
        &self,
        ctx: &TestContext<'_>,
        event: &AssertionEvent,
    ) -> Option<Result<(), TestError>> {
        None
    }

    /// Called once after every item ran.
    ///
    /// # Errors
    /// Turns the exit code into an internal error.
    fn sessionfinish(&self, session: &Session, exit: ExitCode) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Arguments of a `runtest_protocol` call.
#[derive(Clone, Copy)]
pub struct ProtocolCall<'a> {
    /// The session.
    pub session: &'a Session,
    /// Item to run.
    pub item: &'a Item,
    /// Item that runs next, if any.
    pub nextitem: Option<&'a Item>,
}

/// Ordering options of a hook implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookOpts {
    /// Run before implementations without this flag.
    pub tryfirst: bool,
    /// Run after implementations without this flag.
    pub trylast: bool,
}

/// State of a wrapper after it was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Paused at its yield point.
    Suspended,
    /// Ran to completion.
    Finished,
}

/// A wrapper in the middle of running: resumed once to run the code before
/// its yield point and once more to run the rest.
pub trait HookGenerator {
    /// Run to the next yield point or to completion.
    ///
    /// # Errors
    /// The wrapper failed.
    fn resume(&mut self, call: &ProtocolCall<'_>) -> Result<GeneratorState, RunnerError>;
}

/// Plain hook body. `Some` ends the chain with that result.
pub type PlainHook = Rc<dyn Fn(&ProtocolCall<'_>) -> Result<Option<bool>, RunnerError>>;

/// Wrapper factory, called once per protocol run.
pub type WrapperHook = Rc<dyn Fn(&ProtocolCall<'_>) -> Box<dyn HookGenerator>>;

/// Body of a hook implementation.
#[derive(Clone)]
pub enum HookFunction {
    /// Runs inside the chain.
    Plain(PlainHook),
    /// Runs around the plain implementations.
    Wrapper(WrapperHook),
}

/// One `runtest_protocol` implementation.
#[derive(Clone)]
pub struct HookImpl {
    /// Name of the plugin providing the implementation.
    pub plugin: String,
    /// Ordering options.
    pub opts: HookOpts,
    /// Body.
    pub function: HookFunction,
}

impl HookImpl {
    /// Plain implementation.
    #[must_use]
    pub fn plain(
        plugin: impl Into<String>,
        opts: HookOpts,
        body: impl Fn(&ProtocolCall<'_>) -> Result<Option<bool>, RunnerError> + 'static,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            opts,
            function: HookFunction::Plain(Rc::new(body)),
        }
    }

    /// Wrapper running `before` ahead of the chain and `after` behind it.
    #[must_use]
    pub fn wrapper(
        plugin: impl Into<String>,
        opts: HookOpts,
        before: impl Fn(&ProtocolCall<'_>) -> Result<(), RunnerError> + 'static,
        after: impl Fn(&ProtocolCall<'_>) -> Result<(), RunnerError> + 'static,
    ) -> Self {
        let before: Rc<BeforeAfter> = Rc::new(before);
        let after: Rc<BeforeAfter> = Rc::new(after);
        Self {
            plugin: plugin.into(),
            opts,
            function: HookFunction::Wrapper(Rc::new(move |_| {
                Box::new(TwoStep {
                    before: Rc::clone(&before),
                    after: Rc::clone(&after),
                    step: 0,
                }) as Box<dyn HookGenerator>
            })),
        }
    }

    /// `true` for wrappers.
    #[must_use]
    pub fn is_wrapper(&self) -> bool {
        matches!(self.function, HookFunction::Wrapper(_))
    }
}

impl fmt::Debug for HookImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookImpl")
            .field("plugin", &self.plugin)
            .field("opts", &self.opts)
            .field("wrapper", &self.is_wrapper())
            .finish()
    }
}

type BeforeAfter = dyn Fn(&ProtocolCall<'_>) -> Result<(), RunnerError>;

struct TwoStep {
    before: Rc<BeforeAfter>,
    after: Rc<BeforeAfter>,
    step: u8,
}

impl HookGenerator for TwoStep {
    fn resume(&mut self, call: &ProtocolCall<'_>) -> Result<GeneratorState, RunnerError> {
        self.step = self.step.saturating_add(1);
        match self.step {
            1 => {
                (self.before)(call)?;
                Ok(GeneratorState::Suspended)
            }
            2 => {
                (self.after)(call)?;
                Ok(GeneratorState::Finished)
            }
            _ => Ok(GeneratorState::Finished),
        }
    }
}

/// Registered `runtest_protocol` implementations.
///
/// Registration keeps plain implementations and wrappers in separate groups.
/// Within a group `trylast` implementations go to the front, `tryfirst` ones
/// to the back and the rest just below the `tryfirst` ones; calls walk the
/// list back to front, so later registrations run first.
#[derive(Clone, Default, Debug)]
pub struct HookChain {
    plain: Vec<HookImpl>,
    wrappers: Vec<HookImpl>,
}

impl HookChain {
    /// Chain holding `impls`, registered in order.
    #[must_use]
    pub fn from_impls(impls: impl IntoIterator<Item = HookImpl>) -> Self {
        let mut chain = Self::default();
        for hook in impls {
            chain.register(hook);
        }
        chain
    }

    /// Register an implementation.
    pub fn register(&mut self, hook: HookImpl) {
        let group = if hook.is_wrapper() {
            &mut self.wrappers
        } else {
            &mut self.plain
        };
        if hook.opts.trylast {
            group.insert(0, hook);
        } else if hook.opts.tryfirst {
            group.push(hook);
        } else {
            let position = group
                .iter()
                .rposition(|existing| !existing.opts.tryfirst)
                .map_or(0, |index| index + 1);
            group.insert(position, hook);
        }
    }

    /// Drop every implementation of `plugin`.
    pub fn remove_plugin(&mut self, plugin: &str) {
        self.plain.retain(|hook| hook.plugin != plugin);
        self.wrappers.retain(|hook| hook.plugin != plugin);
    }

    /// Implementations in call order: wrappers first, then plain ones.
    #[must_use]
    pub fn in_call_order(&self) -> Vec<HookImpl> {
        self.wrappers
            .iter()
            .rev()
            .chain(self.plain.iter().rev())
            .cloned()
            .collect()
    }

    /// Run the chain.
    ///
    /// Wrappers run their first half in call order, then plain
    /// implementations run until one returns a result, then the wrappers
    /// finish in reverse order.
    ///
    /// # Errors
    /// The first failing implementation's error, after started wrappers were
    /// finished, or an internal error when a wrapper suspends twice.
    pub fn call(&self, call: &ProtocolCall<'_>) -> Result<Option<bool>, RunnerError> {
        let mut started: Vec<(String, Box<dyn HookGenerator>)> = Vec::new();
        let mut outcome = Ok(None);
        for hook in self.wrappers.iter().rev() {
            let HookFunction::Wrapper(factory) = &hook.function else {
                continue;
            };
            let mut generator = factory(call);
            match generator.resume(call) {
                Ok(GeneratorState::Suspended) => started.push((hook.plugin.clone(), generator)),
                Ok(GeneratorState::Finished) => {
                    outcome = Err(RunnerError::Internal(format!(
                        "runtest_protocol wrapper from '{}' did not yield",
                        hook.plugin
                    )));
                    break;
                }
                Err(error) => {
                    outcome = Err(error);
                    break;
                }
            }
        }
        if outcome.is_ok() {
            outcome = call_plain(&self.plain, call);
        }
        for (plugin, mut generator) in started.into_iter().rev() {
            let finished = generator.resume(call).and_then(|state| match state {
                GeneratorState::Finished => Ok(()),
                GeneratorState::Suspended => Err(RunnerError::Internal(format!(
                    "runtest_protocol wrapper from '{plugin}' yielded more than once"
                ))),
            });
            if let Err(error) = finished {
                if outcome.is_ok() {
                    outcome = Err(error);
                }
            }
        }
        outcome
    }
}

fn call_plain(plain: &[HookImpl], call: &ProtocolCall<'_>) -> Result<Option<bool>, RunnerError> {
    for hook in plain.iter().rev() {
        let HookFunction::Plain(body) = &hook.function else {
            continue;
        };
        if let Some(result) = body(call)? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests;
