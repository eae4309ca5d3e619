//! The runner plugin tying the session to the engine.

use std::rc::Rc;

use camino::Utf8Path;
use kwbridge_runner::plugin::{HookImpl, HookOpts};
use kwbridge_runner::{
    AssertionEvent, CallInfo, ExitCode, Item, Plugin, RunnerError, Session, TestContext,
    TestError, TestReport,
};

use crate::PLUGIN_NAME;
use crate::collection::{collect_engine_tests, engine_items};
use crate::distributed::{clear_worker_outputs, merge_outputs};
use crate::keys::{ENGINE_ERRORS, PHASE_ERROR};
use crate::reconcile::format_engine_errors;
use crate::run::{RunMode, run_engine};
use crate::state::BridgeState;

/// Runner plugin hosting the session's tests in the engine.
///
/// Outside distributed runs the plugin takes over the test loop and runs
/// every item in one engine run. Distributed workers run each item through
/// [`worker_protocol`] instead, and the controller merges their outputs
/// when the session finishes.
pub struct BridgePlugin {
    state: Rc<BridgeState>,
}

impl BridgePlugin {
    /// Plugin sharing `state` with the engine extensions it installs.
    #[must_use]
    pub fn new(state: Rc<BridgeState>) -> Self {
        Self { state }
    }

    fn shows_check(ctx: &TestContext<'_>, event: &AssertionEvent) -> bool {
        if event.failure.is_some() {
            return true;
        }
        event.options.log_pass.unwrap_or_else(|| {
            ctx.session().config().assertions_in_log && !ctx.asserts_hidden()
        })
    }
}

impl Plugin for BridgePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn sessionstart(&self, session: &Session) -> Result<(), RunnerError> {
        self.state.options(session)?;
        if session.config().is_controller() {
            clear_worker_outputs(&session.basetemp()?)?;
        }
        Ok(())
    }

    fn collection(&self, session: &Session) -> Result<(), RunnerError> {
        collect_engine_tests(session, &self.state).map_err(RunnerError::from)
    }

    fn collect_file(&self, session: &Session, path: &Utf8Path) -> Result<Vec<Item>, RunnerError> {
        Ok(engine_items(session, &self.state, path))
    }

    fn runtestloop(&self, session: &Session) -> Option<Result<(), RunnerError>> {
        let config = session.config();
        if config.collect_only || config.is_distributed() {
            return None;
        }
        Some(run_engine(session, &self.state, &RunMode::All).map_err(RunnerError::from))
    }

    fn runtest_phase(&self, item: &Item, call: &CallInfo) {
        let stash = item.stash();
        let _ = stash.take(&PHASE_ERROR);
        if let Some(error) = &call.error {
            stash.insert(&PHASE_ERROR, error.clone());
        }
    }

    fn runtest_makereport(
        &self,
        item: &Item,
        _: &CallInfo,
        report: &mut TestReport,
    ) -> Result<(), RunnerError> {
        let errors = item.stash().take(&ENGINE_ERRORS).unwrap_or_default();
        if !errors.is_empty() {
            report.force_failure(&format_engine_errors(&errors));
        }
        Ok(())
    }

    fn assertion(
        &self,
        ctx: &TestContext<'_>,
        event: &AssertionEvent,
    ) -> Option<Result<(), TestError>> {
        let answered = self
            .state
            .config()
            .extensions
            .iter()
            .find_map(|extension| extension.assertion(ctx, event));
        if answered.is_some() {
            return answered;
        }
        if !Self::shows_check(ctx, event) {
            return None;
        }
        let shown = event
            .options
            .description
            .clone()
            .unwrap_or_else(|| event.expression.clone());
        Some(ctx.step("assert", &[shown], || {
            if event.options.description.is_some() {
                ctx.log(log::Level::Info, &format!("assert {}", event.expression));
            }
            if let Some(failure) = &event.failure {
                return Err(TestError::failed(failure.clone()));
            }
            ctx.log(log::Level::Info, &event.explanation);
            Ok(())
        }))
    }

    fn sessionfinish(&self, session: &Session, _: ExitCode) -> Result<(), RunnerError> {
        let config = session.config();
        if config.is_controller() && !config.collect_only {
            merge_outputs(session, &self.state)?;
        }
        Ok(())
    }
}

/// `runtest_protocol` implementation of distributed workers: each item runs
/// in an engine run of its own, writing a worker output the controller
/// merges later.
///
/// Outside workers the implementation passes to the next one.
#[must_use]
pub fn worker_protocol(state: Rc<BridgeState>) -> HookImpl {
    let opts = HookOpts {
        tryfirst: true,
        trylast: false,
    };
    HookImpl::plain(PLUGIN_NAME, opts, move |call| {
        if call.session.config().worker.is_none() {
            return Ok(None);
        }
        call.session.runtest_logstart(call.item);
        run_engine(call.session, &state, &RunMode::Single(call.item.clone()))?;
        call.session.runtest_logfinish(call.item);
        Ok(Some(true))
    })
}
