//! The `kwbridge` keyword library: runner phases as engine keywords.

use std::rc::Rc;

use kwbridge_engine::{Arg, ExecutionContext, KeywordError, KeywordLibrary, LogLevel, normalize_name};
use kwbridge_runner::{Item, Phase, Session, StepHost, TestError, TestReport};

use crate::collection::keyword_to_test_error;
use crate::error::BridgeError;
use crate::keys::REPORTS;
use crate::reconcile::{raise_for_report, xfail_message};
use crate::state::BridgeState;

/// Name suites import the library under.
pub const LIBRARY_NAME: &str = "kwbridge";
/// Keyword running the setup phase.
pub const SETUP: &str = "Setup";
/// Keyword running the call phase.
pub const RUN_TEST: &str = "Run Test";
/// Keyword running the teardown phase.
pub const TEARDOWN: &str = "Teardown";

/// Keyword library running the phases of the item whose node id is the
/// keyword's only argument.
pub struct BridgeLibrary {
    session: Session,
    state: Rc<BridgeState>,
}

impl BridgeLibrary {
    /// Library running items of `session`.
    #[must_use]
    pub fn new(session: Session, state: Rc<BridgeState>) -> Self {
        Self { session, state }
    }

    fn fatal(&self, error: BridgeError) -> KeywordError {
        KeywordError::fail(self.state.abort(error)).fatal()
    }

    fn item(&self, args: &[Arg]) -> Result<Item, KeywordError> {
        let Some(nodeid) = args.first().map(Arg::value) else {
            return Err(self.fatal(BridgeError::internal("bridge keyword called without a node id")));
        };
        self.session
            .item(nodeid)
            .ok_or_else(|| self.fatal(BridgeError::internal(format!("no runner item with node id '{nodeid}'"))))
    }

    fn phase(
        &self,
        item: &Item,
        when: Phase,
        host: &EngineHost<'_>,
        ctx: &ExecutionContext,
    ) -> Result<(), KeywordError> {
        let nextitem = item.nextitem();
        let report = self
            .session
            .call_and_report(item, when, nextitem.as_ref(), Some(host))
            .map_err(|error| self.fatal(BridgeError::Runner(error)))?;
        item.stash()
            .update_or_insert(&REPORTS, Vec::new, |reports| reports.push(report.clone()));
        if let Some(reason) = self.session.should_stop() {
            ctx.request_stop(reason);
        }
        raise_for_report(&self.state, item, &report)
    }

    fn setup_passed(item: &Item) -> bool {
        item.stash()
            .with(&REPORTS, |reports| {
                reports
                    .iter()
                    .find(|report| report.when == Phase::Setup)
                    .is_some_and(TestReport::passed)
            })
            .unwrap_or(false)
    }
}

impl KeywordLibrary for BridgeLibrary {
    fn name(&self) -> &str {
        LIBRARY_NAME
    }

    fn keyword_names(&self) -> Vec<String> {
        [SETUP, RUN_TEST, TEARDOWN].map(String::from).to_vec()
    }

    fn run_keyword(&self, name: &str, args: &[Arg], ctx: &ExecutionContext) -> Result<(), KeywordError> {
        let item = self.item(args)?;
        let host = EngineHost { ctx };
        let config = self.session.config();
        let keyword = normalize_name(name);
        if keyword == normalize_name(SETUP) {
            let _ = item.stash().take(&REPORTS);
            self.phase(&item, Phase::Setup, &host, ctx)
        } else if keyword == normalize_name(RUN_TEST) {
            if !Self::setup_passed(&item) {
                return Ok(());
            }
            if config.setup_show {
                self.session.show_item(&item, Some(&host));
            }
            if config.setup_only {
                return Ok(());
            }
            self.phase(&item, Phase::Call, &host, ctx)
        } else if keyword == normalize_name(TEARDOWN) {
            self.phase(&item, Phase::Teardown, &host, ctx)
        } else {
            Err(KeywordError::fail(format!("No keyword with name '{name}' found in {LIBRARY_NAME}.")))
        }
    }
}

/// Hosts runner phases inside the engine: logs, steps and keyword calls of
/// the running test go to the engine's log.
pub struct EngineHost<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> EngineHost<'a> {
    /// Host forwarding to `ctx`.
    #[must_use]
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }
}

/// Engine level of a runner log level.
#[must_use]
pub fn engine_level(level: log::Level) -> LogLevel {
    match level {
        log::Level::Error => LogLevel::Error,
        log::Level::Warn => LogLevel::Warn,
        log::Level::Info => LogLevel::Info,
        log::Level::Debug => LogLevel::Debug,
        log::Level::Trace => LogLevel::Trace,
    }
}

fn test_to_keyword_error(error: &TestError) -> KeywordError {
    match error {
        TestError::Failed(failure) => {
            let error = KeywordError::fail(failure.message.clone());
            if failure.reported { error.reported() } else { error }
        }
        TestError::Skipped { reason } => KeywordError::skip(reason.clone()),
        TestError::XFailed { reason } => KeywordError::skip(xfail_message(reason)),
    }
}

impl StepHost for EngineHost<'_> {
    fn log(&self, level: log::Level, message: &str, html: bool) {
        if html {
            self.ctx.log_html(engine_level(level), message);
        } else {
            self.ctx.log(engine_level(level), message);
        }
    }

    fn run_step(
        &self,
        name: &str,
        args: &[String],
        body: &mut dyn FnMut() -> Result<(), TestError>,
    ) -> Result<(), TestError> {
        let mut raised = None;
        let outcome = self.ctx.run_step(name, args, |_| {
            body().map_err(|error| {
                let translated = test_to_keyword_error(&error);
                raised = Some(error);
                translated
            })
        });
        let Err(error) = outcome else {
            return Ok(());
        };
        Err(match raised {
            Some(TestError::Failed(failure)) => TestError::already_reported(failure.message),
            Some(other) => other,
            None => keyword_to_test_error(&error),
        })
    }

    fn run_keyword(&self, name: &str, args: &[String]) -> Result<(), TestError> {
        self.ctx
            .run_keyword_by_name(name, args)
            .map_err(|error| keyword_to_test_error(&error))
    }
}
