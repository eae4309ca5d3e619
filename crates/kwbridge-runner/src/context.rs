//! What test code sees while a phase runs.

use log::Level;

use crate::item::Item;
use crate::outcome::TestError;
use crate::session::Session;
use crate::stash::StashKey;

/// A keyword engine hosting the running phase.
///
/// When an item runs inside a keyword engine, log lines, steps and keyword
/// calls are forwarded to it so they appear in its log. Without a host they
/// go to the `log` facade and steps run inline.
pub trait StepHost {
    /// Write a message to the host's log.
    fn log(&self, level: Level, message: &str, html: bool);

    /// Run `body` as a named step in the host's log.
    ///
    /// # Errors
    /// The body's error, marked as already reported when the host logged it.
    fn run_step(
        &self,
        name: &str,
        args: &[String],
        body: &mut dyn FnMut() -> Result<(), TestError>,
    ) -> Result<(), TestError>;

    /// Run a host keyword by name.
    ///
    /// # Errors
    /// The keyword's failure or skip.
    fn run_keyword(&self, name: &str, args: &[String]) -> Result<(), TestError>;
}

/// Per-check overrides for [`TestContext::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssertOptions {
    /// Message shown when the check fails.
    pub fail_message: Option<String>,
    /// Log a passing check regardless of the session setting.
    pub log_pass: Option<bool>,
    /// Text logged instead of the expression.
    pub description: Option<String>,
}

impl AssertOptions {
    /// Options with only a failure message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            fail_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// A finished check, handed to plugins' `assertion` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionEvent {
    /// Source text of the checked expression.
    pub expression: String,
    /// Overrides given with the check.
    pub options: AssertOptions,
    /// Line of the check.
    pub line: u32,
    /// Failure the check raises; `None` when it passed.
    pub failure: Option<String>,
    /// Explanation of the check, e.g. `assert total == 3`.
    pub explanation: String,
}

static HIDDEN_ASSERTS: StashKey<usize> = StashKey::new("hidden asserts");

/// Access to the running item, its session and the hosting engine.
pub struct TestContext<'a> {
    item: &'a Item,
    session: &'a Session,
    host: Option<&'a dyn StepHost>,
}

impl<'a> TestContext<'a> {
    /// Context for `item`, hosted by `host` when running inside an engine.
    #[must_use]
    pub fn new(item: &'a Item, session: &'a Session, host: Option<&'a dyn StepHost>) -> Self {
        Self {
            item,
            session,
            host,
        }
    }

    /// The running item.
    #[must_use]
    pub fn item(&self) -> &'a Item {
        self.item
    }

    /// The session.
    #[must_use]
    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// The hosting engine, if any.
    #[must_use]
    pub fn host(&self) -> Option<&'a dyn StepHost> {
        self.host
    }

    /// Log `message` at `level`.
    pub fn log(&self, level: Level, message: &str) {
        if let Some(host) = self.host {
            host.log(level, message, false);
            return;
        }
        log::log!(level, "{}: {message}", self.item.nodeid());
    }

    /// Log raw HTML at `level`. Without a host the markup is logged as text.
    pub fn log_html(&self, level: Level, html: &str) {
        if let Some(host) = self.host {
            host.log(level, html, true);
            return;
        }
        log::log!(level, "{}: {html}", self.item.nodeid());
    }

    /// Run `body` as a named step.
    ///
    /// # Errors
    /// The body's error.
    pub fn step(
        &self,
        name: &str,
        args: &[String],
        body: impl FnOnce() -> Result<(), TestError>,
    ) -> Result<(), TestError> {
        let Some(host) = self.host else {
            return body();
        };
        let mut body = Some(body);
        let mut call = || body.take().map_or(Ok(()), |body| body());
        host.run_step(name, args, &mut call)
    }

    /// Run an engine keyword by name.
    ///
    /// # Errors
    /// The keyword's failure or skip, or a failure when no engine hosts the
    /// phase.
    pub fn run_keyword(&self, name: &str, args: &[String]) -> Result<(), TestError> {
        let Some(host) = self.host else {
            return Err(TestError::failed(format!(
                "cannot run keyword '{name}': no keyword engine is hosting this test"
            )));
        };
        host.run_keyword(name, args)
    }

    /// Record the check of `expression`, which evaluated to `passed`.
    ///
    /// Plugins get the first chance to report the check; when none does, a
    /// failed check becomes a plain failure.
    ///
    /// # Errors
    /// The failure of a check that did not pass.
    pub fn check(
        &self,
        expression: &str,
        passed: bool,
        options: AssertOptions,
        line: u32,
    ) -> Result<(), TestError> {
        let explanation = format!("assert {expression}");
        let failure = (!passed).then(|| {
            options
                .fail_message
                .as_ref()
                .map_or_else(|| explanation.clone(), |message| format!("{message}\n{explanation}"))
        });
        let event = AssertionEvent {
            expression: expression.to_string(),
            options,
            line,
            failure,
            explanation,
        };
        if let Some(result) = self.session.assertion(self, &event) {
            return result;
        }
        event.failure.map_or(Ok(()), |failure| Err(TestError::failed(failure)))
    }

    /// Run `body` with passing checks hidden from the log.
    pub fn hide_asserts<R>(&self, body: impl FnOnce() -> R) -> R {
        let stash = self.item.stash();
        stash.update_or_insert(&HIDDEN_ASSERTS, || 0, |depth| *depth += 1);
        let result = body();
        stash.with_mut(&HIDDEN_ASSERTS, |depth| *depth = depth.saturating_sub(1));
        result
    }

    /// `true` inside [`Self::hide_asserts`].
    #[must_use]
    pub fn asserts_hidden(&self) -> bool {
        self.item
            .stash()
            .with(&HIDDEN_ASSERTS, |depth| *depth > 0)
            .unwrap_or(false)
    }
}
