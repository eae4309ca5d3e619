//! Moving failures between the runner and the engine.
//!
//! Runner reports become engine keyword outcomes so the engine's log and
//! statistics match the runner's. In the other direction, `ERROR` messages
//! the engine logs are attributed to the item that was running, which then
//! fails, or to the session when no item was running.

use std::rc::Rc;

use hashbrown::HashMap;
use kwbridge_engine::{
    ExtensionError, KeywordError, Listener, LogLevel, Message, TestCase, TestId, TestResult,
};
use kwbridge_runner::{Item, LongRepr, TestError, TestReport};

use crate::error::BridgeError;
use crate::keys::{ENGINE_ERRORS, PHASE_ERROR};
use crate::state::BridgeState;

/// First line of the failure detail listing engine errors.
pub const ENGINE_ERRORS_HEADER: &str = "engine errors occurred and were caught by kwbridge:";

/// Failure detail listing engine error `messages`.
///
/// # Examples
///
/// ```
/// use kwbridge::reconcile::format_engine_errors;
///
/// assert_eq!(
///     format_engine_errors(&["a".into(), "b".into()]),
///     "engine errors occurred and were caught by kwbridge:\n\n- a\n- b"
/// );
/// ```
#[must_use]
pub fn format_engine_errors(messages: &[String]) -> String {
    let lines: Vec<String> = messages.iter().map(|message| format!("- {message}")).collect();
    format!("{ENGINE_ERRORS_HEADER}\n\n{}", lines.join("\n"))
}

/// Skip message the engine shows for an expected failure.
#[must_use]
pub fn xfail_message(reason: &str) -> String {
    if reason.is_empty() {
        "xfail".to_string()
    } else {
        format!("xfail: {reason}")
    }
}

/// Turn the report of a runner phase into the outcome of the bridge keyword
/// that ran it.
///
/// # Errors
/// A skip for skipped reports, the phase's own failure for failed ones
/// (marked reported when it was already logged), and a fatal internal error
/// for a failed report carrying no failure at all.
pub fn raise_for_report(state: &BridgeState, item: &Item, report: &TestReport) -> Result<(), KeywordError> {
    if report.skipped() {
        if let Some(reason) = &report.wasxfail {
            return Err(KeywordError::skip(xfail_message(reason)));
        }
        return Err(KeywordError::skip(report.longrepr_text().unwrap_or("Skipped")));
    }
    if !report.failed() {
        return Ok(());
    }
    if let Some(TestError::Failed(failure)) = item.stash().get(&PHASE_ERROR) {
        let error = KeywordError::fail(failure.message);
        return Err(if failure.reported { error.reported() } else { error });
    }
    match &report.longrepr {
        Some(LongRepr::Text { text } | LongRepr::Failure { message: text, .. }) => Err(KeywordError::fail(text.clone())),
        Some(LongRepr::Skip { .. }) | None => {
            let error = BridgeError::internal(format!(
                "{} phase of '{}' failed without a failure to report",
                report.when.as_str(),
                report.nodeid
            ));
            Err(KeywordError::fail(state.abort(error)).fatal())
        }
    }
}

/// Listener attributing engine `ERROR` messages.
///
/// In a single-item run every message belongs to that item. Otherwise it
/// belongs to the item of the running test, or to the session when no test
/// is running or the test has no item.
pub struct ErrorDetector {
    state: Rc<BridgeState>,
    single: Option<Item>,
    current: Option<TestId>,
    attributed: HashMap<String, usize>,
}

impl ErrorDetector {
    /// Detector for a run of every selected item, or of `single` only.
    #[must_use]
    pub fn new(state: Rc<BridgeState>, single: Option<Item>) -> Self {
        Self {
            state,
            single,
            current: None,
            attributed: HashMap::new(),
        }
    }

    /// Remove `errors` this detector already attributed, leaving the ones
    /// that still need reporting.
    #[must_use]
    pub fn unattributed<'a>(&mut self, errors: impl IntoIterator<Item = &'a Message>) -> Vec<String> {
        let mut left = Vec::new();
        for message in errors.into_iter().filter(|message| message.level == LogLevel::Error) {
            match self.attributed.get_mut(&message.text) {
                Some(count) if *count > 0 => *count -= 1,
                _ => left.push(message.text.clone()),
            }
        }
        left
    }

    fn target(&self) -> Option<Item> {
        self.single
            .clone()
            .or_else(|| self.current.and_then(|id| self.state.item_for(id)))
    }
}

impl Listener for ErrorDetector {
    fn name(&self) -> &str {
        "kwbridge error detector"
    }

    fn start_test(&mut self, test: &TestCase, _: &TestResult) -> Result<(), ExtensionError> {
        self.current = Some(test.id);
        Ok(())
    }

    fn end_test(&mut self, _: &TestCase, _: &mut TestResult) -> Result<(), ExtensionError> {
        self.current = None;
        Ok(())
    }

    fn log_message(&mut self, message: &Message) -> Result<(), ExtensionError> {
        if message.level != LogLevel::Error {
            return Ok(());
        }
        let text = message.text.clone();
        *self.attributed.entry(text.clone()).or_insert(0) += 1;
        let Some(item) = self.target() else {
            self.state.add_session_error(text);
            return Ok(());
        };
        tracing::debug!(nodeid = item.nodeid(), %text, "engine error attributed to item");
        item.stash()
            .update_or_insert(&ENGINE_ERRORS, Vec::new, |errors| errors.push(text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use kwbridge_engine::OptionMap;
    use kwbridge_runner::{CallInfo, ItemBehavior, ItemSpec, Mark, Phase, TestContext, make_report};
    use rstest::rstest;

    struct Noop;

    impl ItemBehavior for Noop {
        fn runtest(&self, _: &TestContext<'_>) -> Result<(), TestError> {
            Ok(())
        }
    }

    fn item(marks: Vec<Mark>) -> Item {
        Item::new(
            ItemSpec {
                nodeid: "t.rs::test_it".into(),
                name: "test_it".into(),
                marks,
                ..ItemSpec::default()
            },
            Vec::new(),
            Rc::new(Noop),
        )
    }

    fn state() -> Rc<BridgeState> {
        Rc::new(BridgeState::new(
            BridgeConfig::new(OptionMap::new()).with_env_options(None),
        ))
    }

    fn raised(item: &Item, error: Option<TestError>) -> Result<(), KeywordError> {
        if let Some(error) = &error {
            item.stash().insert(&PHASE_ERROR, error.clone());
        }
        let report = make_report(item, &CallInfo { when: Phase::Call, error });
        raise_for_report(&state(), item, &report)
    }

    #[rstest]
    #[case(TestError::skipped("flaky"), "Skipped: flaky")]
    #[case(TestError::xfailed("known bug"), "xfail: known bug")]
    #[case(TestError::xfailed(""), "xfail")]
    fn skips_become_engine_skips(#[case] error: TestError, #[case] message: &str) {
        let Err(error) = raised(&item(Vec::new()), Some(error)) else {
            panic!("skipped phases raise");
        };
        assert!(error.is_skip());
        assert_eq!(error.message(), message);
    }

    #[test]
    fn failures_under_an_xfail_mark_are_expected() {
        let Err(error) = raised(&item(vec![Mark::xfail("flaky db")]), Some(TestError::failed("boom"))) else {
            panic!("expected failures raise a skip");
        };
        assert!(error.is_skip());
        assert_eq!(error.message(), "xfail: flaky db");
    }

    #[rstest]
    #[case(TestError::failed("boom"), false)]
    #[case(TestError::already_reported("boom"), true)]
    fn failures_keep_their_reported_flag(#[case] error: TestError, #[case] reported: bool) {
        let Err(error) = raised(&item(Vec::new()), Some(error)) else {
            panic!("failed phases raise");
        };
        assert!(!error.is_skip());
        assert_eq!(error.message(), "boom");
        assert_eq!(error.is_reported(), reported);
    }

    #[test]
    fn passing_phases_raise_nothing() {
        assert!(raised(&item(Vec::new()), None).is_ok());
    }

    #[test]
    fn text_failures_become_fresh_failures() {
        let item = item(Vec::new());
        let mut report = make_report(&item, &CallInfo { when: Phase::Call, error: None });
        report.force_failure(&format_engine_errors(&["disk full".into()]));
        let Err(error) = raise_for_report(&state(), &item, &report) else {
            panic!("forced failures raise");
        };
        assert!(error.message().ends_with("- disk full"));
        assert!(!error.is_reported());
    }

    #[test]
    fn failures_without_detail_are_internal_errors() {
        let state = state();
        let item = item(Vec::new());
        let mut report = make_report(&item, &CallInfo { when: Phase::Call, error: None });
        report.outcome = kwbridge_runner::Outcome::Failed;
        let Err(error) = raise_for_report(&state, &item, &report) else {
            panic!("failed reports raise");
        };
        assert!(error.is_fatal());
        assert!(matches!(state.take_abort(), Some(BridgeError::Internal(_))));
    }

    fn error(text: &str) -> Message {
        Message::new(LogLevel::Error, text)
    }

    #[test]
    fn errors_during_a_test_go_to_its_item() {
        let state = state();
        let item = item(Vec::new());
        let test = TestCase::new("T");
        state.associate(test.id, &item);
        let mut detector = ErrorDetector::new(Rc::clone(&state), None);
        let result = TestResult::from_test(&test);
        assert!(detector.start_test(&test, &result).is_ok());
        assert!(detector.log_message(&error("bad thing")).is_ok());
        assert!(detector.log_message(&Message::new(LogLevel::Warn, "meh")).is_ok());
        assert_eq!(item.stash().get(&ENGINE_ERRORS), Some(vec!["bad thing".to_string()]));
        assert!(state.take_session_errors().is_empty());
    }

    #[test]
    fn errors_outside_tests_go_to_the_session() {
        let state = state();
        let mut detector = ErrorDetector::new(Rc::clone(&state), None);
        assert!(detector.log_message(&error("suite setup broke")).is_ok());
        assert_eq!(state.take_session_errors(), ["suite setup broke"]);
    }

    #[test]
    fn single_item_runs_attribute_everything_to_the_item() {
        let item = item(Vec::new());
        let mut detector = ErrorDetector::new(state(), Some(item.clone()));
        assert!(detector.log_message(&error("late")).is_ok());
        assert_eq!(item.stash().get(&ENGINE_ERRORS), Some(vec!["late".to_string()]));
    }

    #[test]
    fn attributed_errors_are_not_reported_twice() {
        let mut detector = ErrorDetector::new(state(), None);
        assert!(detector.log_message(&error("seen")).is_ok());
        let errors = [error("seen"), error("listener failed"), Message::new(LogLevel::Warn, "w")];
        assert_eq!(detector.unattributed(&errors), ["listener failed"]);
    }
}
