//! Shared execution state handed to keyword libraries.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::library::{KeywordLibrary, Namespace, Resolved};
use crate::listener::ListenerSet;
use crate::model::{Arg, Keyword, TestId, UserKeyword};
use crate::result::{BodyItem, KeywordResult, LogLevel, Message, Status};
use crate::status::{FailureKind, KeywordError};

/// The test currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTest {
    /// Identity of the test.
    pub id: TestId,
    /// Test name.
    pub name: String,
}

struct Inner {
    namespace: RefCell<Namespace>,
    listeners: ListenerSet,
    frames: RefCell<Vec<KeywordResult>>,
    variables: RefCell<Vec<Vec<(String, String)>>>,
    threshold: Cell<LogLevel>,
    stop: RefCell<Option<String>>,
    errors: RefCell<Vec<Message>>,
    current_test: RefCell<Option<RunningTest>>,
    dry_run: bool,
}

/// Handle to the running engine.
///
/// Cloning is cheap and every clone refers to the same run. Keyword
/// libraries receive a context to log messages, run other keywords and ask
/// the engine to stop.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Rc<Inner>,
}

impl ExecutionContext {
    pub(crate) fn new(namespace: Namespace, listeners: ListenerSet, threshold: LogLevel, dry_run: bool) -> Self {
        Self {
            inner: Rc::new(Inner {
                namespace: RefCell::new(namespace),
                listeners,
                frames: RefCell::new(Vec::new()),
                variables: RefCell::new(Vec::new()),
                threshold: Cell::new(threshold),
                stop: RefCell::new(None),
                errors: RefCell::new(Vec::new()),
                current_test: RefCell::new(None),
                dry_run,
            }),
        }
    }

    /// Log a plain-text message from the running keyword.
    pub fn log(&self, level: LogLevel, text: impl Into<String>) {
        self.record(Message::new(level, text));
    }

    /// Log an HTML message from the running keyword.
    pub fn log_html(&self, level: LogLevel, html: impl Into<String>) {
        let mut message = Message::new(level, html);
        message.html = true;
        self.record(message);
    }

    fn record(&self, message: Message) {
        for failure in self.inner.listeners.log_message(&message) {
            self.add_error(failure);
        }
        if matches!(message.level, LogLevel::Warn | LogLevel::Error) {
            self.inner.errors.borrow_mut().push(message.clone());
        }
        if message.level >= self.inner.threshold.get() {
            if let Some(frame) = self.inner.frames.borrow_mut().last_mut() {
                frame.items.push(BodyItem::Message(message));
            }
        }
    }

    pub(crate) fn add_error(&self, text: String) {
        self.inner
            .errors
            .borrow_mut()
            .push(Message::new(LogLevel::Error, text));
    }

    /// Current log threshold.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.inner.threshold.get()
    }

    /// Change the log threshold, returning the previous one.
    pub fn set_log_level(&self, level: LogLevel) -> LogLevel {
        self.inner.threshold.replace(level)
    }

    /// Ask the engine to skip every remaining test with `reason`.
    ///
    /// The first request wins; later reasons are ignored.
    pub fn request_stop(&self, reason: impl Into<String>) {
        let mut stop = self.inner.stop.borrow_mut();
        if stop.is_none() {
            *stop = Some(reason.into());
        }
    }

    /// Reason given to [`Self::request_stop`], if any.
    #[must_use]
    pub fn stop_reason(&self) -> Option<String> {
        self.inner.stop.borrow().clone()
    }

    /// The test currently executing, if any.
    #[must_use]
    pub fn current_test(&self) -> Option<RunningTest> {
        self.inner.current_test.borrow().clone()
    }

    pub(crate) fn set_current_test(&self, test: Option<RunningTest>) {
        *self.inner.current_test.borrow_mut() = test;
    }

    /// `true` when keywords are only validated, not executed.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.inner.dry_run
    }

    /// Import a registered library into the running suite's scope.
    ///
    /// # Errors
    /// Fails when no library called `name` is registered.
    pub fn import_library(&self, name: &str) -> Result<(), KeywordError> {
        let library = self.inner.namespace.borrow().find_library(name);
        match library {
            Some(library) => {
                self.inner.namespace.borrow_mut().import(library);
                Ok(())
            }
            None => Err(KeywordError::fail(format!("No library '{name}' found."))),
        }
    }

    pub(crate) fn push_scope(&self, keywords: Vec<UserKeyword>) {
        self.inner.namespace.borrow_mut().push_scope(keywords);
    }

    pub(crate) fn pop_scope(&self) {
        self.inner.namespace.borrow_mut().pop_scope();
    }

    pub(crate) fn listeners(&self) -> &ListenerSet {
        &self.inner.listeners
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.inner
            .errors
            .borrow()
            .iter()
            .any(|message| message.level == LogLevel::Error)
    }

    pub(crate) fn take_errors(&self) -> Vec<Message> {
        std::mem::take(&mut *self.inner.errors.borrow_mut())
    }

    /// Run `keyword` as a child of the keyword currently executing.
    ///
    /// # Errors
    /// Returns the keyword's failure or skip. The message has already been
    /// logged when this returns, so the error comes back marked reported.
    pub fn run_keyword(&self, keyword: &Keyword) -> Result<(), KeywordError> {
        let (result, outcome) = self.execute(keyword);
        self.attach(result);
        outcome
    }

    /// Run the keyword `name` with plain `args`.
    ///
    /// # Errors
    /// See [`Self::run_keyword`].
    pub fn run_keyword_by_name(&self, name: &str, args: &[String]) -> Result<(), KeywordError> {
        self.run_keyword(&Keyword::new(name, args.iter().cloned()))
    }

    /// Run `body` as if it were a keyword called `name`.
    ///
    /// Messages logged and keywords run inside `body` nest under a keyword
    /// entry of that name, and a failure from `body` is logged there.
    ///
    /// # Errors
    /// See [`Self::run_keyword`].
    pub fn run_step<F>(&self, name: &str, args: &[String], body: F) -> Result<(), KeywordError>
    where
        F: FnOnce(&Self) -> Result<(), KeywordError>,
    {
        let keyword = Keyword::new(name, args.iter().cloned());
        self.inner
            .frames
            .borrow_mut()
            .push(KeywordResult::from_keyword(&keyword));
        let outcome = body(self);
        let result = self.pop_frame(&keyword);
        let (result, outcome) = Self::finish(result, outcome);
        self.attach(result);
        outcome
    }

    pub(crate) fn execute(&self, keyword: &Keyword) -> (KeywordResult, Result<(), KeywordError>) {
        let keyword = self.replace_variables(keyword);
        self.inner
            .frames
            .borrow_mut()
            .push(KeywordResult::from_keyword(&keyword));
        let outcome = self.dispatch(&keyword);
        let result = self.pop_frame(&keyword);
        Self::finish(result, outcome)
    }

    fn pop_frame(&self, keyword: &Keyword) -> KeywordResult {
        self.inner
            .frames
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| KeywordResult::from_keyword(keyword))
    }

    fn finish(
        mut result: KeywordResult,
        outcome: Result<(), KeywordError>,
    ) -> (KeywordResult, Result<(), KeywordError>) {
        match outcome {
            Ok(()) => {
                result.status = Status::Pass;
                (result, Ok(()))
            }
            Err(error) => {
                let (status, level) = match error.kind() {
                    FailureKind::Fail => (Status::Fail, LogLevel::Fail),
                    FailureKind::Skip => (Status::Skip, LogLevel::Skip),
                };
                if !error.is_reported() {
                    result
                        .items
                        .push(BodyItem::Message(Message::new(level, error.message())));
                }
                result.status = status;
                result.message = error.message().to_string();
                (result, Err(error.reported()))
            }
        }
    }

    fn attach(&self, result: KeywordResult) {
        match self.inner.frames.borrow_mut().last_mut() {
            Some(parent) => parent.items.push(BodyItem::Keyword(result)),
            None => log::debug!("dropping detached keyword result '{}'", result.name),
        }
    }

    fn set_frame_library(&self, library: &str, name: &str) {
        if let Some(frame) = self.inner.frames.borrow_mut().last_mut() {
            frame.library = Some(library.to_string());
            frame.name = name.to_string();
        }
    }

    fn dispatch(&self, keyword: &Keyword) -> Result<(), KeywordError> {
        if keyword.is_disabled() {
            return Ok(());
        }
        let resolved = self.inner.namespace.borrow().resolve(&keyword.name);
        match resolved {
            None => Err(KeywordError::fail(format!(
                "No keyword with name '{}' found.",
                keyword.name
            ))),
            Some(Resolved::User(user)) => self.run_user_keyword(&user, &keyword.args),
            Some(Resolved::Library { library, keyword: name }) => {
                self.set_frame_library(library.name(), &name);
                if self.is_dry_run() {
                    return Ok(());
                }
                self.run_library_keyword(library.as_ref(), &name, &keyword.args)
            }
        }
    }

    fn run_library_keyword(
        &self,
        library: &dyn KeywordLibrary,
        name: &str,
        args: &[Arg],
    ) -> Result<(), KeywordError> {
        log::trace!("running {}.{name}", library.name());
        library.run_keyword(name, args, self)
    }

    fn run_user_keyword(&self, keyword: &UserKeyword, args: &[Arg]) -> Result<(), KeywordError> {
        let bindings = bind_arguments(keyword, args)?;
        self.inner.variables.borrow_mut().push(bindings);
        let mut outcome = Ok(());
        for step in &keyword.body {
            outcome = self.run_keyword(step);
            if outcome.is_err() {
                break;
            }
        }
        self.inner.variables.borrow_mut().pop();
        outcome
    }

    fn replace_variables(&self, keyword: &Keyword) -> Keyword {
        let variables = self.inner.variables.borrow();
        let scope = variables.last().map_or(&[][..], Vec::as_slice);
        let mut replaced = keyword.clone();
        replaced.name = substitute(&keyword.name, scope);
        replaced.args = keyword
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Value(value) => Arg::Value(substitute(value, scope)),
                Arg::Cloaked(value) => Arg::Cloaked(value.clone()),
            })
            .collect();
        replaced
    }
}

fn bind_arguments(keyword: &UserKeyword, args: &[Arg]) -> Result<Vec<(String, String)>, KeywordError> {
    let specs: Vec<(String, Option<String>)> = keyword
        .arguments
        .iter()
        .map(|spec| match spec.split_once('=') {
            Some((name, default)) => (name.trim().to_string(), Some(default.to_string())),
            None => (spec.trim().to_string(), None),
        })
        .collect();
    let required = specs.iter().filter(|(_, default)| default.is_none()).count();
    if args.len() < required || args.len() > specs.len() {
        let expected = if required == specs.len() {
            required.to_string()
        } else {
            format!("{required} to {}", specs.len())
        };
        return Err(KeywordError::fail(format!(
            "Keyword '{}' expected {expected} arguments, got {}.",
            keyword.name,
            args.len()
        )));
    }
    Ok(specs
        .into_iter()
        .enumerate()
        .map(|(index, (name, default))| {
            let value = args
                .get(index)
                .map(|arg| arg.value().to_string())
                .or(default)
                .unwrap_or_default();
            (name, value)
        })
        .collect())
}

fn substitute(text: &str, scope: &[(String, String)]) -> String {
    if !text.contains("${") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let (before, candidate) = rest.split_at(start);
        out.push_str(before);
        let Some(end) = candidate.find('}') else {
            out.push_str(candidate);
            return out;
        };
        let (variable, after) = candidate.split_at(end + 1);
        match lookup(variable, scope) {
            Some(value) => out.push_str(&value),
            None => out.push_str(variable),
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

fn lookup(variable: &str, scope: &[(String, String)]) -> Option<String> {
    if let Some((_, value)) = scope.iter().find(|(name, _)| name == variable) {
        return Some(value.clone());
    }
    match variable.to_ascii_uppercase().as_str() {
        "${EMPTY}" => Some(String::new()),
        "${SPACE}" => Some(" ".to_string()),
        "${TRUE}" => Some("True".to_string()),
        "${FALSE}" => Some("False".to_string()),
        "${NONE}" => Some("None".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain", "plain")]
    #[case("${name} world", "hello world")]
    #[case("a${EMPTY}b", "ab")]
    #[case("${missing}", "${missing}")]
    #[case("${unterminated", "${unterminated")]
    fn substitutes_variables(#[case] input: &str, #[case] expected: &str) {
        let scope = vec![("${name}".to_string(), "hello".to_string())];
        assert_eq!(substitute(input, &scope), expected);
    }

    #[test]
    fn binding_checks_argument_counts() {
        let keyword = UserKeyword {
            name: "Greet".into(),
            arguments: vec!["${who}".into(), "${greeting}=hi".into()],
            ..UserKeyword::default()
        };
        let bound = bind_arguments(&keyword, &["bob".into()]);
        assert_eq!(
            bound.ok(),
            Some(vec![
                ("${who}".to_string(), "bob".to_string()),
                ("${greeting}".to_string(), "hi".to_string()),
            ])
        );
        let error = bind_arguments(&keyword, &[]).err();
        assert_eq!(
            error.map(|e| e.message().to_string()),
            Some("Keyword 'Greet' expected 1 to 2 arguments, got 0.".to_string())
        );
    }
}
