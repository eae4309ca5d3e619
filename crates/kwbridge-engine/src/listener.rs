//! Execution listeners.
//!
//! Listeners observe a run as it happens. A listener method that fails does
//! not stop the run: the failure is written to the execution errors, logged,
//! and handed back to the caller in [`crate::RunOutcome::listener_failures`].
//! Messages logged while a listener method is running are not forwarded to
//! `log_message`, which keeps listeners from observing their own output.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::ExtensionError;
use crate::model::{TestCase, TestSuite};
use crate::result::{Message, SuiteResult, TestResult};

/// Observes engine execution.
///
/// All methods default to doing nothing.
#[expect(unused_variables, reason = "default listener methods ignore their arguments")]
pub trait Listener {
    /// Name used in error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// A suite is about to run.
    ///
    /// # Errors
    /// Failures are recorded as execution errors; the run continues.
    fn start_suite(&mut self, suite: &TestSuite, result: &SuiteResult) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// A suite finished.
    ///
    /// # Errors
    /// Failures are recorded as execution errors; the run continues.
    fn end_suite(&mut self, suite: &TestSuite, result: &SuiteResult) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// A test is about to run.
    ///
    /// # Errors
    /// Failures are recorded as execution errors; the run continues.
    fn start_test(&mut self, test: &TestCase, result: &TestResult) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// A test finished. The result may still be adjusted.
    ///
    /// # Errors
    /// Failures are recorded as execution errors; the run continues.
    fn end_test(&mut self, test: &TestCase, result: &mut TestResult) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// A keyword logged a message.
    ///
    /// # Errors
    /// Failures are recorded as execution errors; the run continues.
    fn log_message(&mut self, message: &Message) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// The run is over and outputs have been written.
    ///
    /// # Errors
    /// Failures are recorded as execution errors.
    fn close(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Listener shared through the option map.
pub type SharedListener = Rc<RefCell<dyn Listener>>;

/// A listener method that returned an error.
#[derive(Debug)]
pub struct ListenerFailure {
    /// Listener name.
    pub listener: String,
    /// Method that failed.
    pub method: &'static str,
    /// The error it returned.
    pub error: ExtensionError,
}

impl ListenerFailure {
    /// Message recorded in the execution errors.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Calling method '{}' of listener '{}' failed: {}",
            self.method, self.listener, self.error
        )
    }
}

#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<SharedListener>,
    dispatching: Cell<bool>,
    failures: RefCell<Vec<ListenerFailure>>,
}

impl ListenerSet {
    pub(crate) fn new(listeners: Vec<SharedListener>) -> Self {
        Self {
            listeners,
            dispatching: Cell::new(false),
            failures: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn dispatch<F>(&self, method: &'static str, mut call: F) -> Vec<String>
    where
        F: FnMut(&mut dyn Listener) -> Result<(), ExtensionError>,
    {
        let outer = self.dispatching.replace(true);
        let mut messages = Vec::new();
        for listener in &self.listeners {
            // A listener re-entered through its own callback is skipped.
            let Ok(mut guard) = listener.try_borrow_mut() else {
                continue;
            };
            if let Err(error) = call(&mut *guard) {
                let failure = ListenerFailure {
                    listener: guard.name().to_string(),
                    method,
                    error,
                };
                let message = failure.describe();
                log::error!("{message}");
                messages.push(message);
                self.failures.borrow_mut().push(failure);
            }
        }
        self.dispatching.set(outer);
        messages
    }

    pub(crate) fn log_message(&self, message: &Message) -> Vec<String> {
        if self.dispatching.get() {
            return Vec::new();
        }
        self.dispatch("log_message", |listener| listener.log_message(message))
    }

    pub(crate) fn take_failures(&self) -> Vec<ListenerFailure> {
        std::mem::take(&mut *self.failures.borrow_mut())
    }
}
