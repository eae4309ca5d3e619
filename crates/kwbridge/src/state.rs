//! Per-session bridge state shared by the plugin and the engine extensions.

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;

use camino::Utf8Path;
use hashbrown::HashMap;
use kwbridge_engine::{OptionMap, TestCase, TestId};
use kwbridge_runner::{Item, Session};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::options;

/// An engine test found by the collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTest {
    /// Source file and name of the test, see
    /// [`test_key`](crate::collection::test_key).
    pub key: String,
    /// The test as parsed, slots included.
    pub test: TestCase,
}

/// State of the bridge for one session.
///
/// Shared through `Rc` by the runner plugin and every engine extension the
/// bridge installs for a run.
pub struct BridgeState {
    config: BridgeConfig,
    options: OnceCell<Rc<OptionMap>>,
    computing: Cell<bool>,
    engine_tests: RefCell<Vec<EngineTest>>,
    associations: RefCell<HashMap<TestId, Item>>,
    session_errors: RefCell<Vec<String>>,
    aborted: RefCell<Option<BridgeError>>,
}

impl BridgeState {
    /// Fresh state for `config`.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            options: OnceCell::new(),
            computing: Cell::new(false),
            engine_tests: RefCell::new(Vec::new()),
            associations: RefCell::new(HashMap::new()),
            session_errors: RefCell::new(Vec::new()),
            aborted: RefCell::new(None),
        }
    }

    /// Bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The session's reconciled engine options.
    ///
    /// Computed on first use; later calls return the same map.
    ///
    /// # Errors
    /// Usage errors from [`options::reconcile`], or an internal error when
    /// an extension asks for the options while they are being computed.
    pub fn options(&self, session: &Session) -> Result<Rc<OptionMap>, BridgeError> {
        if let Some(options) = self.options.get() {
            return Ok(Rc::clone(options));
        }
        if self.computing.replace(true) {
            return Err(BridgeError::internal(
                "engine options were computed twice in one session",
            ));
        }
        let computed = options::reconcile(&self.config, session);
        self.computing.set(false);
        let computed = Rc::new(computed?);
        self.options
            .set(Rc::clone(&computed))
            .map_err(|_| BridgeError::internal("engine options were computed twice in one session"))?;
        Ok(computed)
    }

    /// Replace the tests found by the collection pass.
    pub fn set_engine_tests(&self, tests: Vec<EngineTest>) {
        *self.engine_tests.borrow_mut() = tests;
    }

    /// Collected tests read from `source`.
    #[must_use]
    pub fn engine_tests_in(&self, source: &Utf8Path) -> Vec<EngineTest> {
        self.engine_tests
            .borrow()
            .iter()
            .filter(|found| found.test.source.as_deref().is_some_and(|path| same_file(path, source)))
            .cloned()
            .collect()
    }

    /// Number of tests found by the collection pass.
    #[must_use]
    pub fn engine_test_count(&self) -> usize {
        self.engine_tests.borrow().len()
    }

    /// Record that engine test `id` runs `item`.
    pub fn associate(&self, id: TestId, item: &Item) {
        self.associations.borrow_mut().insert(id, item.clone());
    }

    /// Item associated with engine test `id`.
    #[must_use]
    pub fn item_for(&self, id: TestId) -> Option<Item> {
        self.associations.borrow().get(&id).cloned()
    }

    /// Forget every association; each engine run builds its own.
    pub fn clear_associations(&self) {
        self.associations.borrow_mut().clear();
    }

    /// Record an engine error that belongs to no item.
    pub fn add_session_error(&self, message: impl Into<String>) {
        self.session_errors.borrow_mut().push(message.into());
    }

    /// Take the recorded session errors.
    #[must_use]
    pub fn take_session_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.session_errors.borrow_mut())
    }

    /// Record an error raised inside the engine run and return its text.
    ///
    /// The engine only sees such errors as failed keywords or extensions;
    /// the run is failed with the first one once the engine returns.
    pub fn abort(&self, error: BridgeError) -> String {
        let message = error.to_string();
        tracing::error!(%message, "error inside the engine run");
        let mut slot = self.aborted.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
        message
    }

    /// Take the first error recorded with [`Self::abort`].
    #[must_use]
    pub fn take_abort(&self) -> Option<BridgeError> {
        self.aborted.borrow_mut().take()
    }
}

fn same_file(left: &Utf8Path, right: &Utf8Path) -> bool {
    if left == right {
        return true;
    }
    match (left.canonicalize_utf8(), right.canonicalize_utf8()) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
