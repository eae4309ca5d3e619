//! Run keyword-driven engine suites and runner-native test functions in one
//! session.
//!
//! [`install`] adds the bridge to a runner session. The runner stays in
//! charge of collection, selection and reporting, while the engine drives
//! the run and writes its output, log and report:
//!
//! - `.robot` files are collected as runner items whose phases run the
//!   engine test's own keywords;
//! - runner test modules become engine suites, one test per function;
//! - every engine test calls back into the runner for its setup, call and
//!   teardown phases, so fixtures, markers and hooks behave as they do
//!   without the engine;
//! - failures, skips and expected failures are reported identically on both
//!   sides, and `ERROR` messages the engine logs fail the item (or the
//!   session) they belong to.
//!
//! Distributed runs execute each item in its own engine run on the worker
//! and merge the per-item outputs on the controller.

use std::rc::Rc;

use kwbridge_engine::OptionMap;
use kwbridge_runner::{AssertionEvent, Session, SessionBuilder, TestContext, TestError};

pub mod collection;
pub mod config;
pub mod distributed;
mod error;
pub mod filter;
pub mod injector;
mod keys;
pub mod library;
pub mod options;
pub mod plugin;
pub mod reconcile;
pub mod replay;
pub mod run;
mod state;
pub mod synth;

pub use config::{BridgeConfig, ENGINE_OPTIONS_ENV};
pub use error::BridgeError;
pub use plugin::{BridgePlugin, worker_protocol};
pub use state::{BridgeState, EngineTest};

/// Name of the bridge plugin, its keyword library and its protocol hook.
pub const PLUGIN_NAME: &str = "kwbridge";

/// Hooks users implement to adjust the bridge.
#[expect(unused_variables, reason = "default hook implementations ignore their arguments")]
pub trait BridgeExtension {
    /// Adjust the session's engine options after the command line and the
    /// environment were applied. Banned options set here are usage errors.
    fn modify_options(&self, options: &mut OptionMap, session: &Session) {}

    /// Report a check before the bridge does. Returning `Some` decides the
    /// check's outcome and keeps the bridge from logging it.
    fn assertion(&self, ctx: &TestContext<'_>, event: &AssertionEvent) -> Option<Result<(), TestError>> {
        None
    }
}

/// Add the bridge to `builder`.
///
/// # Examples
///
/// ```
/// use kwbridge::{BridgeConfig, install};
/// use kwbridge_engine::OptionMap;
/// use kwbridge_runner::{RunnerConfig, Session};
///
/// let config = BridgeConfig::new(OptionMap::new()).with_env_options(None);
/// let session = install(Session::builder(RunnerConfig::default()), config).build();
/// assert_eq!(session.protocol_chain().in_call_order().len(), 2);
/// ```
#[must_use]
pub fn install(builder: SessionBuilder, config: BridgeConfig) -> SessionBuilder {
    let state = Rc::new(BridgeState::new(config));
    builder
        .plugin(Rc::new(BridgePlugin::new(Rc::clone(&state))))
        .protocol_hook(worker_protocol(state))
}
