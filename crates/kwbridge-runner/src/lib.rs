//! Test-function runner used by `kwbridge`.
//!
//! Tests are declared as [`TestModule`]s of functions and classes; plugins
//! may contribute items for other file types. A [`Session`] collects and
//! selects [`Item`]s, runs each through the setup, call and teardown phases
//! behind a chain of `runtest_protocol` hooks, and turns every phase into a
//! [`TestReport`]. Items can also be handed out to independent worker
//! sessions, see [`dist`].

pub mod config;
mod context;
pub mod dist;
mod error;
pub mod expr;
mod item;
mod macros;
mod mark;
mod module;
mod outcome;
pub mod plugin;
mod report;
mod session;
mod setup_state;
mod stash;

pub use config::{RunnerConfig, WorkerInfo};
pub use context::{AssertOptions, AssertionEvent, StepHost, TestContext};
pub use error::{ExitCode, RunnerError};
pub use item::{Hook, Item, ItemBehavior, ItemKind, ItemSpec, Location, Owner, OwnerKind, link_items};
pub use mark::{Mark, XFail, skip_reason};
pub use module::{Fixture, TestClass, TestFunction, TestModule};
pub use outcome::{Failure, TestError, fail, panic_message, skip, xfail};
pub use plugin::Plugin;
pub use report::{CallInfo, LongRepr, Outcome, Phase, TestReport, make_report};
pub use session::{BUILTIN_PROTOCOL, Session, SessionBuilder, Summary};
pub use stash::{Stash, StashKey};
