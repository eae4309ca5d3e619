//! The test session: collection, the per-item protocol and the exit code.

use std::cell::{Cell, Ref, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::RunnerConfig;
use crate::context::{AssertionEvent, StepHost, TestContext};
use crate::dist::{self, WorkerLauncher};
use crate::error::{ExitCode, RunnerError};
use crate::expr::Expression;
use crate::item::{Item, link_items};
use crate::mark::{XFail, skip_reason};
use crate::module::TestModule;
use crate::outcome::TestError;
use crate::plugin::{HookChain, HookImpl, HookOpts, Plugin, ProtocolCall};
use crate::report::{CallInfo, LongRepr, Outcome, Phase, TestReport, make_report};
use crate::setup_state::SetupState;
use crate::stash::Stash;

/// Name under which the built-in `runtest_protocol` implementation is
/// registered.
pub const BUILTIN_PROTOCOL: &str = "runner";

/// Builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: RunnerConfig,
    modules: Vec<TestModule>,
    plugins: Vec<Rc<dyn Plugin>>,
    protocol: Vec<HookImpl>,
    launcher: Option<Rc<dyn WorkerLauncher>>,
}

impl SessionBuilder {
    /// Add a test module.
    #[must_use]
    pub fn module(mut self, module: TestModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Add test modules.
    #[must_use]
    pub fn modules(mut self, modules: impl IntoIterator<Item = TestModule>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Register a plugin. Plugins are called in registration order.
    #[must_use]
    pub fn plugin(mut self, plugin: Rc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Register a `runtest_protocol` implementation.
    #[must_use]
    pub fn protocol_hook(mut self, hook: HookImpl) -> Self {
        self.protocol.push(hook);
        self
    }

    /// Launcher used when `numprocesses` asks for workers.
    #[must_use]
    pub fn launcher(mut self, launcher: Rc<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Build the session.
    #[must_use]
    pub fn build(self) -> Session {
        let builtin = HookImpl::plain(BUILTIN_PROTOCOL, HookOpts::default(), |call| {
            call.session.runtest_logstart(call.item);
            call.session.runtestprotocol(call.item, call.nextitem, None)?;
            call.session.runtest_logfinish(call.item);
            Ok(Some(true))
        });
        let chain = HookChain::from_impls(std::iter::once(builtin).chain(self.protocol));
        Session {
            inner: Rc::new(SessionInner {
                config: self.config,
                modules: self.modules,
                plugins: self.plugins,
                protocol: chain,
                launcher: self.launcher,
                items: RefCell::new(Vec::new()),
                stash: Stash::default(),
                reports: RefCell::new(Vec::new()),
                errors: RefCell::new(Vec::new()),
                shouldstop: RefCell::new(None),
                testsfailed: Cell::new(0),
                setup_state: SetupState::default(),
            }),
        }
    }
}

/// Item counts of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Items whose phases all passed, including unexpected passes.
    pub passed: usize,
    /// Items with a failed phase.
    pub failed: usize,
    /// Items skipped in any phase, including expected failures.
    pub skipped: usize,
    /// Session-level errors.
    pub errors: usize,
}

struct SessionInner {
    config: RunnerConfig,
    modules: Vec<TestModule>,
    plugins: Vec<Rc<dyn Plugin>>,
    protocol: HookChain,
    launcher: Option<Rc<dyn WorkerLauncher>>,
    items: RefCell<Vec<Item>>,
    stash: Stash,
    reports: RefCell<Vec<TestReport>>,
    errors: RefCell<Vec<String>>,
    shouldstop: RefCell<Option<String>>,
    testsfailed: Cell<usize>,
    setup_state: SetupState,
}

/// One test session.
///
/// Cloning is cheap and every clone refers to the same session, so keyword
/// libraries and listeners that outlive a borrow can keep a handle.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    /// Start building a session with `config`.
    #[must_use]
    pub fn builder(config: RunnerConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            ..SessionBuilder::default()
        }
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Session-wide scratch storage.
    #[must_use]
    pub fn stash(&self) -> &Stash {
        &self.inner.stash
    }

    /// Selected items in run order. Empty before collection.
    #[must_use]
    pub fn items(&self) -> Ref<'_, Vec<Item>> {
        self.inner.items.borrow()
    }

    /// Selected item with `nodeid`.
    #[must_use]
    pub fn item(&self, nodeid: &str) -> Option<Item> {
        self.inner.items
            .borrow()
            .iter()
            .find(|item| item.nodeid() == nodeid)
            .cloned()
    }

    /// Registered `runtest_protocol` implementations.
    #[must_use]
    pub fn protocol_chain(&self) -> &HookChain {
        &self.inner.protocol
    }

    /// Every report logged so far.
    #[must_use]
    pub fn reports(&self) -> Vec<TestReport> {
        self.inner.reports.borrow().clone()
    }

    /// Session-level errors recorded so far.
    #[must_use]
    pub fn session_errors(&self) -> Vec<String> {
        self.inner.errors.borrow().clone()
    }

    /// Reason the session should stop, once one was given.
    #[must_use]
    pub fn should_stop(&self) -> Option<String> {
        self.inner.shouldstop.borrow().clone()
    }

    /// Ask the session to stop after the running item.
    pub fn request_stop(&self, reason: impl Into<String>) {
        self.inner.shouldstop.borrow_mut().get_or_insert_with(|| reason.into());
    }

    /// Directory for temporary files: `basetemp` when configured, otherwise
    /// a per-process directory under the system temporary directory.
    ///
    /// # Errors
    /// Returns [`RunnerError::Io`] when the directory cannot be created.
    pub fn basetemp(&self) -> Result<Utf8PathBuf, RunnerError> {
        let dir = match (&self.inner.config.worker, &self.inner.config.basetemp) {
            (Some(worker), _) => worker.basetemp.clone(),
            (None, Some(basetemp)) => basetemp.clone(),
            (None, None) => {
                let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
                    RunnerError::Usage(format!(
                        "temporary directory {} is not valid UTF-8",
                        path.display()
                    ))
                })?;
                temp.join(format!("kwbridge-{}", std::process::id()))
            }
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Paths collection starts from: the configured paths (without node id
    /// suffixes) under the root directory, or the root directory itself.
    #[must_use]
    pub fn collection_paths(&self) -> Vec<Utf8PathBuf> {
        if self.inner.config.paths.is_empty() {
            return vec![self.inner.config.rootdir.clone()];
        }
        let mut paths: Vec<Utf8PathBuf> = Vec::new();
        for target in &self.inner.config.paths {
            let file = target.split("::").next().unwrap_or_default();
            let path = self.inner.config.rootdir.join(file);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// `path` relative to the root directory, for node ids.
    #[must_use]
    pub fn relative_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        path.strip_prefix(&self.inner.config.rootdir)
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf)
    }

    /// Test modules registered with the session.
    #[must_use]
    pub fn modules(&self) -> &[TestModule] {
        &self.inner.modules
    }

    /// Run the whole session.
    ///
    /// # Errors
    /// Usage, collection, plugin and worker errors end the session early.
    pub fn main(&self) -> Result<ExitCode, RunnerError> {
        for plugin in &self.inner.plugins {
            plugin.sessionstart(self)?;
        }
        self.perform_collect()?;
        if self.inner.config.collect_only {
            for item in self.inner.items.borrow().iter() {
                log::info!("collected {}", item.nodeid());
            }
        } else {
            self.runtestloop()?;
        }
        let exit = self.exit_code();
        for plugin in &self.inner.plugins {
            plugin.sessionfinish(self, exit)?;
        }
        Ok(self.exit_code())
    }

    /// Collect, select and link items.
    ///
    /// # Errors
    /// Plugin collection failures and invalid `-k`/`-m` expressions.
    pub fn perform_collect(&self) -> Result<(), RunnerError> {
        for plugin in &self.inner.plugins {
            plugin.collection(self)?;
        }
        let mut items: Vec<Item> = Vec::new();
        for module in &self.inner.modules {
            items.extend(module.collect());
        }
        for path in self.discover_files()? {
            for plugin in &self.inner.plugins {
                items.extend(plugin.collect_file(self, &path)?);
            }
        }
        items.retain(|item| self.targeted(item));
        let mut items = self.select(items)?;
        for plugin in &self.inner.plugins {
            plugin.collection_modifyitems(self, &mut items)?;
        }
        link_items(&items);
        log::debug!("collected {} items", items.len());
        *self.inner.items.borrow_mut() = items;
        Ok(())
    }

    fn discover_files(&self) -> Result<Vec<Utf8PathBuf>, RunnerError> {
        let module_paths: Vec<Utf8PathBuf> = self
            .inner
            .modules
            .iter()
            .map(|module| self.inner.config.rootdir.join(module.path()))
            .collect();
        let mut files = Vec::new();
        for root in self.collection_paths() {
            if !root.exists() {
                if module_paths.iter().any(|module| module.starts_with(&root)) {
                    continue;
                }
                return Err(RunnerError::Usage(format!("file or directory not found: {root}")));
            }
            let walker = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| !is_ignored_dir(entry));
            for entry in walker {
                let entry = entry.map_err(|error| RunnerError::Collection(error.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(path) = Utf8Path::from_path(entry.path()) else {
                    log::warn!("skipping non UTF-8 path {}", entry.path().display());
                    continue;
                };
                if !module_paths.iter().any(|module| module == path) && !files.iter().any(|f| f == path) {
                    files.push(path.to_path_buf());
                }
            }
        }
        Ok(files)
    }

    fn targeted(&self, item: &Item) -> bool {
        if self.inner.config.paths.is_empty() {
            return true;
        }
        let path = &item.location().path;
        self.inner.config.paths.iter().any(|target| {
            if target.contains("::") {
                return item.nodeid() == target || item.nodeid().starts_with(&format!("{target}::"));
            }
            let target = Utf8Path::new(target);
            path.starts_with(target) || self.inner.config.rootdir.join(path).starts_with(target)
        })
    }

    fn select(&self, items: Vec<Item>) -> Result<Vec<Item>, RunnerError> {
        if let Some(select) = &self.inner.config.select {
            let mut by_id: HashMap<String, Item> = items
                .into_iter()
                .map(|item| (item.nodeid().to_string(), item))
                .collect();
            return select
                .iter()
                .map(|nodeid| {
                    by_id.remove(nodeid).ok_or_else(|| {
                        RunnerError::Collection(format!("selected item '{nodeid}' was not collected"))
                    })
                })
                .collect();
        }
        let keyword = parse_expression(self.inner.config.keyword.as_deref(), "-k")?;
        let markexpr = parse_expression(self.inner.config.markexpr.as_deref(), "-m")?;
        let mut selected = Vec::with_capacity(items.len());
        for item in items {
            let keyword_ok = keyword
                .as_ref()
                .is_none_or(|expr| expr.matches_keywords(&item.keywords()));
            let marks_ok = markexpr.as_ref().is_none_or(|expr| {
                let names: Vec<String> = item.iter_marks().into_iter().map(|mark| mark.name).collect();
                expr.matches_marks(&names)
            });
            if keyword_ok && marks_ok {
                selected.push(item);
            } else {
                log::debug!("deselected {}", item.nodeid());
            }
        }
        Ok(selected)
    }

    /// Run every item, letting a plugin take over the loop.
    ///
    /// # Errors
    /// The first protocol or plugin error.
    pub fn runtestloop(&self) -> Result<(), RunnerError> {
        for plugin in &self.inner.plugins {
            if let Some(result) = plugin.runtestloop(self) {
                return result;
            }
        }
        if self.inner.config.is_controller() {
            let Some(launcher) = &self.inner.launcher else {
                return Err(RunnerError::Usage(
                    "running with several processes needs a worker launcher".to_string(),
                ));
            };
            return dist::run_controller(self, launcher.as_ref());
        }
        self.default_runtestloop()
    }

    /// Run every item through the `runtest_protocol` chain.
    ///
    /// # Errors
    /// The first protocol error.
    pub fn default_runtestloop(&self) -> Result<(), RunnerError> {
        let items = self.inner.items.borrow().clone();
        for (index, item) in items.iter().enumerate() {
            let nextitem = items.get(index + 1);
            self.inner.protocol.call(&ProtocolCall {
                session: self,
                item,
                nextitem,
            })?;
            if let Some(reason) = self.should_stop() {
                log::info!("{reason}");
                break;
            }
        }
        Ok(())
    }

    /// Run the setup, call and teardown phases of `item`.
    ///
    /// The call phase only runs when setup passed and the session is not in
    /// setup-only mode.
    ///
    /// # Errors
    /// Report hook failures.
    pub fn runtestprotocol(
        &self,
        item: &Item,
        nextitem: Option<&Item>,
        host: Option<&dyn StepHost>,
    ) -> Result<Vec<TestReport>, RunnerError> {
        let setup = self.call_and_report(item, Phase::Setup, nextitem, host)?;
        let mut reports = vec![setup.clone()];
        if setup.passed() {
            if self.inner.config.setup_show {
                self.show_item(item, host);
            }
            if !self.inner.config.setup_only {
                reports.push(self.call_and_report(item, Phase::Call, nextitem, host)?);
            }
        }
        reports.push(self.call_and_report(item, Phase::Teardown, nextitem, host)?);
        Ok(reports)
    }

    /// Log that `item` is about to run, for `--setup-show`.
    pub fn show_item(&self, item: &Item, host: Option<&dyn StepHost>) {
        let message = format!("{} (fixtures set up)", item.nodeid());
        if let Some(host) = host {
            host.log(log::Level::Info, &message, false);
        }
        log::info!("{message}");
    }

    /// Run one phase of `item`, build its report and log it.
    ///
    /// # Errors
    /// Report hook failures.
    pub fn call_and_report(
        &self,
        item: &Item,
        when: Phase,
        nextitem: Option<&Item>,
        host: Option<&dyn StepHost>,
    ) -> Result<TestReport, RunnerError> {
        let ctx = TestContext::new(item, self, host);
        let error = self.run_phase(&ctx, when, nextitem).err();
        let call = CallInfo { when, error };
        for plugin in &self.inner.plugins {
            plugin.runtest_phase(item, &call);
        }
        let mut report = make_report(item, &call);
        for plugin in &self.inner.plugins {
            plugin.runtest_makereport(item, &call, &mut report)?;
        }
        self.log_report(&report);
        Ok(report)
    }

    fn run_phase(&self, ctx: &TestContext<'_>, when: Phase, nextitem: Option<&Item>) -> Result<(), TestError> {
        let item = ctx.item();
        log::debug!("{} {}", when.as_str(), item.nodeid());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match when {
            Phase::Setup => {
                let marks = item.iter_marks();
                if let Some(reason) = skip_reason(&marks) {
                    return Err(TestError::skipped(reason));
                }
                if let Some(xfail) = XFail::from_marks(&marks).filter(|xfail| !xfail.run) {
                    return Err(TestError::xfailed(format!("[NOTRUN] {}", xfail.reason)));
                }
                self.inner.setup_state.setup(ctx)
            }
            Phase::Call => item.behavior().runtest(ctx),
            Phase::Teardown => self.inner.setup_state.teardown_exact(ctx, nextitem),
        }));
        outcome.unwrap_or_else(|payload| Err(TestError::from_panic(payload)))
    }

    /// Record `report` and pass it to the plugins.
    pub fn log_report(&self, report: &TestReport) {
        if report.failed() && report.wasxfail.is_none() {
            let failed = self.inner.testsfailed.get() + 1;
            self.inner.testsfailed.set(failed);
            if let Some(maxfail) = self.inner.config.maxfail.filter(|maxfail| failed >= *maxfail) {
                self.request_stop(format!("stopping after {maxfail} failures"));
            }
        }
        self.inner.reports.borrow_mut().push(report.clone());
        for plugin in &self.inner.plugins {
            plugin.runtest_logreport(report);
        }
    }

    /// Record an error that belongs to no item. It fails the session.
    pub fn add_session_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("session error: {message}");
        let report = TestReport {
            nodeid: String::new(),
            location: crate::item::Location {
                path: self.inner.config.rootdir.clone(),
                line: None,
                domain: "session".to_string(),
            },
            when: Phase::Teardown,
            outcome: Outcome::Failed,
            longrepr: Some(LongRepr::Text { text: message.clone() }),
            wasxfail: None,
        };
        self.inner.errors.borrow_mut().push(message);
        self.inner.reports.borrow_mut().push(report.clone());
        for plugin in &self.inner.plugins {
            plugin.runtest_logreport(&report);
        }
    }

    /// Pass `item` to the plugins' `runtest_logstart`.
    pub fn runtest_logstart(&self, item: &Item) {
        for plugin in &self.inner.plugins {
            plugin.runtest_logstart(item);
        }
    }

    /// Pass `item` to the plugins' `runtest_logfinish`.
    pub fn runtest_logfinish(&self, item: &Item) {
        for plugin in &self.inner.plugins {
            plugin.runtest_logfinish(item);
        }
    }

    /// Let plugins report a check; the first to answer decides.
    pub fn assertion(
        &self,
        ctx: &TestContext<'_>,
        event: &AssertionEvent,
    ) -> Option<Result<(), TestError>> {
        self.inner.plugins
            .iter()
            .find_map(|plugin| plugin.assertion(ctx, event))
    }

    /// Per-item counts of the reports logged so far.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut order: Vec<String> = Vec::new();
        let mut outcomes: HashMap<String, Outcome> = HashMap::new();
        for report in self.inner.reports.borrow().iter().filter(|report| !report.nodeid.is_empty()) {
            let outcome = outcomes.entry(report.nodeid.clone()).or_insert_with(|| {
                order.push(report.nodeid.clone());
                Outcome::Passed
            });
            *outcome = match (*outcome, report.outcome) {
                (Outcome::Failed, _) | (_, Outcome::Failed) => Outcome::Failed,
                (Outcome::Skipped, _) | (_, Outcome::Skipped) => Outcome::Skipped,
                (Outcome::Passed, Outcome::Passed) => Outcome::Passed,
            };
        }
        let mut summary = Summary {
            errors: self.inner.errors.borrow().len(),
            ..Summary::default()
        };
        for nodeid in &order {
            match outcomes.get(nodeid) {
                Some(Outcome::Passed) => summary.passed += 1,
                Some(Outcome::Failed) => summary.failed += 1,
                Some(Outcome::Skipped) => summary.skipped += 1,
                None => {}
            }
        }
        summary
    }

    /// Exit code for the reports logged so far.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.inner.testsfailed.get() > 0 || !self.inner.errors.borrow().is_empty() {
            ExitCode::TestsFailed
        } else if self.inner.items.borrow().is_empty() {
            ExitCode::NoTestsCollected
        } else {
            ExitCode::Ok
        }
    }
}

fn parse_expression(text: Option<&str>, flag: &str) -> Result<Option<Expression>, RunnerError> {
    text.map(|text| {
        Expression::parse(text).map_err(|error| RunnerError::Usage(format!("{flag}: {error}")))
    })
    .transpose()
}

fn is_ignored_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name == "target")
}

#[cfg(test)]
mod tests;
