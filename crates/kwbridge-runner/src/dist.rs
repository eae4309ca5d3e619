//! Running items in several independent worker sessions.
//!
//! The controlling session splits its items round-robin into one selection
//! per worker and hands the selections to a [`WorkerLauncher`]. Workers run
//! their selection as an ordinary session and hand back their reports, which
//! the controller logs as if it had run the items itself.

use std::fs;
use std::process::Command;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::{RunnerConfig, WorkerInfo};
use crate::error::{ExitCode, RunnerError};
use crate::report::TestReport;
use crate::session::Session;

/// File a controller writes the worker's selection to.
pub const SELECTION_FILE: &str = "selection.json";
/// File a worker writes its results to.
pub const RESULTS_FILE: &str = "results.json";

/// Work assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker identifier such as `gw0`.
    pub id: String,
    /// Node ids to run, in order.
    pub nodeids: Vec<String>,
    /// Worker temporary directory.
    pub basetemp: Utf8PathBuf,
}

/// What a worker hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Worker identifier.
    pub id: String,
    /// Exit code of the worker session.
    pub exit: ExitCode,
    /// Reports of every phase the worker ran.
    pub reports: Vec<TestReport>,
    /// Session-level errors of the worker.
    pub errors: Vec<String>,
}

/// Runs worker sessions.
pub trait WorkerLauncher {
    /// Run every worker to completion.
    ///
    /// # Errors
    /// A worker that could not be started or whose results are unreadable.
    fn run(&self, config: &RunnerConfig, workers: &[WorkerSpec]) -> Result<Vec<WorkerResult>, RunnerError>;
}

/// Builds the session of one worker from its configuration.
pub type SessionFactory = Rc<dyn Fn(RunnerConfig) -> Session>;

/// Runs each worker as a fresh session in this process, one after another.
#[derive(Clone)]
pub struct InProcessLauncher {
    factory: SessionFactory,
}

impl InProcessLauncher {
    /// Launcher building worker sessions with `factory`.
    #[must_use]
    pub fn new(factory: SessionFactory) -> Self {
        Self { factory }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn run(&self, config: &RunnerConfig, workers: &[WorkerSpec]) -> Result<Vec<WorkerResult>, RunnerError> {
        workers
            .iter()
            .map(|spec| {
                let session = (self.factory)(worker_config(config, spec));
                let exit = session.main().map_err(|error| RunnerError::Worker {
                    worker: spec.id.clone(),
                    message: error.to_string(),
                })?;
                Ok(worker_result(&spec.id, &session, exit))
            })
            .collect()
    }
}

/// Runs each worker as a child process of `program`.
///
/// Children get `--worker <id> --worker-io <dir> --basetemp <dir>` after the
/// configured arguments, read their selection from `<dir>/selection.json` and
/// write `<dir>/results.json`.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: Utf8PathBuf,
    args: Vec<String>,
}

impl SubprocessLauncher {
    /// Launcher running `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl WorkerLauncher for SubprocessLauncher {
    fn run(&self, _config: &RunnerConfig, workers: &[WorkerSpec]) -> Result<Vec<WorkerResult>, RunnerError> {
        let mut children = Vec::with_capacity(workers.len());
        for spec in workers {
            let io = spec.basetemp.join("io");
            fs::create_dir_all(&io)?;
            write_json(&io.join(SELECTION_FILE), &spec.nodeids)?;
            log::debug!("starting worker {} with {} items", spec.id, spec.nodeids.len());
            let child = Command::new(&self.program)
                .args(&self.args)
                .args(["--worker", spec.id.as_str(), "--worker-io", io.as_str()])
                .args(["--basetemp", spec.basetemp.as_str()])
                .spawn()
                .map_err(|error| RunnerError::Worker {
                    worker: spec.id.clone(),
                    message: format!("failed to start {}: {error}", self.program),
                })?;
            children.push((spec, io, child));
        }
        let mut results = Vec::with_capacity(children.len());
        for (spec, io, mut child) in children {
            let status = child.wait()?;
            log::debug!("worker {} exited with {status}", spec.id);
            results.push(read_json::<WorkerResult>(&io.join(RESULTS_FILE))?);
        }
        Ok(results)
    }
}

/// Configuration of the worker running `spec` under the controller's
/// `config`.
#[must_use]
pub fn worker_config(config: &RunnerConfig, spec: &WorkerSpec) -> RunnerConfig {
    RunnerConfig {
        numprocesses: None,
        worker: Some(WorkerInfo {
            id: spec.id.clone(),
            basetemp: spec.basetemp.clone(),
        }),
        select: Some(spec.nodeids.clone()),
        basetemp: Some(spec.basetemp.clone()),
        ..config.clone()
    }
}

fn worker_result(id: &str, session: &Session, exit: ExitCode) -> WorkerResult {
    WorkerResult {
        id: id.to_string(),
        exit,
        reports: session
            .reports()
            .into_iter()
            .filter(|report| !report.nodeid.is_empty())
            .collect(),
        errors: session.session_errors(),
    }
}

/// Split `nodeids` round-robin over `count` workers named `gw0`, `gw1`, ...
///
/// Workers that would get nothing are left out.
#[must_use]
pub fn split_round_robin(nodeids: &[String], count: usize, basetemp: &Utf8Path) -> Vec<WorkerSpec> {
    let count = count.max(1);
    let mut workers: Vec<WorkerSpec> = (0..count)
        .map(|index| {
            let id = format!("gw{index}");
            WorkerSpec {
                basetemp: basetemp.join(&id),
                id,
                nodeids: Vec::new(),
            }
        })
        .collect();
    for (nodeid, index) in nodeids.iter().zip((0..count).cycle()) {
        if let Some(worker) = workers.get_mut(index) {
            worker.nodeids.push(nodeid.clone());
        }
    }
    workers.retain(|worker| !worker.nodeids.is_empty());
    workers
}

/// Run the session's items on workers and log their reports.
///
/// # Errors
/// Launcher failures.
pub fn run_controller(session: &Session, launcher: &dyn WorkerLauncher) -> Result<(), RunnerError> {
    let nodeids: Vec<String> = session
        .items()
        .iter()
        .map(|item| item.nodeid().to_string())
        .collect();
    let count = session.config().numprocesses.unwrap_or(1);
    let workers = split_round_robin(&nodeids, count, &session.basetemp()?);
    log::info!("running {} items on {} workers", nodeids.len(), workers.len());
    for result in launcher.run(session.config(), &workers)? {
        for report in &result.reports {
            session.log_report(report);
        }
        for error in result.errors {
            session.add_session_error(format!("[{}] {error}", result.id));
        }
    }
    Ok(())
}

/// Read the node ids a worker must run from its exchange directory.
///
/// # Errors
/// Returns [`RunnerError::Exchange`] for an unreadable selection.
pub fn read_selection(io: &Utf8Path) -> Result<Vec<String>, RunnerError> {
    read_json(&io.join(SELECTION_FILE))
}

/// Write a finished worker session's results to its exchange directory.
///
/// # Errors
/// Returns [`RunnerError::Exchange`] or [`RunnerError::Io`] when the file
/// cannot be written.
pub fn write_results(io: &Utf8Path, session: &Session, exit: ExitCode) -> Result<(), RunnerError> {
    let id = session
        .config()
        .worker
        .as_ref()
        .map_or("worker", |worker| worker.id.as_str());
    write_json(&io.join(RESULTS_FILE), &worker_result(id, session, exit))
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), RunnerError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| RunnerError::Exchange {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Utf8Path) -> Result<T, RunnerError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| RunnerError::Exchange {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|index| format!("t.rs::test_{index}")).collect()
    }

    #[rstest]
    #[case(5, 2, &[3, 2])]
    #[case(2, 4, &[1, 1])]
    #[case(3, 1, &[3])]
    fn round_robin_split(#[case] items: usize, #[case] workers: usize, #[case] sizes: &[usize]) {
        let specs = split_round_robin(&ids(items), workers, Utf8Path::new("/tmp/base"));
        let found: Vec<usize> = specs.iter().map(|spec| spec.nodeids.len()).collect();
        assert_eq!(found, sizes);
        assert!(specs.iter().all(|spec| spec.basetemp.ends_with(&spec.id)));
    }

    #[test]
    fn second_worker_takes_every_other_item() {
        let specs = split_round_robin(&ids(4), 2, Utf8Path::new("/tmp/base"));
        let Some(second) = specs.get(1) else {
            panic!("expected two workers");
        };
        assert_eq!(second.id, "gw1");
        assert_eq!(second.nodeids, ["t.rs::test_1", "t.rs::test_3"]);
    }
}
