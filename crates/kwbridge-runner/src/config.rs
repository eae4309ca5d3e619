//! Session configuration.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Parse a boolean written the way environment variables usually spell one.
///
/// # Examples
///
/// ```
/// use kwbridge_runner::config::parse_env_bool;
///
/// assert_eq!(parse_env_bool("yes"), Some(true));
/// assert_eq!(parse_env_bool("Off"), Some(false));
/// assert_eq!(parse_env_bool("maybe"), None);
/// ```
#[must_use]
pub fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "Yes" | "on" | "ON" | "On" => Some(true),
        "0" | "false" | "FALSE" | "False" | "no" | "NO" | "No" | "off" | "OFF" | "Off" => {
            Some(false)
        }
        _ => None,
    }
}

/// Identity of a distributed worker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Worker identifier such as `gw0`.
    pub id: String,
    /// Temporary directory shared with the coordinator.
    pub basetemp: Utf8PathBuf,
}

/// Options controlling collection and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Directory node ids are relative to.
    pub rootdir: Utf8PathBuf,
    /// Paths or node ids to collect; empty collects everything.
    pub paths: Vec<String>,
    /// `-k` expression matched against item names.
    pub keyword: Option<String>,
    /// `-m` expression matched against marker names.
    pub markexpr: Option<String>,
    /// Stop after this many failed items.
    pub maxfail: Option<usize>,
    /// Run setup and teardown only.
    pub setup_only: bool,
    /// Show each item before its call phase.
    pub setup_show: bool,
    /// List items without running them.
    pub collect_only: bool,
    /// Number of worker sessions; `None` or `1` runs in-process.
    pub numprocesses: Option<usize>,
    /// Temporary directory for worker exchange files and outputs.
    pub basetemp: Option<Utf8PathBuf>,
    /// Show passing assertion checks in the keyword log.
    pub assertions_in_log: bool,
    /// Set when this session is a distributed worker.
    pub worker: Option<WorkerInfo>,
    /// Node ids a worker must run, in order.
    pub select: Option<Vec<String>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            rootdir: Utf8PathBuf::from("."),
            paths: Vec::new(),
            keyword: None,
            markexpr: None,
            maxfail: None,
            setup_only: false,
            setup_show: false,
            collect_only: false,
            numprocesses: None,
            basetemp: None,
            assertions_in_log: true,
            worker: None,
            select: None,
        }
    }
}

impl RunnerConfig {
    /// `true` when items are handed to worker sessions.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        self.worker.is_none() && self.numprocesses.is_some_and(|count| count > 1)
    }

    /// `true` when this session is a worker or hands items to workers.
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.worker.is_some() || self.is_controller()
    }
}
