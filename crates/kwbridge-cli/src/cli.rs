//! Command line of the `kwbridge` binary and of test programs built on it.

use camino::Utf8PathBuf;
use clap::{ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use eyre::eyre;
use kwbridge_engine::OptionMap;
use kwbridge_runner::dist::read_selection;
use kwbridge_runner::{RunnerConfig, WorkerInfo};

use crate::engine_flags::{engine_args, engine_options};
use crate::logging::LogLevel;

/// Run `.robot` suites and registered test modules in one session.
#[derive(Debug, Parser)]
#[command(name = "kwbridge", version, about, args_override_self = true)]
pub struct Cli {
    /// Files, directories or node ids to run; the root directory when empty.
    pub paths: Vec<String>,

    /// Directory node ids and suite names are relative to.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub rootdir: Utf8PathBuf,

    /// Only run items whose name matches the expression.
    #[arg(short = 'k', value_name = "EXPRESSION")]
    pub keyword: Option<String>,

    /// Only run items whose markers match the expression.
    #[arg(short = 'm', value_name = "MARKEXPR")]
    pub markexpr: Option<String>,

    /// Stop after the first failed item.
    #[arg(short = 'x', long)]
    pub exitfirst: bool,

    /// Stop after this many failed items.
    #[arg(long, value_name = "NUM")]
    pub maxfail: Option<usize>,

    /// Run setup and teardown only.
    #[arg(long)]
    pub setup_only: bool,

    /// Show each item's setup.
    #[arg(long)]
    pub setup_show: bool,

    /// List the selected items without running them.
    #[arg(long)]
    pub collect_only: bool,

    /// Run items in this many worker processes.
    #[arg(short = 'n', long, value_name = "NUM")]
    pub numprocesses: Option<usize>,

    /// Directory for temporary files and worker outputs.
    #[arg(long, value_name = "DIR")]
    pub basetemp: Option<Utf8PathBuf>,

    /// Leave passing checks out of the engine log.
    #[arg(long)]
    pub no_assertions_in_log: bool,

    /// Print the reconciled engine options as JSON and exit.
    #[arg(long)]
    pub dump_options: bool,

    /// Diagnostic log level; defaults to `KWBRIDGE_LOG_LEVEL`, then `warn`.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Run as the distributed worker with this id.
    #[arg(long, hide = true, requires = "worker_io", requires = "basetemp")]
    pub worker: Option<String>,

    /// Exchange directory shared with the controller.
    #[arg(long, hide = true, requires = "worker")]
    pub worker_io: Option<Utf8PathBuf>,
}

impl Cli {
    /// Runner configuration for these arguments. Workers read their
    /// selection from the exchange directory.
    ///
    /// # Errors
    /// A worker without a temporary directory or with an unreadable
    /// selection.
    pub fn runner_config(&self) -> eyre::Result<RunnerConfig> {
        let worker = self
            .worker
            .as_ref()
            .map(|id| {
                let basetemp = self
                    .basetemp
                    .clone()
                    .ok_or_else(|| eyre!("--worker {id} needs --basetemp"))?;
                Ok::<_, eyre::Report>(WorkerInfo {
                    id: id.clone(),
                    basetemp,
                })
            })
            .transpose()?;
        let select = self.worker_io.as_deref().map(read_selection).transpose()?;
        Ok(RunnerConfig {
            rootdir: self.rootdir.clone(),
            paths: self.paths.clone(),
            keyword: self.keyword.clone(),
            markexpr: self.markexpr.clone(),
            maxfail: self.exitfirst.then_some(1).or(self.maxfail),
            setup_only: self.setup_only,
            setup_show: self.setup_show || self.setup_only,
            collect_only: self.collect_only,
            numprocesses: self.numprocesses,
            basetemp: self.basetemp.clone(),
            assertions_in_log: !self.no_assertions_in_log,
            worker,
            select,
        })
    }
}

/// The full command: [`Cli`] plus the mirrored engine options.
#[must_use]
pub fn command() -> Command {
    Cli::command().args(engine_args())
}

/// A parsed command line.
#[derive(Debug)]
pub struct Invocation {
    /// Runner arguments.
    pub cli: Cli,
    /// Everything clap matched, including the mirrored engine options.
    pub matches: ArgMatches,
    /// The arguments after the program name, handed on to worker processes.
    pub args: Vec<String>,
}

impl Invocation {
    /// Parse `args`, the first of which is the program name.
    ///
    /// # Errors
    /// Returns clap's error for invalid arguments and for `--help` and
    /// `--version`; [`clap::Error::exit`] prints it.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let matches = command().try_get_matches_from(&args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        Ok(Self {
            cli,
            matches,
            args: args.into_iter().skip(1).collect(),
        })
    }

    /// Engine options given on the command line.
    ///
    /// # Errors
    /// A malformed `--engine-args` value.
    pub fn engine_options(&self) -> eyre::Result<OptionMap> {
        engine_options(&self.matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Invocation {
        Invocation::try_parse_from(std::iter::once("kwbridge").chain(args.iter().copied()))
            .unwrap_or_else(|error| panic!("arguments should parse: {error}"))
    }

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn defaults_match_the_runner_defaults() {
        let Ok(config) = parse(&[]).cli.runner_config() else {
            panic!("default arguments give a configuration");
        };
        assert_eq!(config, RunnerConfig::default());
    }

    #[rstest]
    #[case(&["-x"], Some(1))]
    #[case(&["--maxfail", "3"], Some(3))]
    #[case(&["-x", "--maxfail", "3"], Some(1))]
    #[case(&[], None)]
    fn exitfirst_means_one_failure(#[case] args: &[&str], #[case] expected: Option<usize>) {
        let Ok(config) = parse(args).cli.runner_config() else {
            panic!("arguments give a configuration");
        };
        assert_eq!(config.maxfail, expected);
    }

    #[test]
    fn runner_options_reach_the_configuration() {
        let invocation = parse(&[
            "tests/login.robot",
            "-k",
            "login and not slow",
            "-m",
            "smoke",
            "--setup-only",
            "--no-assertions-in-log",
            "-n",
            "2",
            "--basetemp",
            "/tmp/kw",
        ]);
        let Ok(config) = invocation.cli.runner_config() else {
            panic!("arguments give a configuration");
        };
        assert_eq!(config.paths, ["tests/login.robot"]);
        assert_eq!(config.keyword.as_deref(), Some("login and not slow"));
        assert_eq!(config.markexpr.as_deref(), Some("smoke"));
        assert!(config.setup_only && config.setup_show);
        assert!(!config.assertions_in_log);
        assert!(config.is_controller());
        assert_eq!(invocation.args.first().map(String::as_str), Some("tests/login.robot"));
    }

    #[test]
    fn repeated_basetemp_keeps_the_last() {
        let invocation = parse(&["--basetemp", "/tmp/a", "--basetemp", "/tmp/b"]);
        assert_eq!(invocation.cli.basetemp.as_deref().map(camino::Utf8Path::as_str), Some("/tmp/b"));
    }

    #[rstest]
    #[case(&["--worker", "gw0"])]
    #[case(&["--worker-io", "/tmp/io"])]
    #[case(&["--engine-include", "smoke"])]
    #[case(&["--log-level", "chatty"])]
    fn invalid_command_lines_are_rejected(#[case] args: &[&str]) {
        let result = Invocation::try_parse_from(std::iter::once("kwbridge").chain(args.iter().copied()));
        assert!(result.is_err());
    }

    #[test]
    fn engine_options_come_from_the_matches() {
        let Ok(options) = parse(&["--engine-name", "Nightly"]).engine_options() else {
            panic!("engine options should build");
        };
        assert_eq!(options.text("name").as_deref(), Some("Nightly"));
    }
}
