//! Command line front end for kwbridge sessions.
//!
//! The `kwbridge` binary runs the `.robot` suites below the root directory.
//! Test programs that register runner-native modules, keyword libraries or
//! bridge extensions build a [`Program`] and call [`Program::main`] from
//! their own `main`; they get the same command line, including the hidden
//! worker mode distributed runs start their children in.

use std::io::{self, Write};
use std::rc::Rc;

use camino::Utf8PathBuf;
use eyre::{Context, eyre};
use kwbridge::{BridgeConfig, BridgeExtension, install};
use kwbridge_engine::KeywordLibrary;
use kwbridge_runner::dist::{SubprocessLauncher, write_results};
use kwbridge_runner::{ExitCode, Session, TestModule};

pub mod cli;
pub mod engine_flags;
pub mod logging;
pub mod output;

pub use cli::{Cli, Invocation};

use logging::{LOG_LEVEL_ENV, LogLevel, init_logging};

/// Everything a test program contributes to its sessions.
#[derive(Clone, Default)]
pub struct Program {
    modules: Vec<TestModule>,
    libraries: Vec<Rc<dyn KeywordLibrary>>,
    extensions: Vec<Rc<dyn BridgeExtension>>,
}

impl Program {
    /// Program running only `.robot` suites.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test module.
    #[must_use]
    pub fn module(mut self, module: TestModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Make `library` importable by `.robot` suites.
    #[must_use]
    pub fn library(mut self, library: Rc<dyn KeywordLibrary>) -> Self {
        self.libraries.push(library);
        self
    }

    /// Add a bridge extension.
    #[must_use]
    pub fn extension(mut self, extension: Rc<dyn BridgeExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    fn bridge_config(&self, invocation: &Invocation) -> eyre::Result<BridgeConfig> {
        let config = BridgeConfig::new(invocation.engine_options()?);
        let config = self
            .libraries
            .iter()
            .fold(config, |config, library| config.with_library(Rc::clone(library)));
        Ok(self
            .extensions
            .iter()
            .fold(config, |config, extension| config.with_extension(Rc::clone(extension))))
    }

    fn session(&self, invocation: &Invocation, bridge: BridgeConfig) -> eyre::Result<Session> {
        let config = invocation.cli.runner_config()?;
        let mut builder = Session::builder(config.clone()).modules(self.modules.iter().cloned());
        if config.is_controller() {
            let exe = std::env::current_exe().wrap_err("cannot locate the running program")?;
            let program = Utf8PathBuf::from_path_buf(exe)
                .map_err(|path| eyre!("program path {} is not valid UTF-8", path.display()))?;
            builder = builder.launcher(Rc::new(SubprocessLauncher::new(program, invocation.args.clone())));
        }
        Ok(install(builder, bridge).build())
    }

    fn dump_options<W: Write>(&self, writer: &mut W, invocation: &Invocation) -> eyre::Result<ExitCode> {
        let bridge = self.bridge_config(invocation)?;
        let session = Session::builder(invocation.cli.runner_config()?)
            .modules(self.modules.iter().cloned())
            .build();
        let options = kwbridge::options::reconcile(&bridge, &session).map_err(|error| eyre!("{error}"))?;
        let text = serde_json::to_string_pretty(&kwbridge::options::to_json(&options))
            .wrap_err("failed to render the engine options")?;
        writeln!(writer, "{text}").wrap_err("failed to write the engine options")?;
        Ok(ExitCode::Ok)
    }

    /// Run the session `invocation` describes, writing the summary to
    /// `writer`. Workers write their results to the exchange directory
    /// instead.
    ///
    /// # Errors
    /// Problems outside the session: malformed engine arguments, an
    /// unreadable worker selection, unwritable results or summary. Errors
    /// that end the session early are reported and turned into its exit
    /// code.
    pub fn run<W: Write>(&self, invocation: &Invocation, writer: &mut W) -> eyre::Result<ExitCode> {
        if invocation.cli.dump_options {
            return self.dump_options(writer, invocation);
        }
        let session = self.session(invocation, self.bridge_config(invocation)?)?;
        let exit = session.main().unwrap_or_else(|error| {
            tracing::error!(%error, "session ended early");
            let _ = writeln!(io::stderr(), "kwbridge: {error}");
            error.exit_code()
        });
        tracing::info!(exit = exit.code(), "session finished");
        if let Some(io) = &invocation.cli.worker_io {
            write_results(io, &session, exit)?;
        } else if invocation.cli.collect_only {
            output::write_collected(writer, &session)?;
        } else {
            output::write_summary(writer, &session, exit)?;
        }
        Ok(exit)
    }

    /// Parse the process arguments, run, and turn the outcome into the
    /// process exit code.
    #[must_use]
    pub fn main(&self) -> std::process::ExitCode {
        let invocation = Invocation::try_parse_from(std::env::args()).unwrap_or_else(|error| error.exit());
        let env_level = std::env::var(LOG_LEVEL_ENV).ok();
        let level = LogLevel::resolve(invocation.cli.log_level, env_level.as_deref());
        init_logging(level.as_ref().copied().unwrap_or_default());
        let outcome = level.and_then(|_| self.run(&invocation, &mut io::stdout().lock()));
        let exit = outcome.unwrap_or_else(|report| {
            tracing::error!(error = ?report, "kwbridge failed");
            let _ = writeln!(io::stderr(), "kwbridge: {report:?}");
            ExitCode::UsageError
        });
        std::process::ExitCode::from(u8::try_from(exit.code()).unwrap_or(1))
    }
}
