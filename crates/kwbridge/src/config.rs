//! Bridge configuration.
//!
//! Engine options reach the bridge from three places: the command line
//! (already parsed into an [`OptionMap`]), the `KWBRIDGE_ENGINE_OPTIONS`
//! environment variable, and [`BridgeExtension::modify_options`]
//! implementations. [`crate::options`] reconciles them.

use std::env;
use std::rc::Rc;

use kwbridge_engine::{KeywordLibrary, OptionMap};

use crate::BridgeExtension;

/// Environment variable holding extra engine arguments, split like a shell
/// command line.
pub const ENGINE_OPTIONS_ENV: &str = "KWBRIDGE_ENGINE_OPTIONS";

/// Everything the bridge needs besides the session.
#[derive(Clone, Default)]
pub struct BridgeConfig {
    /// Engine options given on the command line.
    pub cli_options: OptionMap,
    /// Raw value of [`ENGINE_OPTIONS_ENV`], if set.
    pub env_options: Option<String>,
    /// Extensions asked to adjust options and report checks.
    pub extensions: Vec<Rc<dyn BridgeExtension>>,
    /// Keyword libraries `.robot` suites may import.
    pub libraries: Vec<Rc<dyn KeywordLibrary>>,
}

impl BridgeConfig {
    /// Configuration with `cli_options` and the environment's engine options.
    #[must_use]
    pub fn new(cli_options: OptionMap) -> Self {
        Self {
            cli_options,
            env_options: env::var(ENGINE_OPTIONS_ENV).ok(),
            ..Self::default()
        }
    }

    /// Replace the environment's engine options.
    #[must_use]
    pub fn with_env_options(mut self, options: Option<String>) -> Self {
        self.env_options = options;
        self
    }

    /// Add an extension.
    #[must_use]
    pub fn with_extension(mut self, extension: Rc<dyn BridgeExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Make `library` importable by `.robot` suites.
    #[must_use]
    pub fn with_library(mut self, library: Rc<dyn KeywordLibrary>) -> Self {
        self.libraries.push(library);
        self
    }
}
