//! Reconciling engine options from every source into one map.
//!
//! Sources apply in order: bridge defaults, command line, the
//! `KWBRIDGE_ENGINE_OPTIONS` environment variable, then extensions. List
//! options accumulate across sources; scalars take the last value given; an
//! explicit [`OptionValue::Unset`] clears whatever came before.

use kwbridge_engine::settings::find_option;
use kwbridge_engine::{OptionItem, OptionMap, OptionValue, parse_arguments};
use kwbridge_runner::Session;
use serde_json::{Map, Value, json};

use crate::config::{BridgeConfig, ENGINE_OPTIONS_ENV};
use crate::error::BridgeError;

/// Options the bridge sets itself; users selecting tests or changing how the
/// run is driven must use the runner's own options instead.
pub const BANNED_OPTIONS: &[&str] = &[
    "include",
    "exclude",
    "skip",
    "test",
    "task",
    "dryrun",
    "exitonfailure",
    "rerunfailed",
    "suite",
    "runemptysuite",
    "help",
];

/// `true` when users may not set `name`.
#[must_use]
pub fn is_banned(name: &str) -> bool {
    find_option(name).is_some_and(|spec| BANNED_OPTIONS.contains(&spec.name))
}

/// Defaults that differ from the engine's: outputs go to the working
/// directory and the engine keeps quiet on the console the runner owns.
#[must_use]
pub fn bridge_defaults() -> OptionMap {
    let mut options = OptionMap::new();
    options.insert("outputdir", ".");
    options.insert("console", "quiet");
    options
}

/// Merge `overrides` into `base`.
///
/// # Examples
///
/// ```
/// use kwbridge::options::merge_options;
/// use kwbridge_engine::{OptionItem, OptionMap, OptionValue};
///
/// let mut base = OptionMap::new();
/// base.push("listener", OptionItem::from("A"));
/// base.insert("loglevel", "INFO");
/// let mut overrides = OptionMap::new();
/// overrides.push("listener", OptionItem::from("B"));
/// overrides.insert("loglevel", "DEBUG");
///
/// let merged = merge_options(&base, &overrides);
/// assert_eq!(merged.texts("listener"), ["A", "B"]);
/// assert_eq!(merged.text("loglevel").as_deref(), Some("DEBUG"));
///
/// overrides.insert("listener", OptionValue::Unset);
/// assert!(merge_options(&base, &overrides).list("listener").is_empty());
/// ```
#[must_use]
pub fn merge_options(base: &OptionMap, overrides: &OptionMap) -> OptionMap {
    let mut merged = base.clone();
    for (name, value) in overrides.iter() {
        let combined = match (merged.get(name), value) {
            (Some(OptionValue::List(existing)), OptionValue::List(extra)) => {
                OptionValue::List(existing.iter().chain(extra).cloned().collect())
            }
            (_, value) => value.clone(),
        };
        merged.insert(name.clone(), combined);
    }
    merged
}

/// Fail when `options`, read from `source`, set a banned option.
///
/// # Errors
/// Returns [`BridgeError::Usage`] naming every banned option found.
pub fn reject_banned(options: &OptionMap, source: &str) -> Result<(), BridgeError> {
    let banned: Vec<&str> = options
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| is_banned(name))
        .collect();
    if banned.is_empty() {
        return Ok(());
    }
    Err(BridgeError::Usage(format!(
        "{source} sets engine options that kwbridge manages itself: {}. \
         Select and control tests with the runner's own options instead.",
        banned.join(", ")
    )))
}

/// Parse the value of `KWBRIDGE_ENGINE_OPTIONS`.
///
/// # Errors
/// Returns [`BridgeError::Usage`] for unbalanced quoting or arguments the
/// engine does not accept.
pub fn parse_env_options(text: &str) -> Result<OptionMap, BridgeError> {
    let words = shlex::split(text).ok_or_else(|| {
        BridgeError::Usage(format!("{ENGINE_OPTIONS_ENV} has unbalanced quotes: {text}"))
    })?;
    let parsed = parse_arguments(words)
        .map_err(|error| BridgeError::Usage(format!("{ENGINE_OPTIONS_ENV}: {error}")))?;
    if !parsed.sources.is_empty() {
        tracing::warn!(
            sources = ?parsed.sources,
            "ignoring sources in {ENGINE_OPTIONS_ENV}; pass test paths to the runner"
        );
    }
    Ok(parsed.options)
}

/// Compute the session's engine options from `config`.
///
/// # Errors
/// Returns [`BridgeError::Usage`] when any source sets a banned option or
/// the environment value cannot be parsed.
pub fn reconcile(config: &BridgeConfig, session: &Session) -> Result<OptionMap, BridgeError> {
    reject_banned(&config.cli_options, "the command line")?;
    let mut options = merge_options(&bridge_defaults(), &config.cli_options);
    if let Some(text) = config.env_options.as_deref() {
        let env_options = parse_env_options(text)?;
        reject_banned(&env_options, ENGINE_OPTIONS_ENV)?;
        options = merge_options(&options, &env_options);
    }
    for extension in &config.extensions {
        extension.modify_options(&mut options, session);
        reject_banned(&options, "an extension")?;
    }
    tracing::debug!(options = ?options, "reconciled engine options");
    Ok(options)
}

/// JSON view of `options`, for diagnostics. Extension objects appear as
/// their debug rendering.
#[must_use]
pub fn to_json(options: &OptionMap) -> Value {
    let mut object = Map::new();
    for (name, value) in options.iter() {
        let value = match value {
            OptionValue::Unset => Value::Null,
            OptionValue::Bool(flag) => json!(flag),
            OptionValue::Text(text) => json!(text),
            OptionValue::List(items) => items
                .iter()
                .map(|item| match item {
                    OptionItem::Text(text) => json!(text),
                    other => json!(format!("{other:?}")),
                })
                .collect(),
        };
        object.insert(name.clone(), value);
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests;
