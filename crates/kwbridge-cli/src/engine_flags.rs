//! Engine options mirrored on the command line.
//!
//! Every engine option users may set gets an `--engine-<name>` argument;
//! flags that default to on also get `--engine-no<name>`. Options the bridge
//! manages itself are not mirrored, so clap rejects them up front.

use clap::{Arg, ArgAction, ArgMatches};
use eyre::eyre;
use kwbridge::options::is_banned;
use kwbridge_engine::settings::{CATALOG, DefaultValue};
use kwbridge_engine::{OptionItem, OptionKind, OptionMap, OptionSpec, parse_arguments};

/// Prefix of every mirrored engine option.
pub const PREFIX: &str = "engine-";
/// Argument taking raw engine arguments in one string.
pub const ENGINE_ARGS: &str = "engine-args";

const HEADING: &str = "Engine options";

fn mirrored() -> impl Iterator<Item = &'static OptionSpec> {
    CATALOG.iter().filter(|spec| spec.run && !is_banned(spec.name))
}

fn has_negation(spec: &OptionSpec) -> bool {
    spec.kind == OptionKind::Flag && spec.default == DefaultValue::Flag(true)
}

fn id(spec: &OptionSpec) -> String {
    format!("{PREFIX}{}", spec.name)
}

fn negated_id(spec: &OptionSpec) -> String {
    format!("{PREFIX}no{}", spec.name)
}

/// Arguments for `--engine-args` and every mirrored engine option.
#[must_use]
pub fn engine_args() -> Vec<Arg> {
    let mut args = vec![
        Arg::new(ENGINE_ARGS)
            .long(ENGINE_ARGS)
            .value_name("ARGS")
            .allow_hyphen_values(true)
            .help_heading(HEADING)
            .help("Extra engine arguments, split like a shell command line."),
    ];
    for spec in mirrored() {
        let arg = Arg::new(id(spec)).long(id(spec)).help(spec.help).help_heading(HEADING);
        args.push(match spec.kind {
            OptionKind::Flag => arg.action(ArgAction::SetTrue),
            OptionKind::Scalar => arg.action(ArgAction::Set).value_name("VALUE"),
            OptionKind::List => arg.action(ArgAction::Append).value_name("VALUE"),
        });
        if has_negation(spec) {
            args.push(
                Arg::new(negated_id(spec))
                    .long(negated_id(spec))
                    .action(ArgAction::SetTrue)
                    .help_heading(HEADING)
                    .help(format!("Turn off --{}.", id(spec))),
            );
        }
    }
    args
}

fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches.try_get_one::<bool>(id).ok().flatten().copied().unwrap_or(false)
}

/// Parse the value of `--engine-args` with the engine's own argument parser.
///
/// # Errors
/// Unbalanced quoting or arguments the engine does not accept.
pub fn split_engine_args(raw: &str) -> eyre::Result<OptionMap> {
    let words = shlex::split(raw).ok_or_else(|| eyre!("--{ENGINE_ARGS} has unbalanced quotes: {raw}"))?;
    let parsed = parse_arguments(words).map_err(|error| eyre!("invalid --{ENGINE_ARGS}: {error}"))?;
    if !parsed.sources.is_empty() {
        tracing::warn!(sources = ?parsed.sources, "ignoring sources in --{ENGINE_ARGS}; pass test paths directly");
    }
    Ok(parsed.options)
}

/// Engine options given on the command line: `--engine-args` first, then
/// the mirrored options, which win for scalars and extend lists.
///
/// # Errors
/// A malformed `--engine-args` value.
pub fn engine_options(matches: &ArgMatches) -> eyre::Result<OptionMap> {
    let mut options = matches
        .try_get_one::<String>(ENGINE_ARGS)
        .ok()
        .flatten()
        .map(|raw| split_engine_args(raw))
        .transpose()?
        .unwrap_or_default();
    for spec in mirrored() {
        let id = id(spec);
        match spec.kind {
            OptionKind::Flag => {
                if flag(matches, &id) {
                    options.insert(spec.name, true);
                }
                if has_negation(spec) && flag(matches, &negated_id(spec)) {
                    options.insert(spec.name, false);
                }
            }
            OptionKind::Scalar => {
                if let Some(value) = matches.try_get_one::<String>(&id).ok().flatten() {
                    options.insert(spec.name, value.as_str());
                }
            }
            OptionKind::List => {
                let values = matches.try_get_many::<String>(&id).ok().flatten().into_iter().flatten();
                for value in values {
                    options.push(spec.name, OptionItem::Text(value.clone()));
                }
            }
        }
    }
    Ok(options)
}
