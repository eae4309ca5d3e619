//! Engine options: the option catalog, the option map and the argument parser.
//!
//! Every option the engine understands is described once in [`CATALOG`].
//! Front ends use the catalog to mirror options on their own command line,
//! and the merge tool uses it to keep only the options it accepts.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use camino::Utf8PathBuf;

use crate::error::EngineError;
use crate::listener::SharedListener;
use crate::parser::Parser;
use crate::result::SharedResultVisitor;
use crate::visitor::SharedVisitor;

/// Shape of an option's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Boolean switch: `--name` sets it, `--noname` clears it.
    Flag,
    /// Single value; the last one given wins.
    Scalar,
    /// Repeatable value collected into a list.
    List,
}

/// Built-in default of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// No default.
    Unset,
    /// Flag default.
    Flag(bool),
    /// Scalar default.
    Text(&'static str),
    /// Empty list.
    EmptyList,
}

/// Description of one engine option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Long name, lower case without dashes.
    pub name: &'static str,
    /// Value shape.
    pub kind: OptionKind,
    /// Default value.
    pub default: DefaultValue,
    /// Single-letter alias.
    pub short: Option<char>,
    /// Accepted when running tests.
    pub run: bool,
    /// Accepted by the merge tool.
    pub rebot: bool,
    /// One-line help text.
    pub help: &'static str,
}

impl OptionSpec {
    /// The default as an [`OptionValue`].
    #[must_use]
    pub fn default_value(&self) -> OptionValue {
        match self.default {
            DefaultValue::Unset => OptionValue::Unset,
            DefaultValue::Flag(value) => OptionValue::Bool(value),
            DefaultValue::Text(value) => OptionValue::Text(value.to_string()),
            DefaultValue::EmptyList => OptionValue::List(Vec::new()),
        }
    }
}

const fn spec(
    name: &'static str,
    kind: OptionKind,
    default: DefaultValue,
    short: Option<char>,
    scope: (bool, bool),
    help: &'static str,
) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        default,
        short,
        run: scope.0,
        rebot: scope.1,
        help,
    }
}

const BOTH: (bool, bool) = (true, true);
const RUN: (bool, bool) = (true, false);
const REBOT: (bool, bool) = (false, true);

use DefaultValue::{EmptyList, Flag, Text, Unset};
use OptionKind::{Flag as F, List as L, Scalar as S};

/// Every option the engine and the merge tool understand.
pub const CATALOG: &[OptionSpec] = &[
    spec("rpa", F, Flag(false), None, BOTH, "Treat tests as tasks."),
    spec("name", S, Unset, Some('N'), BOTH, "Set the name of the top-level suite."),
    spec("doc", S, Unset, Some('D'), BOTH, "Set the documentation of the top-level suite."),
    spec("metadata", L, EmptyList, Some('M'), BOTH, "Set metadata of the top-level suite as name:value."),
    spec("settag", L, EmptyList, Some('G'), BOTH, "Add the given tag to every test."),
    spec("test", L, EmptyList, Some('t'), BOTH, "Select tests by name or long name."),
    spec("task", L, EmptyList, None, BOTH, "Alias for --test."),
    spec("suite", L, EmptyList, Some('s'), BOTH, "Select suites by name or long name."),
    spec("include", L, EmptyList, Some('i'), BOTH, "Select tests by tag."),
    spec("exclude", L, EmptyList, Some('e'), BOTH, "Deselect tests by tag."),
    spec("skip", L, EmptyList, None, RUN, "Skip tests having the given tag."),
    spec("skiponfailure", L, EmptyList, None, RUN, "Mark failed tests having the given tag as skipped."),
    spec("outputdir", S, Text("."), Some('d'), BOTH, "Directory for output files."),
    spec("output", S, Text("output.xml"), Some('o'), BOTH, "XML output file, NONE disables outputs."),
    spec("log", S, Text("log.html"), Some('l'), BOTH, "HTML log file, NONE disables it."),
    spec("report", S, Text("report.html"), Some('r'), BOTH, "HTML report file, NONE disables it."),
    spec("logtitle", S, Unset, None, BOTH, "Title of the log page."),
    spec("reporttitle", S, Unset, None, BOTH, "Title of the report page."),
    spec("loglevel", S, Text("INFO"), Some('L'), BOTH, "Threshold, optionally with a visible default, e.g. TRACE:INFO."),
    spec("console", S, Text("verbose"), None, RUN, "Console output type: verbose, dotted, quiet or none."),
    spec("dryrun", F, Flag(false), None, RUN, "Validate keywords without running them."),
    spec("exitonfailure", F, Flag(false), Some('X'), RUN, "Stop the run after the first failed test."),
    spec("exitonerror", F, Flag(false), None, RUN, "Stop the run when an execution error occurs."),
    spec("rerunfailed", S, Unset, Some('R'), RUN, "Select the failed tests of an earlier output."),
    spec("runemptysuite", F, Flag(false), None, RUN, "Run even when no tests are selected."),
    spec("processemptysuite", F, Flag(false), None, REBOT, "Process outputs with no tests."),
    spec("merge", F, Flag(false), None, REBOT, "Merge outputs instead of combining them."),
    spec("statusrc", F, Flag(true), None, BOTH, "Return the failed-test count as the return code."),
    spec("extension", S, Unset, Some('F'), RUN, "Only parse files with these extensions, colon separated."),
    spec("parser", L, EmptyList, None, RUN, "Additional source parsers."),
    spec("listener", L, EmptyList, None, RUN, "Execution listeners."),
    spec("prerunmodifier", L, EmptyList, None, RUN, "Suite visitors applied before running."),
    spec("prerebotmodifier", L, EmptyList, None, BOTH, "Result visitors applied before writing outputs."),
    spec("help", F, Flag(false), Some('h'), BOTH, "Print usage and exit."),
];

/// Look up an option by long name; dashes and case are ignored.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::settings::find_option;
///
/// assert_eq!(find_option("log-level").map(|o| o.name), Some("loglevel"));
/// assert!(find_option("bogus").is_none());
/// ```
#[must_use]
pub fn find_option(name: &str) -> Option<&'static OptionSpec> {
    let wanted: String = name
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    CATALOG.iter().find(|spec| spec.name == wanted)
}

fn find_short(short: char) -> Option<&'static OptionSpec> {
    CATALOG.iter().find(|spec| spec.short == Some(short))
}

/// One entry of a list option.
///
/// Lists can hold plain text (a name to resolve, a tag, a path) or live
/// extension objects registered programmatically.
#[derive(Clone)]
pub enum OptionItem {
    /// Plain text value.
    Text(String),
    /// Listener instance.
    Listener(SharedListener),
    /// Pre-run suite visitor instance.
    Visitor(SharedVisitor),
    /// Pre-rebot result visitor instance.
    ResultVisitor(SharedResultVisitor),
    /// Source parser instance.
    Parser(Rc<dyn Parser>),
}

impl OptionItem {
    /// Text value, if this entry is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Debug for OptionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Listener(listener) => match listener.try_borrow() {
                Ok(listener) => write!(f, "<listener {}>", listener.name()),
                Err(_) => f.write_str("<listener>"),
            },
            Self::Visitor(visitor) => match visitor.try_borrow() {
                Ok(visitor) => write!(f, "<visitor {}>", visitor.name()),
                Err(_) => f.write_str("<visitor>"),
            },
            Self::ResultVisitor(visitor) => match visitor.try_borrow() {
                Ok(visitor) => write!(f, "<result visitor {}>", visitor.name()),
                Err(_) => f.write_str("<result visitor>"),
            },
            Self::Parser(parser) => write!(f, "<parser {}>", parser.name()),
        }
    }
}

impl From<&str> for OptionItem {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Value of one option.
#[derive(Debug, Clone)]
pub enum OptionValue {
    /// Explicitly cleared. When merging, an unset override wins outright.
    Unset,
    /// Flag value.
    Bool(bool),
    /// Scalar value.
    Text(String),
    /// List value.
    List(Vec<OptionItem>),
}

impl OptionValue {
    /// Text value, treating `NONE` (any case) as absent.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) if !text.eq_ignore_ascii_case("none") => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<OptionItem>> for OptionValue {
    fn from(value: Vec<OptionItem>) -> Self {
        Self::List(value)
    }
}

/// Named option values, keyed by catalog name.
///
/// Missing keys fall back to the catalog default when read through the typed
/// accessors.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    values: BTreeMap<String, OptionValue>,
}

impl OptionMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map holding the catalog default of every option.
    #[must_use]
    pub fn with_defaults() -> Self {
        CATALOG
            .iter()
            .map(|spec| (spec.name.to_string(), spec.default_value()))
            .collect()
    }

    /// Set `name` to `value`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Option<OptionValue> {
        self.values.insert(name.into(), value.into())
    }

    /// Remove `name`.
    pub fn remove(&mut self, name: &str) -> Option<OptionValue> {
        self.values.remove(name)
    }

    /// Raw value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// `true` when `name` has an explicit value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterate over explicit values in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.values.iter()
    }

    /// Number of explicit values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no option is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append `item` to list option `name`.
    pub fn push(&mut self, name: &str, item: OptionItem) {
        match self.values.get_mut(name) {
            Some(OptionValue::List(items)) => items.push(item),
            _ => {
                self.values
                    .insert(name.to_string(), OptionValue::List(vec![item]));
            }
        }
    }

    fn value_or_default(&self, name: &str) -> Option<OptionValue> {
        self.values
            .get(name)
            .cloned()
            .or_else(|| find_option(name).map(OptionSpec::default_value))
    }

    /// Scalar value of `name`, or its default; `NONE` and unset read as `None`.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.value_or_default(name)
            .and_then(|value| value.as_text().map(ToString::to_string))
    }

    /// Flag value of `name`, or its default.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.value_or_default(name), Some(OptionValue::Bool(true)))
    }

    /// List entries of `name`; empty when unset.
    #[must_use]
    pub fn list(&self, name: &str) -> Vec<OptionItem> {
        match self.values.get(name) {
            Some(OptionValue::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Text entries of list option `name`.
    #[must_use]
    pub fn texts(&self, name: &str) -> Vec<String> {
        self.list(name)
            .iter()
            .filter_map(|item| item.as_text().map(ToString::to_string))
            .collect()
    }

    /// Keep only options `keep` accepts.
    #[must_use]
    pub fn filtered(&self, mut keep: impl FnMut(&OptionSpec) -> bool) -> Self {
        self.values
            .iter()
            .filter(|(name, _)| find_option(name).is_some_and(&mut keep))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl FromIterator<(String, OptionValue)> for OptionMap {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Options and sources parsed from an engine command line.
#[derive(Debug, Clone, Default)]
pub struct ParsedArguments {
    /// Options given explicitly; defaults are not filled in.
    pub options: OptionMap,
    /// Positional source paths.
    pub sources: Vec<Utf8PathBuf>,
}

/// Parse engine command-line arguments.
///
/// Long options may be written `--name value` or `--name=value`; flags are
/// set with `--name` and cleared with `--noname`. Only options present in the
/// arguments end up in the result.
///
/// # Errors
/// Returns [`EngineError::InvalidOption`] for unknown options or missing
/// values.
///
/// # Examples
///
/// ```
/// use kwbridge_engine::{parse_arguments, OptionValue};
///
/// let parsed = parse_arguments(["--loglevel", "DEBUG", "--nostatusrc", "-i", "smoke", "tests"]).unwrap();
/// assert_eq!(parsed.options.text("loglevel").as_deref(), Some("DEBUG"));
/// assert!(!parsed.options.flag("statusrc"));
/// assert_eq!(parsed.options.texts("include"), ["smoke"]);
/// assert_eq!(parsed.sources, [camino::Utf8PathBuf::from("tests")]);
/// ```
pub fn parse_arguments<I, S>(args: I) -> Result<ParsedArguments, EngineError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = ParsedArguments::default();
    let mut args = args.into_iter().map(|arg| arg.as_ref().to_string());
    while let Some(arg) = args.next() {
        if arg == "--" {
            parsed.sources.extend(args.by_ref().map(Utf8PathBuf::from));
            break;
        }
        let (spec, negated, inline) = if let Some(long) = arg.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (long, None),
            };
            let (spec, negated) = lookup_long(name)
                .ok_or_else(|| EngineError::InvalidOption(format!("option '--{name}' not recognized")))?;
            (spec, negated, inline)
        } else if let Some(short) = short_option(&arg) {
            let spec = find_short(short)
                .ok_or_else(|| EngineError::InvalidOption(format!("option '-{short}' not recognized")))?;
            (spec, false, None)
        } else {
            parsed.sources.push(Utf8PathBuf::from(arg));
            continue;
        };
        match spec.kind {
            OptionKind::Flag => {
                if inline.is_some() {
                    return Err(EngineError::InvalidOption(format!(
                        "option '--{}' does not take a value",
                        spec.name
                    )));
                }
                parsed.options.insert(spec.name, !negated);
            }
            OptionKind::Scalar | OptionKind::List => {
                let value = match inline {
                    Some(value) => value,
                    None => args.next().ok_or_else(|| {
                        EngineError::InvalidOption(format!("option '--{}' requires a value", spec.name))
                    })?,
                };
                if spec.kind == OptionKind::List {
                    parsed.options.push(spec.name, OptionItem::Text(value));
                } else {
                    parsed.options.insert(spec.name, value.as_str());
                }
            }
        }
    }
    Ok(parsed)
}

fn lookup_long(name: &str) -> Option<(&'static OptionSpec, bool)> {
    if let Some(spec) = find_option(name) {
        return Some((spec, false));
    }
    let flag = name.strip_prefix("no")?;
    find_option(flag)
        .filter(|spec| spec.kind == OptionKind::Flag)
        .map(|spec| (spec, true))
}

fn short_option(arg: &str) -> Option<char> {
    let mut chars = arg.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('-'), Some(short), None) if short != '-' => Some(short),
        _ => None,
    }
}
