//! The always-available `BuiltIn` keyword library.

use crate::context::ExecutionContext;
use crate::library::{KeywordLibrary, normalize_name};
use crate::model::{Arg, Keyword};
use crate::result::LogLevel;
use crate::status::KeywordError;

/// Library name of the built-in keywords.
pub const BUILTIN: &str = "BuiltIn";

const KEYWORDS: &[&str] = &[
    "Log",
    "Log Many",
    "No Operation",
    "Fail",
    "Fatal Error",
    "Skip",
    "Skip If",
    "Should Be Equal",
    "Should Not Be Equal",
    "Should Be True",
    "Should Contain",
    "Set Log Level",
    "Run Keyword",
    "Import Library",
];

/// Generic keywords every suite can use without importing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltIn;

impl KeywordLibrary for BuiltIn {
    fn name(&self) -> &str {
        BUILTIN
    }

    fn keyword_names(&self) -> Vec<String> {
        KEYWORDS.iter().map(ToString::to_string).collect()
    }

    fn run_keyword(&self, name: &str, args: &[Arg], ctx: &ExecutionContext) -> Result<(), KeywordError> {
        let values: Vec<&str> = args.iter().map(Arg::value).collect();
        match normalize_name(name).as_str() {
            "log" => log(ctx, &values),
            "logmany" => {
                for value in values {
                    ctx.log(LogLevel::Info, value);
                }
                Ok(())
            }
            "nooperation" => arity(name, &values, 0, 0),
            "fail" => {
                arity(name, &values, 0, 1)?;
                Err(KeywordError::fail(first_or(&values, "AssertionError")))
            }
            "fatalerror" => {
                arity(name, &values, 0, 1)?;
                Err(KeywordError::fail(first_or(&values, "AssertionError")).fatal())
            }
            "skip" => {
                arity(name, &values, 0, 1)?;
                Err(KeywordError::skip(first_or(&values, "Skipped with Skip keyword.")))
            }
            "skipif" => skip_if(name, &values),
            "shouldbeequal" => compare(name, &values, true),
            "shouldnotbeequal" => compare(name, &values, false),
            "shouldbetrue" => should_be_true(name, &values),
            "shouldcontain" => should_contain(name, &values),
            "setloglevel" => set_log_level(ctx, name, &values),
            "runkeyword" => run_keyword(ctx, name, args),
            "importlibrary" => {
                arity(name, &values, 1, 1)?;
                ctx.import_library(first_or(&values, ""))
            }
            _ => Err(KeywordError::fail(format!("No keyword with name '{name}' found."))),
        }
    }
}

fn arity(name: &str, values: &[&str], min: usize, max: usize) -> Result<(), KeywordError> {
    if (min..=max).contains(&values.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{min} to {max}")
    };
    Err(KeywordError::fail(format!(
        "Keyword '{BUILTIN}.{name}' expected {expected} arguments, got {}.",
        values.len()
    )))
}

fn first_or<'a>(values: &[&'a str], default: &'a str) -> &'a str {
    values.first().copied().unwrap_or(default)
}

/// Split trailing `name=value` arguments whose name is in `known`.
fn named<'a>(values: &[&'a str], known: &[&str]) -> (Vec<&'a str>, Vec<(&'a str, &'a str)>) {
    let mut positional = values.to_vec();
    let mut named = Vec::new();
    while let Some(last) = positional.last().copied() {
        match last.split_once('=') {
            Some((key, value)) if known.contains(&key) => {
                named.push((key, value));
                positional.pop();
            }
            _ => break,
        }
    }
    named.reverse();
    (positional, named)
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "no" | "off" | "0" | "none"
    )
}

fn log(ctx: &ExecutionContext, values: &[&str]) -> Result<(), KeywordError> {
    let (positional, named) = named(values, &["level", "html"]);
    arity("Log", &positional, 1, 3)?;
    let message = first_or(&positional, "");
    let level_text = named
        .iter()
        .find(|(key, _)| *key == "level")
        .map(|(_, value)| *value)
        .or_else(|| positional.get(1).copied())
        .unwrap_or("INFO");
    let html = level_text.eq_ignore_ascii_case("html")
        || named
            .iter()
            .any(|(key, value)| *key == "html" && is_truthy(value));
    let level: LogLevel = level_text.parse().map_err(KeywordError::fail)?;
    if html {
        ctx.log_html(level, message);
    } else {
        ctx.log(level, message);
    }
    Ok(())
}

fn skip_if(name: &str, values: &[&str]) -> Result<(), KeywordError> {
    arity(name, values, 1, 2)?;
    let condition = first_or(values, "");
    if is_truthy(condition) {
        let message = values.get(1).copied().unwrap_or(condition);
        return Err(KeywordError::skip(message));
    }
    Ok(())
}

fn compare(name: &str, values: &[&str], expect_equal: bool) -> Result<(), KeywordError> {
    let (positional, named) = named(values, &["msg"]);
    arity(name, &positional, 2, 3)?;
    let (Some(first), Some(second)) = (positional.first(), positional.get(1)) else {
        return Ok(());
    };
    if (first == second) == expect_equal {
        return Ok(());
    }
    let custom = named
        .iter()
        .find(|(key, _)| *key == "msg")
        .map(|(_, value)| *value)
        .or_else(|| positional.get(2).copied());
    let default = if expect_equal {
        format!("{first} != {second}")
    } else {
        format!("{first} == {second}")
    };
    Err(KeywordError::fail(custom.map_or(default, ToString::to_string)))
}

fn should_be_true(name: &str, values: &[&str]) -> Result<(), KeywordError> {
    arity(name, values, 1, 2)?;
    let condition = first_or(values, "");
    if is_truthy(condition) {
        return Ok(());
    }
    let message = values
        .get(1)
        .map_or_else(|| format!("'{condition}' should be true."), ToString::to_string);
    Err(KeywordError::fail(message))
}

fn should_contain(name: &str, values: &[&str]) -> Result<(), KeywordError> {
    arity(name, values, 2, 3)?;
    let container = first_or(values, "");
    let item = values.get(1).copied().unwrap_or_default();
    if container.contains(item) {
        return Ok(());
    }
    let message = values
        .get(2)
        .map_or_else(|| format!("'{container}' does not contain '{item}'"), ToString::to_string);
    Err(KeywordError::fail(message))
}

fn set_log_level(ctx: &ExecutionContext, name: &str, values: &[&str]) -> Result<(), KeywordError> {
    arity(name, values, 1, 1)?;
    let level: LogLevel = first_or(values, "").parse().map_err(KeywordError::fail)?;
    let previous = ctx.set_log_level(level);
    ctx.log(LogLevel::Info, format!("Log level changed from {previous} to {level}."));
    Ok(())
}

fn run_keyword(ctx: &ExecutionContext, name: &str, args: &[Arg]) -> Result<(), KeywordError> {
    let Some((target, rest)) = args.split_first() else {
        return arity(name, &[], 1, usize::MAX);
    };
    ctx.run_keyword(&Keyword::with_args(target.value(), rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["a", "b"], &["a", "b"], 0)]
    #[case(&["a", "level=WARN"], &["a"], 1)]
    #[case(&["a=b", "html=true", "level=INFO"], &["a=b"], 2)]
    fn named_arguments_are_split_from_the_end(
        #[case] values: &[&str],
        #[case] positional: &[&str],
        #[case] named_count: usize,
    ) {
        let (found, named) = named(values, &["level", "html"]);
        assert_eq!(found, positional);
        assert_eq!(named.len(), named_count);
    }

    #[test]
    fn comparison_uses_custom_message() {
        let error = compare("Should Be Equal", &["1", "2", "msg=numbers differ"], true).err();
        assert_eq!(error.map(|e| e.message().to_string()), Some("numbers differ".into()));
    }

    #[test]
    fn arity_errors_name_the_keyword() {
        let error = arity("Fail", &["a", "b"], 0, 1).err();
        assert_eq!(
            error.map(|e| e.message().to_string()),
            Some("Keyword 'BuiltIn.Fail' expected 0 to 1 arguments, got 2.".into())
        );
    }
}
