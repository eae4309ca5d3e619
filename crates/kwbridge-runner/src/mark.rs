//! Markers attached to items.
//!
//! Markers are named annotations with positional and keyword arguments.
//! The runner itself interprets `skip`, `skipif` and `xfail`; every other
//! marker is metadata for selection (`-m`) and for plugins.

use serde::{Deserialize, Serialize};

/// A marker such as `slow`, `skip(reason="later")` or `xfail(strict=true)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mark {
    /// Marker name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<String>,
    /// Keyword arguments in declaration order.
    pub kwargs: Vec<(String, String)>,
}

impl Mark {
    /// Marker without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Return the marker with an extra positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Return the marker with an extra keyword argument.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.push((key.into(), value.into()));
        self
    }

    /// `skip` marker with `reason`.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new("skip").kwarg("reason", reason)
    }

    /// `skipif` marker: skip with `reason` when `condition` holds.
    #[must_use]
    pub fn skip_if(condition: bool, reason: impl Into<String>) -> Self {
        Self::new("skipif")
            .arg(condition.to_string())
            .kwarg("reason", reason)
    }

    /// `xfail` marker with `reason`.
    #[must_use]
    pub fn xfail(reason: impl Into<String>) -> Self {
        Self::new("xfail").kwarg("reason", reason)
    }

    /// Keyword argument `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.kwargs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Parse a tag written as `name`, `name:a:b` or `name:k=v:k2=v2`.
    ///
    /// When the first argument has no `=`, every argument is positional.
    /// Otherwise arguments are read as keyword pairs up to the first one
    /// without `=`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_runner::Mark;
    ///
    /// let mark = Mark::from_tag("skip:reason=flaky");
    /// assert_eq!(mark.name, "skip");
    /// assert_eq!(mark.get("reason"), Some("flaky"));
    /// assert_eq!(Mark::from_tag("order:1:2").args, ["1", "2"]);
    /// ```
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let mut parts = tag.split(':');
        let mut mark = Self::new(parts.next().unwrap_or_default());
        let args: Vec<&str> = parts.collect();
        let keyword_form = args.first().is_some_and(|first| first.contains('='));
        if keyword_form {
            for arg in args {
                let Some((key, value)) = arg.split_once('=') else {
                    break;
                };
                mark.kwargs.push((key.to_string(), value.to_string()));
            }
        } else {
            mark.args = args.into_iter().map(ToString::to_string).collect();
        }
        mark
    }

    /// Render as a tag: the name followed by positional arguments, each
    /// prefixed with `:`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_runner::Mark;
    ///
    /// assert_eq!(Mark::new("slow").to_tag(), "slow");
    /// assert_eq!(Mark::new("order").arg("1").arg("2").to_tag(), "order:1:2");
    /// ```
    #[must_use]
    pub fn to_tag(&self) -> String {
        std::iter::once(self.name.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Reason to skip an item before its setup runs, from its `skip` and
/// `skipif` markers.
#[must_use]
pub fn skip_reason(marks: &[Mark]) -> Option<String> {
    marks.iter().find_map(|mark| match mark.name.as_str() {
        "skip" => Some(
            mark.get("reason")
                .or_else(|| mark.args.first().map(String::as_str))
                .unwrap_or("unconditional skip")
                .to_string(),
        ),
        "skipif" if condition_holds(mark) => Some(mark.get("reason").unwrap_or_default().to_string()),
        _ => None,
    })
}

fn condition_holds(mark: &Mark) -> bool {
    mark.args
        .first()
        .map(String::as_str)
        .or_else(|| mark.get("condition"))
        .and_then(crate::config::parse_env_bool)
        .unwrap_or(false)
}

/// Evaluated `xfail` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XFail {
    /// Reason; empty when none was given.
    pub reason: String,
    /// A pass is reported as a failure.
    pub strict: bool,
    /// When `false` the test is not run at all.
    pub run: bool,
}

impl XFail {
    /// First applicable `xfail` marker among `marks`.
    ///
    /// A marker with a `condition` argument that does not hold is ignored.
    #[must_use]
    pub fn from_marks(marks: &[Mark]) -> Option<Self> {
        marks
            .iter()
            .filter(|mark| mark.name == "xfail")
            .find(|mark| {
                mark.get("condition")
                    .and_then(crate::config::parse_env_bool)
                    .unwrap_or(true)
            })
            .map(|mark| Self {
                reason: mark
                    .get("reason")
                    .or_else(|| mark.args.first().map(String::as_str))
                    .unwrap_or_default()
                    .to_string(),
                strict: mark
                    .get("strict")
                    .and_then(crate::config::parse_env_bool)
                    .unwrap_or(false),
                run: mark
                    .get("run")
                    .and_then(crate::config::parse_env_bool)
                    .unwrap_or(true),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("slow", "slow", &[], &[])]
    #[case("order:1:2", "order", &["1", "2"], &[])]
    #[case("skip:reason=x:when=now", "skip", &[], &[("reason", "x"), ("when", "now")])]
    #[case("mixed:a=1:plain", "mixed", &[], &[("a", "1")])]
    fn tags_parse_into_marks(
        #[case] tag: &str,
        #[case] name: &str,
        #[case] args: &[&str],
        #[case] kwargs: &[(&str, &str)],
    ) {
        let mark = Mark::from_tag(tag);
        assert_eq!(mark.name, name);
        assert_eq!(mark.args, args);
        let found: Vec<(&str, &str)> = mark
            .kwargs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(found, kwargs);
    }

    #[test]
    fn skip_markers_give_reasons() {
        assert_eq!(skip_reason(&[Mark::skip("foo")]).as_deref(), Some("foo"));
        assert_eq!(
            skip_reason(&[Mark::new("skip")]).as_deref(),
            Some("unconditional skip")
        );
        assert_eq!(skip_reason(&[Mark::skip_if(false, "never")]), None);
        assert_eq!(
            skip_reason(&[Mark::skip_if(true, "always")]).as_deref(),
            Some("always")
        );
    }

    #[test]
    fn xfail_reads_options() {
        let mark = Mark::xfail("bug").kwarg("strict", "true").kwarg("run", "false");
        assert_eq!(
            XFail::from_marks(&[mark]),
            Some(XFail {
                reason: "bug".into(),
                strict: true,
                run: false,
            })
        );
        let disabled = Mark::new("xfail").kwarg("condition", "false");
        assert_eq!(XFail::from_marks(&[disabled]), None);
    }
}
