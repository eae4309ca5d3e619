//! Test and suite selection by name and tag patterns.

use regex::Regex;

use crate::error::EngineError;
use crate::model::{TestCase, TestSuite};
use crate::settings::OptionMap;

/// A case-insensitive glob where `*` matches any run and `?` one character.
/// Spaces and underscores are ignored, so `login*` matches `Login Flow`.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub(crate) fn new(glob: &str) -> Result<Self, EngineError> {
        let mut source = String::from("(?i)^");
        for c in normalize(glob).chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');
        Regex::new(&source)
            .map(|regex| Self { regex })
            .map_err(|error| EngineError::InvalidOption(format!("invalid pattern '{glob}': {error}")))
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        self.regex.is_match(&normalize(text))
    }
}

fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace() && *c != '_').collect()
}

/// A tag pattern: globs joined with `AND`, optionally followed by `NOT`
/// clauses, for example `smokeANDfast` or `webNOTslow`.
#[derive(Debug, Clone)]
pub(crate) struct TagPattern {
    required: Vec<Pattern>,
    excluded: Vec<Pattern>,
}

impl TagPattern {
    pub(crate) fn new(text: &str) -> Result<Self, EngineError> {
        let mut parts = text.split("NOT");
        let required = parts
            .next()
            .unwrap_or_default()
            .split('&')
            .flat_map(|part| part.split("AND"))
            .filter(|part| !part.trim().is_empty())
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        let excluded = parts
            .filter(|part| !part.trim().is_empty())
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { required, excluded })
    }

    pub(crate) fn matches(&self, tags: &[String]) -> bool {
        let has = |pattern: &Pattern| tags.iter().any(|tag| pattern.matches(tag));
        self.required.iter().all(has) && !self.excluded.iter().any(has)
    }
}

fn compile<T>(
    values: Vec<String>,
    make: impl Fn(&str) -> Result<T, EngineError>,
) -> Result<Vec<T>, EngineError> {
    values.iter().map(|value| make(value)).collect()
}

/// Selection criteria read from the options.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selection {
    tests: Vec<Pattern>,
    suites: Vec<Pattern>,
    include: Vec<TagPattern>,
    exclude: Vec<TagPattern>,
    long_names: Vec<String>,
}

impl Selection {
    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, EngineError> {
        let mut tests = options.texts("test");
        tests.extend(options.texts("task"));
        Ok(Self {
            tests: compile(tests, Pattern::new)?,
            suites: compile(options.texts("suite"), Pattern::new)?,
            include: compile(options.texts("include"), TagPattern::new)?,
            exclude: compile(options.texts("exclude"), TagPattern::new)?,
            long_names: Vec::new(),
        })
    }

    /// Restrict selection to tests with the given dotted long names.
    pub(crate) fn with_long_names(mut self, names: Vec<String>) -> Self {
        self.long_names = names;
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tests.is_empty()
            && self.suites.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.long_names.is_empty()
    }

    /// Drop every test the criteria reject and any suite left empty.
    pub(crate) fn apply(&self, suite: &mut TestSuite) {
        if self.is_empty() {
            return;
        }
        let mut path = Vec::new();
        self.filter(suite, &mut path, self.suites.is_empty());
        suite.remove_empty_suites();
    }

    fn filter(&self, suite: &mut TestSuite, path: &mut Vec<String>, suite_selected: bool) {
        path.push(suite.name.clone());
        let long_name = path.join(".");
        let selected = suite_selected
            || self
                .suites
                .iter()
                .any(|pattern| pattern.matches(&suite.name) || pattern.matches(&long_name));
        for child in &mut suite.suites {
            self.filter(child, path, selected);
        }
        if selected {
            suite
                .tests
                .retain(|test| self.keeps(test, &format!("{long_name}.{}", test.name)));
        } else {
            suite.tests.clear();
        }
        path.pop();
    }

    fn keeps(&self, test: &TestCase, long_name: &str) -> bool {
        if !self.long_names.is_empty() && !self.long_names.iter().any(|name| name == long_name) {
            return false;
        }
        if !self.tests.is_empty()
            && !self
                .tests
                .iter()
                .any(|pattern| pattern.matches(&test.name) || pattern.matches(long_name))
        {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|pattern| pattern.matches(&test.tags)) {
            return false;
        }
        !self.exclude.iter().any(|pattern| pattern.matches(&test.tags))
    }
}

/// Tag pattern of `--skip` that matches `tags`, if any.
pub(crate) fn skip_tag(patterns: &[String], tags: &[String]) -> Option<String> {
    patterns
        .iter()
        .find(|text| TagPattern::new(text).is_ok_and(|pattern| pattern.matches(tags)))
        .cloned()
}
