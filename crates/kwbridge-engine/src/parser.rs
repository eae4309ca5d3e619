//! Source parsers.
//!
//! [`RobotParser`] reads the plain-text `.robot` format: `*** Section ***`
//! headers, cells separated by two or more spaces or a tab, indented steps,
//! `...` continuation lines and `#` comments.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::error::EngineError;
use crate::model::{Keyword, KeywordKind, TestCase, TestSuite, UserKeyword};

/// Turns a source file into a suite.
pub trait Parser {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// File extensions handled, lower case and without the leading dot.
    fn extensions(&self) -> Vec<String>;

    /// Parse `source` into a suite.
    ///
    /// # Errors
    /// Returns [`EngineError::Parse`] for malformed sources.
    fn parse(&self, source: &Utf8Path) -> Result<TestSuite, EngineError>;

    /// Sources that exist only in memory and should be discovered as if they
    /// were files on disk.
    fn virtual_sources(&self) -> Vec<Utf8PathBuf> {
        Vec::new()
    }
}

/// Parser for `.robot` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct RobotParser;

impl Parser for RobotParser {
    fn name(&self) -> &str {
        "robot"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["robot".to_string()]
    }

    fn parse(&self, source: &Utf8Path) -> Result<TestSuite, EngineError> {
        let text = std::fs::read_to_string(source).map_err(|error| EngineError::Parse {
            path: source.to_path_buf(),
            message: error.to_string(),
        })?;
        parse_robot(source, &text)
    }
}

/// Two or more spaces, or a tab with optional surrounding whitespace.
static CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    // Safe: The regex pattern is a compile-time constant and is valid.
    Regex::new(r"\s*\t\s*| {2,}").unwrap_or_else(|_| unreachable!("cell separator regex is valid"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Settings,
    Tests,
    Keywords,
    Ignored,
}

#[derive(Debug)]
struct Statement {
    indented: bool,
    cells: Vec<String>,
    lineno: u32,
}

/// Parse `.robot` text read from `source`.
///
/// # Errors
/// Returns [`EngineError::Parse`] on unknown section headers or settings.
pub fn parse_robot(source: &Utf8Path, text: &str) -> Result<TestSuite, EngineError> {
    let mut suite = TestSuite::from_source(source.to_path_buf());
    let mut builder = SuiteText::default();
    let mut section: Option<Section> = None;
    let mut statements: Vec<(Section, Statement)> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let lineno = u32::try_from(index + 1).unwrap_or(u32::MAX);
        if line.starts_with('*') {
            section = Some(section_from_header(line).ok_or_else(|| EngineError::Parse {
                path: source.to_path_buf(),
                message: format!("Unrecognized section header '{}' on line {lineno}.", line.trim()),
            })?);
            continue;
        }
        let Some(current) = section else { continue };
        if current == Section::Ignored {
            continue;
        }
        let Some(statement) = split_statement(line, lineno) else {
            continue;
        };
        let continues = statement.cells.first().is_some_and(|cell| cell == "...");
        if continues {
            if let Some((_, previous)) = statements.last_mut() {
                previous.cells.extend(statement.cells.into_iter().skip(1));
            }
            continue;
        }
        statements.push((current, statement));
    }

    for (section, statement) in statements {
        match section {
            Section::Settings => builder.setting(&mut suite, &statement, source)?,
            Section::Tests => builder.test_line(statement, source)?,
            Section::Keywords => builder.keyword_line(statement, source)?,
            Section::Ignored => {}
        }
    }
    builder.finish(&mut suite, source);
    Ok(suite)
}

fn section_from_header(line: &str) -> Option<Section> {
    let name = line
        .trim_matches(|c: char| c == '*' || c.is_whitespace())
        .to_ascii_lowercase();
    match name.as_str() {
        "settings" | "setting" => Some(Section::Settings),
        "test cases" | "test case" | "tasks" | "task" => Some(Section::Tests),
        "keywords" | "keyword" => Some(Section::Keywords),
        "variables" | "variable" | "comments" | "comment" => Some(Section::Ignored),
        _ => None,
    }
}

fn split_statement(line: &str, lineno: u32) -> Option<Statement> {
    let trimmed_end = line.trim_end();
    if trimmed_end.trim().is_empty() {
        return None;
    }
    let indented = trimmed_end.starts_with([' ', '\t']);
    let mut cells = Vec::new();
    for cell in CELL_SEPARATOR.split(trimmed_end.trim_start()) {
        let cell = cell.trim();
        if cell.starts_with('#') {
            break;
        }
        cells.push(cell.to_string());
    }
    if cells.is_empty() {
        return None;
    }
    Some(Statement {
        indented,
        cells,
        lineno,
    })
}

#[derive(Default)]
struct SuiteText {
    test_setup: Option<Keyword>,
    test_teardown: Option<Keyword>,
    test_tags: Vec<String>,
    default_tags: Vec<String>,
    tests: Vec<(TestCase, bool)>,
    keywords: Vec<UserKeyword>,
}

fn parse_error(source: &Utf8Path, lineno: u32, message: impl std::fmt::Display) -> EngineError {
    EngineError::Parse {
        path: source.to_path_buf(),
        message: format!("line {lineno}: {message}"),
    }
}

fn keyword_from(cells: &[String], kind: KeywordKind, lineno: u32) -> Option<Keyword> {
    let (name, args) = cells.split_first()?;
    Some(Keyword::new(name.as_str(), args.iter().cloned()).into_kind(kind).at_line(lineno))
}

fn setting_name(cell: &str) -> String {
    cell.trim_end_matches(':').to_ascii_lowercase()
}

impl SuiteText {
    fn setting(&mut self, suite: &mut TestSuite, statement: &Statement, source: &Utf8Path) -> Result<(), EngineError> {
        let Some((name, values)) = statement.cells.split_first() else {
            return Ok(());
        };
        let lineno = statement.lineno;
        match setting_name(name).as_str() {
            "documentation" => suite.doc = values.join(" "),
            "metadata" => {
                if let Some((key, value)) = values.split_first() {
                    suite.metadata.push((key.clone(), value.join(" ")));
                }
            }
            "library" => {
                if let Some(library) = values.first() {
                    suite.resource.libraries.push(library.clone());
                }
            }
            "suite setup" => suite.setup = keyword_from(values, KeywordKind::Setup, lineno),
            "suite teardown" => suite.teardown = keyword_from(values, KeywordKind::Teardown, lineno),
            "test setup" | "task setup" => {
                self.test_setup = keyword_from(values, KeywordKind::Setup, lineno);
            }
            "test teardown" | "task teardown" => {
                self.test_teardown = keyword_from(values, KeywordKind::Teardown, lineno);
            }
            "test tags" | "task tags" | "force tags" => self.test_tags.extend(values.iter().cloned()),
            "default tags" => self.default_tags.extend(values.iter().cloned()),
            "resource" | "variables" | "test timeout" | "test template" | "suite name" => {
                log::warn!("{source}:{lineno}: setting '{name}' is not supported and was ignored");
            }
            other => return Err(parse_error(source, lineno, format!("Non-existing setting '{other}'."))),
        }
        Ok(())
    }

    fn test_line(&mut self, statement: Statement, source: &Utf8Path) -> Result<(), EngineError> {
        let lineno = statement.lineno;
        let mut cells = statement.cells;
        if !statement.indented {
            let name = cells.remove(0);
            let mut test = TestCase::new(name);
            test.source = Some(source.to_path_buf());
            test.lineno = Some(lineno);
            self.tests.push((test, false));
            if cells.is_empty() {
                return Ok(());
            }
        }
        let Some((test, has_tags)) = self.tests.last_mut() else {
            return Err(parse_error(source, lineno, "step outside of a test"));
        };
        let Some((first, rest)) = cells.split_first() else {
            return Ok(());
        };
        if first.starts_with('[') && first.ends_with(']') {
            let setting = first.trim_matches(|c| c == '[' || c == ']').to_ascii_lowercase();
            match setting.as_str() {
                "documentation" => test.doc = rest.join(" "),
                "tags" => {
                    *has_tags = true;
                    for tag in rest {
                        test.add_tag(tag);
                    }
                }
                "setup" => test.setup = Some(keyword_from(rest, KeywordKind::Setup, lineno).unwrap_or_default()),
                "teardown" => {
                    test.teardown = Some(keyword_from(rest, KeywordKind::Teardown, lineno).unwrap_or_default());
                }
                "timeout" | "template" => {
                    log::warn!("{source}:{lineno}: test setting '{first}' is not supported and was ignored");
                }
                _ => return Err(parse_error(source, lineno, format!("Non-existing setting '{first}'."))),
            }
            return Ok(());
        }
        if let Some(step) = keyword_from(&cells, KeywordKind::Keyword, lineno) {
            test.body.push(step);
        }
        Ok(())
    }

    fn keyword_line(&mut self, statement: Statement, source: &Utf8Path) -> Result<(), EngineError> {
        let lineno = statement.lineno;
        let mut cells = statement.cells;
        if !statement.indented {
            let name = cells.remove(0);
            self.keywords.push(UserKeyword {
                name,
                lineno: Some(lineno),
                ..UserKeyword::default()
            });
            if cells.is_empty() {
                return Ok(());
            }
        }
        let Some(keyword) = self.keywords.last_mut() else {
            return Err(parse_error(source, lineno, "step outside of a keyword"));
        };
        let Some((first, rest)) = cells.split_first() else {
            return Ok(());
        };
        if first.starts_with('[') && first.ends_with(']') {
            match first.to_ascii_lowercase().as_str() {
                "[documentation]" => keyword.doc = rest.join(" "),
                "[arguments]" => keyword.arguments = rest.to_vec(),
                "[tags]" | "[return]" | "[timeout]" | "[teardown]" => {
                    log::warn!("{source}:{lineno}: keyword setting '{first}' is not supported and was ignored");
                }
                _ => return Err(parse_error(source, lineno, format!("Non-existing setting '{first}'."))),
            }
            return Ok(());
        }
        if let Some(step) = keyword_from(&cells, KeywordKind::Keyword, lineno) {
            keyword.body.push(step);
        }
        Ok(())
    }

    fn finish(self, suite: &mut TestSuite, source: &Utf8Path) {
        for (mut test, has_tags) in self.tests {
            if !has_tags {
                for tag in &self.default_tags {
                    test.add_tag(tag);
                }
            }
            for tag in &self.test_tags {
                test.add_tag(tag);
            }
            if test.setup.is_none() {
                test.setup.clone_from(&self.test_setup);
            }
            if test.teardown.is_none() {
                test.teardown.clone_from(&self.test_teardown);
            }
            // `[Setup]    NONE` overrides a suite-wide default.
            if test.setup.as_ref().is_some_and(Keyword::is_disabled) {
                test.setup = None;
            }
            if test.teardown.as_ref().is_some_and(Keyword::is_disabled) {
                test.teardown = None;
            }
            suite.tests.push(test);
        }
        suite.resource.keywords = self.keywords;
        log::debug!("parsed {} tests from {source}", suite.tests.len());
    }
}

#[cfg(test)]
mod tests;
