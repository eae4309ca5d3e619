//! Static HTML log and report pages.
//!
//! The log shows every suite, test and keyword with its messages; the report
//! only lists statistics and per-test outcomes. Both are self-contained
//! documents without scripts.

use std::fmt::{self, Write};

use camino::Utf8Path;

use crate::error::OutputError;
use crate::escape::write_escaped;
use crate::output::write_file;
use crate::result::{BodyItem, ExecutionResult, KeywordResult, Statistics, SuiteResult, TestResult};

const STYLE: &str = "body{font-family:sans-serif}.PASS{color:#2e7d32}.FAIL{color:#c62828}\
.SKIP{color:#8d6e00}details{margin-left:1em}pre{white-space:pre-wrap;margin:0}";

/// Render the log page for `result`.
///
/// # Errors
/// Returns an error if writing to the provided formatter fails.
pub fn write_log<W: Write>(writer: &mut W, result: &ExecutionResult, title: Option<&str>) -> fmt::Result {
    let default_title = format!("{} Log", result.suite.name);
    header(writer, title.unwrap_or(&default_title))?;
    write_statistics(writer, result.statistics())?;
    if !result.errors.is_empty() {
        writer.write_str("<h2>Execution Errors</h2>\n<ul class=\"errors\">\n")?;
        for message in &result.errors {
            write!(writer, "<li class=\"{}\">", message.level)?;
            write_escaped(writer, &message.text)?;
            writer.write_str("</li>\n")?;
        }
        writer.write_str("</ul>\n")?;
    }
    writer.write_str("<h2>Test Execution Log</h2>\n")?;
    log_suite(writer, &result.suite)?;
    footer(writer, &result.generator)
}

/// Render the report page for `result`.
///
/// # Errors
/// Returns an error if writing to the provided formatter fails.
pub fn write_report<W: Write>(writer: &mut W, result: &ExecutionResult, title: Option<&str>) -> fmt::Result {
    let default_title = format!("{} Report", result.suite.name);
    header(writer, title.unwrap_or(&default_title))?;
    write_statistics(writer, result.statistics())?;
    writer.write_str("<h2>Test Details</h2>\n<table>\n<tr><th>Name</th><th>Tags</th><th>Status</th><th>Message</th></tr>\n")?;
    let mut path = Vec::new();
    report_suite(writer, &result.suite, &mut path)?;
    writer.write_str("</table>\n")?;
    footer(writer, &result.generator)
}

/// Write the log page to `path`.
///
/// # Errors
/// Returns [`OutputError::Write`] if the file cannot be written.
pub fn write_log_file(result: &ExecutionResult, path: &Utf8Path, title: Option<&str>) -> Result<(), OutputError> {
    let mut text = String::new();
    write_log(&mut text, result, title).map_err(|_| format_error(path))?;
    write_file(path, &text)
}

/// Write the report page to `path`.
///
/// # Errors
/// Returns [`OutputError::Write`] if the file cannot be written.
pub fn write_report_file(result: &ExecutionResult, path: &Utf8Path, title: Option<&str>) -> Result<(), OutputError> {
    let mut text = String::new();
    write_report(&mut text, result, title).map_err(|_| format_error(path))?;
    write_file(path, &text)
}

fn format_error(path: &Utf8Path) -> OutputError {
    OutputError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::other("formatting page failed"),
    }
}

fn header<W: Write>(writer: &mut W, title: &str) -> fmt::Result {
    writer.write_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>")?;
    write_escaped(writer, title)?;
    write!(writer, "</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>")?;
    write_escaped(writer, title)?;
    writer.write_str("</h1>\n")
}

fn footer<W: Write>(writer: &mut W, generator: &str) -> fmt::Result {
    writer.write_str("<p class=\"generator\">Generated by ")?;
    write_escaped(writer, generator)?;
    writer.write_str("</p>\n</body>\n</html>\n")
}

fn write_statistics<W: Write>(writer: &mut W, stats: Statistics) -> fmt::Result {
    writeln!(
        writer,
        "<table class=\"statistics\">\n<tr><th>Total</th><th>Pass</th><th>Fail</th><th>Skip</th></tr>\n\
         <tr><td>{}</td><td class=\"PASS\">{}</td><td class=\"FAIL\">{}</td><td class=\"SKIP\">{}</td></tr>\n</table>",
        stats.total(),
        stats.passed,
        stats.failed,
        stats.skipped
    )
}

fn summary<W: Write>(writer: &mut W, kind: &str, name: &str, status: crate::Status) -> fmt::Result {
    write!(writer, "<summary>{kind} <b>")?;
    write_escaped(writer, name)?;
    writeln!(writer, "</b> <span class=\"{}\">{status}</span></summary>", status.as_str().replace(' ', "_"))
}

fn failure_message<W: Write>(writer: &mut W, message: &str) -> fmt::Result {
    if message.is_empty() {
        return Ok(());
    }
    writer.write_str("<pre class=\"message\">")?;
    write_escaped(writer, message)?;
    writer.write_str("</pre>\n")
}

fn log_suite<W: Write>(writer: &mut W, suite: &SuiteResult) -> fmt::Result {
    writer.write_str("<details open>\n")?;
    summary(writer, "SUITE", &suite.name, suite.status)?;
    failure_message(writer, &suite.message)?;
    if let Some(setup) = &suite.setup {
        log_keyword(writer, setup)?;
    }
    for child in &suite.suites {
        log_suite(writer, child)?;
    }
    for test in &suite.tests {
        log_test(writer, test)?;
    }
    if let Some(teardown) = &suite.teardown {
        log_keyword(writer, teardown)?;
    }
    writer.write_str("</details>\n")
}

fn log_test<W: Write>(writer: &mut W, test: &TestResult) -> fmt::Result {
    writer.write_str("<details>\n")?;
    summary(writer, "TEST", &test.name, test.status)?;
    failure_message(writer, &test.message)?;
    for keyword in test.keywords() {
        log_keyword(writer, keyword)?;
    }
    writer.write_str("</details>\n")
}

fn log_keyword<W: Write>(writer: &mut W, keyword: &KeywordResult) -> fmt::Result {
    writer.write_str("<details>\n")?;
    let mut label = keyword.full_name();
    if !keyword.args.is_empty() {
        label.push_str("    ");
        label.push_str(&keyword.args.join("    "));
    }
    summary(writer, keyword.kind.as_str(), &label, keyword.status)?;
    for item in &keyword.items {
        match item {
            BodyItem::Keyword(child) => log_keyword(writer, child)?,
            BodyItem::Message(message) => {
                write!(writer, "<pre class=\"{}\">{} ", message.level, message.level)?;
                if message.html {
                    writer.write_str(&message.text)?;
                } else {
                    write_escaped(writer, &message.text)?;
                }
                writer.write_str("</pre>\n")?;
            }
        }
    }
    writer.write_str("</details>\n")
}

fn report_suite<W: Write>(writer: &mut W, suite: &SuiteResult, path: &mut Vec<String>) -> fmt::Result {
    path.push(suite.name.clone());
    for child in &suite.suites {
        report_suite(writer, child, path)?;
    }
    for test in &suite.tests {
        writer.write_str("<tr><td>")?;
        write_escaped(writer, &format!("{}.{}", path.join("."), test.name))?;
        writer.write_str("</td><td>")?;
        write_escaped(writer, &test.tags.join(", "))?;
        write!(writer, "</td><td class=\"{}\">{}</td><td>", test.status, test.status)?;
        write_escaped(writer, &test.message)?;
        writer.write_str("</td></tr>\n")?;
    }
    path.pop();
    Ok(())
}
