//! Human readable session summaries.

use std::io::Write;

use eyre::{Context, Result};
use kwbridge_runner::{ExitCode, Session, Summary, TestReport};

fn first_line(report: &TestReport) -> &str {
    report
        .longrepr_text()
        .and_then(|text| text.lines().next())
        .unwrap_or_default()
}

/// Write the collected node ids, one per line, then their count.
///
/// # Errors
/// Returns an error if the writer fails.
pub fn write_collected<W: Write>(writer: &mut W, session: &Session) -> Result<()> {
    let items = session.items();
    for item in items.iter() {
        writeln!(writer, "{}", item.nodeid()).wrap_err("failed to write collected item")?;
    }
    writeln!(writer, "{} items collected", items.len()).wrap_err("failed to write collection count")
}

/// Format `summary` as one line.
///
/// # Examples
///
/// ```
/// use kwbridge_cli::output::summary_line;
/// use kwbridge_runner::Summary;
///
/// let summary = Summary { passed: 3, failed: 1, skipped: 0, errors: 0 };
/// assert_eq!(summary_line(&summary), "3 passed, 1 failed");
/// ```
#[must_use]
pub fn summary_line(summary: &Summary) -> String {
    let parts: Vec<String> = [
        (summary.passed, "passed"),
        (summary.failed, "failed"),
        (summary.skipped, "skipped"),
        (summary.errors, if summary.errors == 1 { "error" } else { "errors" }),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, label)| format!("{count} {label}"))
    .collect();
    if parts.is_empty() {
        "no tests ran".to_string()
    } else {
        parts.join(", ")
    }
}

/// Write failed phases, session errors and the summary line of a finished
/// session.
///
/// # Errors
/// Returns an error if the writer fails.
pub fn write_summary<W: Write>(writer: &mut W, session: &Session, exit: ExitCode) -> Result<()> {
    for report in session.reports().iter().filter(|report| report.failed()) {
        writeln!(
            writer,
            "FAILED {} ({}) - {}",
            report.nodeid,
            report.when.as_str(),
            first_line(report)
        )
        .wrap_err_with(|| format!("failed to write the failure of {}", report.nodeid))?;
    }
    for error in session.session_errors() {
        writeln!(writer, "ERROR {error}").wrap_err("failed to write a session error")?;
    }
    writeln!(writer, "{} (exit code {})", summary_line(&session.summary()), exit.code())
        .wrap_err("failed to write the summary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwbridge_runner::{RunnerConfig, TestError, TestFunction, TestModule};
    use rstest::rstest;

    fn session() -> Session {
        let session = Session::builder(RunnerConfig::default())
            .module(
                TestModule::new("test_cart.rs")
                    .function(TestFunction::new("test_total", |_| Ok(())))
                    .function(TestFunction::new("test_empty", |_| {
                        Err(TestError::failed("cart is empty\nassert !items.is_empty()"))
                    })),
            )
            .build();
        let Ok(_) = session.main() else {
            panic!("session should run");
        };
        session
    }

    fn written(write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buffer = Vec::new();
        let Ok(()) = write(&mut buffer) else {
            panic!("writing to a buffer cannot fail");
        };
        String::from_utf8(buffer).unwrap_or_else(|error| panic!("output is UTF-8: {error}"))
    }

    #[rstest]
    #[case(Summary::default(), "no tests ran")]
    #[case(Summary { passed: 2, failed: 0, skipped: 1, errors: 1 }, "2 passed, 1 skipped, 1 error")]
    #[case(Summary { passed: 0, failed: 0, skipped: 0, errors: 2 }, "2 errors")]
    fn summary_lines_leave_out_zero_counts(#[case] summary: Summary, #[case] expected: &str) {
        assert_eq!(summary_line(&summary), expected);
    }

    #[test]
    fn failures_are_listed_before_the_summary() {
        let session = session();
        let text = written(|buffer| write_summary(buffer, &session, session.exit_code()));
        assert_eq!(
            text,
            "FAILED test_cart.rs::test_empty (call) - cart is empty\n1 passed, 1 failed (exit code 1)\n"
        );
    }

    #[test]
    fn collected_items_are_listed() {
        let session = Session::builder(RunnerConfig {
            collect_only: true,
            ..RunnerConfig::default()
        })
        .module(TestModule::new("test_a.rs").function(TestFunction::new("test_one", |_| Ok(()))))
        .build();
        let Ok(_) = session.main() else {
            panic!("collection should succeed");
        };
        let text = written(|buffer| write_collected(buffer, &session));
        assert_eq!(text, "test_a.rs::test_one\n1 items collected\n");
    }
}
