//! Phase reports.

use serde::{Deserialize, Serialize};

use crate::item::{Item, Location};
use crate::mark::XFail;
use crate::outcome::TestError;

/// One of the three phases every item runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Fixture and owner setup.
    Setup,
    /// The test body.
    Call,
    /// Fixture and owner teardown.
    Teardown,
}

impl Phase {
    /// Lowercase phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Call => "call",
            Self::Teardown => "teardown",
        }
    }
}

/// Result of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The phase passed.
    Passed,
    /// The phase failed.
    Failed,
    /// The phase skipped the item.
    Skipped,
}

/// Failure or skip detail of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LongRepr {
    /// Free text produced by a plugin or by strict expected-failure checks.
    Text {
        /// The text.
        text: String,
    },
    /// A skip.
    Skip {
        /// Source file of the skipped item.
        path: camino::Utf8PathBuf,
        /// Line of the skipped item.
        line: Option<u32>,
        /// Message such as `Skipped: flaky`.
        message: String,
    },
    /// A failure raised by the phase.
    Failure {
        /// Failure message.
        message: String,
        /// The message was already logged where it happened.
        reported: bool,
    },
}

/// Report of one phase of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Node id of the item.
    pub nodeid: String,
    /// Location of the item.
    pub location: Location,
    /// Phase reported on.
    pub when: Phase,
    /// Outcome of the phase.
    pub outcome: Outcome,
    /// Failure or skip detail.
    pub longrepr: Option<LongRepr>,
    /// Expected-failure reason when the item was expected to fail.
    pub wasxfail: Option<String>,
}

impl TestReport {
    /// `true` for a passed phase.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// `true` for a failed phase.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }

    /// `true` for a skipped phase.
    #[must_use]
    pub fn skipped(&self) -> bool {
        self.outcome == Outcome::Skipped
    }

    /// Text of the failure or skip detail, if any.
    #[must_use]
    pub fn longrepr_text(&self) -> Option<&str> {
        self.longrepr.as_ref().map(|repr| match repr {
            LongRepr::Text { text } => text.as_str(),
            LongRepr::Skip { message, .. } => message.as_str(),
            LongRepr::Failure { message, .. } => message.as_str(),
        })
    }

    /// Append `text` to the failure detail and mark the report failed.
    pub fn force_failure(&mut self, text: &str) {
        self.outcome = Outcome::Failed;
        self.longrepr = Some(match self.longrepr.take() {
            Some(LongRepr::Text { text: existing } | LongRepr::Failure { message: existing, .. }) => {
                LongRepr::Text {
                    text: format!("{existing}\n\n{text}"),
                }
            }
            Some(LongRepr::Skip { .. }) | None => LongRepr::Text {
                text: text.to_string(),
            },
        });
    }
}

/// Result of running a phase, as seen by report hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Phase that ran.
    pub when: Phase,
    /// The error the phase ended with, if any.
    pub error: Option<TestError>,
}

/// Build the report for `call` on `item`, applying `xfail` markers.
///
/// Failures of an item marked `xfail` are reported skipped with `wasxfail`
/// set. A passing call of such an item passes with `wasxfail` set unless the
/// marker is strict, which fails it with `[XPASS(strict)] <reason>`.
#[must_use]
pub fn make_report(item: &Item, call: &CallInfo) -> TestReport {
    let location = item.location().clone();
    let xfail = XFail::from_marks(&item.iter_marks());
    let mut report = TestReport {
        nodeid: item.nodeid().to_string(),
        location,
        when: call.when,
        outcome: Outcome::Passed,
        longrepr: None,
        wasxfail: None,
    };
    match &call.error {
        None => {
            if let Some(xfail) = xfail.filter(|_| call.when == Phase::Call) {
                if xfail.strict {
                    report.outcome = Outcome::Failed;
                    report.longrepr = Some(LongRepr::Text {
                        text: format!("[XPASS(strict)] {}", xfail.reason),
                    });
                } else {
                    report.wasxfail = Some(xfail.reason);
                }
            }
        }
        Some(TestError::XFailed { reason }) => {
            report.outcome = Outcome::Skipped;
            report.wasxfail = Some(reason.clone());
        }
        Some(TestError::Skipped { reason }) => {
            report.outcome = Outcome::Skipped;
            report.longrepr = Some(LongRepr::Skip {
                path: report.location.path.clone(),
                line: report.location.line,
                message: format!("Skipped: {reason}"),
            });
        }
        Some(TestError::Failed(failure)) => {
            if let Some(xfail) = xfail {
                report.outcome = Outcome::Skipped;
                report.wasxfail = Some(xfail.reason);
            } else {
                report.outcome = Outcome::Failed;
                report.longrepr = Some(LongRepr::Failure {
                    message: failure.message.clone(),
                    reported: failure.reported,
                });
            }
        }
    }
    report
}
