//! Pre-run suite visitors.
//!
//! Visitors see the suite tree before execution and may rewrite it freely:
//! drop tests, replace keyword slots, add imports. The walk order is fixed:
//! `start_suite`, child suites, own tests, `end_suite`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ExtensionError;
use crate::model::{TestCase, TestSuite};

/// Names of the suites enclosing the node currently visited, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuitePath {
    names: Vec<String>,
}

impl SuitePath {
    /// Path made of the given suite names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// `true` while visiting the top-level suite itself.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.names.len() == 1
    }

    /// Suite names, root first.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Dotted name of `test` relative to the top-level suite.
    ///
    /// The top-level suite's own name is left out, so the result stays the
    /// same whether a file is run alone or together with other sources.
    ///
    /// # Examples
    ///
    /// ```
    /// use kwbridge_engine::SuitePath;
    ///
    /// let path = SuitePath::new(["Tests", "Login"]);
    /// assert_eq!(path.qualified_test_name("Valid user"), "Login.Valid user");
    /// ```
    #[must_use]
    pub fn qualified_test_name(&self, test: &str) -> String {
        let mut parts: Vec<&str> = self.names.iter().skip(1).map(String::as_str).collect();
        parts.push(test);
        parts.join(".")
    }

    pub(crate) fn push(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    pub(crate) fn pop(&mut self) {
        self.names.pop();
    }
}

/// Rewrites the suite tree before it runs.
///
/// Every method has a no-op default so implementors only override the events
/// they care about. Returning an error aborts the run.
#[expect(unused_variables, reason = "default visitor methods ignore their arguments")]
pub trait SuiteVisitor {
    /// Name used in error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called before a suite's children are visited.
    ///
    /// # Errors
    /// Implementations return an error to abort the run.
    fn start_suite(&mut self, suite: &mut TestSuite, path: &SuitePath) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Called for every test after the owning suite's child suites.
    ///
    /// # Errors
    /// Implementations return an error to abort the run.
    fn visit_test(&mut self, test: &mut TestCase, path: &SuitePath) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Called once a suite's children and tests have been visited.
    ///
    /// # Errors
    /// Implementations return an error to abort the run.
    fn end_suite(&mut self, suite: &mut TestSuite, path: &SuitePath) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Visitor shared between the caller and the engine's option map.
pub type SharedVisitor = Rc<RefCell<dyn SuiteVisitor>>;

/// Walk `suite` depth first, calling `visitor` for every node.
///
/// # Errors
/// Propagates the first error returned by the visitor.
pub fn walk_suite(suite: &mut TestSuite, visitor: &mut dyn SuiteVisitor) -> Result<(), ExtensionError> {
    let mut path = SuitePath::default();
    walk(suite, visitor, &mut path)
}

fn walk(
    suite: &mut TestSuite,
    visitor: &mut dyn SuiteVisitor,
    path: &mut SuitePath,
) -> Result<(), ExtensionError> {
    path.push(&suite.name);
    visitor.start_suite(suite, path)?;
    for child in &mut suite.suites {
        walk(child, visitor, path)?;
    }
    for test in &mut suite.tests {
        visitor.visit_test(test, path)?;
    }
    visitor.end_suite(suite, path)?;
    path.pop();
    Ok(())
}
