//! Collecting engine-native tests as runner items.
//!
//! Before the runner collects anything, the engine runs once over the target
//! paths in dry mode with a [`SuiteCollector`] that records every test it
//! sees and then empties the suite. The `.robot` file collector turns those
//! records into items whose phases run the test's own keywords.

use std::cell::RefCell;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use kwbridge_engine::{
    Engine, ExtensionError, Keyword, KeywordError, OptionItem, OptionMap, OptionValue, SuitePath,
    SuiteVisitor, TestCase, TestSuite,
};
use kwbridge_runner::{
    Item, ItemBehavior, ItemKind, ItemSpec, Location, Mark, Owner, OwnerKind, Session, TestContext,
    TestError,
};

use crate::error::BridgeError;
use crate::keys::{ORIGINAL_BODY, ORIGINAL_SETUP, ORIGINAL_TEARDOWN, TEST_KEY};
use crate::options::merge_options;
use crate::state::{BridgeState, EngineTest};

/// Extension of engine suite files.
pub const ROBOT_EXTENSION: &str = "robot";

/// Key matching a test found by the collection pass with the same test in a
/// later run: its source file and name.
///
/// The suite path is not part of the key because the top-level suite changes
/// with the set of sources a run is given. Tests without a source fall back
/// to their suite path below the top-level suite.
///
/// # Examples
///
/// ```
/// use kwbridge::collection::test_key;
/// use kwbridge_engine::{SuitePath, TestCase};
///
/// let mut test = TestCase::new("Valid Login");
/// assert_eq!(test_key(&test, &SuitePath::new(["All", "Login"])), "Login.Valid Login");
/// test.source = Some("suites/login.robot".into());
/// assert_eq!(test_key(&test, &SuitePath::new(["All", "Login"])), "suites/login.robot::Valid Login");
/// assert_eq!(test_key(&test, &SuitePath::new(["Login"])), "suites/login.robot::Valid Login");
/// ```
#[must_use]
pub fn test_key(test: &TestCase, path: &SuitePath) -> String {
    test.source.as_ref().map_or_else(
        || path.qualified_test_name(&test.name),
        |source| format!("{source}::{}", test.name),
    )
}

/// Pre-run visitor recording every test, then leaving nothing to run.
#[derive(Debug, Default)]
pub struct SuiteCollector {
    found: Vec<EngineTest>,
}

impl SuiteCollector {
    /// Tests recorded so far, in walk order.
    #[must_use]
    pub fn take(&mut self) -> Vec<EngineTest> {
        std::mem::take(&mut self.found)
    }
}

impl SuiteVisitor for SuiteCollector {
    fn name(&self) -> &str {
        "kwbridge suite collector"
    }

    fn visit_test(&mut self, test: &mut TestCase, path: &SuitePath) -> Result<(), ExtensionError> {
        self.found.push(EngineTest {
            key: test_key(test, path),
            test: test.clone(),
        });
        Ok(())
    }

    fn end_suite(&mut self, suite: &mut TestSuite, _: &SuitePath) -> Result<(), ExtensionError> {
        suite.tests.clear();
        suite.suites.clear();
        Ok(())
    }
}

/// Options of the dry collection pass: the user's options with output,
/// listeners and result modifiers switched off.
fn collection_options(user: &OptionMap, collector: Rc<RefCell<SuiteCollector>>) -> OptionMap {
    let additions: OptionMap = [
        ("prerunmodifier", OptionValue::List(vec![OptionItem::Visitor(collector)])),
        ("output", "NONE".into()),
        ("log", "NONE".into()),
        ("report", "NONE".into()),
        ("console", "none".into()),
        ("exitonerror", true.into()),
        ("runemptysuite", true.into()),
        ("extension", ROBOT_EXTENSION.into()),
        ("listener", OptionValue::Unset),
        ("prerebotmodifier", OptionValue::Unset),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    merge_options(user, &additions)
}

/// Run the dry collection pass and store what it found in `state`.
///
/// # Errors
/// Returns [`BridgeError::Collection`] when the engine cannot parse the
/// target paths or exits with a non-zero code.
pub fn collect_engine_tests(session: &Session, state: &BridgeState) -> Result<(), BridgeError> {
    let sources: Vec<Utf8PathBuf> = session
        .collection_paths()
        .into_iter()
        .filter(|path| path.exists())
        .collect();
    if sources.is_empty() {
        state.set_engine_tests(Vec::new());
        return Ok(());
    }
    let user = state.options(session)?;
    let collector = Rc::new(RefCell::new(SuiteCollector::default()));
    let options = collection_options(&user, Rc::clone(&collector));
    let outcome = state
        .config()
        .libraries
        .iter()
        .fold(Engine::new(), |engine, library| engine.with_library(Rc::clone(library)))
        .run(&sources, &options)
        .map_err(|error| BridgeError::Collection(format!("engine collection failed: {error}")))?;
    if outcome.return_code != 0 {
        return Err(BridgeError::Collection(format!(
            "engine collection exited with code {}",
            outcome.return_code
        )));
    }
    let found = collector.borrow_mut().take();
    tracing::debug!(tests = found.len(), "collected engine tests");
    state.set_engine_tests(found);
    Ok(())
}

/// Items for the engine tests read from `path`.
///
/// Files without the `.robot` extension give no items.
#[must_use]
pub fn engine_items(session: &Session, state: &BridgeState, path: &Utf8Path) -> Vec<Item> {
    if path.extension() != Some(ROBOT_EXTENSION) {
        return Vec::new();
    }
    let relative = session.relative_path(path);
    let owner = Rc::new(Owner::new(
        relative.as_str(),
        OwnerKind::Module,
        relative.file_stem().unwrap_or_default(),
        relative.clone(),
    ));
    state
        .engine_tests_in(path)
        .into_iter()
        .map(|found| engine_item(&relative, &owner, found))
        .collect()
}

fn engine_item(relative: &Utf8Path, owner: &Rc<Owner>, found: EngineTest) -> Item {
    let EngineTest {
        key,
        test,
    } = found;
    let spec = ItemSpec {
        nodeid: format!("{relative}::{}", test.name),
        name: test.name.clone(),
        location: Location {
            path: relative.to_path_buf(),
            line: test.lineno,
            domain: test.name.clone(),
        },
        doc: test.doc.clone(),
        marks: test.tags.iter().map(|tag| Mark::from_tag(tag)).collect(),
    };
    let item = Item::new(spec, vec![Rc::clone(owner)], Rc::new(EngineFileBehavior));
    item.stash().insert(&TEST_KEY, key);
    item
}

/// Phases of an engine-native item: the keywords the test file declares,
/// moved into the item's stash when the test was prepared for the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFileBehavior;

impl ItemBehavior for EngineFileBehavior {
    fn kind(&self) -> ItemKind {
        ItemKind::External
    }

    fn setup(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let keyword = ctx.item().stash().get(&ORIGINAL_SETUP).flatten();
        run_original(ctx, keyword.iter())
    }

    fn runtest(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let body = ctx.item().stash().get(&ORIGINAL_BODY).unwrap_or_default();
        run_original(ctx, body.iter())
    }

    fn teardown(&self, ctx: &TestContext<'_>) -> Result<(), TestError> {
        let keyword = ctx.item().stash().get(&ORIGINAL_TEARDOWN).flatten();
        run_original(ctx, keyword.iter())
    }
}

fn run_original<'k>(
    ctx: &TestContext<'_>,
    keywords: impl Iterator<Item = &'k Keyword>,
) -> Result<(), TestError> {
    for keyword in keywords.filter(|keyword| !keyword.is_disabled()) {
        let args: Vec<String> = keyword.args.iter().map(|arg| arg.value().to_string()).collect();
        ctx.run_keyword(&keyword.name, &args)?;
    }
    Ok(())
}

/// Translate an engine keyword outcome into a runner phase error.
///
/// The engine has already logged the failure, so failures come back marked
/// as reported.
#[must_use]
pub fn keyword_to_test_error(error: &KeywordError) -> TestError {
    if error.is_skip() {
        TestError::skipped(error.message())
    } else {
        TestError::already_reported(error.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwbridge_engine::walk_suite;
    use rstest::rstest;

    fn suite() -> TestSuite {
        let mut root = TestSuite::new("Tests");
        let mut child = TestSuite::new("Login");
        child.tests.push(TestCase::new("Valid user"));
        child.tests.push(TestCase::new("Bad password"));
        root.suites.push(child);
        root
    }

    #[test]
    fn collector_records_keys_and_empties_the_suite() {
        let mut suite = suite();
        let mut collector = SuiteCollector::default();
        let Ok(()) = walk_suite(&mut suite, &mut collector) else {
            panic!("collection should not fail");
        };
        let names: Vec<String> = collector.take().into_iter().map(|found| found.key).collect();
        assert_eq!(names, ["Login.Valid user", "Login.Bad password"]);
        assert_eq!(suite.test_count(), 0);
    }

    #[rstest]
    #[case("deps:db", "deps", &["db"], &[])]
    #[case("timeout:limit=5", "timeout", &[], &[("limit", "5")])]
    #[case("smoke", "smoke", &[], &[])]
    fn tags_become_marks(
        #[case] tag: &str,
        #[case] name: &str,
        #[case] args: &[&str],
        #[case] kwargs: &[(&str, &str)],
    ) {
        let owner = Rc::new(Owner::new("a.robot", OwnerKind::Module, "a", "a.robot"));
        let mut test = TestCase::new("T");
        test.tags.push(tag.to_string());
        let item = engine_item(
            Utf8Path::new("a.robot"),
            &owner,
            EngineTest {
                key: "T".into(),
                test,
            },
        );
        let marks = item.iter_marks();
        let Some(mark) = marks.iter().find(|mark| mark.name == name) else {
            panic!("expected a '{name}' mark");
        };
        assert_eq!(mark.args, args);
        let expected: Vec<(String, String)> = kwargs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        assert_eq!(mark.kwargs, expected);
    }

    #[test]
    fn engine_items_are_external_with_file_node_ids() {
        let owner = Rc::new(Owner::new("dir/a.robot", OwnerKind::Module, "a", "dir/a.robot"));
        let mut test = TestCase::new("Valid user");
        test.lineno = Some(7);
        let item = engine_item(
            Utf8Path::new("dir/a.robot"),
            &owner,
            EngineTest {
                key: "A.Valid user".into(),
                test,
            },
        );
        assert_eq!(item.nodeid(), "dir/a.robot::Valid user");
        assert_eq!(item.kind(), ItemKind::External);
        assert_eq!(item.location().line, Some(7));
        assert_eq!(item.stash().get(&TEST_KEY).as_deref(), Some("A.Valid user"));
    }

    #[rstest]
    #[case(KeywordError::skip("later"), TestError::skipped("later"))]
    #[case(KeywordError::fail("boom"), TestError::already_reported("boom"))]
    fn keyword_errors_translate(#[case] error: KeywordError, #[case] expected: TestError) {
        assert_eq!(keyword_to_test_error(&error), expected);
    }
}
