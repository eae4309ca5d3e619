//! Pruning engine suites down to the runner's selected items.

use std::rc::Rc;

use hashbrown::HashMap;
use kwbridge_engine::{ExtensionError, SuitePath, SuiteVisitor, TestCase, TestSuite};
use kwbridge_runner::{Item, ItemKind, Session};

use crate::collection::test_key;
use crate::keys::TEST_KEY;
use crate::state::BridgeState;

/// Pre-run visitor dropping every test that has no selected item.
///
/// Synthesised tests were associated with their item while parsing.
/// Engine-native tests are matched here by [`test_key`]. Association of a
/// suite's tests happens before the suite is pruned in `end_suite`.
pub struct TestFilterer {
    session: Session,
    state: Rc<BridgeState>,
    single: Option<Item>,
    by_name: Option<HashMap<String, Item>>,
}

impl TestFilterer {
    /// Filterer for a run of every selected item, or of `single` only.
    #[must_use]
    pub fn new(session: Session, state: Rc<BridgeState>, single: Option<Item>) -> Self {
        Self {
            session,
            state,
            single,
            by_name: None,
        }
    }

    fn external_items(&self) -> HashMap<String, Item> {
        self.session
            .items()
            .iter()
            .filter(|item| item.kind() == ItemKind::External)
            .filter_map(|item| {
                item.stash()
                    .get(&TEST_KEY)
                    .map(|name| (name, item.clone()))
            })
            .collect()
    }

    fn keeps(&self, test: &TestCase) -> bool {
        self.state
            .item_for(test.id)
            .is_some_and(|item| self.single.as_ref().is_none_or(|single| single.same(&item)))
    }
}

impl SuiteVisitor for TestFilterer {
    fn name(&self) -> &str {
        "kwbridge test filterer"
    }

    fn visit_test(&mut self, test: &mut TestCase, path: &SuitePath) -> Result<(), ExtensionError> {
        if self.state.item_for(test.id).is_some() {
            return Ok(());
        }
        if self.by_name.is_none() {
            self.by_name = Some(self.external_items());
        }
        let key = test_key(test, path);
        if let Some(item) = self.by_name.as_ref().and_then(|items| items.get(&key)) {
            self.state.associate(test.id, item);
        }
        Ok(())
    }

    fn end_suite(&mut self, suite: &mut TestSuite, _: &SuitePath) -> Result<(), ExtensionError> {
        let before = suite.tests.len();
        suite.tests.retain(|test| self.keeps(test));
        suite.suites.retain(|child| child.test_count() > 0);
        if suite.tests.len() != before {
            tracing::debug!(suite = %suite.name, dropped = before - suite.tests.len(), "filtered tests");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use kwbridge_engine::{OptionMap, walk_suite};
    use kwbridge_runner::{ItemBehavior, ItemSpec, Location, RunnerConfig, TestContext, TestError};
    use rstest::rstest;

    struct Noop;

    impl ItemBehavior for Noop {
        fn kind(&self) -> ItemKind {
            ItemKind::External
        }

        fn runtest(&self, _: &TestContext<'_>) -> Result<(), TestError> {
            Ok(())
        }
    }

    fn external(name: &str, qualified: &str) -> Item {
        let item = Item::new(
            ItemSpec {
                nodeid: format!("a.robot::{name}"),
                name: name.into(),
                location: Location {
                    path: "a.robot".into(),
                    line: None,
                    domain: name.into(),
                },
                ..ItemSpec::default()
            },
            Vec::new(),
            Rc::new(Noop),
        );
        item.stash().insert(&TEST_KEY, qualified.to_string());
        item
    }

    fn engine_suite() -> TestSuite {
        let mut root = TestSuite::new("Project");
        let mut file = TestSuite::new("A");
        file.tests.push(TestCase::new("Kept"));
        file.tests.push(TestCase::new("Deselected"));
        let mut empty = TestSuite::new("B");
        empty.tests.push(TestCase::new("Gone"));
        root.suites.push(file);
        root.suites.push(empty);
        root
    }

    fn setup(single: bool) -> (TestFilterer, Item) {
        let kept = external("Kept", "A.Kept");
        let session = Session::builder(RunnerConfig::default()).build();
        let state = Rc::new(BridgeState::new(
            BridgeConfig::new(OptionMap::new()).with_env_options(None),
        ));
        let mut filterer = TestFilterer::new(session, state, single.then(|| kept.clone()));
        filterer.by_name = Some(
            [("A.Kept".to_string(), kept.clone()), ("A.Deselected".to_string(), external("Other", "X"))]
                .into_iter()
                .take(if single { 2 } else { 1 })
                .collect(),
        );
        (filterer, kept)
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn tests_without_items_and_empty_suites_are_dropped(#[case] single: bool) {
        let (mut filterer, kept) = setup(single);
        let mut suite = engine_suite();
        let Ok(()) = walk_suite(&mut suite, &mut filterer) else {
            panic!("filtering should not fail");
        };
        let names: Vec<&str> = suite.all_tests().iter().map(|test| test.name.as_str()).collect();
        assert_eq!(names, ["Kept"]);
        assert_eq!(suite.suites.len(), 1);
        let Some(test) = suite.all_tests().first().map(|test| test.id) else {
            panic!("one test should remain");
        };
        assert!(filterer.state.item_for(test).is_some_and(|item| item.same(&kept)));
    }
}
