//! Building engine suites for runner-native test functions.

use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use hashbrown::{HashMap, HashSet};
use kwbridge_engine::{EngineError, Parser, TestCase, TestSuite};
use kwbridge_runner::{Item, ItemKind, Owner, Session};

use crate::keys::TEST_ID;
use crate::state::BridgeState;

/// Parser turning each registered test module into an engine suite.
///
/// Modules live in memory, so the parser handles no file extension and
/// instead announces the module paths as virtual sources. Classes become
/// child suites and every function becomes a test with empty slots; the
/// injector fills the slots later.
pub struct SynthesizingParser {
    session: Session,
    state: Rc<BridgeState>,
}

impl SynthesizingParser {
    /// Parser reading the items of `session`.
    #[must_use]
    pub fn new(session: Session, state: Rc<BridgeState>) -> Self {
        Self { session, state }
    }

    fn test_for(&self, item: &Item, source: &Utf8Path) -> TestCase {
        let mut test = TestCase::new(item.name());
        test.doc = item.doc().to_string();
        for mark in item.iter_marks() {
            test.add_tag(&mark.to_tag());
        }
        test.source = Some(source.to_path_buf());
        test.lineno = item.location().line;
        item.stash().insert(&TEST_ID, test.id);
        self.state.associate(test.id, item);
        test
    }
}

impl Parser for SynthesizingParser {
    fn name(&self) -> &str {
        "kwbridge"
    }

    fn extensions(&self) -> Vec<String> {
        Vec::new()
    }

    fn virtual_sources(&self) -> Vec<Utf8PathBuf> {
        let rootdir = &self.session.config().rootdir;
        self.session
            .modules()
            .iter()
            .map(|module| rootdir.join(module.path()))
            .collect()
    }

    fn parse(&self, source: &Utf8Path) -> Result<TestSuite, EngineError> {
        let rootdir = self.session.config().rootdir.clone();
        let items: Vec<Item> = self
            .session
            .items()
            .iter()
            .filter(|item| item.kind() == ItemKind::Function)
            .filter(|item| rootdir.join(&item.location().path) == source)
            .cloned()
            .collect();
        let mut suite = TestSuite::from_source(source);
        let mut built: HashMap<String, usize> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        for item in &items {
            if !seen.insert(item.nodeid().to_string()) {
                return Err(EngineError::Parse {
                    path: source.to_path_buf(),
                    message: format!("item '{}' was synthesised twice", item.nodeid()),
                });
            }
            let Some((module, classes)) = item.owners().split_first() else {
                continue;
            };
            if suite.doc.is_empty() {
                suite.doc.clone_from(&module.doc);
            }
            let test = self.test_for(item, source);
            owner_suite(&mut suite, classes, &mut built, source)?.tests.push(test);
        }
        tracing::debug!(%source, tests = items.len(), "synthesised suite");
        Ok(suite)
    }
}

/// Suite of the innermost of `owners` below `root`, creating missing ones.
fn owner_suite<'a>(
    root: &'a mut TestSuite,
    owners: &[Rc<Owner>],
    built: &mut HashMap<String, usize>,
    source: &Utf8Path,
) -> Result<&'a mut TestSuite, EngineError> {
    let mut suite = root;
    for owner in owners {
        let known = built.get(&owner.nodeid).copied();
        let index = known.unwrap_or_else(|| {
            let index = suite.suites.len();
            suite.suites.push(class_suite(owner, source));
            built.insert(owner.nodeid.clone(), index);
            index
        });
        let Some(child) = suite.suites.get_mut(index) else {
            return Err(EngineError::Parse {
                path: source.to_path_buf(),
                message: format!("suite of '{}' went missing", owner.nodeid),
            });
        };
        suite = child;
    }
    Ok(suite)
}

fn class_suite(owner: &Owner, source: &Utf8Path) -> TestSuite {
    let mut suite = TestSuite::new(owner.name.clone());
    suite.doc.clone_from(&owner.doc);
    suite.source = Some(source.to_path_buf());
    suite
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests fail loudly on broken fixtures")]

    use super::*;
    use crate::config::BridgeConfig;
    use kwbridge_engine::OptionMap;
    use kwbridge_runner::{Mark, RunnerConfig, TestClass, TestFunction, TestModule};
    use rstest::{fixture, rstest};

    fn passing() -> impl Fn(&kwbridge_runner::TestContext<'_>) -> Result<(), kwbridge_runner::TestError> {
        |_| Ok(())
    }

    #[fixture]
    fn session() -> Session {
        let module = TestModule::new("tests/test_login.rs")
            .doc("Login checks.")
            .function(TestFunction::new("test_valid", passing()).doc("Valid user.").mark(Mark::new("order").arg("1")))
            .class(
                TestClass::new("TestAdmin")
                    .doc("Admin checks.")
                    .function(TestFunction::new("test_grant", passing()))
                    .function(TestFunction::new("test_revoke", passing())),
            );
        let session = Session::builder(RunnerConfig {
            rootdir: "/project".into(),
            ..RunnerConfig::default()
        })
        .module(module)
        .build();
        session.perform_collect().expect("in-memory modules collect");
        session
    }

    fn parser(session: &Session) -> (SynthesizingParser, Rc<BridgeState>) {
        let state = Rc::new(BridgeState::new(
            BridgeConfig::new(OptionMap::new()).with_env_options(None),
        ));
        (SynthesizingParser::new(session.clone(), Rc::clone(&state)), state)
    }

    #[rstest]
    fn modules_are_virtual_sources(session: Session) {
        let (parser, _) = parser(&session);
        assert_eq!(parser.virtual_sources(), [Utf8PathBuf::from("/project/tests/test_login.rs")]);
        assert!(parser.extensions().is_empty());
    }

    #[rstest]
    fn classes_become_child_suites(session: Session) {
        let (parser, _) = parser(&session);
        let suite = parser
            .parse(Utf8Path::new("/project/tests/test_login.rs"))
            .expect("module parses");
        assert_eq!(suite.name, "Test Login");
        assert_eq!(suite.doc, "Login checks.");
        let names: Vec<&str> = suite.tests.iter().map(|test| test.name.as_str()).collect();
        assert_eq!(names, ["test_valid"]);
        let class = suite.suites.first().expect("class suite");
        assert_eq!(class.name, "TestAdmin");
        assert_eq!(class.doc, "Admin checks.");
        assert_eq!(class.tests.len(), 2);
        assert_eq!(suite.suites.len(), 1);
    }

    #[rstest]
    fn tests_carry_docs_tags_and_item_association(session: Session) {
        let (parser, state) = parser(&session);
        let suite = parser
            .parse(Utf8Path::new("/project/tests/test_login.rs"))
            .expect("module parses");
        let test = suite.tests.first().expect("module-level test");
        assert_eq!(test.doc, "Valid user.");
        assert_eq!(test.tags, ["order:1"]);
        assert!(test.setup.is_none() && test.body.is_empty() && test.teardown.is_none());
        let item = state.item_for(test.id).expect("test is associated");
        assert_eq!(item.nodeid(), "tests/test_login.rs::test_valid");
        assert_eq!(item.stash().get(&TEST_ID), Some(test.id));
    }

    #[rstest]
    fn other_sources_give_empty_suites(session: Session) {
        let (parser, _) = parser(&session);
        let suite = parser
            .parse(Utf8Path::new("/project/tests/test_other.rs"))
            .expect("unknown module parses");
        assert_eq!(suite.test_count(), 0);
    }
}
