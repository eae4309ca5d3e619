//! Replacing test slots with calls into the runner.

use std::mem;
use std::rc::Rc;

use kwbridge_engine::{
    Arg, ExtensionError, Keyword, KeywordKind, SuitePath, SuiteVisitor, TestCase, TestSuite,
    normalize_name,
};
use kwbridge_runner::Item;

use crate::error::BridgeError;
use crate::keys::{ORIGINAL_BODY, ORIGINAL_SETUP, ORIGINAL_TEARDOWN};
use crate::library::{LIBRARY_NAME, RUN_TEST, SETUP, TEARDOWN};
use crate::state::BridgeState;

/// Pre-run visitor pointing every test's setup, body and teardown at the
/// bridge library, which runs the matching runner phase.
///
/// The test's own keywords move to its item's stash; engine-native items run
/// them from there. Outside single-item runs the injector also links each
/// item to the one the engine runs after it.
pub struct ProtocolInjector {
    state: Rc<BridgeState>,
    single: Option<Item>,
    previous: Option<Item>,
}

impl ProtocolInjector {
    /// Injector for a run of every selected item, or of `single` only.
    #[must_use]
    pub fn new(state: Rc<BridgeState>, single: Option<Item>) -> Self {
        Self {
            state,
            single,
            previous: None,
        }
    }

    fn item_for(&self, test: &TestCase) -> Result<Item, BridgeError> {
        self.single
            .clone()
            .or_else(|| self.state.item_for(test.id))
            .ok_or_else(|| BridgeError::internal(format!("engine test '{}' has no runner item", test.name)))
    }
}

/// Call of bridge keyword `name` for `item`, in slot `kind`.
///
/// The node id is cloaked so it does not clutter the log.
#[must_use]
pub fn bridge_keyword(name: &str, item: &Item, kind: KeywordKind) -> Keyword {
    Keyword::with_args(
        format!("{LIBRARY_NAME}.{name}"),
        vec![Arg::Cloaked(item.nodeid().to_string())],
    )
    .into_kind(kind)
}

fn is_bridge_keyword(keyword: &Keyword) -> bool {
    keyword
        .name
        .split_once('.')
        .is_some_and(|(library, _)| normalize_name(library) == normalize_name(LIBRARY_NAME))
}

impl SuiteVisitor for ProtocolInjector {
    fn name(&self) -> &str {
        "kwbridge protocol injector"
    }

    fn start_suite(&mut self, suite: &mut TestSuite, path: &SuitePath) -> Result<(), ExtensionError> {
        let imported = suite
            .resource
            .libraries
            .iter()
            .any(|library| normalize_name(library) == normalize_name(LIBRARY_NAME));
        if path.is_root() && !imported {
            suite.resource.libraries.push(LIBRARY_NAME.to_string());
        }
        Ok(())
    }

    fn visit_test(&mut self, test: &mut TestCase, _: &SuitePath) -> Result<(), ExtensionError> {
        let item = self
            .item_for(test)
            .map_err(|error| self.state.abort(error))?;
        let injected = test
            .setup
            .iter()
            .chain(&test.body)
            .chain(&test.teardown)
            .any(is_bridge_keyword);
        if injected {
            let error = BridgeError::internal(format!("test '{}' was already prepared for the runner", test.name));
            return Err(self.state.abort(error).into());
        }
        let stash = item.stash();
        stash.insert(&ORIGINAL_SETUP, test.setup.take());
        stash.insert(&ORIGINAL_BODY, mem::take(&mut test.body));
        stash.insert(&ORIGINAL_TEARDOWN, test.teardown.take());
        test.setup = Some(bridge_keyword(SETUP, &item, KeywordKind::Setup));
        test.body = vec![bridge_keyword(RUN_TEST, &item, KeywordKind::Keyword)];
        test.teardown = Some(bridge_keyword(TEARDOWN, &item, KeywordKind::Teardown));
        if self.single.is_none() {
            if let Some(previous) = &self.previous {
                previous.set_nextitem(Some(&item));
            }
            self.previous = Some(item);
        }
        Ok(())
    }

    fn end_suite(&mut self, _: &mut TestSuite, path: &SuitePath) -> Result<(), ExtensionError> {
        if path.is_root() {
            if let Some(last) = self.previous.take() {
                last.set_nextitem(None);
            }
        }
        Ok(())
    }
}
