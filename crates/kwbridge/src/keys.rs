//! Stash keys the bridge stores on items.

use kwbridge_engine::{Keyword, TestId};
use kwbridge_runner::{StashKey, TestError, TestReport};

/// Engine test created for the item in the current run.
pub static TEST_ID: StashKey<TestId> = StashKey::new("kwbridge test id");

/// Key of an engine-native item's test, see
/// [`test_key`](crate::collection::test_key).
pub static TEST_KEY: StashKey<String> = StashKey::new("kwbridge test key");

/// Setup the user wrote for an engine-native test.
pub static ORIGINAL_SETUP: StashKey<Option<Keyword>> = StashKey::new("original setup");

/// Body the user wrote for an engine-native test.
pub static ORIGINAL_BODY: StashKey<Vec<Keyword>> = StashKey::new("original body");

/// Teardown the user wrote for an engine-native test.
pub static ORIGINAL_TEARDOWN: StashKey<Option<Keyword>> = StashKey::new("original teardown");

/// Error the most recent phase ended with.
pub static PHASE_ERROR: StashKey<TestError> = StashKey::new("kwbridge phase error");

/// Engine error messages logged while the item ran, not yet reported.
pub static ENGINE_ERRORS: StashKey<Vec<String>> = StashKey::new("kwbridge engine errors");

/// Reports of the item's phases in the current run.
pub static REPORTS: StashKey<Vec<TestReport>> = StashKey::new("kwbridge reports");
