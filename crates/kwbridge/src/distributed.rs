//! Distributed runs: per-item worker outputs and merging them afterwards.
//!
//! A worker runs the engine once per item, each run writing its own output
//! file under the worker's temporary directory. Once every worker finished,
//! the controller merges those files into the single output, log and report
//! the user asked for.

use std::cell::RefCell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use kwbridge_engine::rebot::{Rebot, combined_suite_name, rename_root_suite};
use kwbridge_engine::{
    ExtensionError, OptionItem, OptionMap, OptionValue, ResultVisitor, SuiteResult, output,
};
use kwbridge_runner::{Item, Session};
use walkdir::WalkDir;

use crate::error::BridgeError;
use crate::options::merge_options;
use crate::run::{RunMode, run_engine};
use crate::state::BridgeState;

/// Directory below a worker's temporary directory holding its outputs.
pub const WORKER_OUTPUT_DIR: &str = "kwbridge_worker_outputs";
/// Metadata entry naming the worker that wrote an output.
pub const WORKER_METADATA: &str = "kwbridge-worker";

/// Output file of the single-item run of `item` on worker `worker`.
#[must_use]
pub fn worker_output_path(basetemp: &Utf8Path, worker: &str, item: &Item) -> Utf8PathBuf {
    let mut hasher = DefaultHasher::new();
    item.nodeid().hash(&mut hasher);
    basetemp
        .join(WORKER_OUTPUT_DIR)
        .join(format!("{worker}_{:016x}.xml", hasher.finish()))
}

/// Worker outputs below the controller's temporary directory, sorted.
///
/// Each worker's directory is `<basetemp>/<worker>`, so outputs sit exactly
/// three levels down.
#[must_use]
pub fn find_worker_outputs(basetemp: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut outputs: Vec<Utf8PathBuf> = WalkDir::new(basetemp)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(|path| path.extension() == Some("xml"))
        .filter(|path| {
            path.parent()
                .and_then(Utf8Path::file_name)
                .is_some_and(|name| name == WORKER_OUTPUT_DIR)
        })
        .collect();
    outputs.sort();
    outputs
}

/// Remove worker outputs left below `basetemp` by an earlier session.
///
/// # Errors
/// Returns [`BridgeError::Io`] when an output cannot be removed.
pub fn clear_worker_outputs(basetemp: &Utf8Path) -> Result<(), BridgeError> {
    for stale in find_worker_outputs(basetemp) {
        tracing::debug!(path = %stale, "removing stale worker output");
        std::fs::remove_file(&stale)?;
    }
    Ok(())
}

/// Give every output the same top-level suite name so they can be merged.
///
/// # Errors
/// Returns [`BridgeError::Engine`] when an output cannot be read or written.
pub fn unify_suite_names(outputs: &[Utf8PathBuf]) -> Result<(), BridgeError> {
    if outputs.len() < 2 {
        return Ok(());
    }
    let names = outputs
        .iter()
        .map(|path| output::read_output(path).map(|result| result.suite.name))
        .collect::<Result<Vec<String>, _>>()
        .map_err(kwbridge_engine::EngineError::from)?;
    let name = combined_suite_name(&names);
    for path in outputs {
        rename_root_suite(path, &name)?;
    }
    Ok(())
}

/// Result visitor removing the worker metadata from the top-level suite.
#[derive(Debug, Default)]
pub struct MetadataStripper;

impl ResultVisitor for MetadataStripper {
    fn name(&self) -> &str {
        "kwbridge worker metadata stripper"
    }

    fn start_suite(&mut self, suite: &mut SuiteResult, depth: usize) -> Result<(), ExtensionError> {
        if depth == 0 {
            suite.metadata.retain(|(name, _)| name != WORKER_METADATA);
        }
        Ok(())
    }
}

/// Default visible part of the user's log level.
fn visible_level(options: &OptionMap) -> String {
    options
        .text("loglevel")
        .and_then(|level| level.split_once(':').map(|(_, visible)| visible.to_string()))
        .unwrap_or_else(|| "INFO".to_string())
}

/// Options for merging worker outputs: the user's options the merge tool
/// accepts, with the merged output named `output.xml` and every message
/// kept.
#[must_use]
pub fn rebot_options(options: &OptionMap) -> OptionMap {
    let base: OptionMap = [("output".to_string(), OptionValue::from("output.xml"))]
        .into_iter()
        .collect();
    let mut merged = merge_options(&base, &options.filtered(|spec| spec.rebot));
    merged.insert("merge", true);
    merged.insert("loglevel", format!("TRACE:{}", visible_level(options)).as_str());
    let stripper: Rc<RefCell<dyn ResultVisitor>> = Rc::new(RefCell::new(MetadataStripper));
    let mut modifiers = vec![OptionItem::ResultVisitor(stripper)];
    modifiers.extend(merged.list("prerebotmodifier"));
    merged.insert("prerebotmodifier", modifiers);
    merged
}

/// Merge every worker output of the session into the final output.
///
/// Without any worker output one empty engine run is made instead, so the
/// user still gets an output, log and report.
///
/// # Errors
/// Engine errors from reading, renaming or merging outputs.
pub fn merge_outputs(session: &Session, state: &Rc<BridgeState>) -> Result<(), BridgeError> {
    let basetemp = session.basetemp()?;
    let outputs = find_worker_outputs(&basetemp);
    if outputs.is_empty() {
        tracing::info!("no worker outputs found, running the engine over an empty suite");
        return run_engine(session, state, &RunMode::Empty);
    }
    unify_suite_names(&outputs)?;
    let options = rebot_options(&*state.options(session)?);
    tracing::info!(outputs = outputs.len(), "merging worker outputs");
    let outcome = Rebot::new().run(&outputs, &options)?;
    tracing::debug!(rc = outcome.return_code, "merged worker outputs");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests fail loudly on broken fixtures")]

    use super::*;
    use kwbridge_engine::{ExecutionResult, Status, TestResult};
    use rstest::rstest;
    use tempfile::TempDir;

    fn write(path: &Utf8Path, suite: &str, test: &str) {
        let mut root = SuiteResult::named(suite);
        root.metadata.push((WORKER_METADATA.to_string(), "gw0".to_string()));
        root.tests.push(TestResult {
            name: test.to_string(),
            status: Status::Pass,
            ..TestResult::default()
        });
        root.update_status();
        std::fs::create_dir_all(path.parent().expect("output has a directory")).expect("create dir");
        output::write_output(&ExecutionResult::new(root), path).expect("write output");
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
    }

    #[test]
    fn outputs_are_found_three_levels_down() {
        let dir = TempDir::new().expect("temp dir");
        let base = utf8(&dir);
        write(&base.join("gw1").join(WORKER_OUTPUT_DIR).join("gw1_2.xml"), "A", "t2");
        write(&base.join("gw0").join(WORKER_OUTPUT_DIR).join("gw0_1.xml"), "A", "t1");
        write(&base.join("gw0").join("elsewhere").join("x.xml"), "A", "t3");
        write(&base.join("output.xml"), "A", "t4");
        let found: Vec<String> = find_worker_outputs(&base)
            .iter()
            .filter_map(|path| path.file_name().map(str::to_string))
            .collect();
        assert_eq!(found, ["gw0_1.xml", "gw1_2.xml"]);

        clear_worker_outputs(&base).expect("clear outputs");
        assert!(find_worker_outputs(&base).is_empty());
        assert!(base.join("output.xml").exists());
    }

    #[test]
    fn differently_named_outputs_get_the_combined_name() {
        let dir = TempDir::new().expect("temp dir");
        let base = utf8(&dir);
        let first = base.join("gw0").join(WORKER_OUTPUT_DIR).join("a.xml");
        let second = base.join("gw1").join(WORKER_OUTPUT_DIR).join("b.xml");
        write(&first, "A", "t1");
        write(&second, "B", "t2");
        unify_suite_names(&[first.clone(), second.clone()]).expect("rename");
        for path in [first, second] {
            assert_eq!(output::read_output(&path).expect("read").suite.name, "A & B");
        }
    }

    #[rstest]
    #[case(None, "TRACE:INFO")]
    #[case(Some("DEBUG"), "TRACE:INFO")]
    #[case(Some("DEBUG:WARN"), "TRACE:WARN")]
    fn merging_keeps_every_message(#[case] loglevel: Option<&str>, #[case] expected: &str) {
        let mut options = OptionMap::new();
        if let Some(level) = loglevel {
            options.insert("loglevel", level);
        }
        options.insert("console", "quiet");
        let merged = rebot_options(&options);
        assert_eq!(merged.text("loglevel").as_deref(), Some(expected));
        assert_eq!(merged.text("output").as_deref(), Some("output.xml"));
        assert!(merged.flag("merge"));
        assert!(!merged.contains("console"));
        assert_eq!(merged.list("prerebotmodifier").len(), 1);
    }

    #[test]
    fn worker_metadata_is_stripped_from_the_top_level_only() {
        let mut root = SuiteResult::named("A");
        root.metadata.push((WORKER_METADATA.to_string(), "gw0".to_string()));
        root.metadata.push(("Owner".to_string(), "qa".to_string()));
        let mut child = SuiteResult::named("Child");
        child.metadata.push((WORKER_METADATA.to_string(), "gw0".to_string()));
        let mut stripper = MetadataStripper;
        stripper.start_suite(&mut root, 0).expect("strip");
        stripper.start_suite(&mut child, 1).expect("strip");
        assert_eq!(root.metadata, [("Owner".to_string(), "qa".to_string())]);
        assert_eq!(child.metadata.len(), 1);
    }

    #[test]
    fn worker_output_names_hash_the_node_id() {
        use kwbridge_runner::{ItemBehavior, ItemSpec, TestContext, TestError};

        struct Noop;
        impl ItemBehavior for Noop {
            fn runtest(&self, _: &TestContext<'_>) -> Result<(), TestError> {
                Ok(())
            }
        }
        let item = |nodeid: &str| {
            Item::new(
                ItemSpec {
                    nodeid: nodeid.into(),
                    ..ItemSpec::default()
                },
                Vec::new(),
                Rc::new(Noop),
            )
        };
        let base = Utf8Path::new("/tmp/base/gw0");
        let first = worker_output_path(base, "gw0", &item("a.rs::one"));
        let again = worker_output_path(base, "gw0", &item("a.rs::one"));
        let other = worker_output_path(base, "gw0", &item("a.rs::two"));
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(first.starts_with("/tmp/base/gw0/kwbridge_worker_outputs"));
        assert!(first.file_name().is_some_and(|name| name.starts_with("gw0_")));
    }
}
