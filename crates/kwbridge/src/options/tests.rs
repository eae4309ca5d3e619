//! Tests for option reconciliation.

#![expect(clippy::expect_used, reason = "tests fail loudly on unexpected errors")]

use std::rc::Rc;

use kwbridge_engine::{OptionItem, OptionMap, OptionValue};
use kwbridge_runner::{RunnerConfig, Session};
use rstest::{fixture, rstest};

use super::*;
use crate::BridgeExtension;

#[fixture]
fn session() -> Session {
    Session::builder(RunnerConfig::default()).build()
}

fn map(entries: &[(&str, OptionValue)]) -> OptionMap {
    entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

fn list(items: &[&str]) -> OptionValue {
    OptionValue::List(items.iter().map(|item| OptionItem::from(*item)).collect())
}

#[test]
fn scalars_are_replaced() {
    let merged = merge_options(
        &map(&[("name", "A".into()), ("doc", "d".into())]),
        &map(&[("doc", "e".into())]),
    );
    assert_eq!(merged.text("name").as_deref(), Some("A"));
    assert_eq!(merged.text("doc").as_deref(), Some("e"));
}

#[test]
fn keys_only_in_the_override_are_added() {
    let merged = merge_options(&map(&[("doc", "e".into())]), &map(&[("name", "B".into())]));
    assert_eq!(merged.text("name").as_deref(), Some("B"));
    assert_eq!(merged.text("doc").as_deref(), Some("e"));
}

#[rstest]
#[case(list(&["b"]), list(&["e"]), &["b", "e"])]
#[case(list(&["b"]), list(&[]), &["b"])]
#[case(OptionValue::Unset, list(&["e"]), &["e"])]
#[case(list(&["b"]), OptionValue::Unset, &[])]
fn lists_accumulate_unless_cleared(
    #[case] base: OptionValue,
    #[case] overrides: OptionValue,
    #[case] expected: &[&str],
) {
    let merged = merge_options(&map(&[("metadata", base)]), &map(&[("metadata", overrides)]));
    assert_eq!(merged.texts("metadata"), expected);
}

#[test]
fn list_on_one_side_only_is_kept() {
    let merged = merge_options(
        &map(&[("metadata", list(&["b"])), ("doc", "d".into())]),
        &map(&[("doc", "e".into())]),
    );
    assert_eq!(merged.texts("metadata"), ["b"]);
}

#[rstest]
#[case("include")]
#[case("exitonfailure")]
#[case("runemptysuite")]
fn banned_options_are_usage_errors(#[case] name: &str) {
    let options = map(&[(name, "x".into())]);
    let Err(BridgeError::Usage(message)) = reject_banned(&options, "the command line") else {
        panic!("expected a usage error");
    };
    assert!(message.contains(name), "{message}");
}

#[test]
fn environment_options_are_split_like_a_shell() {
    let options = parse_env_options("--name 'My Suite' -M owner:qa --nostatusrc").expect("valid options");
    assert_eq!(options.text("name").as_deref(), Some("My Suite"));
    assert_eq!(options.texts("metadata"), ["owner:qa"]);
    assert!(!options.flag("statusrc"));
}

#[rstest]
#[case("--name 'unterminated", "unbalanced quotes")]
#[case("--bogus", "not recognized")]
fn bad_environment_options_are_usage_errors(#[case] text: &str, #[case] fragment: &str) {
    let Err(BridgeError::Usage(message)) = parse_env_options(text) else {
        panic!("expected a usage error");
    };
    assert!(message.contains(fragment), "{message}");
}

#[rstest]
fn defaults_apply_below_the_command_line(session: Session) {
    let mut cli = OptionMap::new();
    cli.insert("outputdir", "results");
    let config = BridgeConfig::new(cli).with_env_options(None);
    let options = reconcile(&config, &session).expect("options reconcile");
    assert_eq!(options.text("outputdir").as_deref(), Some("results"));
    assert_eq!(options.text("console").as_deref(), Some("quiet"));
}

struct Tagger;

impl BridgeExtension for Tagger {
    fn modify_options(&self, options: &mut OptionMap, _: &Session) {
        options.push("metadata", OptionItem::from("from:hook"));
        options.insert("name", "Hooked");
    }
}

#[rstest]
fn command_line_then_environment_then_extensions(session: Session) {
    let mut cli = OptionMap::new();
    cli.insert("name", "Cli");
    cli.push("metadata", OptionItem::from("from:cli"));
    let config = BridgeConfig::new(cli)
        .with_env_options(Some("--name Env -M from:env".into()))
        .with_extension(Rc::new(Tagger));
    let options = reconcile(&config, &session).expect("options reconcile");
    assert_eq!(options.text("name").as_deref(), Some("Hooked"));
    assert_eq!(options.texts("metadata"), ["from:cli", "from:env", "from:hook"]);
}

#[rstest]
fn banned_environment_options_are_rejected(session: Session) {
    let config = BridgeConfig::new(OptionMap::new()).with_env_options(Some("--include smoke".into()));
    assert!(matches!(reconcile(&config, &session), Err(BridgeError::Usage(_))));
}

struct Dryrunner;

impl BridgeExtension for Dryrunner {
    fn modify_options(&self, options: &mut OptionMap, _: &Session) {
        options.insert("dryrun", true);
    }
}

#[rstest]
fn extensions_cannot_set_banned_options(session: Session) {
    let config = BridgeConfig::new(OptionMap::new())
        .with_env_options(None)
        .with_extension(Rc::new(Dryrunner));
    let Err(BridgeError::Usage(message)) = reconcile(&config, &session) else {
        panic!("expected a usage error");
    };
    assert!(message.starts_with("an extension"), "{message}");
}

#[test]
fn json_view_renders_every_kind() {
    let options = map(&[
        ("name", "S".into()),
        ("dryrun", false.into()),
        ("metadata", list(&["a:b"])),
        ("prerebotmodifier", OptionValue::Unset),
    ]);
    let value = to_json(&options);
    assert_eq!(value.get("name"), Some(&json!("S")));
    assert_eq!(value.get("dryrun"), Some(&json!(false)));
    assert_eq!(value.get("metadata"), Some(&json!(["a:b"])));
    assert_eq!(value.get("prerebotmodifier"), Some(&Value::Null));
}
