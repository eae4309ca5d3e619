//! Unit tests for the `.robot` parser.

use super::*;

const SUITE: &str = "\
*** Settings ***
Documentation    Checkout flow
...              for guests.
Library          Payments
Metadata         Owner    shop team
Test Setup       Open Cart
Test Tags        smoke

*** Test Cases ***
Pay With Card
    [Documentation]    Happy path
    [Tags]    card    slow
    Add Item    apple
    Pay    card    # trailing comment
    [Teardown]    Close Cart

No Setup
    [Setup]    NONE
    Log    hi

*** Keywords ***
Add Item
    [Arguments]    ${name}
    Log    adding ${name}
";

fn parsed() -> TestSuite {
    match parse_robot(Utf8Path::new("tests/checkout_flow.robot"), SUITE) {
        Ok(suite) => suite,
        Err(error) => panic!("suite should parse: {error}"),
    }
}

#[test]
fn settings_populate_the_suite() {
    let suite = parsed();
    assert_eq!(suite.name, "Checkout Flow");
    assert_eq!(suite.doc, "Checkout flow for guests.");
    assert_eq!(suite.resource.libraries, ["Payments"]);
    assert_eq!(suite.metadata, [("Owner".to_string(), "shop team".to_string())]);
}

#[test]
fn tests_carry_steps_tags_and_slots() {
    let suite = parsed();
    let Some(test) = suite.tests.first() else {
        panic!("expected a test");
    };
    assert_eq!(test.name, "Pay With Card");
    assert_eq!(test.doc, "Happy path");
    assert_eq!(test.tags, ["card", "slow", "smoke"]);
    assert_eq!(test.lineno, Some(10));
    let names: Vec<_> = test.body.iter().map(|kw| kw.name.as_str()).collect();
    assert_eq!(names, ["Add Item", "Pay"]);
    assert_eq!(test.body.get(1).map(Keyword::display_args), Some(vec!["card".to_string()]));
    assert_eq!(test.setup.as_ref().map(|kw| kw.name.as_str()), Some("Open Cart"));
    assert_eq!(test.teardown.as_ref().map(|kw| kw.kind), Some(KeywordKind::Teardown));
}

#[test]
fn none_setup_overrides_the_default() {
    let suite = parsed();
    let Some(test) = suite.tests.get(1) else {
        panic!("expected a second test");
    };
    assert!(test.setup.is_none());
}

#[test]
fn user_keywords_record_arguments() {
    let suite = parsed();
    let Some(keyword) = suite.resource.keywords.first() else {
        panic!("expected a user keyword");
    };
    assert_eq!(keyword.arguments, ["${name}"]);
    assert_eq!(keyword.body.len(), 1);
}

#[test]
fn unknown_section_is_a_parse_error() {
    let error = parse_robot(Utf8Path::new("x.robot"), "*** Nope ***\n").err();
    assert!(matches!(error, Some(EngineError::Parse { .. })));
}

#[test]
fn unknown_test_setting_is_a_parse_error() {
    let text = "*** Test Cases ***\nT\n    [Bogus]    x\n";
    let error = parse_robot(Utf8Path::new("x.robot"), text).err();
    assert!(error.is_some_and(|e| e.to_string().contains("Non-existing setting '[Bogus]'")));
}
