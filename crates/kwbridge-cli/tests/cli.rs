//! End-to-end runs of the `kwbridge` binary.

use std::fs;
use std::process::Output;
use std::str;

use assert_cmd::Command;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const LOGIN_SUITE: &str = "\
*** Test Cases ***
Valid Login
    Log    logging in
    Should Be Equal    admin    admin

Invalid Login
    Fail    wrong password
";

struct Project {
    root: TempDir,
    out: TempDir,
}

#[fixture]
fn project() -> Project {
    let root = TempDir::new().unwrap_or_else(|error| panic!("create root dir: {error}"));
    let out = TempDir::new().unwrap_or_else(|error| panic!("create output dir: {error}"));
    fs::write(root.path().join("login.robot"), LOGIN_SUITE).unwrap_or_else(|error| panic!("write suite: {error}"));
    Project { root, out }
}

impl Project {
    fn kwbridge(&self, args: &[&str]) -> Output {
        Command::cargo_bin("kwbridge")
            .unwrap_or_else(|error| panic!("binary exists: {error}"))
            .env_remove("KWBRIDGE_ENGINE_OPTIONS")
            .env_remove("KWBRIDGE_LOG_LEVEL")
            .arg("--rootdir")
            .arg(self.root.path())
            .arg("--engine-outputdir")
            .arg(self.out.path())
            .args(args)
            .output()
            .unwrap_or_else(|error| panic!("kwbridge runs: {error}"))
    }
}

fn stdout(output: &Output) -> &str {
    str::from_utf8(&output.stdout).unwrap_or_else(|error| panic!("stdout is UTF-8: {error}"))
}

#[rstest]
fn failing_suites_fail_the_run(project: Project) {
    let output = project.kwbridge(&[]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("FAILED login.robot::Invalid Login (call)"));
    assert!(text.ends_with("1 passed, 1 failed (exit code 1)\n"));
    assert!(project.out.path().join("output.xml").is_file());
    assert!(project.out.path().join("log.html").is_file());
}

#[rstest]
fn keyword_selection_runs_the_matching_test_only(project: Project) {
    let output = project.kwbridge(&["-k", "Valid and not Invalid"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).ends_with("1 passed (exit code 0)\n"));
}

#[rstest]
fn collect_only_lists_node_ids(project: Project) {
    let output = project.kwbridge(&["--collect-only"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output),
        "login.robot::Valid Login\nlogin.robot::Invalid Login\n2 items collected\n"
    );
    assert!(!project.out.path().join("output.xml").exists());
}

#[rstest]
fn dump_options_prints_the_reconciled_options(project: Project) {
    let output = project.kwbridge(&["--dump-options", "--engine-metadata", "Build:42"]);
    assert_eq!(output.status.code(), Some(0));
    let options: serde_json::Value =
        serde_json::from_str(stdout(&output)).unwrap_or_else(|error| panic!("options are JSON: {error}"));
    assert_eq!(options["console"], "quiet");
    assert_eq!(options["outputdir"], project.out.path().to_string_lossy().as_ref());
    assert_eq!(options["metadata"], serde_json::json!(["Build:42"]));
}

#[rstest]
#[case(&["--engine-args", "--include smoke"])]
#[case(&["--engine-args", "--dryrun"])]
fn banned_engine_arguments_are_usage_errors(project: Project, #[case] args: &[&str]) {
    let output = project.kwbridge(args);
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("kwbridge manages itself"), "stderr was: {stderr}");
}

#[rstest]
#[case("--engine-include")]
#[case("--engine-dryrun")]
fn banned_engine_options_are_not_accepted(project: Project, #[case] flag: &str) {
    let output = project.kwbridge(&[flag, "smoke"]);
    assert_eq!(output.status.code(), Some(2));
}

#[rstest]
fn workers_run_the_suite_in_child_processes(project: Project) {
    let basetemp = TempDir::new().unwrap_or_else(|error| panic!("create basetemp: {error}"));
    let basetemp_arg = basetemp.path().to_string_lossy().into_owned();
    let output = project.kwbridge(&["-n", "2", "--basetemp", &basetemp_arg]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).ends_with("1 passed, 1 failed (exit code 1)\n"));
    assert!(basetemp.path().join("gw0").is_dir());
    assert!(basetemp.path().join("gw1").is_dir());
    assert!(project.out.path().join("output.xml").is_file());
}
