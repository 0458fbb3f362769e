use assert_cmd::prelude::*;
use serde_json::Value;
use std::process::Command;

fn tabflow() -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("tabflow");
    let mut cmd = Command::new(bin);
    cmd.env("RUST_LOG", "warn")
        .args(["--config", "tests/fixtures/absent.yaml"]);
    cmd
}

fn stdout_json(cmd: &mut Command, args: &[&str]) -> Value {
    let assert = cmd.args(args).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    serde_json::from_str(stdout.trim()).expect("valid json")
}

#[test]
fn parse_prints_structured_action() {
    let value = stdout_json(
        &mut tabflow(),
        &["parse", r#"setValue(3, "hello world")"#, "--thought", "fill it"],
    );
    assert_eq!(value["kind"], "success");
    assert_eq!(value["thought"], "fill it");
    assert_eq!(value["structuredAction"]["name"], "setValue");
    assert_eq!(value["structuredAction"]["args"]["elementId"], 3.0);
    assert_eq!(value["structuredAction"]["args"]["value"], "hello world");
}

#[test]
fn parse_reports_malformed_text_without_failing() {
    let value = stdout_json(&mut tabflow(), &["parse", "click(5"]);
    assert_eq!(value["kind"], "error");
    assert!(value["message"].as_str().unwrap().contains("click(5"));
}

#[test]
fn done_is_an_alias_for_finish() {
    let value = stdout_json(&mut tabflow(), &["parse", "done"]);
    assert_eq!(value["structuredAction"]["name"], "finish");
    assert_eq!(value["structuredAction"]["args"], serde_json::json!({}));
}

#[test]
fn config_prints_effective_settings_as_json() {
    let value = stdout_json(
        tabflow().env("TABFLOW_MAX_CONCURRENT_TASKS", "5"),
        &["config", "--format", "json"],
    );
    assert_eq!(value["orchestrator"]["max_concurrent_tasks"], 5);
    assert_eq!(value["orchestrator"]["max_actions"], 50);
}

#[test]
fn config_source_is_logged_after_logging_starts() {
    let output = tabflow()
        .env("TABFLOW_MAX_CONCURRENT_TASKS", "zero")
        .args(["config", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stderr = String::from_utf8(output.stderr).expect("utf8 output");
    assert!(stderr.contains("config file not found"), "stderr: {stderr}");
    assert!(stderr.contains("TABFLOW_MAX_CONCURRENT_TASKS"), "stderr: {stderr}");
}
