//! End-to-end tests for the `lifecycle-host` binary.
//!
//! Each test drives the real binary over stdio with a fixture handler script.

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn response_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be JSON"))
        .collect()
}

#[test]
fn serves_a_full_lifecycle() {
    let mut command = cargo_bin_cmd!("lifecycle-host");
    command
        .arg("--handler-path")
        .arg(fixture("accumulator.rhai"))
        .write_stdin(concat!(
            "{\"Event\": \"OnCreate\", \"Data\": {\"foo\": \"20\"}}\n",
            "{\"Event\": \"OnReceive\", \"Data\": {\"bar\": \"10\"}}\n",
            "{\"Event\": \"OnDestroy\", \"Data\": null}\n",
        ));

    let output = command.assert().success().get_output().clone();
    let lines = response_lines(&output.stdout);

    let events: Vec<_> = lines
        .iter()
        .filter_map(|line| line.get("Event").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    assert_eq!(events, vec!["OnCreate", "StandardOutput", "OnReceive", "OnDestroy"]);

    let created = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_owned)
        .expect("first line");
    assert_eq!(
        created,
        r#"{"Event": "OnCreate", "Status": "ok", "Data": "{\"initialized_foo\": 20.0}"}"#
    );

    let data = lines
        .get(2)
        .and_then(|line| line.get("Data"))
        .and_then(Value::as_str)
        .expect("OnReceive data string");
    let received: Value = serde_json::from_str(data).expect("decode");
    assert_eq!(received["foobar"], "20.0_10.0");
}

#[test]
fn unknown_events_are_answered_with_an_error() {
    let mut command = cargo_bin_cmd!("lifecycle-host");
    command
        .arg("--handler-path")
        .arg(fixture("accumulator.rhai"))
        .write_stdin("{\"Event\": \"OnFoo\", \"Data\": {}}\n");

    command
        .assert()
        .success()
        .stdout(contains(
            r#"{"Event": "OnFoo", "Status": "error", "Data": "see error log for details"}"#,
        ))
        .stderr(contains("Unknown event type: OnFoo"));
}

#[test]
fn slow_calls_time_out_and_later_events_are_served() {
    let mut command = cargo_bin_cmd!("lifecycle-host");
    command
        .arg("--handler-path")
        .arg(fixture("slow.rhai"))
        .arg("--timeout-secs")
        .arg("1")
        .write_stdin(concat!(
            "{\"Event\": \"OnReceive\", \"Data\": {}}\n",
            "{\"Event\": \"OnDestroy\", \"Data\": null}\n",
        ));

    command
        .assert()
        .success()
        .stdout(
            contains(r#"{"Event": "OnReceive", "Status": "error""#)
                .and(contains(r#"{"Event": "OnDestroy", "Status": "ok""#)),
        )
        .stderr(contains("Error: Function timed out after 1s"));
}

#[test]
fn malformed_input_is_fatal() {
    let mut command = cargo_bin_cmd!("lifecycle-host");
    command
        .arg("--handler-path")
        .arg(fixture("accumulator.rhai"))
        .write_stdin("this is not json\n{\"Event\": \"OnDestroy\"}\n");

    command
        .assert()
        .failure()
        .stdout(contains("OnDestroy").not())
        .stderr(contains("Invalid input format: this is not json"));
}

#[test]
fn missing_handler_path_fails_bootstrap() {
    let mut command = cargo_bin_cmd!("lifecycle-host");
    command.env_remove("LIFECYCLE_HOST_HANDLER_PATH").write_stdin("");

    command
        .assert()
        .failure()
        .stderr(contains("no handler script configured"));
}
