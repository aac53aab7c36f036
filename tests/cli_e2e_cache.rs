//! End-to-end tests for the `cache` command
//!
//! These tests invoke the actual CLI binary and validate its behavior
//! from a user's perspective.

mod common;

use common::prelude::*;
use common::AssemblyImageBuilder;

/// Run a resolve that populates a state file under `temp`.
fn populate_cache(temp: &assert_fs::TempDir) {
    AssemblyImageBuilder::new("Foo", "1.0.0.0").write_to(&temp.path().join("libs"));
    temp.child("refsolve.yaml")
        .write_str(
            "primaries:\n  - \"Foo, Version=1.0.0.0\"\n\
             search_paths:\n  - libs\n\
             state_file: cache/refsolve.cache\n",
        )
        .unwrap();
    let mut cmd = cargo_bin_cmd!("refsolve");
    cmd.current_dir(temp.path()).arg("resolve").assert().success();
}

/// Test that --help flag shows help information
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_cache_help() {
    let mut cmd = cargo_bin_cmd!("refsolve");

    cmd.arg("cache")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Inspect or clear the persistent probe cache",
        ));
}

/// Test that show on a missing state file gives hints
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_cache_show_missing_state_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("refsolve");

    cmd.current_dir(temp.path())
        .arg("cache")
        .arg("--state-file")
        .arg("nothing.cache")
        .arg("show")
        .assert()
        .failure()
        .stderr(predicate::str::contains("State file not found"))
        .stderr(predicate::str::contains("hint:"));
}

/// Test that show lists cached probes after a resolve
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_cache_show_after_resolve() {
    let temp = assert_fs::TempDir::new().unwrap();
    populate_cache(&temp);
    let mut cmd = cargo_bin_cmd!("refsolve");

    cmd.current_dir(temp.path())
        .arg("cache")
        .arg("--state-file")
        .arg("cache/refsolve.cache")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("cached probe(s)"))
        .stdout(predicate::str::contains("Foo.dll"));
}

/// Test JSON output of show
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_cache_show_json() {
    let temp = assert_fs::TempDir::new().unwrap();
    populate_cache(&temp);
    let mut cmd = cargo_bin_cmd!("refsolve");

    let output = cmd
        .current_dir(temp.path())
        .arg("cache")
        .arg("--state-file")
        .arg("cache/refsolve.cache")
        .arg("show")
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["path"].as_str().unwrap().ends_with("Foo.dll"));
    assert!(rows[0]["mtime"].as_i64().unwrap() > 0);
}

/// Test clear removes the state file, and clearing twice is not an error
#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_cache_clear_twice() {
    let temp = assert_fs::TempDir::new().unwrap();
    populate_cache(&temp);

    let mut cmd = cargo_bin_cmd!("refsolve");
    cmd.current_dir(temp.path())
        .arg("cache")
        .arg("--state-file")
        .arg("cache/refsolve.cache")
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    temp.child("cache/refsolve.cache")
        .assert(predicate::path::missing());

    let mut again = cargo_bin_cmd!("refsolve");
    again
        .current_dir(temp.path())
        .arg("cache")
        .arg("--state-file")
        .arg("cache/refsolve.cache")
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clear"));
}
