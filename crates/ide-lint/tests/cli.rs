#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn ide_lint(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ide-lint").expect("cargo bin ide-lint");
    cmd.env("HOME", home.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let home = TempDir::new().expect("temp home");

    ide_lint(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("rules"));
}

#[test]
fn analyze_requires_files() {
    let home = TempDir::new().expect("temp home");

    ide_lint(&home).arg("analyze").assert().failure();
}

#[test]
fn analyze_fails_when_server_cannot_be_launched() {
    let home = TempDir::new().expect("temp home");
    let project = TempDir::new().expect("temp project");
    fs::write(project.path().join("a.pas"), "begin end.\n").expect("write source");

    ide_lint(&home)
        .current_dir(project.path())
        .args(["analyze", "a.pas"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ide-lint-server"));

    // Default settings are written on first run.
    let settings = home.path().join(".ide-lint").join("ide-lint.settings.json");
    let content = fs::read_to_string(settings).expect("read settings");
    let json: serde_json::Value = serde_json::from_str(&content).expect("settings json");
    assert_eq!(json["server"]["command"], "ide-lint-server");
}

#[test]
fn analyze_outside_base_dir_reports_nothing_to_analyze() {
    let home = TempDir::new().expect("temp home");
    let project = TempDir::new().expect("temp project");
    let base_dir = project.path().join("src");
    fs::create_dir_all(&base_dir).expect("create base dir");
    fs::write(project.path().join("a.pas"), "begin end.\n").expect("write source");

    ide_lint(&home)
        .current_dir(project.path())
        .arg("analyze")
        .arg("a.pas")
        .arg("--base-dir")
        .arg(&base_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No files to analyze"));
}

#[test]
fn rules_reports_missing_rule() {
    let home = TempDir::new().expect("temp home");

    ide_lint(&home)
        .args(["rules", "pas:S0000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Rule pas:S0000 not found"));
}
