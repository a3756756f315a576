use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn pyresource(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pyresource").unwrap();
    cmd.current_dir(dir.path()).env("NO_COLOR", "1");
    cmd
}

#[test]
fn dists_lists_bundled_distributions() {
    let dir = TempDir::new().unwrap();
    pyresource(&dir)
        .arg("dists")
        .assert()
        .success()
        .stdout(predicate::str::contains("builtin-stdlib"))
        .stdout(predicate::str::contains("requests"))
        .stdout(predicate::str::contains("Total: 2 distributions"));
}

#[test]
fn dists_filters_by_package() {
    let dir = TempDir::new().unwrap();
    pyresource(&dir)
        .args(["dists", "--package", "requests"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2.22.0"))
        .stdout(predicate::str::contains("builtin-stdlib").not());
}

#[test]
fn query_describes_a_symbol() {
    let dir = TempDir::new().unwrap();
    pyresource(&dir)
        .args(["query", "json.dumps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("json.dumps"))
        .stdout(predicate::str::contains("function"))
        .stdout(predicate::str::contains("builtins.str"));
}

#[test]
fn query_reports_missing_paths() {
    let dir = TempDir::new().unwrap();
    pyresource(&dir)
        .args(["query", "json.nothing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("json.nothing"));
}

#[test]
fn config_file_in_working_directory_is_used() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("pyresource.toml"),
        "[data]\nmanifest = \"missing/manifest.json\"\n",
    )
    .unwrap();
    pyresource(&dir).arg("dists").assert().failure();
}
