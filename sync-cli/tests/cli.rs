//! End-to-end tests for the `livesync` binary's offline commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn livesync() -> Command {
    Command::cargo_bin("livesync").unwrap()
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

// =========================================================================
// patch
// =========================================================================

#[test]
fn patch_applies_operations() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", r#"{"a":1,"list":[1,2]}"#);
    let ops = write(
        &dir,
        "ops.json",
        r#"[{"op":"replace","path":"/a","value":2},{"op":"add","path":"/list/-","value":3}]"#,
    );

    livesync()
        .arg("patch")
        .arg(&doc)
        .arg(&ops)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""a":2"#))
        .stdout(predicate::str::contains(r#""list":[1,2,3]"#));
}

#[test]
fn patch_failed_test_is_rejected() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", r#"{"a":1}"#);
    let ops = write(
        &dir,
        "ops.json",
        r#"[{"op":"replace","path":"/a","value":5},{"op":"test","path":"/a","value":1}]"#,
    );

    livesync()
        .arg("patch")
        .arg(&doc)
        .arg(&ops)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Patch rejected"));
}

#[test]
fn patch_without_validation_stops_at_failed_test() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", r#"{"a":1}"#);
    let ops = write(
        &dir,
        "ops.json",
        r#"[{"op":"replace","path":"/a","value":5},{"op":"test","path":"/a","value":1},{"op":"add","path":"/b","value":true}]"#,
    );

    livesync()
        .args(["patch", "--no-validate"])
        .arg(&doc)
        .arg(&ops)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"a":5}"#));
}

#[test]
fn patch_rejects_non_array() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", "{}");
    let ops = write(&dir, "ops.json", r#"{"op":"add"}"#);

    livesync()
        .arg("patch")
        .arg(&doc)
        .arg(&ops)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid patch"));
}

#[test]
fn patch_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let ops = write(&dir, "ops.json", "[]");

    livesync()
        .arg("patch")
        .arg(dir.path().join("missing.json"))
        .arg(&ops)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

// =========================================================================
// merge
// =========================================================================

#[test]
fn merge_keeps_private_keys() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", r#"{"$local":1,"stale":true}"#);
    let snapshot = write(&dir, "snap.json", r#"{"fresh":2}"#);

    livesync()
        .arg("merge")
        .arg(&doc)
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""$local":1"#))
        .stdout(predicate::str::contains(r#""fresh":2"#))
        .stdout(predicate::str::contains("stale").not());
}

#[test]
fn merge_strict_drops_private_keys() {
    let dir = TempDir::new().unwrap();
    let doc = write(&dir, "doc.json", r#"{"$local":1}"#);
    let snapshot = write(&dir, "snap.json", r#"{"fresh":2}"#);

    livesync()
        .args(["merge", "--strict"])
        .arg(&doc)
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("$local").not());
}

// =========================================================================
// help
// =========================================================================

#[test]
fn help_lists_commands() {
    livesync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("patch"))
        .stdout(predicate::str::contains("merge"));
}
