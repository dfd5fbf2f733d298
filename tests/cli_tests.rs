//! Binary argument handling. These never reach a mount: they only cover
//! the paths that fail (or print) before any FUSE session starts.

use assert_cmd::Command;
use predicates::prelude::*;

fn gridfuse() -> Command {
    Command::cargo_bin("gridfuse").unwrap()
}

#[test]
fn test_help_mentions_positional_args() {
    gridfuse()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MOUNTPOINT"))
        .stdout(predicate::str::contains("--memory"));
}

#[test]
fn test_no_args_is_a_usage_error() {
    gridfuse().assert().failure().code(2);
}

#[test]
fn test_store_root_required_without_memory() {
    gridfuse()
        .arg("/tmp/gridfuse-test-mnt")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("store root"));
}

#[test]
fn test_memory_conflicts_with_store_root() {
    gridfuse()
        .args(["/tmp/gridfuse-test-mnt", "/tmp/gridfuse-test-store", "--memory"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn test_invalid_namespace_is_rejected() {
    gridfuse()
        .args(["/tmp/gridfuse-test-mnt", "--memory", "--db", "a/b"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Namespace"));
}
