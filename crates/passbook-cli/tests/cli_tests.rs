//! Binary smoke tests that never reach a station

use std::process::{Command, Output};

fn passbook(data_dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_passbook"))
        .args(args)
        .env("PASSBOOK_DATA_DIR", data_dir)
        .env("PASSBOOK_STATION_URL", "http://127.0.0.1:9")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

#[test]
fn status_on_empty_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let out = passbook(dir.path(), &["status"]);

    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("ready tickets:    0"));
    assert!(stdout.contains("archived tickets: 0"));
}

#[test]
fn bad_code_fails_before_contacting_station() {
    let dir = tempfile::tempdir().unwrap();
    let out = passbook(dir.path(), &["redeem", "NOT-A-CODE"]);

    assert!(!out.status.success());
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("invalid redemption code"));
}

#[test]
fn split_on_empty_ledger_is_a_caller_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = passbook(dir.path(), &["split", "3"]);

    assert!(!out.status.success());
    assert!(String::from_utf8(out.stderr).unwrap().contains("cannot split 3 tickets"));
}

#[test]
fn export_then_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("export.json");
    let file_arg = file.to_str().unwrap();

    assert!(passbook(dir.path(), &["export", "-o", file_arg]).status.success());
    let out = passbook(dir.path(), &["import", file_arg]);

    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("added 0 ready, 0 archived; 0 duplicates"));
}

#[test]
fn malformed_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = passbook(dir.path(), &["status", "--session", "nope"]);
    assert!(!out.status.success());
}
