use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

#[allow(deprecated)]
fn get_slotter_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("slotter")
}

#[test]
fn test_users_with_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("slotter.db").display().to_string();

    Command::new(get_slotter_bin())
        .args(["users", "--db", &db])
        .assert()
        .success()
        .stdout(predicate::str::contains("No users registered yet"));
}

#[test]
fn test_users_lists_registered_users_with_status() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("slotter.db").display().to_string();

    Command::new(get_slotter_bin())
        .args(["register", "--db", &db])
        .args(["--login", "alice@example.com", "--password", "secret"])
        .args(["--city", "Moscow"])
        .assert()
        .success();
    Command::new(get_slotter_bin())
        .args(["register", "--db", &db])
        .args(["--chat-handle", "@watcher", "--chat-id", "99"])
        .assert()
        .success();

    Command::new(get_slotter_bin())
        .args(["users", "--db", &db])
        .assert()
        .success()
        .stdout(predicate::str::contains("alice@example.com"))
        .stdout(predicate::str::contains("waiting"))
        .stdout(predicate::str::contains("@watcher"))
        .stdout(predicate::str::contains("registered"))
        .stdout(predicate::str::contains("Moscow"));
}
