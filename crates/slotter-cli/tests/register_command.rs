use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

#[allow(deprecated)]
fn get_slotter_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("slotter")
}

fn db_arg(dir: &tempfile::TempDir) -> String {
    dir.path().join("slotter.db").display().to_string()
}

#[test]
fn test_register_credentialed_user_starts_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(get_slotter_bin());
    cmd.args(["register", "--db"])
        .arg(db_arg(&dir))
        .args(["--login", "alice@example.com"])
        .args(["--password", "secret"])
        .args(["--city", "Moscow"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Registered user 1 as waiting"));
}

#[test]
fn test_register_chat_only_subscriber_is_registered() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(get_slotter_bin());
    cmd.args(["register", "--db"])
        .arg(db_arg(&dir))
        .args(["--chat-handle", "@watcher"])
        .args(["--chat-id", "99"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("as registered"));
}

#[test]
fn test_register_rejects_login_without_password() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(get_slotter_bin());
    cmd.args(["register", "--db"])
        .arg(db_arg(&dir))
        .args(["--login", "alice@example.com"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("credential pair"));
}

#[test]
fn test_register_rejects_duplicate_login() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(&dir);

    Command::new(get_slotter_bin())
        .args(["register", "--db", &db])
        .args(["--login", "alice@example.com", "--password", "secret"])
        .assert()
        .success();

    Command::new(get_slotter_bin())
        .args(["register", "--db", &db])
        .args(["--login", "alice@example.com", "--password", "other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already"));
}
