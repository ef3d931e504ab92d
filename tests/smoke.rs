//! Smoke tests -- verify both binaries start and reject bad input.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_worker_help() {
    Command::cargo_bin("testfork-worker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("task channel"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_worker_version() {
    Command::cargo_bin("testfork-worker")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testfork-worker"));
}

#[test]
fn test_worker_requires_endpoints() {
    Command::cargo_bin("testfork-worker")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("STATUS_ENDPOINT"));
}

#[test]
fn test_worker_rejects_bad_display_flag() {
    Command::cargo_bin("testfork-worker")
        .unwrap()
        .args(["4000", "/tmp/testfork-smoke.sock", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected true/false"));
}

#[test]
fn test_worker_exits_nonzero_when_status_unreachable() {
    // Bind then drop to get a port nobody is listening on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("testfork.toml");
    std::fs::write(&config, "[logging]\nlevel = \"error\"\n").unwrap();

    Command::cargo_bin("testfork-worker")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg(format!("127.0.0.1:{port}"))
        .arg(dir.path().join("w.sock"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("status channel"))
        .stderr(predicate::str::contains("loaded worker configuration"));
}

#[test]
fn test_worker_reports_unloadable_config_env() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("testfork-worker")
        .unwrap()
        .env_remove("RUST_LOG")
        .env("TESTFORK_CONFIG", dir.path().join("missing.toml"))
        .arg(format!("127.0.0.1:{port}"))
        .arg(dir.path().join("w.sock"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("TESTFORK_CONFIG set but file could not be loaded"));
}

#[test]
fn test_worker_rejects_missing_config_file() {
    Command::cargo_bin("testfork-worker")
        .unwrap()
        .args(["4000", "/tmp/testfork-smoke.sock", "--config", "/nonexistent/testfork.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn test_observe_help() {
    Command::cargo_bin("testfork-observe")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn test_observe_interrupt_finishes_run() {
    use std::io::{BufRead, BufReader};
    use std::process::{Command as StdCommand, Stdio};

    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut child = StdCommand::new(assert_cmd::cargo::cargo_bin("testfork-observe"))
        .arg(format!("127.0.0.1:{port}"))
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut first = String::new();
    stdout.read_line(&mut first).unwrap();
    assert!(first.contains("[    run           ] starting"), "got: {first}");

    // Give the select loop time to install the Ctrl-C handler.
    std::thread::sleep(std::time::Duration::from_millis(300));
    unsafe {
        libc::kill(child.id() as i32, libc::SIGINT);
    }

    let rest: Vec<String> = stdout.lines().map(|l| l.unwrap()).collect();
    let status = child.wait().unwrap();
    assert!(status.success(), "observer exited with {status}");
    assert!(rest.iter().any(|l| l.contains("interrupted - please wait")));
    assert!(rest.iter().any(|l| l.contains("finished, passed")));
}
