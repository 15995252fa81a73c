//! End-to-end CLI tests for the grab binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// SHA-256 of `abc`.
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

#[test]
fn test_binary_help_lists_subcommands() {
    Command::cargo_bin("grab")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("hash"));
}

#[test]
fn test_binary_hash_prints_digest_and_path() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("abc.txt");
    std::fs::write(&file, b"abc").unwrap();

    Command::cargo_bin("grab")
        .unwrap()
        .arg("hash")
        .arg(&file)
        .assert()
        .success()
        .stdout(format!("{ABC_SHA256}  {}\n", file.display()));
}

#[test]
fn test_binary_hash_md5() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("abc.txt");
    std::fs::write(&file, b"abc").unwrap();

    Command::cargo_bin("grab")
        .unwrap()
        .args(["hash", "-t", "md5"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("900150983cd24fb0d6963f7d28e17f72  "));
}

#[test]
fn test_binary_hash_unknown_algorithm_exits_one() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("abc.txt");
    std::fs::write(&file, b"abc").unwrap();

    Command::cargo_bin("grab")
        .unwrap()
        .args(["hash", "-t", "crc32"])
        .arg(&file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("crc32"));
}

#[test]
fn test_binary_hash_missing_file_exits_one() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("grab")
        .unwrap()
        .arg("hash")
        .arg(dir.path().join("nope"))
        .assert()
        .code(1);
}

#[test]
fn test_binary_download_invalid_url_counts_as_failure() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("grab")
        .unwrap()
        .args(["download", "-v", "-o"])
        .arg(dir.path())
        .args(["not a url", "ftp://example.com/file"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed: not a url"));
}

#[test]
fn test_binary_download_failures_silent_without_verbose() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("grab")
        .unwrap()
        .args(["download", "-o"])
        .arg(dir.path())
        .args(["not a url", "ftp://example.com/file"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed:").not());
}

#[tokio::test]
async fn test_binary_download_exit_code_counts_failures() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/ok.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("grab").unwrap();
    cmd.args(["download", "-v", "-o"])
        .arg(dir.path())
        .arg(format!("{}/ok.txt", server.uri()))
        .arg(format!("{}/gone.txt", server.uri()));

    let assert = cmd.assert().code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("Failed:"), "stderr: {stderr}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("ok.txt")).unwrap(),
        "fine"
    );
}

#[tokio::test]
async fn test_binary_download_verbose_reports_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/hello.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    Command::cargo_bin("grab")
        .unwrap()
        .args(["download", "-v", "-o"])
        .arg(dir.path())
        .arg(format!("{}/hello.txt", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("Downloaded:"))
        .stdout(predicate::str::contains("(size: 5 bytes)"));
}
