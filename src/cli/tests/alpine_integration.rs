//! End-to-end: pull `alpine` from Docker Hub and run commands in it.
//!
//! Needs network access, unprivileged user namespaces and a built
//! `minidock` binary, so the tests are `#[ignore]` by default:
//!
//! ```bash
//! cargo test -p minidock-cli --test alpine_integration -- --ignored --nocapture
//! ```

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_minidock"))
}

fn minidock(work: &TempDir, args: &[&str]) -> std::process::Output {
    Command::new(binary())
        .arg("--cache-dir")
        .arg(work.path().join("layers"))
        .arg("--log-file")
        .arg(work.path().join("minidock.log"))
        .args(args)
        .env("TMPDIR", work.path())
        .output()
        .expect("failed to spawn minidock")
}

/// Ephemeral roots left behind under the scratch dir.
fn leftover_roots(work: &TempDir) -> usize {
    std::fs::read_dir(work.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("minidock-"))
        .count()
}

#[test]
#[ignore]
fn test_alpine_echo() {
    let work = TempDir::new().unwrap();
    let out = minidock(&work, &["run", "alpine:latest", "/bin/echo", "hello"]);

    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
    assert_eq!(leftover_roots(&work), 0);

    let log = std::fs::read_to_string(work.path().join("minidock.log")).unwrap();
    assert!(log.contains("Removing ephemeral root"));
}

#[test]
#[ignore]
fn test_exit_code_propagates() {
    let work = TempDir::new().unwrap();
    let out = minidock(&work, &["run", "alpine:latest", "/bin/sh", "-c", "exit 7"]);
    assert_eq!(out.status.code(), Some(7));
    assert_eq!(leftover_roots(&work), 0);
}

#[test]
#[ignore]
fn test_second_run_uses_cache() {
    let work = TempDir::new().unwrap();
    let first = minidock(&work, &["pull", "alpine:latest"]);
    assert!(first.status.success());

    let second = minidock(&work, &["run", "alpine:latest", "/bin/true"]);
    assert_eq!(second.status.code(), Some(0));

    let log = std::fs::read_to_string(work.path().join("minidock.log")).unwrap();
    assert!(log.contains("Layer cached, skipping download"));
}

#[test]
#[ignore]
fn test_unknown_image_is_fatal() {
    let work = TempDir::new().unwrap();
    let out = minidock(
        &work,
        &["run", "library/definitely-not-an-image-7f3a:latest", "/bin/true"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("Error:"));
}
