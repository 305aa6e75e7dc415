//! Confined launches. These need unprivileged user namespaces (or root), so
//! they are `#[ignore]` by default:
//!
//! ```bash
//! cargo test -p minidock-runtime --test sandbox_launch -- --ignored
//! ```

use std::path::Path;

use minidock_core::config::NamespaceConfig;
use minidock_core::MinidockError;
use minidock_runtime::sandbox::{ensure_binary, run_confined};
use minidock_runtime::EphemeralRoot;
use tempfile::TempDir;

/// A statically linked shell from the host, if there is one.
fn static_busybox() -> Option<&'static Path> {
    ["/bin/busybox", "/usr/bin/busybox"]
        .into_iter()
        .map(Path::new)
        .find(|p| p.is_file())
}

#[test]
#[ignore]
fn test_missing_program_reports_exec_failure() {
    let parent = TempDir::new().unwrap();
    let root = EphemeralRoot::create_in(parent.path()).unwrap();

    let err = run_confined(
        &NamespaceConfig::full_isolation(),
        root.path(),
        Path::new("/bin/nothing-here"),
        &["nothing-here".to_string()],
    )
    .unwrap_err();

    match err {
        MinidockError::SandboxError(msg) => assert!(msg.starts_with("exec failed"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
#[ignore]
fn test_exit_code_and_pid_namespace() {
    let Some(busybox) = static_busybox() else {
        eprintln!("no busybox on host, skipping");
        return;
    };
    let parent = TempDir::new().unwrap();
    let root = EphemeralRoot::create_in(parent.path()).unwrap();
    ensure_binary(root.path(), busybox).unwrap();

    // PID 1 in the new namespace sees itself as 1.
    let code = run_confined(
        &NamespaceConfig::full_isolation(),
        root.path(),
        busybox,
        &[
            "sh".to_string(),
            "-c".to_string(),
            "test $$ -eq 1 && exit 3".to_string(),
        ],
    )
    .unwrap();
    assert_eq!(code, 3);
}
