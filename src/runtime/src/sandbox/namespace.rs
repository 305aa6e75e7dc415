//! Confined process launch: new namespaces, chroot, exec.
//!
//! The child is created with `clone(2)` so it starts directly inside the
//! new PID (and user) namespace. Between clone and exec it only makes
//! syscalls on data prepared by the parent; failures are reported back
//! over a close-on-exec pipe.

use std::ffi::{CString, OsStr};
use std::io::Read;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use minidock_core::config::NamespaceConfig;
use minidock_core::error::{MinidockError, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::{clone, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot, pipe2, write, Pid};

/// Stack handed to the cloned child; it only runs until exec.
const CHILD_STACK_SIZE: usize = 256 * 1024;

/// Setup stage reported by a child that failed before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Stage {
    Chroot = 1,
    Chdir = 2,
    Exec = 3,
}

impl Stage {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Stage::Chroot),
            2 => Some(Stage::Chdir),
            3 => Some(Stage::Exec),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Chroot => write!(f, "chroot"),
            Stage::Chdir => write!(f, "chdir"),
            Stage::Exec => write!(f, "exec"),
        }
    }
}

/// Clone flags for a namespace configuration.
pub fn clone_flags(config: &NamespaceConfig) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    if config.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if config.user {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    flags
}

/// Run `program` with `argv` confined to `root` and wait for it.
///
/// `program` is the path inside `root`. stdout and stderr are inherited.
/// Returns the exit code, or `128 + signal` when the child was killed.
pub fn run_confined(
    config: &NamespaceConfig,
    root: &Path,
    program: &Path,
    argv: &[String],
) -> Result<i32> {
    let root_c = path_cstring(root)?;
    let program_c = path_cstring(program)?;
    let argv_c = argv
        .iter()
        .map(|a| {
            CString::new(a.as_bytes())
                .map_err(|_| MinidockError::SandboxError(format!("argument contains NUL: {:?}", a)))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut argv_ptrs: Vec<*const libc::c_char> = argv_c.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| MinidockError::SandboxError(format!("pipe2 failed: {}", e)))?;

    let flags = clone_flags(config);
    tracing::info!(
        root = %root.display(),
        program = %program.display(),
        args = ?&argv[1.min(argv.len())..],
        flags = ?flags,
        "Launching confined process"
    );

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let child = {
        let status_write = &status_write;
        let root_c = &root_c;
        let program_c = &program_c;
        let argv_ptrs = &argv_ptrs;
        let callback = Box::new(move || -> isize {
            child_main(status_write, root_c, program_c, argv_ptrs)
        });
        // SAFETY: the child only performs async-signal-safe syscalls on
        // memory prepared above before exec or exit.
        unsafe { clone(callback, &mut stack, flags, Some(libc::SIGCHLD)) }
            .map_err(|e| MinidockError::SandboxError(format!("clone failed: {}", e)))?
    };
    drop(status_write);

    tracing::debug!(pid = child.as_raw(), "Child cloned");

    let setup_error = read_setup_error(status_read)?;
    let code = wait_for_exit(child)?;

    if let Some((stage, errno)) = setup_error {
        return Err(MinidockError::SandboxError(format!(
            "{} failed in child: {}",
            stage, errno
        )));
    }

    tracing::info!(pid = child.as_raw(), exit_code = code, "Confined process exited");
    Ok(code)
}

/// Body of the cloned child. Only returns on failure.
fn child_main(
    status: &OwnedFd,
    root: &CString,
    program: &CString,
    argv: &[*const libc::c_char],
) -> isize {
    if let Err(errno) = chroot(root.as_c_str()) {
        return report(status, Stage::Chroot, errno);
    }
    if let Err(errno) = chdir("/") {
        return report(status, Stage::Chdir, errno);
    }

    // SAFETY: argv is a NULL-terminated array of pointers into CStrings
    // owned by the parent frame, which the child's copy keeps alive.
    unsafe { libc::execv(program.as_ptr(), argv.as_ptr()) };
    report(status, Stage::Exec, Errno::last())
}

/// Send `[stage, errno]` to the parent and pick an exit status.
fn report(status: &OwnedFd, stage: Stage, errno: Errno) -> isize {
    let code = (errno as i32).to_le_bytes();
    let msg = [stage as u8, code[0], code[1], code[2], code[3]];
    let _ = write(status.as_fd(), &msg);
    match stage {
        Stage::Exec if errno == Errno::ENOENT => 127,
        _ => 126,
    }
}

/// Read the status pipe until EOF. EOF with no data means exec succeeded.
fn read_setup_error(status: OwnedFd) -> Result<Option<(Stage, Errno)>> {
    let mut buf = Vec::with_capacity(5);
    std::fs::File::from(status)
        .read_to_end(&mut buf)
        .map_err(|e| MinidockError::SandboxError(format!("status pipe read failed: {}", e)))?;

    if buf.len() < 5 {
        return Ok(None);
    }
    let stage = Stage::from_byte(buf[0]).unwrap_or(Stage::Exec);
    let errno = Errno::from_raw(i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]));
    Ok(Some((stage, errno)))
}

/// Block until `pid` terminates and translate its status to an exit code.
fn wait_for_exit(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::warn!(pid = pid.as_raw(), signal = ?signal, "Child killed by signal");
                return Ok(128 + signal as i32);
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(MinidockError::SandboxError(format!("waitpid failed: {}", e)));
            }
        }
    }
}

fn path_cstring(path: &Path) -> Result<CString> {
    os_cstring(path.as_os_str())
}

fn os_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes())
        .map_err(|_| MinidockError::SandboxError(format!("path contains NUL: {:?}", s)))
}
