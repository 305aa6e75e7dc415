//! Sandbox launcher: assemble a root, make sure the command is inside it,
//! run it confined, clean up.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use minidock_core::config::NamespaceConfig;
use minidock_core::error::{MinidockError, Result};

use super::namespace::run_confined;
use super::root::EphemeralRoot;
use crate::oci::{assemble, BlobDescriptor, LayerStore};

/// Mode given to host binaries copied into the root.
const COPIED_BINARY_MODE: u32 = 0o755;

/// Runs one command inside a freshly assembled image root.
pub struct SandboxLauncher {
    namespaces: NamespaceConfig,
    temp_parent: Option<PathBuf>,
}

impl SandboxLauncher {
    pub fn new(namespaces: NamespaceConfig) -> Self {
        Self {
            namespaces,
            temp_parent: None,
        }
    }

    /// Create ephemeral roots under `dir` instead of the system temp dir.
    pub fn with_temp_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_parent = Some(dir.into());
        self
    }

    /// Assemble `layers` into a new root, run `command args...` in it and
    /// return the command's exit code.
    ///
    /// The root is removed before this returns, whatever the outcome.
    pub fn run(
        &self,
        store: &LayerStore,
        layers: &[BlobDescriptor],
        command: &str,
        args: &[String],
    ) -> Result<i32> {
        let root = match &self.temp_parent {
            Some(dir) => EphemeralRoot::create_in(dir)?,
            None => EphemeralRoot::create()?,
        };

        assemble(root.path(), store, layers)?;

        let host_path = resolve_command(command)?;
        ensure_binary(root.path(), &host_path)?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command.to_string());
        argv.extend(args.iter().cloned());

        run_confined(&self.namespaces, root.path(), &host_path, &argv)
    }
}

/// Resolve `command` to an absolute host path.
///
/// Names without a `/` are looked up in `PATH`; anything else is made
/// absolute against the current directory and normalised lexically.
pub fn resolve_command(command: &str) -> Result<PathBuf> {
    if command.is_empty() {
        return Err(MinidockError::SandboxError("empty command".to_string()));
    }

    if !command.contains('/') {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        let found = std::env::split_paths(&path_var)
            .map(|dir| dir.join(command))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| {
                MinidockError::SandboxError(format!("command '{}' not found in PATH", command))
            })?;
        return Ok(normalize(&absolute(&found)?));
    }

    Ok(normalize(&absolute(Path::new(command))?))
}

/// Copy the host binary into `root` at the same absolute path unless the
/// image already provides something there. Returns whether a copy was made.
///
/// Symlinks are followed: a link that resolves inside the root counts as
/// present, a dangling one is replaced by the copy.
pub fn ensure_binary(root: &Path, host_path: &Path) -> Result<bool> {
    let rel = host_path.strip_prefix("/").unwrap_or(host_path);
    let in_root = root.join(rel);

    match fs::metadata(&in_root) {
        Ok(_) => {
            tracing::info!(path = %host_path.display(), "Command provided by image");
            return Ok(false);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MinidockError::filesystem(&in_root, e)),
    }

    if fs::symlink_metadata(&in_root).is_ok() {
        tracing::warn!(path = %in_root.display(), "Replacing dangling symlink with host binary");
        fs::remove_file(&in_root).map_err(|e| MinidockError::filesystem(&in_root, e))?;
    }

    if let Some(parent) = in_root.parent() {
        fs::create_dir_all(parent).map_err(|e| MinidockError::filesystem(parent, e))?;
    }

    tracing::info!(
        from = %host_path.display(),
        to = %in_root.display(),
        "Copying command into root"
    );
    fs::copy(host_path, &in_root).map_err(|e| MinidockError::filesystem(host_path, e))?;
    fs::set_permissions(&in_root, fs::Permissions::from_mode(COPIED_BINARY_MODE))
        .map_err(|e| MinidockError::filesystem(&in_root, e))?;

    Ok(true)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| MinidockError::filesystem(".", e))?;
    Ok(cwd.join(path))
}

/// Lexically drop `.` and fold `..` in an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_absolute_command() {
        assert_eq!(
            resolve_command("/usr/bin/../bin/./env").unwrap(),
            PathBuf::from("/usr/bin/env")
        );
    }

    #[test]
    fn test_resolve_relative_command_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_command("./tool").unwrap(), cwd.join("tool"));
    }

    #[test]
    fn test_resolve_bare_name_via_path() {
        let resolved = resolve_command("sh").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_resolve_missing_bare_name() {
        let err = resolve_command("definitely-not-a-command-4c1d").unwrap_err();
        assert!(matches!(err, MinidockError::SandboxError(_)));
        assert!(resolve_command("").is_err());
    }

    #[test]
    fn test_ensure_binary_copies_when_absent() {
        let tmp = TempDir::new().unwrap();
        let host = tmp.path().join("host-tool");
        fs::write(&host, b"\x7fELF fake").unwrap();
        fs::set_permissions(&host, fs::Permissions::from_mode(0o700)).unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();

        assert!(ensure_binary(&root, &host).unwrap());

        let copied = root.join(host.strip_prefix("/").unwrap());
        assert_eq!(fs::read(&copied).unwrap(), b"\x7fELF fake");
        let mode = fs::metadata(&copied).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, COPIED_BINARY_MODE);
        assert_ne!(mode & 0o100, 0);
    }

    #[test]
    fn test_ensure_binary_skips_when_image_provides_it() {
        let tmp = TempDir::new().unwrap();
        let host = tmp.path().join("host-tool");
        fs::write(&host, b"host").unwrap();
        let root = tmp.path().join("root");
        let in_root = root.join(host.strip_prefix("/").unwrap());
        fs::create_dir_all(in_root.parent().unwrap()).unwrap();
        fs::write(&in_root, b"image").unwrap();

        assert!(!ensure_binary(&root, &host).unwrap());
        assert_eq!(fs::read(&in_root).unwrap(), b"image");
    }

    #[test]
    fn test_ensure_binary_replaces_dangling_symlink() {
        let tmp = TempDir::new().unwrap();
        let host = tmp.path().join("host-tool");
        fs::write(&host, b"host").unwrap();
        let root = tmp.path().join("root");
        let in_root = root.join(host.strip_prefix("/").unwrap());
        fs::create_dir_all(in_root.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink("busybox", &in_root).unwrap();

        assert!(ensure_binary(&root, &host).unwrap());

        let meta = fs::symlink_metadata(&in_root).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read(&in_root).unwrap(), b"host");
        assert!(!in_root.parent().unwrap().join("busybox").exists());
    }

    #[test]
    fn test_ensure_binary_follows_live_symlink() {
        let tmp = TempDir::new().unwrap();
        let host = tmp.path().join("host-tool");
        fs::write(&host, b"host").unwrap();
        let root = tmp.path().join("root");
        let in_root = root.join(host.strip_prefix("/").unwrap());
        fs::create_dir_all(in_root.parent().unwrap()).unwrap();
        fs::write(in_root.parent().unwrap().join("busybox"), b"image").unwrap();
        std::os::unix::fs::symlink("busybox", &in_root).unwrap();

        assert!(!ensure_binary(&root, &host).unwrap());
        assert_eq!(fs::read(&in_root).unwrap(), b"image");
    }

    /// Cache a layer holding one FIFO and return its descriptor.
    fn cache_fifo_layer(store: &LayerStore) -> BlobDescriptor {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Fifo);
        header.set_mode(0o644);
        header.set_size(0);
        builder
            .append_data(&mut header, "run/pipe", std::io::empty())
            .unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let descriptor = BlobDescriptor {
            media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_string(),
            size: bytes.len() as u64,
            digest: crate::oci::Digest::of(&bytes).to_string(),
        };
        fs::write(store.layer_path(&descriptor.digest), &bytes).unwrap();
        descriptor
    }

    #[test]
    fn test_run_aborts_on_unsupported_entry_and_removes_root() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(&tmp.path().join("layers")).unwrap();
        let layer = cache_fifo_layer(&store);
        let roots = tmp.path().join("roots");
        fs::create_dir(&roots).unwrap();

        let launcher = SandboxLauncher::new(NamespaceConfig::full_isolation())
            .with_temp_parent(&roots);
        let err = launcher
            .run(&store, &[layer], "/bin/true", &[])
            .unwrap_err();

        assert!(matches!(err, MinidockError::UnsupportedEntry { .. }));
        assert_eq!(fs::read_dir(&roots).unwrap().count(), 0);
    }

    #[test]
    fn test_run_fails_on_missing_cached_layer() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(&tmp.path().join("layers")).unwrap();
        let roots = tmp.path().join("roots");
        fs::create_dir(&roots).unwrap();
        let layer = BlobDescriptor {
            digest: format!("sha256:{}", "0".repeat(64)),
            ..Default::default()
        };

        let err = SandboxLauncher::new(NamespaceConfig::minimal())
            .with_temp_parent(&roots)
            .run(&store, &[layer], "/bin/true", &[])
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(fs::read_dir(&roots).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_binary_missing_host_binary() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        let err = ensure_binary(&root, &tmp.path().join("nope")).unwrap_err();
        assert!(err.is_not_found());
    }
}
