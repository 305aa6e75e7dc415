//! Root filesystem assembly from cached layer archives.
//!
//! Layers are applied in manifest order, base first; a later layer replaces
//! whatever an earlier one put at the same path. Only directories, regular
//! files and symlinks are materialised. Any other entry type aborts the
//! assembly. Ownership recorded in the archive is not applied.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use minidock_core::error::{MinidockError, Result};
use tar::{Archive, EntryType};

use super::image::BlobDescriptor;
use super::store::LayerStore;

/// Marker that hides everything a lower layer put in its directory.
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Prefix marking a path deleted by this layer.
const WHITEOUT_PREFIX: &str = ".wh.";

/// Counts gathered while applying layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleSummary {
    pub layers: usize,
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
    pub whiteouts: usize,
}

impl AssembleSummary {
    fn absorb(&mut self, other: AssembleSummary) {
        self.layers += other.layers;
        self.directories += other.directories;
        self.files += other.files;
        self.symlinks += other.symlinks;
        self.whiteouts += other.whiteouts;
    }
}

/// Apply every layer of an image, in order, onto `root`.
pub fn assemble(root: &Path, store: &LayerStore, layers: &[BlobDescriptor]) -> Result<AssembleSummary> {
    let mut summary = AssembleSummary::default();
    for layer in layers {
        let layer_path = store.layer_path(&layer.digest);
        tracing::info!(digest = %layer.digest, "Unpacking layer");
        summary.absorb(extract_layer(&layer_path, root, &layer.digest)?);
    }

    tracing::info!(
        root = %root.display(),
        layers = summary.layers,
        files = summary.files,
        directories = summary.directories,
        symlinks = summary.symlinks,
        "Root filesystem assembled"
    );
    Ok(summary)
}

/// Extract one gzip-compressed layer archive onto `root`.
///
/// `digest` only labels errors and log lines.
pub fn extract_layer(layer_path: &Path, root: &Path, digest: &str) -> Result<AssembleSummary> {
    let file = File::open(layer_path).map_err(|e| MinidockError::filesystem(layer_path, e))?;
    let root_real = fs::canonicalize(root).map_err(|e| MinidockError::filesystem(root, e))?;

    let mut archive = Archive::new(GzDecoder::new(file));
    let mut summary = AssembleSummary {
        layers: 1,
        ..Default::default()
    };
    // Paths written by this layer survive its own opaque whiteouts.
    let mut written: HashSet<PathBuf> = HashSet::new();

    let entries = archive
        .entries()
        .map_err(|e| MinidockError::filesystem(layer_path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| MinidockError::filesystem(layer_path, e))?;
        let raw_path = entry
            .path()
            .map_err(|e| MinidockError::filesystem(layer_path, e))?
            .into_owned();

        let rel = sanitize_entry_path(&raw_path).ok_or_else(|| MinidockError::PathTraversal {
            digest: digest.to_string(),
            path: raw_path.display().to_string(),
        })?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let file_name = rel.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));

        if file_name == OPAQUE_WHITEOUT {
            tracing::debug!(dir = %parent.display(), "Applying opaque whiteout");
            clear_dir(&root.join(parent), parent, &written)?;
            summary.whiteouts += 1;
            continue;
        }
        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            // The hidden name must be a single ordinary component.
            if matches!(hidden, "" | "." | "..") {
                return Err(MinidockError::PathTraversal {
                    digest: digest.to_string(),
                    path: raw_path.display().to_string(),
                });
            }
            let target = root.join(parent).join(hidden);
            tracing::debug!(path = %target.display(), "Applying whiteout");
            remove_any(&target)?;
            summary.whiteouts += 1;
            continue;
        }

        let dest = root.join(&rel);
        let header = entry.header();
        let entry_type = header.entry_type();
        let mode = header
            .mode()
            .map_err(|e| MinidockError::filesystem(&dest, e))?
            & 0o7777;

        match entry_type {
            EntryType::Directory => {
                tracing::debug!(path = %dest.display(), "Creating directory");
                make_dir(&dest)?;
                apply_mode(&dest, mode)?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                tracing::debug!(path = %dest.display(), "Writing file");
                make_parent(&dest)?;
                remove_non_dir_or_dir(&dest)?;
                let mut out = File::create(&dest).map_err(|e| MinidockError::filesystem(&dest, e))?;
                io::copy(&mut entry, &mut out).map_err(|e| MinidockError::filesystem(&dest, e))?;
                apply_mode(&dest, mode)?;
                summary.files += 1;
            }
            EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .map_err(|e| MinidockError::filesystem(&dest, e))?
                    .ok_or_else(|| {
                        MinidockError::filesystem(
                            &dest,
                            io::Error::new(io::ErrorKind::InvalidData, "symlink without target"),
                        )
                    })?
                    .into_owned();

                make_parent(&dest)?;
                remove_non_dir_or_dir(&dest)?;
                let link_dir = physical_dir_in_root(&root_real, &dest, digest)?;
                let target = relative_path(&resolve_in_root(&link_dir, &link_name), &link_dir);
                tracing::debug!(
                    path = %dest.display(),
                    link_name = %link_name.display(),
                    target = %target.display(),
                    "Creating symlink"
                );
                std::os::unix::fs::symlink(&target, &dest)
                    .map_err(|e| MinidockError::filesystem(&dest, e))?;
                summary.symlinks += 1;
            }
            EntryType::XGlobalHeader => {
                tracing::debug!(path = %rel.display(), "Skipping pax global header");
                continue;
            }
            other => {
                return Err(MinidockError::UnsupportedEntry {
                    digest: digest.to_string(),
                    path: rel.display().to_string(),
                    entry_type: format!("{:?}", other),
                });
            }
        }

        written.insert(rel);
    }

    tracing::debug!(
        layer = %layer_path.display(),
        digest = %digest,
        files = summary.files,
        "Extracted layer"
    );
    Ok(summary)
}

/// Normalise an archive entry name to a root-relative path.
///
/// Leading `/` and `.` components are dropped; `None` if the name
/// contains `..`.
pub fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(out)
}

/// Resolve a symlink's link name to a root-relative path.
///
/// Absolute names resolve against the root; relative names against
/// `link_dir`. `..` never climbs above the root.
pub fn resolve_in_root(link_dir: &Path, link_name: &Path) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = if link_name.has_root() {
        Vec::new()
    } else {
        link_dir
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect()
    };

    for component in link_name.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    parts.into_iter().collect()
}

/// Path leading from root-relative directory `from` to root-relative `target`.
pub fn relative_path(target: &Path, from: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let from: Vec<Component> = from.components().collect();
    let common = target
        .iter()
        .zip(from.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Root-relative physical directory that will contain `dest`.
///
/// Parent components may themselves be symlinks created by earlier
/// entries; the link target must be computed from where the link really
/// lives.
fn physical_dir_in_root(root_real: &Path, dest: &Path, digest: &str) -> Result<PathBuf> {
    let parent = dest.parent().unwrap_or(dest);
    let parent_real = fs::canonicalize(parent).map_err(|e| MinidockError::filesystem(parent, e))?;
    parent_real
        .strip_prefix(root_real)
        .map(Path::to_path_buf)
        .map_err(|_| MinidockError::PathTraversal {
            digest: digest.to_string(),
            path: dest.display().to_string(),
        })
}

fn make_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| MinidockError::filesystem(parent, e))?;
    }
    Ok(())
}

/// Create a directory, replacing a non-directory already at `dest`.
fn make_dir(dest: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if meta.is_dir() {
            return Ok(());
        }
        fs::remove_file(dest).map_err(|e| MinidockError::filesystem(dest, e))?;
    }
    fs::create_dir_all(dest).map_err(|e| MinidockError::filesystem(dest, e))
}

/// Clear `dest` for a non-directory entry. Never follows a symlink.
fn remove_non_dir_or_dir(dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(dest).map_err(|e| MinidockError::filesystem(dest, e))
        }
        Ok(_) => fs::remove_file(dest).map_err(|e| MinidockError::filesystem(dest, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MinidockError::filesystem(dest, e)),
    }
}

/// Remove whatever is at `path`; absent is fine.
fn remove_any(path: &Path) -> Result<()> {
    remove_non_dir_or_dir(path)
}

/// Remove the children of `dir` that this layer did not write itself.
fn clear_dir(dir: &Path, rel_dir: &Path, written: &HashSet<PathBuf>) -> Result<()> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(MinidockError::filesystem(dir, e)),
    };

    for child in read_dir {
        let child = child.map_err(|e| MinidockError::filesystem(dir, e))?;
        let rel_child = rel_dir.join(child.file_name());
        if written.iter().any(|w| w.starts_with(&rel_child)) {
            continue;
        }
        remove_any(&child.path())?;
    }
    Ok(())
}

/// chmod `dest`; a missing path is tolerated.
fn apply_mode(dest: &Path, mode: u32) -> Result<()> {
    match fs::set_permissions(dest, fs::Permissions::from_mode(mode)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %dest.display(), "chmod target missing, ignored");
            Ok(())
        }
        Err(e) => Err(MinidockError::filesystem(dest, e)),
    }
}
