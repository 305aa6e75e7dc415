use std::path::PathBuf;

use thiserror::Error;

/// Minidock error types
#[derive(Error, Debug)]
pub enum MinidockError {
    /// Transport-level failure talking to the registry
    #[error("Network error: {url} - {message}")]
    NetworkError { url: String, message: String },

    /// Registry answered with a non-success status
    #[error("Registry returned {status_code} for {url}")]
    HttpStatusError { url: String, status_code: u16 },

    /// Malformed JSON from the registry or on disk
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Filesystem operation failed on a specific path
    #[error("Filesystem error: {} - {source}", path.display())]
    FilesystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tar entry type outside {directory, regular file, symlink}
    #[error("Unsupported tar entry '{path}' of type {entry_type} in layer {digest}")]
    UnsupportedEntry {
        digest: String,
        path: String,
        entry_type: String,
    },

    /// Tar entry name escapes the target root
    #[error("Path traversal detected in layer {digest}: {path}")]
    PathTraversal { digest: String, path: String },

    /// Downloaded bytes do not hash to the declared digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Digest string is malformed or uses an unknown algorithm
    #[error("Unsupported digest '{0}'")]
    UnsupportedDigest(String),

    /// Namespace, chroot or exec setup failed
    #[error("Sandbox error: {0}")]
    SandboxError(String),

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MinidockError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MinidockError::FilesystemError {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is an underlying "path not found".
    pub fn is_not_found(&self) -> bool {
        match self {
            MinidockError::FilesystemError { source, .. } | MinidockError::IoError(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MinidockError {
    fn from(err: serde_json::Error) -> Self {
        MinidockError::DecodeError(err.to_string())
    }
}

/// Result type alias for minidock operations
pub type Result<T> = std::result::Result<T, MinidockError>;
