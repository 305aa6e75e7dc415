//! Content-addressed cache of compressed layer blobs.
//!
//! One file per digest under the cache directory, named after the digest
//! with `:` replaced by `_`. Entries are written once, reused by every later
//! run and never evicted.
//!
//! Downloads stream into a temporary file inside the cache directory, are
//! verified against the descriptor's digest and only then renamed to their
//! final name, so a cache file is always complete and verified.

use std::path::{Path, PathBuf};

use minidock_core::error::{MinidockError, Result};

use super::digest::Digest;
use super::image::{AuthToken, BlobDescriptor};
use super::reference::ImageReference;
use super::registry::RegistryClient;

/// Prefix of in-flight download files.
const DOWNLOAD_PREFIX: &str = ".download-";

/// Outcome of [`LayerStore::ensure_layers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureSummary {
    /// Layers already present in the cache
    pub cached: usize,
    /// Layers fetched from the registry during this call
    pub downloaded: usize,
    /// Bytes fetched from the registry
    pub downloaded_bytes: u64,
}

/// Shared on-disk layer cache.
pub struct LayerStore {
    cache_dir: PathBuf,
}

impl LayerStore {
    /// Open the store, creating the cache directory if needed.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| MinidockError::filesystem(cache_dir, e))?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Filesystem-safe cache key for a digest.
    ///
    /// e.g., "sha256:abc123" → "sha256_abc123"
    pub fn cache_key(digest: &str) -> String {
        digest.replacen(':', "_", 1)
    }

    /// Path of the cached archive for `digest` (present or not).
    pub fn layer_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(Self::cache_key(digest))
    }

    /// Whether the archive for `digest` is cached.
    pub fn contains(&self, digest: &str) -> bool {
        self.layer_path(digest).is_file()
    }

    /// Make sure every layer in `layers` is cached, downloading the missing
    /// ones in manifest order.
    pub async fn ensure_layers(
        &self,
        client: &RegistryClient,
        reference: &ImageReference,
        token: &AuthToken,
        layers: &[BlobDescriptor],
    ) -> Result<EnsureSummary> {
        let mut summary = EnsureSummary::default();

        for layer in layers {
            if self.contains(&layer.digest) {
                tracing::info!(digest = %layer.digest, "Layer cached, skipping download");
                summary.cached += 1;
                continue;
            }

            let bytes = self.download(client, reference, token, layer).await?;
            summary.downloaded += 1;
            summary.downloaded_bytes += bytes;
        }

        Ok(summary)
    }

    /// Download one layer into the cache. Returns the blob size.
    async fn download(
        &self,
        client: &RegistryClient,
        reference: &ImageReference,
        token: &AuthToken,
        layer: &BlobDescriptor,
    ) -> Result<u64> {
        let expected = Digest::parse(&layer.digest)?;
        let final_path = self.layer_path(&layer.digest);

        tracing::info!(
            digest = %layer.digest,
            size = layer.size,
            media_type = %layer.media_type,
            "Downloading layer"
        );

        let staging = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempfile_in(&self.cache_dir)
            .map_err(|e| MinidockError::filesystem(&self.cache_dir, e))?;

        // On any early return the staging file is dropped and removed.
        let (staging, actual) = client
            .download_blob(reference, token, layer, staging)
            .await?;
        expected.verify(&actual)?;

        let file = staging
            .persist(&final_path)
            .map_err(|e| MinidockError::filesystem(&final_path, e.error))?;
        let bytes = file
            .metadata()
            .map_err(|e| MinidockError::filesystem(&final_path, e))?
            .len();

        tracing::debug!(
            digest = %layer.digest,
            bytes,
            path = %final_path.display(),
            "Layer cached"
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let cache_dir = tmp.path().join("nested").join("layers");
        let store = LayerStore::new(&cache_dir).unwrap();
        assert!(cache_dir.is_dir());
        assert_eq!(store.cache_dir(), cache_dir);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(LayerStore::cache_key("sha256:abc123"), "sha256_abc123");
        assert_eq!(LayerStore::cache_key("nocolon"), "nocolon");
    }

    #[test]
    fn test_contains() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        assert!(!store.contains("sha256:abc"));

        std::fs::write(tmp.path().join("sha256_abc"), b"blob").unwrap();
        assert!(store.contains("sha256:abc"));
        assert_eq!(store.layer_path("sha256:abc"), tmp.path().join("sha256_abc"));
    }
}
