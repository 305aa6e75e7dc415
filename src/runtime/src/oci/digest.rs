//! Content digests and verification of blob bytes.

use std::io::Write;

use minidock_core::error::{MinidockError, Result};
use sha2::{Digest as _, Sha256};

/// A validated `sha256:<hex>` digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Parse an algorithm-prefixed digest. Only sha256 is supported.
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| MinidockError::UnsupportedDigest(digest.to_string()))?;

        if algorithm != "sha256"
            || hex.len() != 64
            || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(MinidockError::UnsupportedDigest(digest.to_string()));
        }

        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// Digest of an in-memory byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Fail unless `actual` equals this digest.
    pub fn verify(&self, actual: &Digest) -> Result<()> {
        if self != actual {
            return Err(MinidockError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

/// Writer adapter hashing everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the inner writer with the digest of all bytes seen.
    pub fn finish(mut self) -> std::io::Result<(W, Digest)> {
        self.inner.flush()?;
        let digest = Digest {
            hex: hex::encode(self.hasher.finalize()),
        };
        Ok((self.inner, digest))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
