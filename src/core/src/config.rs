use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::log::LogFormat;

/// Docker Hub registry API endpoint.
pub const DOCKER_HUB_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Docker Hub token endpoint.
pub const DOCKER_HUB_AUTH_URL: &str = "https://auth.docker.io/token";

/// Service name Docker Hub expects in token requests.
pub const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

/// Default log file, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "minidock.log";

/// Minidock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinidockConfig {
    /// Directory holding cached layer blobs (one file per digest)
    pub cache_dir: PathBuf,

    /// Registry endpoints
    pub registry: RegistryConfig,

    /// Namespace isolation for the launched command
    pub namespaces: NamespaceConfig,

    /// Retry policy for registry requests
    pub retry: RetryConfig,

    /// Logging
    pub log: LogConfig,
}

impl Default for MinidockConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            registry: RegistryConfig::default(),
            namespaces: NamespaceConfig::default(),
            retry: RetryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl MinidockConfig {
    /// Default layer cache directory (~/.minidock/layers).
    pub fn default_cache_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".minidock"))
            .unwrap_or_else(|| PathBuf::from(".minidock"))
            .join("layers")
    }
}

/// Registry endpoints used for Docker Hub references.
///
/// References naming another registry host talk to `https://<host>` and
/// discover their token endpoint from the registry's auth challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry API (without the `/v2` suffix)
    pub url: String,

    /// Token endpoint
    pub auth_url: String,

    /// Service name sent with token requests
    pub service: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DOCKER_HUB_REGISTRY_URL.to_string(),
            auth_url: DOCKER_HUB_AUTH_URL.to_string(),
            service: DOCKER_HUB_SERVICE.to_string(),
        }
    }
}

/// Namespace configuration for process isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Separate process tree (PID namespace)
    pub pid: bool,

    /// Separate user/group ID mapping (user namespace)
    pub user: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self::full_isolation()
    }
}

impl NamespaceConfig {
    /// PID and user namespaces.
    pub fn full_isolation() -> Self {
        Self {
            pid: true,
            user: true,
        }
    }

    /// PID namespace only.
    pub fn minimal() -> Self {
        Self {
            pid: true,
            user: false,
        }
    }
}

/// Retry policy for idempotent registry requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request (1 disables retrying)
    pub max_attempts: u32,

    /// Delay before the second attempt; grows linearly per attempt
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append-only log file
    pub file: PathBuf,

    /// Line format
    pub format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_LOG_FILE),
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}
