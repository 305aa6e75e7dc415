//! Minidock Core - Shared Types
//!
//! Error taxonomy, run configuration and log setup used by the runtime
//! and the CLI.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{LogConfig, MinidockConfig, NamespaceConfig, RegistryConfig, RetryConfig};
pub use error::{MinidockError, Result};
pub use log::LogFormat;

/// Minidock version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
