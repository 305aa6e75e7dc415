//! CLI command definitions and dispatch.

mod pull;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use minidock_core::config::{LogConfig, MinidockConfig, RegistryConfig, RetryConfig};
use minidock_core::LogFormat;

pub use pull::PullArgs;
pub use run::RunArgs;

/// Exit code for failures of the pipeline itself (as opposed to the
/// command's own exit code).
pub const FATAL_EXIT_CODE: i32 = 1;

/// Minidock: pull an image and run a command inside it.
#[derive(Parser, Debug)]
#[command(name = "minidock", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside an image's root filesystem
    Run(RunArgs),
    /// Fetch an image into the layer cache without running it
    Pull(PullArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Layer cache directory [default: ~/.minidock/layers]
    #[arg(long, global = true, env = "MINIDOCK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Log file, appended to on every run
    #[arg(long, global = true, env = "MINIDOCK_LOG_FILE", default_value = minidock_core::config::DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Log line format (text, json)
    #[arg(long, global = true, env = "MINIDOCK_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, env = "MINIDOCK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Docker Hub registry API URL
    #[arg(long, global = true, env = "MINIDOCK_REGISTRY_URL", default_value = minidock_core::config::DOCKER_HUB_REGISTRY_URL)]
    pub registry_url: String,

    /// Docker Hub token endpoint
    #[arg(long, global = true, env = "MINIDOCK_AUTH_URL", default_value = minidock_core::config::DOCKER_HUB_AUTH_URL)]
    pub auth_url: String,

    /// Service name sent to the token endpoint
    #[arg(long, global = true, env = "MINIDOCK_AUTH_SERVICE", default_value = minidock_core::config::DOCKER_HUB_SERVICE)]
    pub auth_service: String,

    /// Attempts per registry request
    #[arg(long, global = true, env = "MINIDOCK_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Backoff step between registry attempts, in milliseconds
    #[arg(long, global = true, env = "MINIDOCK_RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,
}

impl GlobalArgs {
    /// Build the runtime configuration from flags and environment.
    pub fn to_config(&self) -> MinidockConfig {
        MinidockConfig {
            cache_dir: self
                .cache_dir
                .clone()
                .unwrap_or_else(MinidockConfig::default_cache_dir),
            registry: RegistryConfig {
                url: self.registry_url.clone(),
                auth_url: self.auth_url.clone(),
                service: self.auth_service.clone(),
            },
            retry: RetryConfig {
                max_attempts: self.retries.max(1),
                backoff_ms: self.retry_backoff_ms,
            },
            log: LogConfig {
                file: self.log_file.clone(),
                format: self.log_format,
                level: self.log_level.clone(),
            },
            ..Default::default()
        }
    }
}

/// Single-threaded runtime for the network stage. It must be dropped before
/// a confined child is cloned.
pub(crate) fn network_runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::error::Error>> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Returns the process exit code.
pub fn dispatch(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = cli.global.to_config();
    minidock_core::log::init(&config.log)?;

    match cli.command {
        Command::Run(args) => {
            args.apply(&mut config);
            run::execute(args, &config)
        }
        Command::Pull(args) => pull::execute(args, &config).map(|()| 0),
    }
}
