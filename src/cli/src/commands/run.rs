//! `minidock run` command: pull, assemble, run confined, clean up.

use clap::Args;
use minidock_core::config::{MinidockConfig, NamespaceConfig};
use minidock_runtime::{ImagePuller, ImageReference, SandboxLauncher};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only create a PID namespace (no user namespace)
    #[arg(long)]
    pub no_userns: bool,

    /// Image reference (e.g., "alpine", "alpine:3.19", "ghcr.io/org/image:tag")
    pub image: String,

    /// Command to run inside the image
    pub command: String,

    /// Arguments passed to the command verbatim
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    /// Fold run-specific flags into the configuration.
    pub fn apply(&self, config: &mut MinidockConfig) {
        if self.no_userns {
            config.namespaces = NamespaceConfig::minimal();
        }
    }
}

/// Returns the command's exit code.
pub fn execute(args: RunArgs, config: &MinidockConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    tracing::info!(
        image = %reference,
        command = %args.command,
        args = ?args.args,
        "Starting run"
    );

    let puller = ImagePuller::from_config(config)?;

    // The runtime (and any threads it owns) is gone before the child is cloned.
    let image = {
        let rt = super::network_runtime()?;
        rt.block_on(puller.pull(&reference))?
    };

    let store = puller.into_store();
    let launcher = SandboxLauncher::new(config.namespaces);
    let code = launcher.run(&store, &image.manifest.layers, &args.command, &args.args)?;

    tracing::info!(image = %reference, exit_code = code, "Run finished");
    Ok(code)
}
