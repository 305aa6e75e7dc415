//! `minidock pull` command.

use clap::Args;
use minidock_core::config::MinidockConfig;
use minidock_runtime::{ImagePuller, ImageReference};

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine:latest", "ghcr.io/org/image:tag")
    pub image: String,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn execute(args: PullArgs, config: &MinidockConfig) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let puller = ImagePuller::from_config(config)?;

    if !args.quiet {
        println!("Pulling {}...", reference);
    }

    let rt = super::network_runtime()?;
    let image = rt.block_on(puller.pull(&reference))?;

    if args.quiet {
        println!("{}", image.manifest.config.digest);
        return Ok(());
    }

    println!(
        "Pulled: {} ({}/{}, {} layers, {} cached, {} downloaded, {} bytes)",
        reference,
        image.config.os,
        image.config.architecture,
        image.manifest.layers.len(),
        image.layers.cached,
        image.layers.downloaded,
        image.layers.downloaded_bytes
    );
    for layer in &image.manifest.layers {
        println!("  {} {}", layer.digest, layer.size);
    }
    println!("Cache: {}", puller.store().cache_dir().display());

    Ok(())
}
