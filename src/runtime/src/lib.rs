//! Minidock runtime: pull an image, assemble its root filesystem and run a
//! command confined to it.
//!
//! The [`oci`] half talks to registries and owns the layer cache. The
//! [`sandbox`] half builds the ephemeral root and launches the process in
//! fresh namespaces.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod sandbox;

pub use oci::{
    assemble, AssembleSummary, AuthToken, BlobDescriptor, Digest, ImageConfig, ImagePuller,
    ImageReference, LayerStore, Manifest, PulledImage, RegistryClient,
};
pub use sandbox::{EphemeralRoot, SandboxLauncher};

/// Minidock runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
