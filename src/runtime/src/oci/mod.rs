//! Image side of the runtime: references, registry access, the layer cache
//! and root filesystem assembly.
//!
//! # Flow
//!
//! ```text
//! reference ──▶ token ──▶ manifest ──▶ config
//!                              │
//!                              └──▶ layers ──▶ LayerStore (<cache>/sha256_<hex>)
//!                                                   │
//!                                                   └──▶ assemble ──▶ root dir
//! ```

pub mod digest;
mod image;
pub mod layers;
mod pull;
pub mod reference;
pub mod registry;
pub mod store;

pub use digest::Digest;
pub use image::{
    AuthToken, BlobDescriptor, ContainerConfig, HistoryEntry, ImageConfig, Manifest, RootFs,
    DOCKER_MANIFEST_V2,
};
pub use layers::{assemble, extract_layer, AssembleSummary};
pub use pull::{ImagePuller, PulledImage};
pub use reference::ImageReference;
pub use registry::{BearerChallenge, RegistryClient};
pub use store::{EnsureSummary, LayerStore};
