//! High-level image pull orchestrator.
//!
//! Authenticates, fetches the manifest and config, then fills the layer
//! store with whatever layers it is missing. Assembly happens later and
//! needs nothing but the store and the manifest's layer list.

use minidock_core::config::MinidockConfig;
use minidock_core::error::Result;

use super::image::{ImageConfig, Manifest};
use super::reference::ImageReference;
use super::registry::RegistryClient;
use super::store::{EnsureSummary, LayerStore};

/// Everything known about an image after a successful pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    pub reference: ImageReference,
    pub manifest: Manifest,
    pub config: ImageConfig,
    pub layers: EnsureSummary,
}

/// Registry client plus layer store.
pub struct ImagePuller {
    client: RegistryClient,
    store: LayerStore,
}

impl ImagePuller {
    pub fn new(client: RegistryClient, store: LayerStore) -> Self {
        Self { client, store }
    }

    /// Build a puller from the runtime configuration.
    pub fn from_config(config: &MinidockConfig) -> Result<Self> {
        let client = RegistryClient::new(config.registry.clone(), config.retry)?;
        let store = LayerStore::new(&config.cache_dir)?;
        Ok(Self::new(client, store))
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Give up the layer store, e.g. to hand it to the launcher once the
    /// network stage is over.
    pub fn into_store(self) -> LayerStore {
        self.store
    }

    /// Pull `reference`: token, manifest, config, then missing layers.
    pub async fn pull(&self, reference: &ImageReference) -> Result<PulledImage> {
        let token = self.client.authenticate(reference).await?;
        let manifest = self.client.fetch_manifest(reference, &token).await?;
        let config = self
            .client
            .fetch_config(reference, &token, &manifest.config)
            .await?;

        let layers = self
            .store
            .ensure_layers(&self.client, reference, &token, &manifest.layers)
            .await?;

        tracing::info!(
            reference = %reference,
            layers = manifest.layers.len(),
            layers_size = manifest.layers_size(),
            cached = layers.cached,
            downloaded = layers.downloaded,
            downloaded_bytes = layers.downloaded_bytes,
            "Image pulled"
        );

        Ok(PulledImage {
            reference: reference.clone(),
            manifest,
            config,
            layers,
        })
    }
}
