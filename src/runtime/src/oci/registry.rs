//! Registry client for pulling images over the Docker Registry HTTP API V2.
//!
//! Speaks the distribution protocol directly with `reqwest`: a bearer token
//! from the token endpoint, then the manifest, the config blob and the layer
//! blobs from `/v2/<repository>/...`.

use std::io::Write;

use minidock_core::config::{RegistryConfig, RetryConfig};
use minidock_core::error::{MinidockError, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};

use super::digest::{Digest, HashingWriter};
use super::image::{AuthToken, BlobDescriptor, ImageConfig, Manifest, DOCKER_MANIFEST_V2};
use super::reference::ImageReference;

/// Bearer challenge advertised by a registry in `WWW-Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
}

/// Pulls manifests and blobs from container registries.
pub struct RegistryClient {
    http: reqwest::Client,
    hub: RegistryConfig,
    retry: RetryConfig,
}

impl RegistryClient {
    /// Create a client. `hub` supplies the endpoints for Docker Hub references.
    pub fn new(hub: RegistryConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("minidock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MinidockError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, hub, retry })
    }

    /// Base URL of the registry API serving `reference`.
    pub fn api_url(&self, reference: &ImageReference) -> String {
        if reference.is_docker_hub() {
            return self.hub.url.trim_end_matches('/').to_string();
        }
        let scheme = if is_loopback_registry(&reference.registry) {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, reference.registry)
    }

    /// Obtain a pull token for the reference's repository.
    ///
    /// Docker Hub uses the configured token endpoint. Other registries are
    /// asked for their auth challenge first; one that issues none is pulled
    /// anonymously.
    pub async fn authenticate(&self, reference: &ImageReference) -> Result<AuthToken> {
        if reference.is_docker_hub() {
            return self
                .fetch_token(&self.hub.auth_url, Some(&self.hub.service), reference)
                .await;
        }

        match self.discover_challenge(reference).await? {
            Some(challenge) => {
                self.fetch_token(&challenge.realm, challenge.service.as_deref(), reference)
                    .await
            }
            None => {
                tracing::debug!(registry = %reference.registry, "Registry issued no auth challenge");
                Ok(AuthToken::anonymous())
            }
        }
    }

    /// Request a token from `realm` scoped to pulling the reference's repository.
    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        reference: &ImageReference,
    ) -> Result<AuthToken> {
        let scope = reference.pull_scope();
        tracing::info!(realm = %realm, scope = %scope, "Requesting auth token");

        let response = self
            .send(realm, || {
                let mut query = vec![("scope", scope.as_str())];
                if let Some(service) = service {
                    query.push(("service", service));
                }
                self.http.get(realm).query(&query)
            })
            .await?;

        let body = read_body(realm, response).await?;
        let token: AuthToken = serde_json::from_slice(&body)?;
        tracing::debug!(
            expires_in = token.expires_in,
            issued_at = ?token.issued_at,
            expires_at = ?token.expires_at(),
            "Auth token issued"
        );
        Ok(token)
    }

    /// Probe `/v2/` for a bearer challenge.
    async fn discover_challenge(&self, reference: &ImageReference) -> Result<Option<BearerChallenge>> {
        let url = format!("{}/v2/", self.api_url(reference));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| network_error(&url, e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        Ok(response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge))
    }

    /// Fetch the image manifest.
    pub async fn fetch_manifest(
        &self,
        reference: &ImageReference,
        token: &AuthToken,
    ) -> Result<Manifest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.api_url(reference),
            reference.repository,
            reference.manifest_ref()
        );
        tracing::info!(reference = %reference, "Fetching manifest");

        let response = self
            .send(&url, || self.authorized(&url, token, DOCKER_MANIFEST_V2))
            .await?;
        let body = read_body(&url, response).await?;
        let manifest: Manifest = serde_json::from_slice(&body)?;

        if manifest.layers.is_empty() {
            tracing::warn!(reference = %reference, "Manifest lists no layers");
        }
        tracing::info!(
            reference = %reference,
            schema_version = manifest.schema_version,
            layers = manifest.layers.len(),
            config = %manifest.config.digest,
            "Manifest fetched"
        );
        Ok(manifest)
    }

    /// Fetch and verify the image config blob.
    pub async fn fetch_config(
        &self,
        reference: &ImageReference,
        token: &AuthToken,
        descriptor: &BlobDescriptor,
    ) -> Result<ImageConfig> {
        let expected = Digest::parse(&descriptor.digest)?;
        let url = self.blob_url(reference, &descriptor.digest);
        tracing::info!(digest = %descriptor.digest, "Fetching image config");

        let response = self
            .send(&url, || self.authorized(&url, token, &descriptor.media_type))
            .await?;
        let body = read_body(&url, response).await?;
        expected.verify(&Digest::of(&body))?;

        let config: ImageConfig = serde_json::from_slice(&body)?;
        tracing::debug!(
            architecture = %config.architecture,
            os = %config.os,
            diff_ids = config.rootfs.diff_ids.len(),
            "Image config decoded"
        );
        Ok(config)
    }

    /// Stream a blob into `writer`, returning the digest of the bytes written.
    ///
    /// The caller decides what to do with a mismatch; nothing here compares
    /// against the descriptor.
    pub async fn download_blob<W: Write>(
        &self,
        reference: &ImageReference,
        token: &AuthToken,
        descriptor: &BlobDescriptor,
        writer: W,
    ) -> Result<(W, Digest)> {
        let url = self.blob_url(reference, &descriptor.digest);
        let mut response = self
            .send(&url, || self.authorized(&url, token, &descriptor.media_type))
            .await?;

        let mut writer = HashingWriter::new(writer);
        while let Some(chunk) = response.chunk().await.map_err(|e| network_error(&url, e))? {
            writer.write_all(&chunk)?;
        }

        tracing::debug!(
            digest = %descriptor.digest,
            bytes = writer.written(),
            "Blob downloaded"
        );
        Ok(writer.finish()?)
    }

    fn blob_url(&self, reference: &ImageReference, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.api_url(reference),
            reference.repository,
            digest
        )
    }

    fn authorized(&self, url: &str, token: &AuthToken, accept: &str) -> RequestBuilder {
        let mut request = self.http.get(url);
        if !accept.is_empty() {
            request = request.header(ACCEPT, accept);
        }
        if !token.is_anonymous() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.token));
        }
        request
    }

    /// Send a GET, retrying transport errors, 5xx and 429 with linear backoff.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error = MinidockError::HttpStatusError {
                        url: url.to_string(),
                        status_code: status.as_u16(),
                    };
                    if !is_retryable_status(status) {
                        return Err(error);
                    }
                    error
                }
                Err(e) => network_error(url, e),
            };

            if attempt >= max_attempts {
                return Err(error);
            }

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                url = %url,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Registry request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_loopback_registry(registry: &str) -> bool {
    let host = registry.split(':').next().unwrap_or(registry);
    host == "localhost" || host == "127.0.0.1"
}

fn network_error(url: &str, e: reqwest::Error) -> MinidockError {
    MinidockError::NetworkError {
        url: url.to_string(),
        message: e.to_string(),
    }
}

async fn read_body(url: &str, response: Response) -> Result<Vec<u8>> {
    let bytes = response.bytes().await.map_err(|e| network_error(url, e))?;
    Ok(bytes.to_vec())
}

/// Parse `Bearer realm="...",service="...",scope="..."`.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    for (key, value) in split_auth_params(params) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// Split comma-separated `key=value` pairs, honouring quoted values.
fn split_auth_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    for c in params.chars() {
        match c {
            '"' if in_value => in_quotes = !in_quotes,
            '=' if !in_value => in_value = true,
            ',' if !in_quotes => {
                if in_value {
                    pairs.push((key.trim().to_string(), value.clone()));
                }
                key.clear();
                value.clear();
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    if in_value {
        pairs.push((key.trim().to_string(), value));
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RegistryClient {
        RegistryClient::new(RegistryConfig::default(), RetryConfig::none()).unwrap()
    }

    #[test]
    fn test_api_url_docker_hub() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(client().api_url(&r), "https://registry.hub.docker.com");
    }

    #[test]
    fn test_api_url_other_registries() {
        let r = ImageReference::parse("ghcr.io/org/tool").unwrap();
        assert_eq!(client().api_url(&r), "https://ghcr.io");

        let r = ImageReference::parse("localhost:5000/tool").unwrap();
        assert_eq!(client().api_url(&r), "http://localhost:5000");
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let c = parse_bearer_challenge(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:org/tool:pull,push""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://ghcr.io/token");
        assert_eq!(c.service.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_parse_bearer_challenge_without_service() {
        let c = parse_bearer_challenge(r#"bearer realm="https://r.example/auth""#).unwrap();
        assert_eq!(c.realm, "https://r.example/auth");
        assert_eq!(c.service, None);
    }

    #[test]
    fn test_parse_bearer_challenge_rejects_basic() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
        assert!(parse_bearer_challenge(r#"Bearer service="x""#).is_none());
        assert!(parse_bearer_challenge("Bearer").is_none());
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
