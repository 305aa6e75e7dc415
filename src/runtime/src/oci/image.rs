//! Registry document types: token response, manifest, descriptors and the
//! image configuration blob.
//!
//! Decoding is lenient: missing fields fall back to their defaults and
//! unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media type requested for image manifests.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Bearer token issued by a registry's token endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthToken {
    /// Bearer token; some registries only populate `access_token`
    #[serde(default, alias = "access_token")]
    pub token: String,

    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: u64,

    /// RFC 3339 issue time
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl AuthToken {
    /// Token for registries that issue no auth challenge.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_empty()
    }

    /// Expiry instant, when the registry reported both issue time and lifetime.
    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let issued = self.issued_at.as_deref()?;
        let issued = chrono::DateTime::parse_from_rfc3339(issued).ok()?;
        let lifetime = chrono::Duration::seconds(i64::try_from(self.expires_in).ok()?);
        Some(issued.with_timezone(&chrono::Utc) + lifetime)
    }
}

/// Content descriptor for a config or layer blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

/// Image manifest. `layers` is ordered base first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub config: BlobDescriptor,
    #[serde(default)]
    pub layers: Vec<BlobDescriptor>,
}

impl Manifest {
    /// Sum of compressed layer sizes.
    pub fn layers_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}

/// Image configuration blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub container_config: Option<ContainerConfig>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub docker_version: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub rootfs: RootFs,
}

/// Runtime defaults recorded in the image. Not applied to the launched
/// process; the invocation alone decides command and arguments.
///
/// Fields whose JSON shape varies between producers stay as raw values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub domainname: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub attach_stdin: bool,
    #[serde(default)]
    pub attach_stdout: bool,
    #[serde(default)]
    pub attach_stderr: bool,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub open_stdin: bool,
    #[serde(default)]
    pub stdin_once: bool,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub volumes: Option<serde_json::Value>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<serde_json::Value>,
    #[serde(default)]
    pub on_build: Option<serde_json::Value>,
    #[serde(default)]
    pub labels: Option<serde_json::Value>,
}

impl ContainerConfig {
    /// Environment as key/value pairs; entries without `=` map to "".
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .flatten()
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (kv.clone(), String::new()),
            })
            .collect()
    }

    /// String labels; non-string values are skipped.
    pub fn string_labels(&self) -> HashMap<String, String> {
        match &self.labels {
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => HashMap::new(),
        }
    }

    /// Entrypoint as argv, accepting either a string or an array of strings.
    pub fn entrypoint_argv(&self) -> Option<Vec<String>> {
        match self.entrypoint.as_ref()? {
            serde_json::Value::String(s) => Some(s.split_whitespace().map(String::from).collect()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// One build step in the image history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub empty_layer: bool,
}

/// Root filesystem description (uncompressed layer digests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(default, rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}
