//! Image reference parsing.
//!
//! Turns user input such as `alpine`, `alpine:3.19` or
//! `ghcr.io/org/tool@sha256:...` into registry, repository, tag and digest.

use minidock_core::error::{MinidockError, Result};

/// Registry assumed when the reference names none.
pub const DOCKER_HUB: &str = "docker.io";

/// Tag assumed when the reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Namespace Docker Hub uses for single-component names.
const OFFICIAL_NAMESPACE: &str = "library";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "docker.io", "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/alpine")
    pub repository: String,
    /// Tag (e.g., "latest", "3.19")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `alpine` → docker.io/library/alpine:latest
    /// - `alpine:3.19` → docker.io/library/alpine:3.19
    /// - `someone/tool` → docker.io/someone/tool:latest
    /// - `ghcr.io/org/tool:v1` → ghcr.io/org/tool:v1
    /// - `localhost:5000/tool` → localhost:5000/tool:latest
    /// - `alpine@sha256:abc...` → docker.io/library/alpine@sha256:abc...
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(MinidockError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match input.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(MinidockError::InvalidReference(format!(
                        "'{}': digest must be algorithm:hex",
                        input
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = tag {
            if tag.is_empty() {
                return Err(MinidockError::InvalidReference(format!(
                    "'{}': empty tag",
                    input
                )));
            }
        }

        let (registry, repository) = split_registry(name, input)?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Whether the reference points at Docker Hub.
    pub fn is_docker_hub(&self) -> bool {
        matches!(
            self.registry.as_str(),
            DOCKER_HUB | "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com"
        )
    }

    /// The tag-or-digest path segment used to address the manifest.
    ///
    /// A digest wins over a tag when both are present.
    pub fn manifest_ref(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Token scope granting pull access to this repository.
    pub fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = MinidockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`, only looking for the colon in the last path
/// component so that `host:port/name` keeps its port.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name_tag[last_start..].rfind(':') {
        Some(colon) => {
            let colon = last_start + colon;
            (&name_tag[..colon], Some(&name_tag[colon + 1..]))
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository.
///
/// The first component is a registry when it contains a dot or a port,
/// or is `localhost`.
fn split_registry(name: &str, input: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(MinidockError::InvalidReference(format!(
                    "'{}': empty repository",
                    input
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(MinidockError::InvalidReference(format!(
            "'{}': empty repository component",
            input
        )));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("{}/{}", OFFICIAL_NAMESPACE, name)
    };

    Ok((DOCKER_HUB.to_string(), repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
        assert!(r.is_docker_hub());
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("alpine:3.19").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag, Some("3.19".to_string()));
        assert_eq!(r.manifest_ref(), "3.19");
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageReference::parse("someone/tool:v2").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "someone/tool");
        assert_eq!(r.tag, Some("v2".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/org/sub/tool").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/sub/tool");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert!(!r.is_docker_hub());
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/tool:dev").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "tool");
        assert_eq!(r.tag, Some("dev".to_string()));
    }

    #[test]
    fn test_parse_digest_wins_for_manifest() {
        let r = ImageReference::parse("alpine:3.19@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("3.19".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
        assert_eq!(r.manifest_ref(), "sha256:abcdef");

        let r = ImageReference::parse("alpine@sha256:abcdef").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.manifest_ref(), "sha256:abcdef");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("alpine@nodigest").is_err());
        assert!(ImageReference::parse("alpine:").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("a//b").is_err());
    }

    #[test]
    fn test_pull_scope() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.pull_scope(), "repository:library/alpine:pull");
    }

    #[test]
    fn test_display_and_from_str() {
        let r: ImageReference = "alpine:3.19".parse().unwrap();
        assert_eq!(r.to_string(), "docker.io/library/alpine:3.19");
    }
}
