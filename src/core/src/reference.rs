//! Image reference normalization.
//!
//! Turns bare specs like `org/image` or `registry/org/image` into fully
//! qualified references. The registry is always explicit after
//! normalization; nothing downstream infers it again.

use crate::error::{MirrorError, Result};

/// Registry token that is explicit even though it has no `.` or `:`.
const LOCALHOST: &str = "localhost";

/// Whether the first path segment of a spec names a registry host.
fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == LOCALHOST
}

/// Normalize an image spec into `registry/path`.
///
/// - `nginx` → `docker.io/nginx`
/// - `myorg/app` → `docker.io/myorg/app`
/// - `ghcr.io/myorg/app` → unchanged
/// - `localhost/app` → unchanged
///
/// With `org_override` set (destinations only) the second segment is
/// replaced, except on a two-segment path (`docker.io/app`): there the
/// second segment is the repository name, so the organization is inserted
/// in front of it instead of overwriting it (`docker.io/mirrors/app`).
pub fn normalize(spec: &str, default_registry: &str, org_override: Option<&str>) -> Result<String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(MirrorError::ConfigError("Empty image spec".to_string()));
    }
    if spec.chars().any(char::is_whitespace) {
        return Err(MirrorError::ConfigError(format!(
            "Invalid image spec '{}': contains whitespace",
            spec
        )));
    }

    let mut segments: Vec<&str> = spec.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MirrorError::ConfigError(format!(
            "Invalid image spec '{}': empty path segment",
            spec
        )));
    }

    if !is_registry_host(segments[0]) {
        segments.insert(0, default_registry);
    }
    if segments.len() < 2 {
        return Err(MirrorError::ConfigError(format!(
            "Invalid image spec '{}': missing repository",
            spec
        )));
    }

    if let Some(org) = org_override {
        if segments.len() == 2 {
            segments.insert(1, org);
        } else {
            segments[1] = org;
        }
    }

    Ok(segments.join("/"))
}

/// Fully qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/sub/image")
    pub repository: String,
    /// Tag (e.g., "latest", "v1-arm64")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Build a repository reference from a normalized `registry/path` string.
    pub fn from_normalized(normalized: &str) -> Result<Self> {
        let (registry, repository) = normalized.split_once('/').ok_or_else(|| {
            MirrorError::ConfigError(format!(
                "Reference '{}' has no registry component",
                normalized
            ))
        })?;
        if registry.is_empty() || repository.is_empty() {
            return Err(MirrorError::ConfigError(format!(
                "Reference '{}' is not fully qualified",
                normalized
            )));
        }
        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: None,
            digest: None,
        })
    }

    /// Parse `spec[:tag][@digest]`, normalizing the spec part.
    ///
    /// Without tag or digest the tag defaults to `latest`.
    pub fn parse(reference: &str, default_registry: &str) -> Result<Self> {
        let reference = reference.trim();

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(MirrorError::ConfigError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag colon can only appear after the last slash; anything else is a port.
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let split = last_segment_start + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if tag.as_deref() == Some("") {
            return Err(MirrorError::ConfigError(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        let mut parsed = Self::from_normalized(&normalize(name, default_registry, None)?)?;
        parsed.tag = match (tag, &digest) {
            (None, None) => Some("latest".to_string()),
            (tag, _) => tag,
        };
        parsed.digest = digest;
        Ok(parsed)
    }

    /// Same repository at another tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Same repository pinned to a digest.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_path();
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
