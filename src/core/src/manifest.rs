//! Manifest model and classifier.
//!
//! A raw manifest is read into a [`ManifestEnvelope`] and dispatched by
//! [`classify`] to one of three strategies: multi-arch list, single-arch
//! schema-2, single-arch schema-1.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MirrorError, Result};

// Well-known media types.
pub const MEDIA_TYPE_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Every manifest media type the mirror reads.
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    MEDIA_TYPE_MANIFEST_LIST,
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_MANIFEST_V2,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_MANIFEST_V1_SIGNED,
    MEDIA_TYPE_MANIFEST_V1,
];

/// `sha256:<hex>` of a byte slice, the registry content digest format.
pub fn content_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// A fetched manifest with the two fields classification looks at.
#[derive(Debug, Clone)]
pub struct ManifestEnvelope {
    pub schema_version: u32,
    pub media_type: String,
    pub raw: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeHeader {
    schema_version: Option<u32>,
    media_type: Option<String>,
    manifests: Option<serde_json::Value>,
    config: Option<serde_json::Value>,
}

impl ManifestEnvelope {
    /// Read the schema version and media type out of raw manifest bytes.
    ///
    /// OCI documents may omit `mediaType`; it is then inferred from the
    /// document shape (`manifests` → index, `config` → image manifest).
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let header: EnvelopeHeader = serde_json::from_slice(&raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid manifest JSON: {}", e)))?;

        let schema_version = header.schema_version.ok_or_else(|| {
            MirrorError::ManifestError("Manifest has no schemaVersion".to_string())
        })?;

        let media_type = match header.media_type {
            Some(media_type) => media_type,
            None if schema_version == 1 => MEDIA_TYPE_MANIFEST_V1_SIGNED.to_string(),
            None if header.manifests.is_some() => MEDIA_TYPE_OCI_INDEX.to_string(),
            None if header.config.is_some() => MEDIA_TYPE_OCI_MANIFEST.to_string(),
            None => String::new(),
        };

        Ok(Self {
            schema_version,
            media_type,
            raw,
        })
    }

    pub fn is_list(&self) -> bool {
        self.media_type == MEDIA_TYPE_MANIFEST_LIST || self.media_type == MEDIA_TYPE_OCI_INDEX
    }

    pub fn is_image(&self) -> bool {
        self.media_type == MEDIA_TYPE_MANIFEST_V2 || self.media_type == MEDIA_TYPE_OCI_MANIFEST
    }

    /// Content digest of the raw bytes.
    pub fn digest(&self) -> String {
        content_digest(&self.raw)
    }
}

/// Multi-architecture manifest list (fat manifest).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<ManifestDescriptor>,
}

impl ManifestList {
    /// An empty Docker manifest list.
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_MANIFEST_LIST.to_string()),
            manifests: Vec::new(),
        }
    }

    /// Insert `descriptor`, replacing any entry for the same platform.
    pub fn upsert(&mut self, descriptor: ManifestDescriptor) {
        self.manifests.retain(|m| match (&m.platform, &descriptor.platform) {
            (Some(existing), Some(new)) => !existing.same_target(new),
            _ => true,
        });
        self.manifests.push(descriptor);
    }

    /// Media type to publish the list under.
    pub fn content_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(MEDIA_TYPE_OCI_INDEX)
    }
}

impl Default for ManifestList {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform-specific manifest entry in a manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ManifestDescriptor {
    pub fn architecture(&self) -> Option<&str> {
        self.platform.as_ref().map(|p| p.architecture.as_str())
    }

    pub fn variant(&self) -> Option<&str> {
        self.platform
            .as_ref()
            .and_then(|p| p.variant.as_deref())
            .filter(|v| !v.is_empty())
    }
}

/// Platform specification for multi-arch images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn linux(architecture: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: "linux".to_string(),
            variant,
        }
    }

    /// Same os/architecture/variant. An empty variant equals no variant.
    pub fn same_target(&self, other: &Platform) -> bool {
        let variant = |p: &Platform| p.variant.clone().filter(|v| !v.is_empty());
        self.os == other.os
            && self.architecture == other.architecture
            && variant(self) == variant(other)
    }
}

/// Content descriptor (config or layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// Single-architecture schema-2 manifest (Docker v2 or OCI).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// How a source manifest is mirrored.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Full architecture sweep over a manifest list.
    List(ManifestList),
    /// Architecture comes from the image config blob.
    SingleV2 { config: Descriptor },
    /// Architecture is declared in the manifest body; copied with upconversion.
    SingleV1 { architecture: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::List(_) => "manifest-list",
            Strategy::SingleV2 { .. } => "single-arch-v2",
            Strategy::SingleV1 { .. } => "single-arch-v1",
        }
    }
}

#[derive(Deserialize)]
struct Schema1Header {
    architecture: Option<String>,
}

/// Pick the mirroring strategy for a source manifest.
pub fn classify(envelope: &ManifestEnvelope) -> Result<Strategy> {
    match envelope.schema_version {
        2 if envelope.is_list() => {
            let list: ManifestList = serde_json::from_slice(&envelope.raw).map_err(|e| {
                MirrorError::ManifestError(format!("Invalid manifest list: {}", e))
            })?;
            Ok(Strategy::List(list))
        }
        2 if envelope.is_image() => {
            let manifest: ImageManifest = serde_json::from_slice(&envelope.raw).map_err(|e| {
                MirrorError::ManifestError(format!("Invalid image manifest: {}", e))
            })?;
            Ok(Strategy::SingleV2 {
                config: manifest.config,
            })
        }
        1 => {
            let header: Schema1Header = serde_json::from_slice(&envelope.raw).map_err(|e| {
                MirrorError::ManifestError(format!("Invalid schema 1 manifest: {}", e))
            })?;
            let architecture = header
                .architecture
                .filter(|a| !a.is_empty())
                .ok_or_else(|| {
                    MirrorError::ManifestError(
                        "Schema 1 manifest declares no architecture".to_string(),
                    )
                })?;
            Ok(Strategy::SingleV1 { architecture })
        }
        schema_version => Err(MirrorError::UnsupportedSchema {
            schema_version,
            media_type: envelope.media_type.clone(),
        }),
    }
}

#[derive(Deserialize)]
struct ConfigHeader {
    architecture: Option<String>,
}

/// Declared architecture of an image config blob.
pub fn config_architecture(raw_config: &[u8]) -> Result<String> {
    let header: ConfigHeader = serde_json::from_slice(raw_config)
        .map_err(|e| MirrorError::ManifestError(format!("Invalid image config: {}", e)))?;
    header
        .architecture
        .filter(|a| !a.is_empty())
        .ok_or_else(|| MirrorError::ManifestError("Image config has no architecture".to_string()))
}
