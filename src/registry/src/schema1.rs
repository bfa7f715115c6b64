//! Schema-1 to schema-2 manifest conversion.
//!
//! A schema-1 manifest lists its layers newest first, each paired with a
//! `v1Compatibility` JSON blob. The schema-2 image config is rebuilt from
//! the newest of those blobs plus the uncompressed digest (diff-id) of every
//! non-empty layer.

use std::io::Read;

use flate2::read::GzDecoder;
use regmirror_core::error::{MirrorError, Result};
use regmirror_core::manifest::{
    content_digest, Descriptor, ImageManifest, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_MANIFEST_V2,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct FsLayer {
    #[serde(rename = "blobSum")]
    blob_sum: String,
}

#[derive(Debug, Deserialize)]
struct History {
    #[serde(rename = "v1Compatibility")]
    v1_compatibility: String,
}

#[derive(Debug, Default, Deserialize)]
struct V1Image {
    created: Option<String>,
    #[serde(default)]
    throwaway: bool,
    container_config: Option<V1ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct V1ContainerConfig {
    #[serde(rename = "Cmd")]
    cmd: Option<Vec<String>>,
}

/// One layer of a schema-1 image, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema1Layer {
    pub blob_sum: String,
    /// Metadata-only layer; its blob is not part of the root filesystem.
    pub empty: bool,
    created: Option<String>,
    created_by: Option<String>,
}

/// A parsed (signed or unsigned) schema-1 manifest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    #[serde(default)]
    pub architecture: String,
    fs_layers: Vec<FsLayer>,
    history: Vec<History>,
}

impl Schema1Manifest {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let manifest: Schema1Manifest = serde_json::from_slice(raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid schema 1 manifest: {}", e)))?;
        if manifest.fs_layers.is_empty() {
            return Err(MirrorError::ManifestError(
                "Schema 1 manifest has no layers".to_string(),
            ));
        }
        if manifest.fs_layers.len() != manifest.history.len() {
            return Err(MirrorError::ManifestError(format!(
                "Schema 1 manifest has {} layers but {} history entries",
                manifest.fs_layers.len(),
                manifest.history.len()
            )));
        }
        Ok(manifest)
    }

    /// Layers in application order.
    pub fn layers(&self) -> Result<Vec<Schema1Layer>> {
        self.fs_layers
            .iter()
            .zip(&self.history)
            .rev()
            .map(|(layer, history)| {
                let v1: V1Image = serde_json::from_str(&history.v1_compatibility).map_err(|e| {
                    MirrorError::ManifestError(format!("Invalid v1Compatibility entry: {}", e))
                })?;
                Ok(Schema1Layer {
                    blob_sum: layer.blob_sum.clone(),
                    empty: v1.throwaway,
                    created: v1.created,
                    created_by: v1
                        .container_config
                        .and_then(|c| c.cmd)
                        .map(|cmd| cmd.join(" ")),
                })
            })
            .collect()
    }

    /// Synthesize a schema-2 image config.
    ///
    /// `diff_ids` holds one entry per non-empty layer, oldest first.
    pub fn build_config(&self, diff_ids: &[String]) -> Result<Vec<u8>> {
        let layers = self.layers()?;
        let expected = layers.iter().filter(|l| !l.empty).count();
        if diff_ids.len() != expected {
            return Err(MirrorError::ManifestError(format!(
                "Expected {} diff ids, got {}",
                expected,
                diff_ids.len()
            )));
        }

        let newest = &self.history[0].v1_compatibility;
        let mut config: Map<String, Value> = serde_json::from_str(newest).map_err(|e| {
            MirrorError::ManifestError(format!("Invalid v1Compatibility entry: {}", e))
        })?;
        for key in ["id", "parent", "parent_id", "layer_id", "Size", "throwaway"] {
            config.remove(key);
        }
        if !config.contains_key("architecture") && !self.architecture.is_empty() {
            config.insert("architecture".to_string(), json!(self.architecture));
        }
        config.entry("os").or_insert_with(|| json!("linux"));

        let history: Vec<Value> = layers
            .iter()
            .map(|layer| {
                let mut entry = Map::new();
                if let Some(created) = &layer.created {
                    entry.insert("created".to_string(), json!(created));
                }
                if let Some(created_by) = &layer.created_by {
                    entry.insert("created_by".to_string(), json!(created_by));
                }
                if layer.empty {
                    entry.insert("empty_layer".to_string(), json!(true));
                }
                Value::Object(entry)
            })
            .collect();
        config.insert("history".to_string(), Value::Array(history));
        config.insert(
            "rootfs".to_string(),
            json!({ "type": "layers", "diff_ids": diff_ids }),
        );

        Ok(serde_json::to_vec(&Value::Object(config))?)
    }
}

/// Digest of the uncompressed content of a gzip layer blob.
pub fn diff_id(compressed: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(compressed);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| MirrorError::ManifestError(format!("Layer is not valid gzip: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Docker schema-2 manifest for a config blob and its layers.
pub fn build_manifest(config: &[u8], layers: Vec<Descriptor>) -> Result<Vec<u8>> {
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_MANIFEST_V2.to_string()),
        config: Descriptor {
            media_type: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
            digest: content_digest(config),
            size: config.len() as u64,
        },
        layers,
    };
    Ok(serde_json::to_vec_pretty(&manifest)?)
}
