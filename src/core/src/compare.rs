//! Digest comparator: copy a manifest only when its content changed.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::reference::ImageReference;
use crate::registry::{CopyOptions, Registry};

/// Content fingerprint of a raw manifest, used only for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// The manifest does not exist.
    Missing,
    /// Hex sha256 of the raw bytes.
    Sha256(String),
}

impl Fingerprint {
    pub fn of(raw: Option<&[u8]>) -> Self {
        match raw {
            Some(bytes) => Fingerprint::Sha256(hex::encode(Sha256::digest(bytes))),
            None => Fingerprint::Missing,
        }
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "MISSING"),
            Self::Sha256(hex) => write!(f, "{}", hex),
        }
    }
}

/// What the comparator did for one unit of copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Unchanged,
    Copied,
}

/// Fingerprint of the destination. Inspect failures count as missing.
async fn dest_fingerprint<R: Registry + ?Sized>(registry: &R, dest: &ImageReference) -> Fingerprint {
    match registry.inspect_manifest(dest).await {
        Ok(raw) => Fingerprint::of(raw.as_deref()),
        Err(e) => {
            tracing::warn!(dest = %dest, error = %e, "Destination inspect failed, treating as missing");
            Fingerprint::Missing
        }
    }
}

/// Copy `source` to `dest` unless both manifests already have the same content.
///
/// Source inspect errors propagate. A missing source fingerprints as
/// `Missing` like any absent manifest; the copy primitive reports it.
pub async fn copy_if_changed<R: Registry + ?Sized>(
    registry: &R,
    source: &ImageReference,
    dest: &ImageReference,
    architecture: &str,
    options: &CopyOptions,
) -> Result<CopyOutcome> {
    let source_raw = registry.inspect_manifest(source).await?;
    let source_fp = Fingerprint::of(source_raw.as_deref());
    let dest_fp = dest_fingerprint(registry, dest).await;

    if source_fp != Fingerprint::Missing && source_fp == dest_fp {
        tracing::info!(
            source = %source,
            dest = %dest,
            architecture,
            fingerprint = %source_fp,
            "Unchanged, skipping copy"
        );
        return Ok(CopyOutcome::Unchanged);
    }

    tracing::info!(
        source = %source,
        dest = %dest,
        architecture,
        source_fingerprint = %source_fp,
        dest_fingerprint = %dest_fp,
        "Copying manifest"
    );
    registry
        .copy_manifest(source, dest, architecture, options)
        .await?;
    Ok(CopyOutcome::Copied)
}
