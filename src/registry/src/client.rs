//! OCI distribution backed registry transport.
//!
//! Implements the mirror's registry operations on top of the
//! `oci-distribution` client: raw manifest reads, blob-by-blob copies,
//! schema-1 upconversion and incremental manifest list publishing.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::RwLock;

use regmirror_core::error::{MirrorError, Result};
use regmirror_core::manifest::{
    content_digest, Descriptor, ImageManifest, ManifestDescriptor, ManifestEnvelope, ManifestList,
    ACCEPTED_MEDIA_TYPES, MEDIA_TYPE_LAYER_GZIP, MEDIA_TYPE_MANIFEST_V2,
};
use regmirror_core::reference::ImageReference;
use regmirror_core::registry::{CopyOptions, ListEntry, ListMode, Registry};
use regmirror_core::variant::group_for;

use crate::credentials::CredentialStore;
use crate::schema1::{self, Schema1Manifest};

/// Layers hosted outside the registry; never copied.
const MEDIA_TYPE_FOREIGN_LAYER: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Credentials for one registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, or anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Stored login for `registry`, then the environment, then anonymous.
    pub fn resolve(registry: &str) -> Self {
        let store = CredentialStore::default_path().ok();
        Self::resolve_with(store.as_ref(), registry)
    }

    pub fn resolve_with(store: Option<&CredentialStore>, registry: &str) -> Self {
        if let Some(store) = store {
            match store.get(registry) {
                Ok(Some(credential)) => return Self::basic(credential.username, credential.password),
                Ok(None) => {}
                Err(e) => tracing::warn!(registry, error = %e, "Ignoring unreadable credential store"),
            }
        }
        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Registry transport over the OCI distribution API.
pub struct OciRegistry {
    client: Client,
    auths: RwLock<HashMap<String, RegistryAuth>>,
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OciRegistry {
    pub fn new() -> Self {
        Self::with_insecure(Vec::new())
    }

    /// Talk plain HTTP to the listed registries, HTTPS to every other.
    pub fn with_insecure(registries: Vec<String>) -> Self {
        let protocol = if registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(registries)
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auths: RwLock::new(HashMap::new()),
        }
    }

    fn auth_for(&self, registry: &str) -> OciRegistryAuth {
        if let Some(auth) = self.auths.read().get(registry) {
            return auth.to_oci_auth();
        }
        let auth = RegistryAuth::resolve(registry);
        tracing::debug!(registry, anonymous = auth.is_anonymous(), "Resolved registry credentials");
        let oci_auth = auth.to_oci_auth();
        self.auths.write().insert(registry.to_string(), auth);
        oci_auth
    }

    async fn authenticate(
        &self,
        oci_ref: &Reference,
        registry: &str,
        operation: RegistryOperation,
    ) -> Result<()> {
        let auth = self.auth_for(registry);
        self.client
            .auth(oci_ref, &auth, operation)
            .await
            .map_err(|e| transport(registry, "authenticate", e))?;
        Ok(())
    }

    /// Raw manifest bytes, `None` when the registry reports it unknown.
    async fn pull_raw(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry);
        match self
            .client
            .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MEDIA_TYPES)
            .await
        {
            Ok((raw, digest)) => {
                tracing::debug!(reference = %reference, digest = %digest, "Fetched manifest");
                Ok(Some(raw))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(transport(&reference.registry, "fetch manifest", e)),
        }
    }

    async fn pull_required(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.pull_raw(reference).await?.ok_or_else(|| {
            MirrorError::registry(
                reference.registry.clone(),
                format!("manifest {} not found", reference),
            )
        })
    }

    async fn pull_blob(
        &self,
        oci_ref: &Reference,
        registry: &str,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        let oci_descriptor = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size as i64,
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(oci_ref, &oci_descriptor, &mut data)
            .await
            .map_err(|e| transport(registry, &format!("pull blob {}", descriptor.digest), e))?;
        Ok(data)
    }

    async fn push_blob(
        &self,
        oci_ref: &Reference,
        registry: &str,
        data: &[u8],
        digest: &str,
    ) -> Result<()> {
        tracing::debug!(digest, size = data.len(), "Pushing blob");
        self.client
            .push_blob(oci_ref, data, digest)
            .await
            .map_err(|e| transport(registry, &format!("push blob {}", digest), e))?;
        Ok(())
    }

    async fn push_manifest(
        &self,
        oci_ref: &Reference,
        registry: &str,
        body: Vec<u8>,
        media_type: &str,
    ) -> Result<String> {
        let content_type = header_value(media_type)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid media type '{}': {}", media_type, e)))?;
        self.client
            .push_manifest_raw(oci_ref, body, content_type)
            .await
            .map_err(|e| transport(registry, "push manifest", e))
    }

    /// Resolve a list source to the manifest of its default entry for `architecture`.
    async fn select_platform(
        &self,
        source: &ImageReference,
        envelope: &ManifestEnvelope,
        architecture: &str,
    ) -> Result<(ImageReference, ManifestEnvelope)> {
        let list: ManifestList = serde_json::from_slice(&envelope.raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid manifest list: {}", e)))?;
        let digest = group_for(&list, architecture)
            .and_then(|group| group.default_entry().map(|e| e.descriptor.digest.clone()))
            .ok_or_else(|| {
                MirrorError::ManifestError(format!(
                    "{} has no {} manifest",
                    source, architecture
                ))
            })?;
        let by_digest = source.with_digest(digest);
        let raw = self.pull_required(&by_digest).await?;
        Ok((by_digest, ManifestEnvelope::parse(raw)?))
    }

    async fn copy_image(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        envelope: ManifestEnvelope,
    ) -> Result<()> {
        let manifest: ImageManifest = serde_json::from_slice(&envelope.raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid image manifest: {}", e)))?;
        let src_ref = to_oci_reference(source)?;
        let dst_ref = to_oci_reference(dest)?;
        self.authenticate(&src_ref, &source.registry, RegistryOperation::Pull)
            .await?;
        self.authenticate(&dst_ref, &dest.registry, RegistryOperation::Push)
            .await?;

        let mut copied = HashSet::new();
        for descriptor in std::iter::once(&manifest.config).chain(&manifest.layers) {
            if descriptor.media_type == MEDIA_TYPE_FOREIGN_LAYER {
                tracing::debug!(digest = %descriptor.digest, "Skipping foreign layer");
                continue;
            }
            if !copied.insert(descriptor.digest.as_str()) {
                continue;
            }
            let data = self.pull_blob(&src_ref, &source.registry, descriptor).await?;
            self.push_blob(&dst_ref, &dest.registry, &data, &descriptor.digest)
                .await?;
        }

        let digest = envelope.digest();
        self.push_manifest(&dst_ref, &dest.registry, envelope.raw, &envelope.media_type)
            .await?;
        tracing::info!(
            source = %source,
            dest = %dest,
            digest = %digest,
            blobs = copied.len(),
            "Copied image"
        );
        Ok(())
    }

    async fn copy_schema1(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        raw: &[u8],
    ) -> Result<()> {
        let manifest = Schema1Manifest::parse(raw)?;
        let src_ref = to_oci_reference(source)?;
        let dst_ref = to_oci_reference(dest)?;
        self.authenticate(&src_ref, &source.registry, RegistryOperation::Pull)
            .await?;
        self.authenticate(&dst_ref, &dest.registry, RegistryOperation::Push)
            .await?;

        let mut diff_ids = Vec::new();
        let mut layers = Vec::new();
        let mut pushed = HashSet::new();
        for layer in manifest.layers()?.into_iter().filter(|l| !l.empty) {
            let wanted = Descriptor {
                media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
                digest: layer.blob_sum.clone(),
                size: 0,
            };
            let blob = self.pull_blob(&src_ref, &source.registry, &wanted).await?;
            diff_ids.push(schema1::diff_id(&blob)?);
            if pushed.insert(layer.blob_sum.clone()) {
                self.push_blob(&dst_ref, &dest.registry, &blob, &layer.blob_sum)
                    .await?;
            }
            layers.push(Descriptor {
                size: blob.len() as u64,
                ..wanted
            });
        }

        let config = manifest.build_config(&diff_ids)?;
        self.push_blob(&dst_ref, &dest.registry, &config, &content_digest(&config))
            .await?;
        let body = schema1::build_manifest(&config, layers)?;
        let digest = content_digest(&body);
        self.push_manifest(&dst_ref, &dest.registry, body, MEDIA_TYPE_MANIFEST_V2)
            .await?;
        tracing::info!(
            source = %source,
            dest = %dest,
            digest = %digest,
            layers = diff_ids.len(),
            "Upconverted schema 1 image"
        );
        Ok(())
    }

    async fn existing_list(&self, list: &ImageReference) -> Result<ManifestList> {
        let Some(raw) = self.pull_raw(list).await? else {
            return Ok(ManifestList::new());
        };
        let envelope = ManifestEnvelope::parse(raw)?;
        if !envelope.is_list() {
            tracing::warn!(list = %list, media_type = %envelope.media_type, "Replacing non-list manifest at list tag");
            return Ok(ManifestList::new());
        }
        serde_json::from_slice(&envelope.raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid manifest list: {}", e)))
    }
}

#[async_trait]
impl Registry for OciRegistry {
    async fn inspect_manifest(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>> {
        self.pull_raw(reference).await
    }

    async fn inspect_config(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let raw = self.pull_required(reference).await?;
        let manifest: ImageManifest = serde_json::from_slice(&raw)
            .map_err(|e| MirrorError::ManifestError(format!("Invalid image manifest: {}", e)))?;
        let oci_ref = to_oci_reference(reference)?;
        self.authenticate(&oci_ref, &reference.registry, RegistryOperation::Pull)
            .await?;
        self.pull_blob(&oci_ref, &reference.registry, &manifest.config)
            .await
    }

    async fn copy_manifest(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        architecture: &str,
        options: &CopyOptions,
    ) -> Result<()> {
        let envelope = ManifestEnvelope::parse(self.pull_required(source).await?)?;

        if envelope.schema_version == 1 {
            if !options.upconvert_schema1 {
                return Err(MirrorError::UnsupportedSchema {
                    schema_version: 1,
                    media_type: envelope.media_type,
                });
            }
            return self.copy_schema1(source, dest, &envelope.raw).await;
        }

        if envelope.is_list() {
            let (resolved, image) = self.select_platform(source, &envelope, architecture).await?;
            return self.copy_image(&resolved, dest, image).await;
        }
        if !envelope.is_image() {
            return Err(MirrorError::UnsupportedSchema {
                schema_version: envelope.schema_version,
                media_type: envelope.media_type,
            });
        }
        self.copy_image(source, dest, envelope).await
    }

    async fn publish_manifest_list(
        &self,
        list: &ImageReference,
        entry: &ListEntry,
        mode: ListMode,
    ) -> Result<()> {
        let envelope = ManifestEnvelope::parse(self.pull_required(&entry.reference).await?)?;
        let descriptor = ManifestDescriptor {
            media_type: envelope.media_type.clone(),
            digest: envelope.digest(),
            size: envelope.raw.len() as u64,
            platform: Some(entry.platform.clone()),
        };

        let mut manifest_list = match mode {
            ListMode::Create => ManifestList::new(),
            ListMode::Append => self.existing_list(list).await?,
        };
        manifest_list.upsert(descriptor);

        let oci_ref = to_oci_reference(list)?;
        self.authenticate(&oci_ref, &list.registry, RegistryOperation::Push)
            .await?;
        let content_type = manifest_list.content_type().to_string();
        let body = serde_json::to_vec_pretty(&manifest_list)?;
        self.push_manifest(&oci_ref, &list.registry, body, &content_type)
            .await?;
        tracing::debug!(list = %list, entries = manifest_list.manifests.len(), %mode, "Pushed manifest list");
        Ok(())
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.digest, &reference.tag) {
        (Some(_), _) | (None, Some(_)) => reference.full_reference(),
        (None, None) => format!("{}:latest", reference.repository_path()),
    };
    ref_str.parse::<Reference>().map_err(|e| {
        MirrorError::ConfigError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Parse a header value without naming the HTTP crate's type.
fn header_value<T>(value: &str) -> std::result::Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| e.to_string())
}

fn is_not_found(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown
            )
        }),
        _ => false,
    }
}

fn transport(registry: &str, action: &str, err: impl Display) -> MirrorError {
    MirrorError::registry(registry, format!("Failed to {}: {}", action, err))
}
