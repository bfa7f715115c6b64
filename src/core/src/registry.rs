//! Registry collaborator interfaces.
//!
//! The reconciliation logic only talks to registries through these traits,
//! so it runs unchanged against a real client or an in-memory fake.

use async_trait::async_trait;

use crate::error::Result;
use crate::manifest::Platform;
use crate::reference::ImageReference;

/// Options for a single manifest copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Convert a schema-1 source into a schema-2 manifest while copying.
    pub upconvert_schema1: bool,
}

impl CopyOptions {
    pub fn upconvert() -> Self {
        Self {
            upconvert_schema1: true,
        }
    }
}

/// How a platform entry is added to a destination manifest list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Replace whatever list exists at the tag.
    Create,
    /// Add to the list at the tag, replacing an entry for the same platform.
    Append,
}

impl std::fmt::Display for ListMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// A platform entry to publish: the manifest at `reference` for `platform`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub reference: ImageReference,
    pub platform: Platform,
}

/// Registry operations the mirror needs.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Raw manifest or manifest-list bytes; `Ok(None)` when it does not exist.
    async fn inspect_manifest(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>>;

    /// Image config blob referenced by the schema-2 manifest at `reference`.
    async fn inspect_config(&self, reference: &ImageReference) -> Result<Vec<u8>>;

    /// Copy one manifest and its blobs. `architecture` selects the entry when
    /// the source resolves to a list.
    async fn copy_manifest(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        architecture: &str,
        options: &CopyOptions,
    ) -> Result<()>;

    /// Add one platform entry to the manifest list at `list`.
    async fn publish_manifest_list(
        &self,
        list: &ImageReference,
        entry: &ListEntry,
        mode: ListMode,
    ) -> Result<()>;
}

/// Best-effort side channel describing the mirror relationship.
#[async_trait]
pub trait DescriptionPublisher: Send + Sync {
    /// Whether descriptions can be published for `dest` at all.
    fn applies_to(&self, dest: &ImageReference) -> bool;

    async fn publish_description(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
    ) -> Result<()>;
}

/// Read-only wrapper: inspections go through, writes are only logged.
pub struct DryRun<R> {
    inner: R,
}

impl<R: Registry> DryRun<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: Registry> Registry for DryRun<R> {
    async fn inspect_manifest(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>> {
        self.inner.inspect_manifest(reference).await
    }

    async fn inspect_config(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.inner.inspect_config(reference).await
    }

    async fn copy_manifest(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        architecture: &str,
        options: &CopyOptions,
    ) -> Result<()> {
        tracing::info!(
            source = %source,
            dest = %dest,
            architecture,
            upconvert = options.upconvert_schema1,
            "[dry-run] would copy manifest"
        );
        Ok(())
    }

    async fn publish_manifest_list(
        &self,
        list: &ImageReference,
        entry: &ListEntry,
        mode: ListMode,
    ) -> Result<()> {
        tracing::info!(
            list = %list,
            entry = %entry.reference,
            architecture = %entry.platform.architecture,
            %mode,
            "[dry-run] would publish manifest list entry"
        );
        Ok(())
    }
}
