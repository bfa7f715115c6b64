//! Manifest list reconciler.
//!
//! Sweeps the configured architectures of a source manifest list, copies
//! each (architecture, variant) manifest by digest through the digest
//! comparator, and rebuilds the destination list one platform entry at a
//! time. The first entry added in a job creates the list; later entries
//! append to it.

use crate::compare::{copy_if_changed, CopyOutcome};
use crate::error::Result;
use crate::manifest::{content_digest, ManifestEnvelope, ManifestList, Platform};
use crate::reference::ImageReference;
use crate::registry::{CopyOptions, ListEntry, ListMode, Registry};
use crate::variant::{enumerate, ArchitectureGroup};

/// Result for one (architecture, variant) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchStatus {
    Copied,
    Unchanged,
    /// Configured but absent from the source.
    NotFound,
    /// Present in the source but not configured.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchOutcome {
    pub architecture: String,
    pub variant: Option<String>,
    /// Destination tag, empty when nothing was addressed.
    pub dest_tag: String,
    pub status: ArchStatus,
}

impl ArchOutcome {
    fn not_found(architecture: &str) -> Self {
        Self {
            architecture: architecture.to_string(),
            variant: None,
            dest_tag: String::new(),
            status: ArchStatus::NotFound,
        }
    }
}

/// Everything a manifest-list job did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcomes: Vec<ArchOutcome>,
    /// Publish calls made against the destination list.
    pub list_writes: usize,
    /// Set when rebuilding a missing destination list failed.
    pub list_error: Option<String>,
}

impl ReconcileReport {
    pub fn count(&self, pred: impl Fn(&ArchStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn failures(&self) -> usize {
        self.count(|s| matches!(s, ArchStatus::Failed(_)))
    }

    pub fn successes(&self) -> usize {
        self.count(|s| matches!(s, ArchStatus::Copied | ArchStatus::Unchanged))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Initial,
    Created,
}

impl ListState {
    fn mode(self) -> ListMode {
        match self {
            ListState::Initial => ListMode::Create,
            ListState::Created => ListMode::Append,
        }
    }
}

/// Incremental writer for one destination manifest list.
///
/// Transitions `Initial → Created` exactly once, on the first successful
/// publish. Entries reported unchanged before that are held back and
/// appended after the list is created, so a re-created list keeps every
/// architecture that is still valid.
pub(crate) struct ListWriter<'a, R: Registry + ?Sized> {
    registry: &'a R,
    list: ImageReference,
    state: ListState,
    pending: Vec<ListEntry>,
    writes: usize,
}

impl<'a, R: Registry + ?Sized> ListWriter<'a, R> {
    pub(crate) fn new(registry: &'a R, list: ImageReference) -> Self {
        Self {
            registry,
            list,
            state: ListState::Initial,
            pending: Vec::new(),
            writes: 0,
        }
    }

    async fn publish(&mut self, entry: &ListEntry) -> Result<()> {
        let mode = self.state.mode();
        self.publish_as(entry, mode).await
    }

    async fn publish_as(&mut self, entry: &ListEntry, mode: ListMode) -> Result<()> {
        tracing::info!(
            list = %self.list,
            entry = %entry.reference,
            architecture = %entry.platform.architecture,
            %mode,
            "Publishing manifest list entry"
        );
        self.registry
            .publish_manifest_list(&self.list, entry, mode)
            .await?;
        self.writes += 1;
        self.state = ListState::Created;
        Ok(())
    }

    /// Append held-back entries. Their failures are logged only.
    async fn flush_pending(&mut self) {
        for entry in std::mem::take(&mut self.pending) {
            if let Err(e) = self.publish(&entry).await {
                tracing::warn!(
                    list = %self.list,
                    entry = %entry.reference,
                    error = %e,
                    "Failed to re-add unchanged entry"
                );
            }
        }
    }

    /// A freshly copied manifest: add it, creating the list if needed.
    pub(crate) async fn copied(&mut self, entry: ListEntry) -> Result<()> {
        self.publish(&entry).await?;
        self.flush_pending().await;
        Ok(())
    }

    /// An unchanged manifest: only re-added once this job created the list.
    pub(crate) async fn unchanged(&mut self, entry: ListEntry) {
        match self.state {
            ListState::Created => {
                self.pending.push(entry);
                self.flush_pending().await;
            }
            ListState::Initial => self.pending.push(entry),
        }
    }

    /// Publish calls made so far.
    pub(crate) fn writes(&self) -> usize {
        self.writes
    }

    /// Bring the destination list in line with the held-back entries when
    /// this job never wrote to it.
    ///
    /// A missing (or unreadable) list is rebuilt from them. An existing list
    /// gets every held-back entry whose manifest digest it does not carry.
    pub(crate) async fn finish(&mut self) -> Result<()> {
        if self.state != ListState::Initial || self.pending.is_empty() {
            return Ok(());
        }
        let Some(existing) = self.existing_list().await else {
            tracing::info!(list = %self.list, "Destination list missing, rebuilding from unchanged entries");
            let mut pending = std::mem::take(&mut self.pending).into_iter();
            if let Some(first) = pending.next() {
                self.publish(&first).await?;
            }
            self.pending = pending.collect();
            self.flush_pending().await;
            return Ok(());
        };

        let mut last_error = None;
        for entry in std::mem::take(&mut self.pending) {
            let digest = match self.registry.inspect_manifest(&entry.reference).await {
                Ok(Some(raw)) => content_digest(&raw),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(entry = %entry.reference, error = %e, "Entry inspect failed");
                    continue;
                }
            };
            if existing.manifests.iter().any(|m| m.digest == digest) {
                continue;
            }
            tracing::info!(list = %self.list, entry = %entry.reference, %digest, "List is missing entry, re-adding");
            if let Err(e) = self.publish_as(&entry, ListMode::Append).await {
                tracing::warn!(list = %self.list, entry = %entry.reference, error = %e, "Failed to re-add list entry");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The list currently at the bare tag, `None` when it is absent or not a list.
    async fn existing_list(&self) -> Option<ManifestList> {
        let raw = match self.registry.inspect_manifest(&self.list).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(list = %self.list, error = %e, "List inspect failed, treating as missing");
                return None;
            }
        };
        let envelope = ManifestEnvelope::parse(raw).ok()?;
        if !envelope.is_list() {
            return None;
        }
        serde_json::from_slice(&envelope.raw).ok()
    }
}

fn entry_platform(group: &ArchitectureGroup, index: usize) -> Platform {
    let variant = group.entries.get(index).and_then(|e| e.variant.clone());
    Platform::linux(group.architecture.clone(), variant)
}

/// Mirror every configured architecture of `list` from `source` to `dest`.
///
/// `source` and `dest` are repository references; `tag` is the bare tag.
/// Unit failures are recorded in the report and never stop the sweep.
pub async fn reconcile_list<R: Registry + ?Sized>(
    registry: &R,
    source: &ImageReference,
    dest: &ImageReference,
    tag: &str,
    list: &ManifestList,
    architectures: &[String],
) -> ReconcileReport {
    let (groups, missing) = enumerate(list, architectures);
    let mut writer = ListWriter::new(registry, dest.with_tag(tag));
    let mut report = ReconcileReport::default();

    for architecture in &missing {
        tracing::info!(source = %source, tag, architecture = %architecture, "Architecture not found in source");
        report.outcomes.push(ArchOutcome::not_found(architecture));
    }

    for group in &groups {
        for (index, entry) in group.entries.iter().enumerate() {
            let dest_tag = group.dest_tag(tag, index);
            let src_ref = source.with_digest(entry.descriptor.digest.clone());
            let dst_ref = dest.with_tag(dest_tag.clone());

            let copied = copy_if_changed(
                registry,
                &src_ref,
                &dst_ref,
                &group.architecture,
                &CopyOptions::default(),
            )
            .await;

            let status = match copied {
                Ok(outcome) if index > 0 => status_of(outcome),
                Ok(outcome) => {
                    let list_entry = ListEntry {
                        reference: dst_ref.clone(),
                        platform: entry_platform(group, index),
                    };
                    match outcome {
                        CopyOutcome::Copied => match writer.copied(list_entry).await {
                            Ok(()) => ArchStatus::Copied,
                            Err(e) => {
                                tracing::warn!(dest = %dst_ref, error = %e, "Failed to add list entry");
                                ArchStatus::Failed(format!("publish list entry: {}", e))
                            }
                        },
                        CopyOutcome::Unchanged => {
                            writer.unchanged(list_entry).await;
                            ArchStatus::Unchanged
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        source = %src_ref,
                        dest = %dst_ref,
                        architecture = %group.architecture,
                        error = %e,
                        "Architecture copy failed"
                    );
                    ArchStatus::Failed(e.to_string())
                }
            };

            report.outcomes.push(ArchOutcome {
                architecture: group.architecture.clone(),
                variant: entry.variant.clone(),
                dest_tag,
                status,
            });
        }
    }

    if let Err(e) = writer.finish().await {
        tracing::warn!(dest = %dest, tag, error = %e, "Failed to rebuild destination list");
        report.list_error = Some(e.to_string());
    }
    report.list_writes = writer.writes();
    report
}

fn status_of(outcome: CopyOutcome) -> ArchStatus {
    match outcome {
        CopyOutcome::Copied => ArchStatus::Copied,
        CopyOutcome::Unchanged => ArchStatus::Unchanged,
    }
}
