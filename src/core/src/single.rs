//! Single-architecture path for schema-2 and schema-1 sources.

use crate::compare::{copy_if_changed, CopyOutcome};
use crate::config::MirrorConfig;
use crate::manifest::Platform;
use crate::mirror::{JobFailure, Stage};
use crate::reconcile::{ArchOutcome, ArchStatus, ListWriter, ReconcileReport};
use crate::reference::ImageReference;
use crate::registry::{CopyOptions, ListEntry, Registry};
use crate::variant::arch_tag;

/// Mirror a single-architecture image tagged `tag`.
///
/// Copies `source:tag` to `dest:tag-arch` and publishes `dest:tag` as a
/// one-entry manifest list. Architectures outside the configured set are
/// skipped without touching the destination.
pub async fn mirror_single<R: Registry + ?Sized>(
    registry: &R,
    source: &ImageReference,
    dest: &ImageReference,
    tag: &str,
    architecture: &str,
    options: &CopyOptions,
    config: &MirrorConfig,
) -> Result<ReconcileReport, JobFailure> {
    let mut report = ReconcileReport::default();

    if !config.wants(architecture) {
        tracing::debug!(source = %source, tag, architecture, "Architecture not configured, skipping");
        report.outcomes.push(ArchOutcome {
            architecture: architecture.to_string(),
            variant: None,
            dest_tag: String::new(),
            status: ArchStatus::Skipped,
        });
        return Ok(report);
    }

    let dest_tag = arch_tag(tag, architecture, None, 0);
    let src_ref = source.with_tag(tag);
    let dst_ref = dest.with_tag(dest_tag.clone());

    let outcome = copy_if_changed(registry, &src_ref, &dst_ref, architecture, options)
        .await
        .map_err(JobFailure::at(Stage::Copy))?;

    let entry = ListEntry {
        reference: dst_ref,
        platform: Platform::linux(architecture, None),
    };
    let mut writer = ListWriter::new(registry, dest.with_tag(tag));
    match outcome {
        CopyOutcome::Copied => writer
            .copied(entry)
            .await
            .map_err(JobFailure::at(Stage::Publish))?,
        CopyOutcome::Unchanged => writer.unchanged(entry).await,
    }
    writer
        .finish()
        .await
        .map_err(JobFailure::at(Stage::Publish))?;

    report.list_writes = writer.writes();
    report.outcomes.push(ArchOutcome {
        architecture: architecture.to_string(),
        variant: None,
        dest_tag,
        status: match outcome {
            CopyOutcome::Copied => ArchStatus::Copied,
            CopyOutcome::Unchanged => ArchStatus::Unchanged,
        },
    });
    Ok(report)
}
