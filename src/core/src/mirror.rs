//! Mirror orchestrator.
//!
//! Drives one (source, dest, tag) job end to end: normalize references,
//! read and classify the source manifest, run the list reconciler or the
//! single-architecture path, then publish the repository description.
//! Every job produces a [`JobResult`]; a failed job never stops the run.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::config::MirrorConfig;
use crate::error::MirrorError;
use crate::job::MirrorJob;
use crate::manifest::{classify, config_architecture, ManifestEnvelope, Strategy};
use crate::reconcile::{reconcile_list, ArchStatus, ReconcileReport};
use crate::reference::{normalize, ImageReference};
use crate::registry::{CopyOptions, DescriptionPublisher, Registry};
use crate::single::mirror_single;

/// Pipeline stage a job failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalize,
    InspectSource,
    Classify,
    Copy,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normalize => write!(f, "normalize"),
            Self::InspectSource => write!(f, "inspect-source"),
            Self::Classify => write!(f, "classify"),
            Self::Copy => write!(f, "copy"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// Why a job failed.
#[derive(Debug)]
pub struct JobFailure {
    pub stage: Stage,
    pub error: MirrorError,
}

impl JobFailure {
    /// Tag errors of a stage, for use with `map_err`.
    pub fn at(stage: Stage) -> impl FnOnce(MirrorError) -> JobFailure {
        move |error| JobFailure { stage, error }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// What a successful job did.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub strategy: &'static str,
    pub source: ImageReference,
    pub dest: ImageReference,
    pub units: ReconcileReport,
}

/// Outcome of one job, sent back to the collector.
#[derive(Debug)]
pub struct JobResult {
    pub job: MirrorJob,
    pub outcome: Result<JobReport, JobFailure>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Aggregate counts over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub copied: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub unit_failures: usize,
}

impl MirrorSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match &result.outcome {
                Ok(report) => {
                    summary.jobs_succeeded += 1;
                    for unit in &report.units.outcomes {
                        match unit.status {
                            ArchStatus::Copied => summary.copied += 1,
                            ArchStatus::Unchanged => summary.unchanged += 1,
                            ArchStatus::NotFound => summary.not_found += 1,
                            ArchStatus::Skipped => summary.skipped += 1,
                            ArchStatus::Failed(_) => summary.unit_failures += 1,
                        }
                    }
                    if report.units.list_error.is_some() {
                        summary.unit_failures += 1;
                    }
                }
                Err(_) => summary.jobs_failed += 1,
            }
        }
        summary
    }

    /// Whether every job and every unit went through.
    pub fn is_clean(&self) -> bool {
        self.jobs_failed == 0 && self.unit_failures == 0
    }
}

/// Mirror orchestrator.
pub struct Mirror {
    registry: Arc<dyn Registry>,
    describer: Option<Arc<dyn DescriptionPublisher>>,
    config: Arc<MirrorConfig>,
}

impl Mirror {
    pub fn new(registry: Arc<dyn Registry>, config: MirrorConfig) -> Self {
        Self {
            registry,
            describer: None,
            config: Arc::new(config),
        }
    }

    /// Publish repository descriptions after successful jobs.
    pub fn with_description_publisher(mut self, describer: Arc<dyn DescriptionPublisher>) -> Self {
        self.describer = Some(describer);
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Fully qualified source and destination repositories of a job.
    pub fn resolve(&self, job: &MirrorJob) -> crate::error::Result<(ImageReference, ImageReference)> {
        let registry = &self.config.default_registry;
        let source = ImageReference::from_normalized(&normalize(&job.source, registry, None)?)?;
        let dest = ImageReference::from_normalized(&normalize(
            &job.dest,
            registry,
            self.config.dest_org.as_deref(),
        )?)?;
        Ok((source, dest))
    }

    /// Run one job to completion.
    pub async fn mirror_image(&self, job: &MirrorJob) -> JobResult {
        let outcome = self.run(job).await;
        match &outcome {
            Ok(report) => tracing::info!(
                source = %report.source,
                dest = %report.dest,
                tag = %job.tag,
                strategy = report.strategy,
                copied = report.units.count(|s| *s == ArchStatus::Copied),
                unchanged = report.units.count(|s| *s == ArchStatus::Unchanged),
                failed = report.units.failures(),
                "Job finished"
            ),
            Err(failure) => tracing::error!(
                source = %job.source,
                dest = %job.dest,
                tag = %job.tag,
                line = job.line,
                stage = %failure.stage,
                error = %failure.error,
                "Job failed"
            ),
        }
        JobResult {
            job: job.clone(),
            outcome,
        }
    }

    async fn run(&self, job: &MirrorJob) -> Result<JobReport, JobFailure> {
        let (source, dest) = self.resolve(job).map_err(JobFailure::at(Stage::Normalize))?;
        let registry = self.registry.as_ref();
        let source_tag = source.with_tag(job.tag.clone());

        let raw = registry
            .inspect_manifest(&source_tag)
            .await
            .map_err(JobFailure::at(Stage::InspectSource))?
            .ok_or_else(|| JobFailure {
                stage: Stage::InspectSource,
                error: MirrorError::registry(
                    source.registry.clone(),
                    format!("manifest {} not found", source_tag),
                ),
            })?;

        let envelope = ManifestEnvelope::parse(raw).map_err(JobFailure::at(Stage::Classify))?;
        let strategy = classify(&envelope).map_err(JobFailure::at(Stage::Classify))?;
        tracing::info!(
            source = %source_tag,
            dest = %dest,
            strategy = strategy.name(),
            schema_version = envelope.schema_version,
            media_type = %envelope.media_type,
            "Classified source manifest"
        );

        let units = match &strategy {
            Strategy::List(list) => {
                let report = reconcile_list(
                    registry,
                    &source,
                    &dest,
                    &job.tag,
                    list,
                    &self.config.architectures,
                )
                .await;
                if report.successes() == 0 && report.failures() > 0 {
                    let failed: Vec<String> = report
                        .outcomes
                        .iter()
                        .filter(|o| matches!(o.status, ArchStatus::Failed(_)))
                        .map(|o| o.dest_tag.clone())
                        .collect();
                    return Err(JobFailure {
                        stage: Stage::Copy,
                        error: MirrorError::Other(format!(
                            "every architecture failed: {}",
                            failed.join(", ")
                        )),
                    });
                }
                report
            }
            Strategy::SingleV2 { config } => {
                let raw_config = registry
                    .inspect_config(&source_tag)
                    .await
                    .map_err(JobFailure::at(Stage::InspectSource))?;
                let architecture =
                    config_architecture(&raw_config).map_err(JobFailure::at(Stage::Classify))?;
                tracing::debug!(config = %config.digest, architecture = %architecture, "Read image config");
                mirror_single(
                    registry,
                    &source,
                    &dest,
                    &job.tag,
                    &architecture,
                    &CopyOptions::default(),
                    &self.config,
                )
                .await?
            }
            Strategy::SingleV1 { architecture } => {
                mirror_single(
                    registry,
                    &source,
                    &dest,
                    &job.tag,
                    architecture,
                    &CopyOptions::upconvert(),
                    &self.config,
                )
                .await?
            }
        };

        if units.successes() > 0 {
            self.describe(&source, &dest).await;
        }

        Ok(JobReport {
            strategy: strategy.name(),
            source,
            dest,
            units,
        })
    }

    /// Best-effort description publishing; failures are logged only.
    async fn describe(&self, source: &ImageReference, dest: &ImageReference) {
        if !self.config.description.enabled {
            return;
        }
        let Some(describer) = &self.describer else {
            return;
        };
        if !describer.applies_to(dest) {
            return;
        }
        match describer.publish_description(source, dest).await {
            Ok(()) => tracing::info!(dest = %dest, "Published repository description"),
            Err(e) => tracing::warn!(dest = %dest, error = %e, "Failed to publish repository description"),
        }
    }

    /// Run every job, up to `concurrency` at a time, in input order.
    pub async fn run_all(&self, jobs: Vec<MirrorJob>) -> Vec<JobResult> {
        let concurrency = self.config.concurrency.max(1);
        let mut results: Vec<JobResult> = stream::iter(jobs.iter())
            .map(|job| self.mirror_image(job))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|r| r.job.line);
        results
    }
}
