//! regmirror core - manifest reconciliation engine.
//!
//! Decides what to copy when mirroring a multi-architecture image between
//! registries, and in which order to rebuild the destination manifest list.
//! Registry access goes through the traits in [`registry`].

pub mod compare;
pub mod config;
pub mod error;
pub mod job;
pub mod manifest;
pub mod mirror;
pub mod reconcile;
pub mod reference;
pub mod registry;
pub mod single;
pub mod variant;

// Re-export commonly used types
pub use compare::{copy_if_changed, CopyOutcome, Fingerprint};
pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use job::{read_jobs, MirrorJob};
pub use manifest::{classify, ManifestEnvelope, ManifestList, Platform, Strategy};
pub use mirror::{JobFailure, JobReport, JobResult, Mirror, MirrorSummary, Stage};
pub use reconcile::{ArchOutcome, ArchStatus, ReconcileReport};
pub use reference::{normalize, ImageReference};
pub use registry::{CopyOptions, DescriptionPublisher, DryRun, ListEntry, ListMode, Registry};

/// regmirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
