//! End-to-end job scenarios against an in-memory registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use regmirror_core::manifest::{
    content_digest, ManifestDescriptor, ManifestList, Platform, MEDIA_TYPE_MANIFEST_LIST,
    MEDIA_TYPE_MANIFEST_V2,
};
use regmirror_core::{
    read_jobs, ArchStatus, CopyOptions, DescriptionPublisher, ImageReference, ListEntry, ListMode,
    Mirror, MirrorConfig, MirrorError, MirrorJob, MirrorSummary, Registry, Result, Stage,
};

#[derive(Default)]
struct State {
    manifests: HashMap<String, Vec<u8>>,
    configs: HashMap<String, Vec<u8>>,
    lists: HashMap<String, ManifestList>,
    failing_copies: HashSet<String>,
    failing_inspects: HashSet<String>,
    failing_publishes: HashSet<String>,
    copies: Vec<(String, String, CopyOptions)>,
    publishes: Vec<(String, String, ListMode)>,
}

#[derive(Default, Clone)]
struct FakeRegistry {
    state: Arc<Mutex<State>>,
}

impl FakeRegistry {
    fn put(&self, reference: &str, raw: &[u8]) {
        self.state
            .lock()
            .manifests
            .insert(reference.to_string(), raw.to_vec());
    }

    fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.state.lock().manifests.get(reference).cloned()
    }

    fn put_config(&self, reference: &str, raw: &[u8]) {
        self.state
            .lock()
            .configs
            .insert(reference.to_string(), raw.to_vec());
    }

    fn fail_copy_to(&self, reference: &str) {
        self.state.lock().failing_copies.insert(reference.to_string());
    }

    fn fail_publish_of(&self, entry: &str) {
        self.state
            .lock()
            .failing_publishes
            .insert(entry.to_string());
    }

    fn heal(&self) {
        let mut state = self.state.lock();
        state.failing_copies.clear();
        state.failing_publishes.clear();
    }

    fn fail_inspect_of(&self, reference: &str) {
        self.state
            .lock()
            .failing_inspects
            .insert(reference.to_string());
    }

    fn copies(&self) -> Vec<String> {
        self.state.lock().copies.iter().map(|c| c.1.clone()).collect()
    }

    fn publishes(&self) -> Vec<(String, String, ListMode)> {
        self.state.lock().publishes.clone()
    }

    fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.copies.clear();
        state.publishes.clear();
    }

    /// Entry references of the list at `reference`, sorted.
    fn list_entries(&self, reference: &str) -> Vec<String> {
        let state = self.state.lock();
        let Some(list) = state.lists.get(reference) else {
            return Vec::new();
        };
        let by_digest: HashMap<String, String> = state
            .manifests
            .iter()
            .filter(|(k, _)| k.starts_with(DST) && !k.contains('@'))
            .map(|(k, v)| (content_digest(v), k.clone()))
            .collect();
        let mut entries: Vec<String> = list
            .manifests
            .iter()
            .filter_map(|m| by_digest.get(&m.digest).cloned())
            .collect();
        entries.sort();
        entries
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn inspect_manifest(&self, reference: &ImageReference) -> Result<Option<Vec<u8>>> {
        let key = reference.full_reference();
        let state = self.state.lock();
        if state.failing_inspects.contains(&key) {
            return Err(MirrorError::registry(&reference.registry, "connection reset"));
        }
        Ok(state.manifests.get(&key).cloned())
    }

    async fn inspect_config(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.state
            .lock()
            .configs
            .get(&reference.full_reference())
            .cloned()
            .ok_or_else(|| MirrorError::registry(&reference.registry, "config blob unknown"))
    }

    async fn copy_manifest(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
        _architecture: &str,
        options: &CopyOptions,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let dest_key = dest.full_reference();
        if state.failing_copies.contains(&dest_key) {
            return Err(MirrorError::registry(&dest.registry, "blob upload failed"));
        }
        let mut raw = state
            .manifests
            .get(&source.full_reference())
            .cloned()
            .ok_or_else(|| MirrorError::registry(&source.registry, "manifest unknown"))?;
        if options.upconvert_schema1 {
            raw = format!(
                r#"{{"schemaVersion":2,"mediaType":"{}","upconverted":{}}}"#,
                MEDIA_TYPE_MANIFEST_V2,
                raw.len()
            )
            .into_bytes();
        }
        state.manifests.insert(dest_key.clone(), raw);
        state
            .copies
            .push((source.full_reference(), dest_key, options.clone()));
        Ok(())
    }

    async fn publish_manifest_list(
        &self,
        list: &ImageReference,
        entry: &ListEntry,
        mode: ListMode,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let list_key = list.full_reference();
        if state
            .failing_publishes
            .contains(&entry.reference.full_reference())
        {
            return Err(MirrorError::registry(&list.registry, "manifest upload rejected"));
        }
        let entry_raw = state
            .manifests
            .get(&entry.reference.full_reference())
            .cloned()
            .ok_or_else(|| MirrorError::registry(&list.registry, "entry manifest unknown"))?;
        let descriptor = ManifestDescriptor {
            media_type: MEDIA_TYPE_MANIFEST_V2.to_string(),
            digest: content_digest(&entry_raw),
            size: entry_raw.len() as u64,
            platform: Some(entry.platform.clone()),
        };
        let mut manifest_list = match mode {
            ListMode::Create => ManifestList::new(),
            ListMode::Append => state.lists.get(&list_key).cloned().unwrap_or_default(),
        };
        manifest_list.upsert(descriptor);
        let raw = serde_json::to_vec(&manifest_list).unwrap();
        state.manifests.insert(list_key.clone(), raw);
        state.lists.insert(list_key.clone(), manifest_list);
        state
            .publishes
            .push((list_key, entry.reference.full_reference(), mode));
        Ok(())
    }
}

const SRC: &str = "docker.io/src/app";
const DST: &str = "docker.io/dst/app";

fn child_manifest(name: &str) -> Vec<u8> {
    format!(
        r#"{{"schemaVersion":2,"mediaType":"{}","config":{{"mediaType":"application/vnd.docker.container.image.v1+json","digest":"sha256:cfg-{}","size":10}},"layers":[]}}"#,
        MEDIA_TYPE_MANIFEST_V2, name
    )
    .into_bytes()
}

/// Publish a source manifest list at `SRC:tag` with the given platforms.
fn seed_list(registry: &FakeRegistry, tag: &str, platforms: &[(&str, Option<&str>)]) {
    let mut list = ManifestList {
        media_type: Some(MEDIA_TYPE_MANIFEST_LIST.to_string()),
        ..ManifestList::new()
    };
    for (arch, variant) in platforms {
        let raw = child_manifest(&format!("{}{}", arch, variant.unwrap_or("")));
        let digest = content_digest(&raw);
        registry.put(&format!("{}@{}", SRC, digest), &raw);
        list.manifests.push(ManifestDescriptor {
            media_type: MEDIA_TYPE_MANIFEST_V2.to_string(),
            digest,
            size: raw.len() as u64,
            platform: Some(Platform::linux(*arch, variant.map(String::from))),
        });
    }
    registry.put(&format!("{}:{}", SRC, tag), &serde_json::to_vec(&list).unwrap());
}

fn job(tag: &str) -> MirrorJob {
    MirrorJob {
        source: "src/app".to_string(),
        dest: "dst/app".to_string(),
        tag: tag.to_string(),
        line: 1,
    }
}

fn mirror(registry: &FakeRegistry) -> Mirror {
    Mirror::new(Arc::new(registry.clone()), MirrorConfig::default())
}

#[tokio::test]
async fn test_multi_arch_variants_scenario() {
    let registry = FakeRegistry::default();
    seed_list(
        &registry,
        "1.0",
        &[("amd64", None), ("arm", Some("v6")), ("arm", Some("v7"))],
    );

    let result = mirror(&registry).mirror_image(&job("1.0")).await;
    let report = result.outcome.unwrap();
    assert_eq!(report.strategy, "manifest-list");

    let mut copied = registry.copies();
    copied.sort();
    assert_eq!(
        copied,
        vec![
            format!("{}:1.0-amd64", DST),
            format!("{}:1.0-arm", DST),
            format!("{}:1.0-arm-v6", DST),
        ]
    );

    // tag-arm carries the v7 manifest
    assert_eq!(
        registry.get(&format!("{}:1.0-arm", DST)),
        Some(child_manifest("armv7"))
    );

    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST), format!("{}:1.0-arm", DST)]
    );

    let publishes = registry.publishes();
    assert_eq!(publishes.len(), 2);
    assert_eq!(publishes[0].2, ListMode::Create);
    assert_eq!(publishes[1].2, ListMode::Append);

    // arm64 and s390x are configured but absent
    assert_eq!(report.units.count(|s| *s == ArchStatus::NotFound), 2);
}

#[tokio::test]
async fn test_copies_by_digest_reference() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);

    mirror(&registry).mirror_image(&job("1.0")).await;

    let state = registry.state.lock();
    assert_eq!(state.copies.len(), 1);
    assert!(state.copies[0].0.starts_with(&format!("{}@sha256:", SRC)));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let registry = FakeRegistry::default();
    seed_list(
        &registry,
        "1.0",
        &[("amd64", None), ("arm", Some("v7")), ("arm64", Some("v8"))],
    );
    let mirror = mirror(&registry);

    mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    registry.reset_calls();

    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert!(registry.copies().is_empty());
    assert!(registry.publishes().is_empty());
    assert_eq!(report.units.count(|s| *s == ArchStatus::Unchanged), 3);
    assert_eq!(report.units.list_writes, 0);
}

#[tokio::test]
async fn test_unconfigured_architecture_ignored() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None), ("ppc64le", None)]);

    let report = mirror(&registry)
        .mirror_image(&job("1.0"))
        .await
        .outcome
        .unwrap();

    assert_eq!(registry.copies(), vec![format!("{}:1.0-amd64", DST)]);
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST)]
    );
    assert!(report
        .units
        .outcomes
        .iter()
        .all(|o| o.architecture != "ppc64le"));
    assert_eq!(report.units.failures(), 0);
}

#[tokio::test]
async fn test_partial_list_survives_failure() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None), ("arm64", None)]);
    registry.fail_copy_to(&format!("{}:1.0-arm64", DST));
    let mirror = mirror(&registry);

    let first = mirror.mirror_image(&job("1.0")).await;
    let report = first.outcome.unwrap();
    assert_eq!(report.units.failures(), 1);
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST)]
    );

    registry.heal();
    registry.reset_calls();

    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert_eq!(registry.copies(), vec![format!("{}:1.0-arm64", DST)]);
    assert_eq!(report.units.failures(), 0);
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST), format!("{}:1.0-arm64", DST)]
    );
}

#[tokio::test]
async fn test_entry_left_out_by_failed_publish_is_re_added() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None), ("arm64", None)]);
    registry.fail_publish_of(&format!("{}:1.0-arm64", DST));
    let mirror = mirror(&registry);

    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert_eq!(report.units.failures(), 1);
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST)]
    );

    registry.heal();
    registry.reset_calls();

    // both children are unchanged now, only the list entry is missing
    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert!(registry.copies().is_empty());
    assert_eq!(report.units.count(|s| *s == ArchStatus::Unchanged), 2);
    assert_eq!(report.units.list_error, None);
    assert_eq!(
        registry.publishes(),
        vec![(
            format!("{}:1.0", DST),
            format!("{}:1.0-arm64", DST),
            ListMode::Append
        )]
    );
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST), format!("{}:1.0-arm64", DST)]
    );

    // and the run after that writes nothing
    registry.reset_calls();
    mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert!(registry.publishes().is_empty());
}

#[tokio::test]
async fn test_failed_entry_re_add_reported_as_list_error() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None), ("arm64", None)]);
    registry.fail_publish_of(&format!("{}:1.0-arm64", DST));
    let mirror = mirror(&registry);
    mirror.mirror_image(&job("1.0")).await.outcome.unwrap();

    // publish still rejected on the next run
    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert!(report.units.list_error.is_some());
    let summary = MirrorSummary::from_results(&[regmirror_core::JobResult {
        job: job("1.0"),
        outcome: Ok(report),
    }]);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_every_architecture_failing_fails_job() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);
    registry.fail_copy_to(&format!("{}:1.0-amd64", DST));

    let result = mirror(&registry).mirror_image(&job("1.0")).await;
    let failure = result.outcome.unwrap_err();
    assert_eq!(failure.stage, Stage::Copy);
    assert!(registry.publishes().is_empty());
}

#[tokio::test]
async fn test_schema1_upconverted_single_entry_list() {
    let registry = FakeRegistry::default();
    registry.put(
        &format!("{}:old", SRC),
        br#"{"schemaVersion":1,"name":"src/app","tag":"old","architecture":"amd64","fsLayers":[],"history":[]}"#,
    );

    let report = mirror(&registry)
        .mirror_image(&job("old"))
        .await
        .outcome
        .unwrap();
    assert_eq!(report.strategy, "single-arch-v1");

    let state = registry.state.lock().copies.clone();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].0, format!("{}:old", SRC));
    assert_eq!(state[0].1, format!("{}:old-amd64", DST));
    assert!(state[0].2.upconvert_schema1);

    let publishes = registry.publishes();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].2, ListMode::Create);
    assert_eq!(
        registry.list_entries(&format!("{}:old", DST)),
        vec![format!("{}:old-amd64", DST)]
    );
}

#[tokio::test]
async fn test_schema2_single_arch_from_config() {
    let registry = FakeRegistry::default();
    registry.put(&format!("{}:2.0", SRC), &child_manifest("s390x"));
    registry.put_config(&format!("{}:2.0", SRC), br#"{"architecture":"s390x","os":"linux"}"#);

    let report = mirror(&registry)
        .mirror_image(&job("2.0"))
        .await
        .outcome
        .unwrap();
    assert_eq!(report.strategy, "single-arch-v2");
    assert_eq!(registry.copies(), vec![format!("{}:2.0-s390x", DST)]);
    assert_eq!(
        registry.list_entries(&format!("{}:2.0", DST)),
        vec![format!("{}:2.0-s390x", DST)]
    );

    // unchanged on the second run, list still present: no writes
    registry.reset_calls();
    mirror(&registry).mirror_image(&job("2.0")).await.outcome.unwrap();
    assert!(registry.copies().is_empty());
    assert!(registry.publishes().is_empty());
}

#[tokio::test]
async fn test_schema2_single_arch_not_configured_is_skipped() {
    let registry = FakeRegistry::default();
    registry.put(&format!("{}:2.0", SRC), &child_manifest("riscv64"));
    registry.put_config(&format!("{}:2.0", SRC), br#"{"architecture":"riscv64"}"#);

    let report = mirror(&registry)
        .mirror_image(&job("2.0"))
        .await
        .outcome
        .unwrap();
    assert_eq!(report.units.outcomes[0].status, ArchStatus::Skipped);
    assert!(registry.copies().is_empty());
    assert!(registry.publishes().is_empty());
}

#[tokio::test]
async fn test_unsupported_schema_fails_without_writes() {
    let registry = FakeRegistry::default();
    registry.put(
        &format!("{}:weird", SRC),
        br#"{"schemaVersion":2,"mediaType":"application/vnd.example.artifact+json"}"#,
    );

    let failure = mirror(&registry)
        .mirror_image(&job("weird"))
        .await
        .outcome
        .unwrap_err();
    assert_eq!(failure.stage, Stage::Classify);
    assert!(matches!(failure.error, MirrorError::UnsupportedSchema { .. }));
    assert!(registry.copies().is_empty());
    assert!(registry.publishes().is_empty());
}

#[tokio::test]
async fn test_missing_source_fails_inspect_stage() {
    let registry = FakeRegistry::default();
    let failure = mirror(&registry)
        .mirror_image(&job("nope"))
        .await
        .outcome
        .unwrap_err();
    assert_eq!(failure.stage, Stage::InspectSource);
}

#[tokio::test]
async fn test_destination_inspect_error_treated_as_missing() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);
    registry.fail_inspect_of(&format!("{}:1.0-amd64", DST));

    let report = mirror(&registry)
        .mirror_image(&job("1.0"))
        .await
        .outcome
        .unwrap();
    assert_eq!(registry.copies(), vec![format!("{}:1.0-amd64", DST)]);
    assert_eq!(report.units.failures(), 0);
}

#[tokio::test]
async fn test_missing_list_rebuilt_from_unchanged_tags() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None), ("arm64", None)]);
    let mirror = mirror(&registry);
    mirror.mirror_image(&job("1.0")).await.outcome.unwrap();

    {
        let mut state = registry.state.lock();
        let key = format!("{}:1.0", DST);
        state.manifests.remove(&key);
        state.lists.remove(&key);
    }
    registry.reset_calls();

    mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert!(registry.copies().is_empty());
    let modes: Vec<ListMode> = registry.publishes().iter().map(|p| p.2).collect();
    assert_eq!(modes, vec![ListMode::Create, ListMode::Append]);
    assert_eq!(
        registry.list_entries(&format!("{}:1.0", DST)),
        vec![format!("{}:1.0-amd64", DST), format!("{}:1.0-arm64", DST)]
    );
}

#[tokio::test]
async fn test_dest_org_override() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);
    let config = MirrorConfig {
        dest_org: Some("mirrors".to_string()),
        ..Default::default()
    };
    let mirror = Mirror::new(Arc::new(registry.clone()), config);

    let report = mirror.mirror_image(&job("1.0")).await.outcome.unwrap();
    assert_eq!(report.dest.full_reference(), "docker.io/mirrors/app");
    assert_eq!(
        registry.copies(),
        vec!["docker.io/mirrors/app:1.0-amd64".to_string()]
    );
}

#[tokio::test]
async fn test_malformed_spec_fails_normalize_stage() {
    let registry = FakeRegistry::default();
    let bad = MirrorJob {
        source: "src//app".to_string(),
        ..job("1.0")
    };
    let failure = mirror(&registry).mirror_image(&bad).await.outcome.unwrap_err();
    assert_eq!(failure.stage, Stage::Normalize);
    assert!(matches!(failure.error, MirrorError::ConfigError(_)));
}

#[tokio::test]
async fn test_run_all_continues_after_failure() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);
    let input = "\
# amd64/foo bar/baz v1
onlyonetoken
src/app dst/app missing
src/app dst/app 1.0
";
    let jobs = read_jobs(input.as_bytes()).unwrap();
    assert_eq!(jobs.len(), 2);

    let config = MirrorConfig {
        concurrency: 4,
        ..Default::default()
    };
    let results = Mirror::new(Arc::new(registry.clone()), config)
        .run_all(jobs)
        .await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].is_success());
    assert!(results[1].is_success());

    let summary = MirrorSummary::from_results(&results);
    assert_eq!(summary.jobs_failed, 1);
    assert_eq!(summary.jobs_succeeded, 1);
    assert_eq!(summary.copied, 1);
    assert!(!summary.is_clean());
}

#[derive(Default)]
struct RecordingDescriber {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DescriptionPublisher for RecordingDescriber {
    fn applies_to(&self, dest: &ImageReference) -> bool {
        dest.registry == "docker.io"
    }

    async fn publish_description(
        &self,
        source: &ImageReference,
        dest: &ImageReference,
    ) -> Result<()> {
        self.calls
            .lock()
            .push((source.to_string(), dest.to_string()));
        Err(MirrorError::Other("hub unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_description_published_after_success_only() {
    let registry = FakeRegistry::default();
    seed_list(&registry, "1.0", &[("amd64", None)]);
    let describer = Arc::new(RecordingDescriber::default());
    let mirror = mirror(&registry).with_description_publisher(describer.clone());

    // description failure does not fail the job
    assert!(mirror.mirror_image(&job("1.0")).await.is_success());
    assert!(!mirror.mirror_image(&job("missing")).await.is_success());

    let calls = describer.calls.lock().clone();
    assert_eq!(calls, vec![(SRC.to_string(), DST.to_string())]);
}

#[tokio::test]
async fn test_no_description_when_nothing_mirrored() {
    let registry = FakeRegistry::default();
    registry.put(&format!("{}:2.0", SRC), &child_manifest("riscv64"));
    registry.put_config(&format!("{}:2.0", SRC), br#"{"architecture":"riscv64"}"#);
    let describer = Arc::new(RecordingDescriber::default());
    let mirror = mirror(&registry).with_description_publisher(describer.clone());

    let report = mirror.mirror_image(&job("2.0")).await.outcome.unwrap();
    assert_eq!(report.units.outcomes[0].status, ArchStatus::Skipped);
    assert!(describer.calls.lock().is_empty());
}
