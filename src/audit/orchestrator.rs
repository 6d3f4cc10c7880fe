//! The audit entry point.
//!
//! `Auditor::run` drives one run through `Idle -> Scanning -> Executing ->
//! Aggregating -> Done`. Only a scan-root failure or a unit resolution
//! failure ends in `Failed`; unit errors, panics, unavailable facts and
//! report failures are absorbed into the payload.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::payload::{AuditOutcome, AuditPayload, RunMetadata, SampleIndexEntry, UnitInfo};
use super::report::{JsonReportBuilder, ReportBuilder};
use super::AuditError;
use crate::cache::MetadataCache;
use crate::config::{AuditConfig, APP_VERSION, CACHE_FILE_NAME};
use crate::engine::{Aggregator, CancelToken, LedgerEntry, Scheduler, SchedulerConfig};
use crate::models::{AuditState, ExitStatus};
use crate::scan::{DatasetScanner, SplitManifest};
use crate::units::{
    BuiltinSource, DiscoveryReport, ManifestSource, RegistryError, Unit, UnitRegistry, UnitSource,
};

/// Ledger `unit` for findings raised while scanning.
pub const SCAN_LEDGER_UNIT: &str = "scan";

pub struct Auditor {
    config: AuditConfig,
    registry: UnitRegistry,
    discovery: DiscoveryReport,
    report_builder: Box<dyn ReportBuilder>,
    cancel: CancelToken,
    state: AuditState,
    history: Vec<AuditState>,
}

impl Auditor {
    /// Auditor with the built-in units plus any manifests found in the
    /// configured extension directory.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        config.validate()?;

        let manifests = config
            .extension_dir
            .as_ref()
            .map(|dir| ManifestSource::new(dir.clone()));
        let builtins = BuiltinSource::new(config.units);
        let mut sources: Vec<&dyn UnitSource> = vec![&builtins];
        if let Some(source) = &manifests {
            sources.push(source);
        }

        let mut registry = UnitRegistry::new();
        let discovery = registry.discover(&sources);
        Ok(Self::assemble(config, registry, discovery))
    }

    /// Auditor over a caller-built registry. No discovery is performed.
    pub fn with_registry(config: AuditConfig, registry: UnitRegistry) -> Result<Self, AuditError> {
        config.validate()?;
        Ok(Self::assemble(config, registry, DiscoveryReport::default()))
    }

    fn assemble(config: AuditConfig, registry: UnitRegistry, discovery: DiscoveryReport) -> Self {
        Self {
            config,
            registry,
            discovery,
            report_builder: Box::new(JsonReportBuilder),
            cancel: CancelToken::new(),
            state: AuditState::Idle,
            history: vec![AuditState::Idle],
        }
    }

    /// Register an extra unit. A rejected duplicate also makes the next run
    /// fail at resolution.
    pub fn register(&mut self, unit: Arc<dyn Unit>) -> Result<(), RegistryError> {
        self.registry.register(unit)
    }

    pub fn with_report_builder(mut self, builder: Box<dyn ReportBuilder>) -> Self {
        self.report_builder = builder;
        self
    }

    /// Handle that cancels the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn discovery(&self) -> &DiscoveryReport {
        &self.discovery
    }

    pub fn state(&self) -> AuditState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[AuditState] {
        &self.history
    }

    fn transition(&mut self, next: AuditState) {
        tracing::info!(root = %self.config.root.display(), "Audit {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run the audit once.
    ///
    /// Returns `Err` only for fatal failures, after moving to `Failed`.
    pub fn run(&mut self) -> Result<AuditOutcome, AuditError> {
        if self.state != AuditState::Idle {
            return Err(AuditError::NotIdle(self.state));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        match self.audit(run_id, started_at) {
            Ok(outcome) => {
                self.transition(AuditState::Done);
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Audit failed");
                self.transition(AuditState::Failed);
                Err(e)
            }
        }
    }

    fn audit(&mut self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<AuditOutcome, AuditError> {
        // ── Scanning ─────────────────────────────
        self.transition(AuditState::Scanning);
        let root = self.config.root.clone();
        let cache_dir = self.config.effective_cache_dir();
        let cache_file = self
            .config
            .persist_cache
            .then(|| cache_dir.join(CACHE_FILE_NAME));

        let cache = match &cache_file {
            Some(path) => MetadataCache::load(path).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Persisted facts unreadable, starting empty");
                MetadataCache::new()
            }),
            None => MetadataCache::new(),
        };

        let mut scanner = DatasetScanner::for_root(&root);
        if let Some(path) = &self.config.split_manifest {
            scanner = scanner.with_manifest(SplitManifest::from_file(path)?);
        }
        if cache_file.is_some() {
            scanner = scanner.skip_dir(cache_dir);
        }
        let scan = scanner.scan(&root, &cache)?;

        let units = self
            .registry
            .resolve(self.config.enabled.as_deref(), &self.config.disabled)?;
        tracing::info!(
            run_id = %run_id,
            samples = scan.samples.len(),
            units = units.len(),
            "Units resolved"
        );

        // ── Executing ────────────────────────────
        self.transition(AuditState::Executing);
        let mut aggregator = Aggregator::new(self.config.sample_list_cap);
        for unit in &units {
            aggregator.declare(unit.name(), unit.descriptor().result_kind);
        }
        for finding in scan.findings {
            aggregator.record(LedgerEntry {
                unit: SCAN_LEDGER_UNIT.to_string(),
                sample_id: finding.sample_id,
                message: finding.message,
            });
        }

        let cancel = match self.config.deadline() {
            Some(after) => self.cancel.limited_to(after),
            None => self.cancel.clone(),
        };
        let scheduler = Scheduler::new(SchedulerConfig {
            workers: self.config.effective_workers(),
            sample_limit: self.config.sample_limit,
            sampling: self.config.sampling,
            grace_period: self.config.grace_period(),
        });
        let samples = Arc::new(scan.samples);
        let cache = Arc::new(cache);
        let execution = scheduler.execute(
            &units,
            Arc::clone(&samples),
            Arc::clone(&cache),
            &cancel,
            &mut aggregator,
        );

        // ── Aggregating ──────────────────────────
        self.transition(AuditState::Aggregating);
        let aggregate = aggregator.finalize(&self.config.thresholds, samples.len());
        let index = SampleIndexEntry::index(&samples, &aggregate.ledger);

        if let Some(path) = &cache_file {
            match cache.save(path) {
                Ok(saved) => tracing::debug!(path = %path.display(), fingerprints = saved, "Facts persisted"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to persist facts"),
            }
        }

        let metadata = RunMetadata {
            run_id,
            started_at,
            finished_at: Utc::now(),
            app_version: APP_VERSION.to_string(),
            root,
            units: units.iter().map(|u| UnitInfo::from(u.descriptor())).collect(),
            discovery: self.discovery.clone(),
            cache: cache.stats(),
            execution,
        };
        let payload = AuditPayload::new(index, aggregate, metadata);

        let (report_path, report_error) = match &self.config.report_path {
            None => (None, None),
            Some(target) => match self.report_builder.build(&payload, target) {
                Ok(path) => (Some(path), None),
                Err(e) => {
                    tracing::warn!(
                        builder = self.report_builder.name(),
                        target = %target.display(),
                        error = %e,
                        "Report failed"
                    );
                    (None, Some(e.to_string()))
                }
            },
        };

        let status = if payload.is_partial() || report_error.is_some() {
            ExitStatus::PartialSuccess
        } else {
            ExitStatus::Success
        };
        tracing::info!(
            run_id = %run_id,
            status = %status,
            level = %payload.summary().level,
            health_score = payload.summary().health_score,
            ledger = payload.ledger().len(),
            "Audit complete"
        );

        Ok(AuditOutcome {
            status,
            state: AuditState::Done,
            payload,
            report_path,
            report_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::audit::ReportError;
    use crate::engine::{Distribution, ResultValue};
    use crate::models::{ResultKind, UnitKind};
    use crate::scan::ScanError;
    use crate::units::checks::MISSING_ANNOTATION;
    use crate::units::features::{CLASS_COUNTS, DUPLICATE_IMAGES};
    use crate::units::{UnitContext, UnitDescriptor, UnitError, UnitInput};

    fn write_png(path: &Path, shade: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::from_fn(20, 20, |x, _| image::Rgb([shade, (x * 12) as u8, 90]))
            .save(path)
            .unwrap();
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// a.png: no annotation, b.png: malformed annotation, c.png: two cats.
    fn three_image_dataset(root: &Path) {
        write_png(&root.join("a.png"), 10);
        write_png(&root.join("b.png"), 20);
        write_png(&root.join("c.png"), 30);
        write(&root.join("b.json"), "{ not json");
        write(
            &root.join("c.json"),
            r#"{"objects": [
                {"label": "cat", "bbox": [0, 0, 5, 5]},
                {"label": "cat", "bbox": [5, 5, 15, 15]}
            ]}"#,
        );
    }

    fn config(root: &Path) -> AuditConfig {
        let mut config = AuditConfig::for_root(root);
        config.workers = 2;
        config
    }

    /// Per-sample unit reporting which samples it ran on.
    struct Touched(UnitDescriptor);

    impl Touched {
        fn heavy(name: &str) -> Arc<dyn Unit> {
            Arc::new(Self(
                UnitDescriptor::new(name, UnitKind::Feature, ResultKind::Histogram).heavy(),
            ))
        }
    }

    impl Unit for Touched {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.0
        }

        fn run(&self, input: UnitInput<'_>, _: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
            Ok(ResultValue::single_bucket(input.sample()?.id.clone(), 1))
        }
    }

    struct Broken {
        descriptor: UnitDescriptor,
        panics: bool,
    }

    impl Broken {
        fn unit(name: &str, panics: bool) -> Arc<dyn Unit> {
            Arc::new(Self {
                descriptor: UnitDescriptor::new(name, UnitKind::Check, ResultKind::Scalar),
                panics,
            })
        }
    }

    impl Unit for Broken {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.descriptor
        }

        fn run(&self, _: UnitInput<'_>, _: &UnitContext<'_>) -> Result<ResultValue, UnitError> {
            if self.panics {
                panic!("unit blew up");
            }
            Err(UnitError::Failed("always fails".into()))
        }
    }

    fn bucket_keys(dist: &Distribution) -> Vec<String> {
        match dist {
            Distribution::Histogram { buckets } => buckets.keys().cloned().collect(),
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn three_image_scenario() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut auditor = Auditor::new(config(dir.path())).unwrap();
        let outcome = auditor.run().unwrap();
        let payload = &outcome.payload;

        assert_eq!(outcome.status, ExitStatus::Success);
        assert_eq!(outcome.state, AuditState::Done);
        assert!(!payload.is_partial());

        let index = payload.samples();
        assert_eq!(index.len(), 3);
        assert_eq!(index.iter().filter(|e| e.annotation_missing).count(), 1);
        assert_eq!(index.iter().filter(|e| e.annotation_unreadable).count(), 1);
        assert!(index[0].annotation_missing);
        assert!(index[1].annotation_unreadable);
        assert_eq!(index[2].objects, 2);

        assert_eq!(payload.distribution(MISSING_ANNOTATION).unwrap().listed_count(), 1);
        assert_eq!(
            payload.distribution(CLASS_COUNTS),
            Some(&Distribution::Histogram {
                buckets: [("cat".to_string(), 2)].into_iter().collect()
            })
        );

        assert_eq!(payload.ledger().len(), 1);
        assert_eq!(payload.ledger()[0].unit, SCAN_LEDGER_UNIT);
        assert_eq!(payload.ledger()[0].sample_id.as_deref(), Some("b.png"));
        assert_eq!(index[1].errors, 1);
    }

    #[test]
    fn coco_dataset_is_fully_annotated() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("images/a.png"), 10);
        write_png(&dir.path().join("images/b.png"), 20);
        write(
            &dir.path().join("annotations.json"),
            r#"{
                "images": [{"id": 1, "file_name": "a.png"}, {"id": 2, "file_name": "b.png"}],
                "annotations": [
                    {"id": 1, "image_id": 1, "category_id": 1, "bbox": [1, 1, 5, 5]},
                    {"id": 2, "image_id": 2, "category_id": 1, "bbox": [2, 2, 8, 8]}
                ],
                "categories": [{"id": 1, "name": "cat"}]
            }"#,
        );

        let outcome = Auditor::new(config(dir.path())).unwrap().run().unwrap();
        let payload = &outcome.payload;
        assert_eq!(payload.distribution(MISSING_ANNOTATION).unwrap().listed_count(), 0);
        assert_eq!(
            payload.distribution(CLASS_COUNTS),
            Some(&Distribution::Histogram {
                buckets: [("cat".to_string(), 2)].into_iter().collect()
            })
        );
        assert!(payload.ledger().is_empty());
    }

    #[test]
    fn walks_every_state_in_order() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut auditor = Auditor::new(config(dir.path())).unwrap();
        auditor.run().unwrap();
        assert_eq!(
            auditor.history(),
            &[
                AuditState::Idle,
                AuditState::Scanning,
                AuditState::Executing,
                AuditState::Aggregating,
                AuditState::Done,
            ]
        );
        assert!(matches!(auditor.run(), Err(AuditError::NotIdle(AuditState::Done))));
    }

    #[test]
    fn heavy_units_respect_sample_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10u8 {
            write_png(&dir.path().join(format!("img_{i:02}.png")), i * 20);
        }

        let mut config = config(dir.path());
        config.sample_limit = Some(2);
        config.enabled = Some(vec![DUPLICATE_IMAGES.to_string(), "touched".to_string()]);

        let mut auditor = Auditor::new(config).unwrap();
        auditor.register(Touched::heavy("touched")).unwrap();
        let outcome = auditor.run().unwrap();
        let payload = &outcome.payload;

        assert_eq!(
            bucket_keys(payload.distribution("touched").unwrap()),
            vec!["img_00.png", "img_01.png"]
        );
        // Only the two sampled images are compared; they differ in hue only.
        let Some(Distribution::Matrix { cells }) = payload.distribution(DUPLICATE_IMAGES) else {
            panic!("duplicate_images should produce a matrix");
        };
        assert_eq!(cells.keys().collect::<Vec<_>>(), vec!["img_00.png"]);
        assert_eq!(cells["img_00.png"].keys().collect::<Vec<_>>(), vec!["img_01.png"]);
        // Two per-sample runs of `touched` plus one dataset run.
        assert_eq!(payload.metadata().execution.planned, 3);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        for i in 0..6u8 {
            write_png(&dir.path().join(format!("train/t{i}.png")), i * 30);
            write(
                &dir.path().join(format!("train/t{i}.json")),
                r#"[{"label": "dog", "bbox": [1, 1, 4, 30]}, {"label": "cat", "bbox": [2, 2, 2, 9]}]"#,
            );
        }

        let run = || {
            let mut config = config(dir.path());
            config.workers = 4;
            Auditor::new(config).unwrap().run().unwrap().payload
        };
        let first = run();
        let second = run();

        assert_eq!(first.samples(), second.samples());
        assert_eq!(first.distributions(), second.distributions());
        assert_eq!(first.ledger(), second.ledger());
        assert_eq!(first.summary(), second.summary());
        assert_ne!(first.metadata().run_id, second.metadata().run_id);
    }

    #[test]
    fn failing_units_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut auditor = Auditor::new(config(dir.path())).unwrap();
        auditor.register(Broken::unit("always_fails", false)).unwrap();
        auditor.register(Broken::unit("always_panics", true)).unwrap();
        let outcome = auditor.run().unwrap();
        let payload = &outcome.payload;

        assert_eq!(auditor.state(), AuditState::Done);
        assert_eq!(outcome.status, ExitStatus::Success);
        let per_unit = |unit: &str| payload.ledger().iter().filter(|e| e.unit == unit).count();
        assert_eq!(per_unit("always_fails"), 3);
        assert_eq!(per_unit("always_panics"), 3);
        assert!(payload
            .ledger()
            .iter()
            .any(|e| e.unit == "always_panics" && e.message.contains("unit blew up")));
        assert_eq!(payload.metadata().execution.panicked, 3);

        assert!(matches!(
            payload.distribution(CLASS_COUNTS),
            Some(Distribution::Histogram { buckets }) if buckets.get("cat") == Some(&2)
        ));
    }

    #[test]
    fn duplicate_registration_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut auditor = Auditor::new(config(dir.path())).unwrap();
        assert!(auditor.register(Touched::heavy(CLASS_COUNTS)).is_err());

        let err = auditor.run().unwrap_err();
        assert!(matches!(
            err,
            AuditError::Registry(RegistryError::DuplicateUnit(ref name)) if name == CLASS_COUNTS
        ));
        assert_eq!(auditor.state(), AuditState::Failed);
    }

    #[test]
    fn unknown_enabled_unit_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut config = config(dir.path());
        config.enabled = Some(vec!["no_such_unit".into()]);
        let mut auditor = Auditor::new(config).unwrap();

        assert!(matches!(
            auditor.run(),
            Err(AuditError::Registry(RegistryError::UnknownUnit(_)))
        ));
        assert_eq!(
            auditor.history(),
            &[AuditState::Idle, AuditState::Scanning, AuditState::Failed]
        );
    }

    #[test]
    fn missing_root_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut auditor = Auditor::new(config(&dir.path().join("absent"))).unwrap();
        assert!(matches!(
            auditor.run(),
            Err(AuditError::Scan(ScanError::RootMissing(_)))
        ));
        assert_eq!(auditor.state(), AuditState::Failed);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = AuditConfig::for_root(".");
        config.sample_limit = Some(0);
        assert!(matches!(Auditor::new(config), Err(AuditError::Config(_))));
    }

    #[test]
    fn report_is_written_next_to_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("reports/audit.json");

        let mut config = config(dir.path());
        config.report_path = Some(target.clone());
        let outcome = Auditor::new(config).unwrap().run().unwrap();

        assert_eq!(outcome.status, ExitStatus::Success);
        assert_eq!(outcome.report_path.as_deref(), Some(target.as_path()));
        let written: AuditPayload =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(written.samples(), outcome.payload.samples());
        assert_eq!(written.ledger(), outcome.payload.ledger());
    }

    #[test]
    fn report_failure_degrades_to_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        let out = tempfile::tempdir().unwrap();

        let mut config = config(dir.path());
        config.report_path = Some(out.path().to_path_buf());
        let mut auditor = Auditor::new(config).unwrap();
        let outcome = auditor.run().unwrap();

        assert_eq!(outcome.status, ExitStatus::PartialSuccess);
        assert_eq!(auditor.state(), AuditState::Done);
        assert!(outcome.report_path.is_none());
        assert!(outcome.report_error.unwrap().contains("directory"));
        assert_eq!(outcome.payload.samples().len(), 3);
    }

    #[test]
    fn cancellation_keeps_folded_results_and_marks_partial() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut auditor = Auditor::new(config(dir.path())).unwrap();
        auditor.cancel_token().cancel();
        let outcome = auditor.run().unwrap();

        assert_eq!(outcome.status, ExitStatus::PartialSuccess);
        assert!(outcome.payload.is_partial());
        assert!(outcome.payload.metadata().execution.cancelled);
        assert_eq!(outcome.payload.samples().len(), 3);
        // Scan findings do not depend on execution.
        assert_eq!(outcome.payload.ledger().len(), 1);
    }

    #[test]
    fn expired_deadline_marks_partial() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());

        let mut config = config(dir.path());
        config.deadline_ms = Some(0);
        config.grace_period_ms = 0;
        let outcome = Auditor::new(config).unwrap().run().unwrap();
        assert_eq!(outcome.status, ExitStatus::PartialSuccess);
    }

    #[test]
    fn persisted_facts_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        let cache_dir = tempfile::tempdir().unwrap();

        let run = || {
            let mut config = config(dir.path());
            config.persist_cache = true;
            config.cache_dir = Some(cache_dir.path().to_path_buf());
            Auditor::new(config).unwrap().run().unwrap().payload
        };

        let first = run();
        assert!(first.metadata().cache.computations > 0);
        assert_eq!(first.metadata().cache.restored, 0);
        assert!(cache_dir.path().join(CACHE_FILE_NAME).exists());

        let second = run();
        assert_eq!(second.metadata().cache.computations, 0);
        assert_eq!(second.metadata().cache.restored, first.metadata().cache.computations);
        assert_eq!(first.distributions(), second.distributions());
    }

    #[test]
    fn extension_manifests_join_the_run() {
        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        let ext = tempfile::tempdir().unwrap();
        write(
            &ext.path().join("dogs_only.json"),
            r#"{"name": "dogs_only", "version": "1", "template": "label_allowlist", "labels": ["dog"]}"#,
        );
        write(&ext.path().join("broken.json"), "{");

        let mut config = config(dir.path());
        config.extension_dir = Some(ext.path().to_path_buf());
        let mut auditor = Auditor::new(config).unwrap();
        assert_eq!(auditor.discovery().warnings.len(), 1);

        let outcome = auditor.run().unwrap();
        let payload = &outcome.payload;
        assert_eq!(payload.distribution("dogs_only").unwrap().listed_count(), 1);
        assert_eq!(payload.metadata().discovery.warnings.len(), 1);
        assert!(payload.metadata().units.iter().any(|u| u.name == "dogs_only"));
    }

    #[test]
    fn custom_report_builder_is_used() {
        struct Refuses;

        impl ReportBuilder for Refuses {
            fn name(&self) -> &str {
                "refuses"
            }

            fn build(
                &self,
                _: &AuditPayload,
                _: &Path,
            ) -> Result<std::path::PathBuf, ReportError> {
                Err(ReportError::Rejected("not today".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        three_image_dataset(dir.path());
        let mut config = config(dir.path());
        config.report_path = Some(dir.path().join("r.json"));

        let outcome = Auditor::new(config)
            .unwrap()
            .with_report_builder(Box::new(Refuses))
            .run()
            .unwrap();
        assert_eq!(outcome.status, ExitStatus::PartialSuccess);
        assert_eq!(outcome.report_error.as_deref(), Some("Report target rejected: not today"));
    }
}
