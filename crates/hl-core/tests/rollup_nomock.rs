//! Rollup against a real cache and report store on disk.

use chrono::{NaiveDate, NaiveDateTime};
use hl_bundle::HostInfo;
use hl_common::{EventType, Payload, Record, RecordKind};
use hl_core::aggregate::{Aggregator, KindOutcome};
use hl_core::cache::CacheStore;
use hl_core::layout::StorageLayout;
use hl_core::report::{unseal, EncryptedSealer, Report, ReportSealer, ReportStore, SealError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const PASSPHRASE: &str = "rollup-test";
const DEVICE: &str = "dev1";
const TZ: &str = "UTC+8";

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

struct Fixture {
    _dir: TempDir,
    layout: StorageLayout,
    cache: CacheStore,
    reports: ReportStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.prepare().unwrap();
        let cache = CacheStore::open(layout.clone()).unwrap();
        let reports = ReportStore::new(layout.clone(), DEVICE, TZ);
        Self {
            _dir: dir,
            layout,
            cache,
            reports,
        }
    }

    fn sealer() -> Arc<dyn ReportSealer> {
        Arc::new(EncryptedSealer::new(
            PASSPHRASE,
            DEVICE,
            TZ,
            HostInfo {
                device_name: "bench".into(),
                ..HostInfo::default()
            },
        ))
    }

    fn aggregator(&self, sealer: Arc<dyn ReportSealer>) -> Aggregator {
        Aggregator::new(self.cache.clone(), self.reports.clone(), sealer)
    }

    fn hardware(&self, ts: NaiveDateTime, cpu: f64) {
        let mut payload = Payload::new();
        payload.insert("cpu_util".into(), json!(cpu));
        payload.insert("disk_avail".into(), json!([10.5, 20.0]));
        self.cache.write(&Record::new(RecordKind::Hardware, ts, payload)).unwrap();
    }

    fn event(&self, ts: NaiveDateTime, event_type: EventType) {
        self.cache
            .write(&Record::event(ts, event_type, 4242, "editor", "/opt/editor/editor"))
            .unwrap();
    }

    fn cached(&self, kind: RecordKind) -> usize {
        self.cache.list(kind).unwrap().len()
    }

    fn artifact(&self, kind: RecordKind, d: u32) -> std::path::PathBuf {
        self.layout
            .report_dir(kind)
            .join(format!("{}_2024-01-{:02}_{}_{}.hlr", DEVICE, d, TZ, kind.report_suffix()))
    }
}

/// Reports whichever kind it is told to fail.
struct FailingSealer {
    fail: RecordKind,
    inner: Arc<dyn ReportSealer>,
    calls: AtomicUsize,
}

impl ReportSealer for FailingSealer {
    fn seal(&self, report: &Report) -> Result<Vec<u8>, SealError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if report.kind == self.fail {
            return Err(SealError::Rejected("disk full".into()));
        }
        self.inner.seal(report)
    }
}

#[test]
fn test_full_day_becomes_one_report_per_kind() {
    let fx = Fixture::new();
    fx.hardware(at(5, 10, 2), 30.0);
    fx.hardware(at(5, 10, 0), 10.0);
    fx.hardware(at(5, 10, 1), 20.0);
    fx.event(at(5, 9, 0), EventType::Start);
    fx.event(at(5, 17, 30), EventType::Close);

    let summary = fx.aggregator(Fixture::sealer()).run(day(6));

    assert_eq!(summary.days.len(), 1);
    let outcome = &summary.days[0];
    assert_eq!(outcome.day, day(5));
    assert!(outcome.committed());
    assert_eq!(outcome.removed, 5);
    assert!(matches!(outcome.hardware, KindOutcome::Sealed(_)));
    assert!(matches!(outcome.events, KindOutcome::Sealed(_)));
    assert_eq!(fx.cached(RecordKind::Hardware), 0);
    assert_eq!(fx.cached(RecordKind::Event), 0);

    let hardware = fx.artifact(RecordKind::Hardware, 5);
    assert!(std::fs::metadata(&hardware).unwrap().permissions().readonly());
    let doc = unseal(&std::fs::read(&hardware).unwrap(), PASSPHRASE).unwrap();
    assert_eq!(doc.record_count, 3);
    assert_eq!(doc.device_id, DEVICE);
    assert_eq!(doc.host.device_name, "bench");
    assert_eq!(
        doc.table.columns,
        vec!["timestamp", "cpu_util", "disk_avail #1", "disk_avail #2"]
    );
    let cpu: Vec<f64> = doc.table.rows.iter().map(|r| r[1].as_f64().unwrap()).collect();
    assert_eq!(cpu, vec![10.0, 20.0, 30.0]);

    let events = unseal(&std::fs::read(fx.artifact(RecordKind::Event, 5)).unwrap(), PASSPHRASE).unwrap();
    assert_eq!(events.record_count, 2);
    let kinds: Vec<&str> = events
        .table
        .rows
        .iter()
        .map(|row| {
            let col = events.table.columns.iter().position(|c| c == "event_type").unwrap();
            row[col].as_str().unwrap()
        })
        .collect();
    assert_eq!(kinds, vec!["start", "close"]);
}

#[test]
fn test_today_is_never_rolled_up() {
    let fx = Fixture::new();
    fx.hardware(at(6, 0, 0), 1.0);
    fx.event(at(6, 8, 0), EventType::Start);

    let summary = fx.aggregator(Fixture::sealer()).run(day(6));

    assert!(summary.days.is_empty());
    assert_eq!(fx.cached(RecordKind::Hardware), 1);
    assert_eq!(fx.cached(RecordKind::Event), 1);
    assert!(fx.reports.list_artifacts().unwrap().is_empty());
}

#[test]
fn test_second_run_is_a_no_op() {
    let fx = Fixture::new();
    fx.hardware(at(5, 10, 0), 10.0);
    let aggregator = fx.aggregator(Fixture::sealer());

    aggregator.run(day(6));
    let before = std::fs::read(fx.artifact(RecordKind::Hardware, 5)).unwrap();
    let again = aggregator.run(day(6));

    assert!(again.days.is_empty());
    assert_eq!(fx.reports.list_artifacts().unwrap().len(), 1);
    assert_eq!(std::fs::read(fx.artifact(RecordKind::Hardware, 5)).unwrap(), before);
}

#[test]
fn test_events_failure_keeps_both_kinds_cached() {
    let fx = Fixture::new();
    fx.hardware(at(5, 10, 0), 10.0);
    fx.hardware(at(5, 10, 1), 11.0);
    fx.event(at(5, 9, 0), EventType::Start);
    let sealer = Arc::new(FailingSealer {
        fail: RecordKind::Event,
        inner: Fixture::sealer(),
        calls: AtomicUsize::new(0),
    });

    let summary = fx.aggregator(sealer.clone()).run(day(6));

    let outcome = &summary.days[0];
    assert!(!outcome.committed());
    assert!(matches!(outcome.events, KindOutcome::Failed(_)));
    assert_eq!(outcome.removed, 0);
    assert_eq!(fx.cached(RecordKind::Hardware), 2);
    assert_eq!(fx.cached(RecordKind::Event), 1);
    assert_eq!(summary.failed_days(), 1);

    // The retry seals events and keeps the hardware artifact from the first run.
    let retry = fx.aggregator(Fixture::sealer()).run(day(6));
    let outcome = &retry.days[0];
    assert!(matches!(outcome.hardware, KindOutcome::AlreadySealed(_)));
    assert!(matches!(outcome.events, KindOutcome::Sealed(_)));
    assert!(outcome.committed());
    assert_eq!(fx.cached(RecordKind::Hardware), 0);
    assert_eq!(fx.cached(RecordKind::Event), 0);
}

#[test]
fn test_existing_artifact_for_day_is_kept() {
    let fx = Fixture::new();
    // Sealed earlier under a different timezone label.
    let earlier = fx
        .layout
        .report_dir(RecordKind::Hardware)
        .join(format!("{}_2024-01-05_UTC-5_hardware.hlr", DEVICE));
    std::fs::write(&earlier, b"sealed before").unwrap();
    fx.hardware(at(5, 10, 0), 10.0);

    let summary = fx.aggregator(Fixture::sealer()).run(day(6));

    assert_eq!(
        summary.days[0].hardware,
        KindOutcome::AlreadySealed(format!("{}_2024-01-05_UTC-5_hardware.hlr", DEVICE))
    );
    assert!(summary.days[0].committed());
    assert_eq!(std::fs::read(&earlier).unwrap(), b"sealed before");
    assert!(!fx.artifact(RecordKind::Hardware, 5).exists());
    assert_eq!(fx.cached(RecordKind::Hardware), 0);
}

#[test]
fn test_each_past_day_is_independent() {
    let fx = Fixture::new();
    fx.hardware(at(3, 10, 0), 1.0);
    fx.hardware(at(4, 10, 0), 2.0);
    fx.event(at(4, 11, 0), EventType::Start);
    let sealer = Arc::new(FailingSealer {
        fail: RecordKind::Event,
        inner: Fixture::sealer(),
        calls: AtomicUsize::new(0),
    });

    let summary = fx.aggregator(sealer.clone()).run(day(6));

    assert_eq!(summary.days.len(), 2);
    assert!(summary.days[0].committed());
    assert!(!summary.days[1].committed());
    assert_eq!(fx.cached(RecordKind::Hardware), 1);
    assert_eq!(sealer.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_wrong_passphrase_does_not_unseal() {
    let fx = Fixture::new();
    fx.hardware(at(5, 10, 0), 10.0);
    fx.aggregator(Fixture::sealer()).run(day(6));

    let data = std::fs::read(fx.artifact(RecordKind::Hardware, 5)).unwrap();
    assert!(unseal(&data, "not-it").is_err());
}
