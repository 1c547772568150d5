//! Day-boundary rollup of cached records into sealed reports.
//!
//! Only days strictly before `today` are eligible. Each (day, kind) is sealed
//! independently; a day's cache files are deleted only when both kinds ended
//! as [`KindOutcome::Sealed`], [`KindOutcome::AlreadySealed`] or
//! [`KindOutcome::Empty`].

use crate::cache::CacheStore;
use crate::report::{Report, ReportSealer, ReportStore, SealStatus};
use chrono::NaiveDate;
use hl_common::{CacheKey, Classify, Record, RecordKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A cached record together with the key it is stored under.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub key: CacheKey,
    pub record: Record,
}

/// All cached records of one day, each kind sorted by timestamp.
#[derive(Debug, Clone)]
pub struct DayBucket {
    pub day: NaiveDate,
    pub hardware: Vec<CachedRecord>,
    pub events: Vec<CachedRecord>,
}

impl DayBucket {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            hardware: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn entries(&self, kind: RecordKind) -> &[CachedRecord] {
        match kind {
            RecordKind::Hardware => &self.hardware,
            RecordKind::Event => &self.events,
        }
    }

    fn entries_mut(&mut self, kind: RecordKind) -> &mut Vec<CachedRecord> {
        match kind {
            RecordKind::Hardware => &mut self.hardware,
            RecordKind::Event => &mut self.events,
        }
    }

    fn sort(&mut self) {
        for kind in RecordKind::ALL {
            self.entries_mut(kind).sort_by(|a, b| {
                a.record
                    .timestamp
                    .cmp(&b.record.timestamp)
                    .then_with(|| a.key.cmp(&b.key))
            });
        }
    }

    fn report(&self, kind: RecordKind) -> Report {
        let records = self.entries(kind).iter().map(|c| c.record.clone()).collect();
        Report::new(kind, self.day, records)
    }
}

/// How one (day, kind) ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum KindOutcome {
    Sealed(String),
    AlreadySealed(String),
    Empty,
    Failed(String),
}

impl KindOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, KindOutcome::Failed(_))
    }

    fn from_status(status: SealStatus) -> Self {
        let name = |p: &std::path::Path| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        match status {
            SealStatus::Sealed(path) => KindOutcome::Sealed(name(&path)),
            SealStatus::AlreadySealed(path) => KindOutcome::AlreadySealed(name(&path)),
            SealStatus::Empty => KindOutcome::Empty,
        }
    }
}

/// Outcome of one day's rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOutcome {
    pub day: NaiveDate,
    pub hardware: KindOutcome,
    pub events: KindOutcome,
    /// Cache records deleted after a committed rollup.
    pub removed: usize,
}

impl DayOutcome {
    /// Both kinds succeeded, so the day's cache may be (and was) cleared.
    pub fn committed(&self) -> bool {
        self.hardware.is_success() && self.events.is_success()
    }
}

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollupSummary {
    pub days: Vec<DayOutcome>,
    /// Unreadable cache files moved to quarantine.
    pub quarantined: usize,
}

impl RollupSummary {
    pub fn is_clean(&self) -> bool {
        self.days.iter().all(DayOutcome::committed)
    }

    pub fn failed_days(&self) -> usize {
        self.days.iter().filter(|d| !d.committed()).count()
    }
}

/// Drains eligible cache days into the report store.
pub struct Aggregator {
    cache: CacheStore,
    reports: ReportStore,
    sealer: Arc<dyn ReportSealer>,
}

impl Aggregator {
    pub fn new(cache: CacheStore, reports: ReportStore, sealer: Arc<dyn ReportSealer>) -> Self {
        Self {
            cache,
            reports,
            sealer,
        }
    }

    /// Roll up every cached day before `today`.
    pub fn run(&self, today: NaiveDate) -> RollupSummary {
        let mut summary = RollupSummary::default();
        let mut buckets: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
        // (day, kind) pairs that must not be sealed or cleared this run
        let mut blocked: BTreeSet<(NaiveDate, RecordKind)> = BTreeSet::new();
        let mut unlisted: Vec<RecordKind> = Vec::new();

        for kind in RecordKind::ALL {
            let keys = match self.cache.list(kind) {
                Ok(keys) => keys,
                Err(e) => {
                    error!(kind = %kind, error = %e, class = %e.class(), "Failed to list cache");
                    unlisted.push(kind);
                    continue;
                }
            };

            for key in keys.into_iter().filter(|k| k.day() < today) {
                let day = key.day();
                match self.cache.load(kind, &key) {
                    Ok(record) => buckets
                        .entry(day)
                        .or_insert_with(|| DayBucket::new(day))
                        .entries_mut(kind)
                        .push(CachedRecord { key, record }),
                    Err(e) if e.is_corrupt() => {
                        warn!(kind = %kind, key = %key, error = %e, "Skipping corrupt cache file");
                        match self.cache.quarantine(kind, &key) {
                            Ok(_) => summary.quarantined += 1,
                            Err(qe) => {
                                error!(kind = %kind, key = %key, error = %qe, "Failed to quarantine");
                                blocked.insert((day, kind));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(kind = %kind, key = %key, error = %e, class = %e.class(), "Unreadable cache file");
                        buckets.entry(day).or_insert_with(|| DayBucket::new(day));
                        blocked.insert((day, kind));
                    }
                }
            }
        }

        for bucket in buckets.values_mut() {
            bucket.sort();
        }

        for bucket in buckets.into_values() {
            let outcome_for = |kind: RecordKind| -> KindOutcome {
                if unlisted.contains(&kind) {
                    return KindOutcome::Failed("cache listing failed".to_string());
                }
                if blocked.contains(&(bucket.day, kind)) {
                    return KindOutcome::Failed("cache file unreadable".to_string());
                }
                match self.reports.seal(&bucket.report(kind), self.sealer.as_ref()) {
                    Ok(status) => KindOutcome::from_status(status),
                    Err(e) => {
                        error!(
                            kind = %kind,
                            day = %bucket.day,
                            error = %e,
                            class = %e.class(),
                            "Failed to seal report"
                        );
                        KindOutcome::Failed(e.to_string())
                    }
                }
            };

            let mut outcome = DayOutcome {
                day: bucket.day,
                hardware: outcome_for(RecordKind::Hardware),
                events: outcome_for(RecordKind::Event),
                removed: 0,
            };

            if outcome.committed() {
                outcome.removed = self.clear_day(&bucket);
                info!(day = %bucket.day, removed = outcome.removed, "Day rolled up");
            } else {
                warn!(day = %bucket.day, "Day kept in cache after sealing failure");
            }
            summary.days.push(outcome);
        }

        summary
    }

    fn clear_day(&self, bucket: &DayBucket) -> usize {
        let mut removed = 0;
        for kind in RecordKind::ALL {
            for entry in bucket.entries(kind) {
                match self.cache.remove(kind, &entry.key) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        error!(kind = %kind, key = %entry.key, error = %e, "Failed to delete cache file")
                    }
                }
            }
        }
        removed
    }
}
