//! Process start/close event capture.
//!
//! Each poll diffs the live pid set against the previous one. New pids are
//! described and, when loggable, produce a `start` record and are remembered
//! with their name and path; remembered pids that vanish produce a `close`
//! record and are forgotten. Pids alive when the monitor is built are never
//! reported.

use crate::cache::CacheStore;
use crate::collect::ProcessProbe;
use crate::lifecycle::ShutdownSignal;
use chrono::{Local, NaiveDateTime};
use hl_common::{Classify, EventType, Record};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decides which processes are worth an event.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    system_dirs: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(system_dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let system_dirs = system_dirs
            .into_iter()
            .map(|d| normalize(d.as_ref()).trim_end_matches('/').to_string())
            .filter(|d| !d.is_empty())
            .collect();
        Self { system_dirs }
    }

    /// Whether `path` lies inside one of the system directories.
    pub fn is_system_path(&self, path: &str) -> bool {
        let path = normalize(path);
        self.system_dirs.iter().any(|dir| {
            path.strip_prefix(dir.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Loggable: a known executable outside every system directory, or the
    /// owner of a visible window. `has_window` is only asked when needed.
    pub fn is_loggable(&self, path: &str, has_window: impl FnOnce() -> bool) -> bool {
        (!path.is_empty() && !self.is_system_path(path)) || has_window()
    }
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/").to_lowercase()
}

/// Counters of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub started: usize,
    pub closed: usize,
    /// New pids that were not loggable or vanished before inspection.
    pub ignored: usize,
    pub failed_writes: usize,
    /// The live pid snapshot itself failed; nothing else was done.
    pub snapshot_failed: bool,
}

pub struct EventMonitor {
    probe: Box<dyn ProcessProbe>,
    cache: CacheStore,
    classifier: Classifier,
    seen: BTreeSet<u32>,
    logged: HashMap<u32, (String, String)>,
}

impl EventMonitor {
    /// Build a monitor; processes already running are primed as seen.
    pub fn new(mut probe: Box<dyn ProcessProbe>, cache: CacheStore, classifier: Classifier) -> Self {
        let seen = match probe.live_pids() {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, "Initial process snapshot failed; starting empty");
                BTreeSet::new()
            }
        };
        debug!(primed = seen.len(), "Event monitor primed");
        Self {
            probe,
            cache,
            classifier,
            seen,
            logged: HashMap::new(),
        }
    }

    /// Pids currently remembered as logged.
    pub fn tracked(&self) -> usize {
        self.logged.len()
    }

    pub fn poll(&mut self) -> PollSummary {
        self.poll_at(Local::now().naive_local())
    }

    /// One diff pass, stamping events with `now`.
    pub fn poll_at(&mut self, now: NaiveDateTime) -> PollSummary {
        let mut summary = PollSummary::default();
        let current = match self.probe.live_pids() {
            Ok(pids) => pids,
            Err(e) => {
                warn!(error = %e, class = %e.class(), "Process snapshot failed");
                summary.snapshot_failed = true;
                return summary;
            }
        };

        for &pid in current.difference(&self.seen) {
            let info = match self.probe.describe(pid) {
                Ok(info) => info,
                Err(e) => {
                    debug!(pid, error = %e, "Process lookup failed");
                    summary.ignored += 1;
                    continue;
                }
            };
            let probe = &mut self.probe;
            if !self.classifier.is_loggable(&info.path, || probe.has_visible_window(pid)) {
                summary.ignored += 1;
                continue;
            }
            // Unrecorded starts are not tracked, so no orphan close follows.
            if self.write(Record::event(now, EventType::Start, pid, &info.name, &info.path), &mut summary) {
                summary.started += 1;
                self.logged.insert(pid, (info.name, info.path));
            }
        }

        for pid in self.seen.difference(&current) {
            if let Some((name, path)) = self.logged.remove(pid) {
                self.write(Record::event(now, EventType::Close, *pid, &name, &path), &mut summary);
                summary.closed += 1;
            }
        }

        self.seen = current;
        summary
    }

    fn write(&self, record: Record, summary: &mut PollSummary) -> bool {
        match self.cache.write(&record) {
            Ok(_) => true,
            Err(e) => {
                warn!(kind = %record.kind, error = %e, class = %e.class(), "Failed to cache event");
                summary.failed_writes += 1;
                false
            }
        }
    }

    /// Poll every `interval` until shutdown.
    pub fn run(&mut self, shutdown: &ShutdownSignal, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Event monitor started");
        while !shutdown.is_triggered() {
            let summary = self.poll();
            if summary.started + summary.closed > 0 {
                debug!(started = summary.started, closed = summary.closed, "Process events");
            }
            if shutdown.wait(interval) {
                break;
            }
        }
        info!(tracked = self.logged.len(), "Event monitor stopped");
    }
}
