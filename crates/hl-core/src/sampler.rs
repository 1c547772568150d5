//! Minute-aligned hardware sampling.

use crate::cache::CacheStore;
use crate::collect::SnapshotSource;
use chrono::{NaiveDateTime, Timelike};
use hl_common::{CacheKey, Classify, Record, RecordKind};
use std::time::Duration;
use tracing::{trace, warn};

pub struct Sampler {
    source: Box<dyn SnapshotSource>,
    cache: CacheStore,
}

impl Sampler {
    pub fn new(source: Box<dyn SnapshotSource>, cache: CacheStore) -> Self {
        Self { source, cache }
    }

    /// Take one snapshot stamped `now` and cache it. Failures are logged and
    /// the tick is skipped.
    pub fn tick(&mut self, now: NaiveDateTime) -> Option<CacheKey> {
        let payload = match self.source.hardware_snapshot() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, class = %e.class(), "Hardware snapshot failed");
                return None;
            }
        };
        match self.cache.write(&Record::new(RecordKind::Hardware, now, payload)) {
            Ok(key) => {
                trace!(key = %key, "Hardware sample cached");
                Some(key)
            }
            Err(e) => {
                warn!(error = %e, class = %e.class(), "Failed to cache hardware sample");
                None
            }
        }
    }
}

/// Time left until the top of the next minute.
pub fn delay_until_next_minute(now: NaiveDateTime) -> Duration {
    // Leap seconds report nanoseconds past 1e9.
    let elapsed = Duration::new(u64::from(now.second()), now.nanosecond().min(999_999_999));
    Duration::from_secs(60).saturating_sub(elapsed)
}
