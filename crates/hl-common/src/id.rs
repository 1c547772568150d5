//! Cache keys and report artifact names.
//!
//! A [`CacheKey`] is the storage identifier of a cached record:
//! `YYYYMMDDhhmmss_ffffff` rendered from the record's creation instant.
//! An [`ArtifactName`] identifies a sealed report:
//! `<device-id>_<YYYY-MM-DD>_<tz>_<kind-suffix>.hlr`.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::record::RecordKind;

/// File extension of sealed report artifacts.
pub const ARTIFACT_EXTENSION: &str = "hlr";

/// File extension of cached record files.
pub const CACHE_EXTENSION: &str = "json";

const KEY_SECONDS_FORMAT: &str = "%Y%m%d%H%M%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheKeyError {
    #[error("malformed cache key '{0}'")]
    Malformed(String),

    #[error("cache key '{0}' is not a valid instant")]
    InvalidInstant(String),
}

/// Storage identifier of a cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a record created at `instant`.
    pub fn from_instant(instant: NaiveDateTime) -> Self {
        CacheKey(format!(
            "{}_{:06}",
            instant.format(KEY_SECONDS_FORMAT),
            instant.nanosecond() / 1_000 % 1_000_000
        ))
    }

    /// Parse and validate a key string (without file extension).
    pub fn parse(s: &str) -> Result<Self, CacheKeyError> {
        Self::instant_of(s)?;
        Ok(CacheKey(s.to_string()))
    }

    /// Parse a cache file name such as `20240105101500_000123.json`.
    pub fn from_file_name(name: &str) -> Result<Self, CacheKeyError> {
        let stem = name
            .strip_suffix(CACHE_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| CacheKeyError::Malformed(name.to_string()))?;
        Self::parse(stem)
    }

    fn instant_of(s: &str) -> Result<NaiveDateTime, CacheKeyError> {
        let (seconds, micros) = s
            .split_once('_')
            .ok_or_else(|| CacheKeyError::Malformed(s.to_string()))?;
        if seconds.len() != 14
            || micros.len() != 6
            || !seconds.bytes().all(|b| b.is_ascii_digit())
            || !micros.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(CacheKeyError::Malformed(s.to_string()));
        }
        // All fields are ASCII digits at this point.
        let field = |range: std::ops::Range<usize>| -> u32 {
            seconds[range].parse().unwrap_or(u32::MAX)
        };
        let micros: u32 = micros.parse().unwrap_or(u32::MAX);
        NaiveDate::from_ymd_opt(field(0..4) as i32, field(4..6), field(6..8))
            .and_then(|d| d.and_hms_micro_opt(field(8..10), field(10..12), field(12..14), micros))
            .ok_or_else(|| CacheKeyError::InvalidInstant(s.to_string()))
    }

    /// Creation instant encoded in the key.
    pub fn instant(&self) -> NaiveDateTime {
        // Keys are validated on construction.
        Self::instant_of(&self.0).unwrap_or_default()
    }

    /// Calendar day encoded in the key.
    pub fn day(&self) -> NaiveDate {
        self.instant().date()
    }

    /// The key one microsecond later; used to resolve collisions.
    pub fn next(&self) -> Self {
        Self::from_instant(self.instant() + Duration::microseconds(1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the cached record.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, CACHE_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed name of a sealed report artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub device_id: String,
    pub day: NaiveDate,
    pub timezone: String,
    pub kind: RecordKind,
}

impl ArtifactName {
    pub fn new(device_id: impl Into<String>, day: NaiveDate, timezone: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            device_id: device_id.into(),
            day,
            timezone: timezone.into(),
            kind,
        }
    }

    /// Parse a file name produced by [`ArtifactName::file_name`].
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name
            .strip_suffix(ARTIFACT_EXTENSION)?
            .strip_suffix('.')?;
        let mut parts = stem.split('_');
        let device_id = parts.next()?;
        let day = NaiveDate::parse_from_str(parts.next()?, DAY_FORMAT).ok()?;
        let timezone = parts.next()?;
        let kind = RecordKind::from_report_suffix(parts.next()?)?;
        if parts.next().is_some() || device_id.is_empty() {
            return None;
        }
        Some(Self::new(device_id, day, timezone, kind))
    }

    /// Prefix shared by every artifact of this device and day.
    pub fn day_prefix(device_id: &str, day: NaiveDate) -> String {
        format!("{}_{}_", device_id, day.format(DAY_FORMAT))
    }

    /// Trailer shared by every artifact of this kind.
    pub fn kind_trailer(kind: RecordKind) -> String {
        format!("_{}.{}", kind.report_suffix(), ARTIFACT_EXTENSION)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}",
            Self::day_prefix(&self.device_id, self.day),
            self.timezone,
            Self::kind_trailer(self.kind)
        )
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Second `_`-separated field of an artifact file name, which carries the day
/// string for names that follow the artifact naming scheme.
pub fn embedded_day(name: &str) -> Option<&str> {
    let field = name.split('_').nth(1)?;
    NaiveDate::parse_from_str(field, DAY_FORMAT).ok()?;
    Some(field)
}
