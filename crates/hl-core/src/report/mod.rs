//! Durable store of sealed report artifacts.
//!
//! One artifact per (kind, day), named
//! `<device-id>_<YYYY-MM-DD>_<tz>_<suffix>.hlr` under the kind's report
//! directory and made read-only once written. An artifact that already
//! exists for a (kind, day), whatever its timezone label, is never
//! overwritten: sealing reports [`SealStatus::AlreadySealed`] instead.

pub mod sealer;

pub use sealer::{unseal, EncryptedSealer, ReportSealer, SealError};

use crate::layout::StorageLayout;
use chrono::NaiveDate;
use hl_common::{ArtifactName, Classify, ErrorClass, Record, RecordKind, ARTIFACT_EXTENSION};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// One day's records of one kind, ready to seal.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub kind: RecordKind,
    pub day: NaiveDate,
    pub records: Vec<Record>,
}

impl Report {
    pub fn new(kind: RecordKind, day: NaiveDate, records: Vec<Record>) -> Self {
        Self { kind, day, records }
    }
}

/// Result of sealing one (kind, day).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealStatus {
    /// A new artifact was written.
    Sealed(PathBuf),
    /// An artifact for this (kind, day) was already present and left as is.
    AlreadySealed(PathBuf),
    /// No records; nothing written.
    Empty,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Seal(#[from] SealError),
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Io { source, .. } => source.class(),
            StoreError::Seal(e) => e.class(),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Filesystem-backed report collection.
#[derive(Debug, Clone)]
pub struct ReportStore {
    layout: StorageLayout,
    device_id: String,
    timezone: String,
}

impl ReportStore {
    pub fn new(layout: StorageLayout, device_id: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            layout,
            device_id: device_id.into(),
            timezone: timezone.into(),
        }
    }

    /// Name a new artifact for (kind, day) would get.
    pub fn artifact_name(&self, kind: RecordKind, day: NaiveDate) -> ArtifactName {
        ArtifactName::new(&self.device_id, day, &self.timezone, kind)
    }

    /// Existing artifact for (kind, day), if any.
    pub fn find(&self, kind: RecordKind, day: NaiveDate) -> Result<Option<PathBuf>, StoreError> {
        let dir = self.layout.report_dir(kind);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        for entry in entries {
            let entry = entry.map_err(io_err(&dir))?;
            let name = entry.file_name();
            if let Some(parsed) = ArtifactName::parse(&name.to_string_lossy()) {
                if parsed.kind == kind && parsed.day == day {
                    return Ok(Some(entry.path()));
                }
            }
        }
        Ok(None)
    }

    /// Seal `report` unless it is empty or already sealed.
    ///
    /// The artifact is written to the temp directory, renamed into place and
    /// then made read-only, so a crash never leaves a partial artifact.
    pub fn seal(&self, report: &Report, sealer: &dyn ReportSealer) -> Result<SealStatus, StoreError> {
        if report.records.is_empty() {
            return Ok(SealStatus::Empty);
        }
        if let Some(existing) = self.find(report.kind, report.day)? {
            info!(
                kind = %report.kind,
                day = %report.day,
                artifact = %existing.display(),
                "Report already sealed, keeping existing artifact"
            );
            protect(&existing);
            return Ok(SealStatus::AlreadySealed(existing));
        }

        let bytes = sealer.seal(report)?;
        let name = self.artifact_name(report.kind, report.day).file_name();
        let dir = self.layout.report_dir(report.kind);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let temp_dir = self.layout.temp_dir();
        std::fs::create_dir_all(&temp_dir).map_err(io_err(&temp_dir))?;

        let temp = temp_dir.join(format!("{}.part", name));
        let target = dir.join(&name);
        if let Err(e) = write_then_rename(&temp, &target, &bytes) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }

        // The artifact is in place; a later seal retries the protection.
        protect(&target);

        info!(
            kind = %report.kind,
            day = %report.day,
            records = report.records.len(),
            artifact = %name,
            "Report sealed"
        );
        Ok(SealStatus::Sealed(target))
    }

    /// Every artifact in the store, ordered by file name.
    pub fn list_artifacts(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut artifacts = Vec::new();
        for kind in RecordKind::ALL {
            let dir = self.layout.report_dir(kind);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&dir)(e)),
            };
            for entry in entries {
                let path = entry.map_err(io_err(&dir))?.path();
                let is_artifact = path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION);
                if is_artifact {
                    artifacts.push(path);
                }
            }
        }
        artifacts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(artifacts)
    }
}

/// Make an artifact read-only. Failures are logged, not returned.
fn protect(path: &Path) {
    let result = std::fs::metadata(path).and_then(|meta| {
        let mut permissions = meta.permissions();
        if permissions.readonly() {
            return Ok(());
        }
        permissions.set_readonly(true);
        std::fs::set_permissions(path, permissions)
    });
    if let Err(e) = result {
        warn!(artifact = %path.display(), error = %e, "Failed to make artifact read-only");
    }
}

fn write_then_rename(temp: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = std::fs::File::create(temp).map_err(io_err(temp))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(io_err(temp))?;
    drop(file);
    std::fs::rename(temp, target).map_err(io_err(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_common::Payload;
    use tempfile::TempDir;

    struct PlainSealer;

    impl ReportSealer for PlainSealer {
        fn seal(&self, report: &Report) -> Result<Vec<u8>, SealError> {
            Ok(format!("{} {} {}", report.kind, report.day, report.records.len()).into_bytes())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    fn report(kind: RecordKind, n: usize) -> Report {
        let records = (0..n)
            .map(|i| {
                Record::new(
                    kind,
                    day().and_hms_opt(10, i as u32, 0).unwrap(),
                    Payload::new(),
                )
            })
            .collect();
        Report::new(kind, day(), records)
    }

    fn store(dir: &TempDir, tz: &str) -> ReportStore {
        let layout = StorageLayout::new(dir.path());
        layout.prepare().unwrap();
        ReportStore::new(layout, "dev-1", tz)
    }

    #[test]
    fn test_seal_writes_readonly_artifact() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "UTC+8");
        let status = store.seal(&report(RecordKind::Hardware, 3), &PlainSealer).unwrap();

        let expected = dir.path().join("Hardware/dev-1_2024-01-05_UTC+8_hardware.hlr");
        assert_eq!(status, SealStatus::Sealed(expected.clone()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"hardware 2024-01-05 3");
        assert!(std::fs::metadata(&expected).unwrap().permissions().readonly());
        assert_eq!(std::fs::read_dir(dir.path().join("cache/temp")).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_report_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "UTC+8");
        assert_eq!(store.seal(&report(RecordKind::Event, 0), &PlainSealer).unwrap(), SealStatus::Empty);
        assert!(store.list_artifacts().unwrap().is_empty());
    }

    #[test]
    fn test_existing_artifact_is_kept_across_timezones() {
        let dir = TempDir::new().unwrap();
        let first = store(&dir, "UTC+8");
        let Ok(SealStatus::Sealed(path)) = first.seal(&report(RecordKind::Event, 2), &PlainSealer) else {
            panic!("expected a fresh seal");
        };

        let moved = store(&dir, "UTC-5");
        let status = moved.seal(&report(RecordKind::Event, 7), &PlainSealer).unwrap();
        assert_eq!(status, SealStatus::AlreadySealed(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), b"events 2024-01-05 2");
        assert_eq!(moved.list_artifacts().unwrap().len(), 1);
    }

    #[test]
    fn test_writable_existing_artifact_is_protected_on_reseal() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "UTC+8");
        let existing = dir.path().join("Hardware/dev-1_2024-01-05_UTC+8_hardware.hlr");
        std::fs::write(&existing, b"left writable").unwrap();
        assert!(!std::fs::metadata(&existing).unwrap().permissions().readonly());

        let status = store.seal(&report(RecordKind::Hardware, 2), &PlainSealer).unwrap();
        assert_eq!(status, SealStatus::AlreadySealed(existing.clone()));
        assert!(std::fs::metadata(&existing).unwrap().permissions().readonly());
        assert_eq!(std::fs::read(&existing).unwrap(), b"left writable");
    }

    #[test]
    fn test_list_artifacts_across_kinds() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, "UTC+0");
        store.seal(&report(RecordKind::Hardware, 1), &PlainSealer).unwrap();
        store.seal(&report(RecordKind::Event, 1), &PlainSealer).unwrap();
        std::fs::write(dir.path().join("Events/readme.txt"), b"x").unwrap();

        let names: Vec<String> = store
            .list_artifacts()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["dev-1_2024-01-05_UTC+0_events.hlr", "dev-1_2024-01-05_UTC+0_hardware.hlr"]
        );
    }
}
