//! Append-only durable record cache.
//!
//! One directory per kind; one JSON file per record named by its
//! [`CacheKey`]. Files are created exclusively, so two records never share
//! a name; on collision the key is bumped by one microsecond.

use crate::layout::StorageLayout;
use hl_common::{CacheKey, Classify, ErrorClass, Record, RecordKind};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Collision bumps tried before giving up on a write.
const MAX_KEY_ATTEMPTS: usize = 1_000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt cache file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache file {path} holds a {found} record, expected {expected}")]
    WrongKind {
        path: PathBuf,
        expected: RecordKind,
        found: RecordKind,
    },

    #[error("no free cache key near {0}")]
    KeysExhausted(CacheKey),

    #[error("failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CacheError {
    fn io(path: PathBuf, source: io::Error) -> Self {
        CacheError::Io { path, source }
    }

    /// Whether the file content itself is bad (as opposed to unreachable).
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::Corrupt { .. } | CacheError::WrongKind { .. })
    }
}

impl Classify for CacheError {
    fn class(&self) -> ErrorClass {
        match self {
            CacheError::Io { source, .. } => source.class(),
            CacheError::Corrupt { .. } | CacheError::WrongKind { .. } => ErrorClass::Partial,
            CacheError::KeysExhausted(_) => ErrorClass::Transient,
            CacheError::Serialize(_) => ErrorClass::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Filesystem-backed record cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    layout: StorageLayout,
}

impl CacheStore {
    /// Open the cache under `layout`, creating kind directories as needed.
    pub fn open(layout: StorageLayout) -> Result<Self> {
        for kind in RecordKind::ALL {
            let dir = layout.cache_kind_dir(kind);
            std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(dir, e))?;
        }
        Ok(Self { layout })
    }

    fn path_of(&self, kind: RecordKind, key: &CacheKey) -> PathBuf {
        self.layout.cache_kind_dir(kind).join(key.file_name())
    }

    /// Persist a record and return the key it was stored under.
    pub fn write(&self, record: &Record) -> Result<CacheKey> {
        let bytes = serde_json::to_vec(record).map_err(CacheError::Serialize)?;
        let first = CacheKey::from_instant(record.timestamp);
        let mut key = first.clone();

        for _ in 0..MAX_KEY_ATTEMPTS {
            let path = self.path_of(record.kind, &key);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let written = file.write_all(&bytes).and_then(|_| file.sync_all());
                    drop(file);
                    discard_on_error(&path, written).map_err(|e| CacheError::io(path, e))?;
                    debug!(kind = %record.kind, key = %key, "Cached record");
                    return Ok(key);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    // The key names the record's day; a bump may not leave it.
                    let next = key.next();
                    if next.day() != first.day() {
                        break;
                    }
                    key = next;
                }
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }

        Err(CacheError::KeysExhausted(first))
    }

    /// Keys of every cached record of `kind`, oldest first. Files whose
    /// names are not cache keys are ignored.
    pub fn list(&self, kind: RecordKind) -> Result<Vec<CacheKey>> {
        let dir = self.layout.cache_kind_dir(kind);
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::io(dir.clone(), e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(dir.clone(), e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match CacheKey::from_file_name(&name) {
                Ok(key) => keys.push(key),
                Err(e) => debug!(kind = %kind, file = %name, error = %e, "Ignoring non-cache file"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn load(&self, kind: RecordKind, key: &CacheKey) -> Result<Record> {
        let path = self.path_of(kind, key);
        let bytes = std::fs::read(&path).map_err(|e| CacheError::io(path.clone(), e))?;
        let record: Record = serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;
        if record.kind != kind {
            return Err(CacheError::WrongKind {
                path,
                expected: kind,
                found: record.kind,
            });
        }
        Ok(record)
    }

    /// Delete a record. Already-missing records are not an error.
    pub fn remove(&self, kind: RecordKind, key: &CacheKey) -> Result<()> {
        let path = self.path_of(kind, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Move an unreadable record out of the cache so it is not re-read.
    pub fn quarantine(&self, kind: RecordKind, key: &CacheKey) -> Result<PathBuf> {
        let dir = self.layout.quarantine_dir(kind);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(dir.clone(), e))?;
        let from = self.path_of(kind, key);
        let to = dir.join(key.file_name());
        std::fs::rename(&from, &to).map_err(|e| CacheError::io(from, e))?;
        warn!(kind = %kind, key = %key, dest = %to.display(), "Quarantined cache file");
        Ok(to)
    }
}

/// Remove a partially written file so it is never read back as corrupt.
fn discard_on_error(path: &Path, written: io::Result<()>) -> io::Result<()> {
    if written.is_err() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove partial cache file");
        }
    }
    written
}
