//! Durable ledger of delivered artifact names.

use hl_common::{Classify, ErrorClass};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Classify for HistoryError {
    fn class(&self) -> ErrorClass {
        match self {
            HistoryError::Io { source, .. } => source.class(),
            HistoryError::Serialize(_) => ErrorClass::Fatal,
        }
    }
}

/// Set of artifact names already transmitted, persisted as a sorted JSON array.
#[derive(Debug)]
pub struct DeliveryHistory {
    path: PathBuf,
    sent: Mutex<BTreeSet<String>>,
}

impl DeliveryHistory {
    /// Load the ledger at `path`. A missing file is an empty ledger; an
    /// unreadable one is treated the same with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sent = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(names) => names.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Delivery history unreadable, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Delivery history unreadable, starting empty");
                BTreeSet::new()
            }
        };
        debug!(path = %path.display(), entries = sent.len(), "Delivery history loaded");
        Self {
            path,
            sent: Mutex::new(sent),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `names` as sent and persist the whole ledger.
    ///
    /// The in-memory set keeps the names even when persisting fails, so the
    /// running process never sends them again.
    pub fn commit<I, S>(&self, names: I) -> Result<(), HistoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sent = self.lock();
        sent.extend(names.into_iter().map(Into::into));
        let list: Vec<&String> = sent.iter().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;
        persist(&self.path, &bytes)
    }
}

fn persist(path: &Path, bytes: &[u8]) -> Result<(), HistoryError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| HistoryError::Io { path, source }
    };
    let temp = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&temp).map_err(io_err(&temp))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(io_err(&temp))?;
    drop(file);
    std::fs::rename(&temp, path).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = DeliveryHistory::load(dir.path().join("delivery_history.json"));
        assert!(history.is_empty());
        assert!(!history.contains("a.hlr"));
    }

    #[test]
    fn test_commit_persists_sorted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delivery_history.json");
        let history = DeliveryHistory::load(&path);
        history.commit(["b.hlr", "a.hlr"]).unwrap();
        history.commit(["a.hlr"]).unwrap();
        assert_eq!(history.len(), 2);

        let stored: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, vec!["a.hlr".to_string(), "b.hlr".to_string()]);
        assert!(!dir.path().join("delivery_history.json.tmp").exists());

        let reloaded = DeliveryHistory::load(&path);
        assert!(reloaded.contains("a.hlr"));
        assert!(reloaded.contains("b.hlr"));
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delivery_history.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(DeliveryHistory::load(&path).is_empty());
    }

    #[test]
    fn test_failed_persist_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("delivery_history.json");
        let history = DeliveryHistory::load(&path);
        assert!(history.commit(["a.hlr"]).is_err());
        assert!(history.contains("a.hlr"));
    }
}
