//! On-disk layout of the agent's base directory.
//!
//! ```text
//! <base>/
//!   Hardware/ Events/            sealed reports (*.hlr, read-only)
//!   cache/Hardware/ cache/Events/ cached records (*.json)
//!   cache/quarantine/<Kind>/     unreadable cache files
//!   cache/temp/                  in-progress report writes
//!   cache/Logs_<device>(<label>).zip   transient delivery bundle
//!   delivery_history.json  recipient.conf  device.id  agent.log
//! ```

use hl_common::RecordKind;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_DIR_NAME: &str = "hostlog";

/// Paths under one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Pick the first usable base directory: `configured`, then the user's
    /// local data dir, then `~/hostlog`. The chosen layout is prepared.
    pub fn resolve(configured: Option<&Path>) -> io::Result<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = configured {
            candidates.push(dir.to_path_buf());
        }
        if let Some(dir) = dirs::data_local_dir() {
            candidates.push(dir.join(APP_DIR_NAME));
        }
        if let Some(dir) = dirs::home_dir() {
            candidates.push(dir.join(APP_DIR_NAME));
        }

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no base directory candidate");
        for candidate in candidates {
            let layout = Self::new(&candidate);
            match layout.prepare() {
                Ok(()) => {
                    info!(base = %candidate.display(), "Using base directory");
                    return Ok(layout);
                }
                Err(e) => {
                    warn!(base = %candidate.display(), error = %e, "Base directory unusable, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Create every directory of the layout.
    pub fn prepare(&self) -> io::Result<()> {
        for kind in RecordKind::ALL {
            std::fs::create_dir_all(self.report_dir(kind))?;
            std::fs::create_dir_all(self.cache_kind_dir(kind))?;
            std::fs::create_dir_all(self.quarantine_dir(kind))?;
        }
        std::fs::create_dir_all(self.temp_dir())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn cache_kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.cache_dir().join(kind.dir_name())
    }

    pub fn quarantine_dir(&self, kind: RecordKind) -> PathBuf {
        self.cache_dir().join("quarantine").join(kind.dir_name())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.cache_dir().join("temp")
    }

    pub fn report_dir(&self, kind: RecordKind) -> PathBuf {
        self.base.join(kind.dir_name())
    }

    pub fn history_path(&self) -> PathBuf {
        self.base.join("delivery_history.json")
    }

    pub fn recipient_path(&self) -> PathBuf {
        self.base.join("recipient.conf")
    }

    pub fn device_id_path(&self) -> PathBuf {
        self.base.join("device.id")
    }

    pub fn log_path(&self) -> PathBuf {
        self.base.join("agent.log")
    }

    /// Delivery bundle path for a batch.
    pub fn bundle_path(&self, device_name: &str, label: &str) -> PathBuf {
        self.cache_dir()
            .join(format!("Logs_{}({}).zip", device_name, label))
    }
}
