//! `manifest.json`, the first entry of every delivery archive.
//!
//! Lists each artifact with its size and SHA-256 digest, plus the sending
//! device and the batch label.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BundleError, Result};

pub const BUNDLE_SCHEMA_VERSION: &str = hl_common::SCHEMA_VERSION;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle_version: String,
    pub created_at: DateTime<Utc>,
    pub device_name: String,
    /// `<day>` or `<first>~<last>`.
    pub label: String,
    /// Kept sorted by path.
    pub files: Vec<FileEntry>,
}

impl BundleManifest {
    pub fn new(device_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            bundle_version: BUNDLE_SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            device_name: device_name.into(),
            label: label.into(),
            files: Vec::new(),
        }
    }

    /// Hash `data` and list it under `path`, replacing an earlier entry of
    /// the same path.
    pub fn record(&mut self, path: &str, data: &[u8]) -> &FileEntry {
        let entry = FileEntry {
            path: path.to_string(),
            sha256: sha256_hex(data),
            bytes: data.len() as u64,
        };
        let idx = match self.files.binary_search_by(|f| f.path.as_str().cmp(path)) {
            Ok(idx) => {
                self.files[idx] = entry;
                idx
            }
            Err(idx) => {
                self.files.insert(idx, entry);
                idx
            }
        };
        &self.files[idx]
    }

    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.files[idx])
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    /// Reject manifests this version cannot trust.
    pub fn check(&self) -> Result<()> {
        if self.bundle_version != BUNDLE_SCHEMA_VERSION {
            return Err(BundleError::Manifest(format!(
                "bundle version {} is not {}",
                self.bundle_version, BUNDLE_SCHEMA_VERSION
            )));
        }
        if self.device_name.is_empty() {
            return Err(BundleError::Manifest("no device name".to_string()));
        }
        let bad = self.files.iter().find(|f| {
            f.path.is_empty()
                || f.path == MANIFEST_FILE_NAME
                || f.sha256.len() != 64
                || !f.sha256.bytes().all(|b| b.is_ascii_hexdigit())
        });
        match bad {
            Some(f) => Err(BundleError::Manifest(format!("bad entry '{}'", f.path))),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a manifest, restoring path order if the writer did not keep it.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(json)?;
        manifest.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(manifest)
    }
}
