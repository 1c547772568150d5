//! Opens delivery archives and checks entries against the manifest.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::{sha256_hex, BundleError, BundleManifest, FileEntry, Result, MANIFEST_FILE_NAME};

pub struct BundleReader<R: Read + Seek> {
    manifest: BundleManifest,
    archive: ZipArchive<R>,
}

impl BundleReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl BundleReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> BundleReader<R> {
    /// Fails unless the archive carries a manifest that passes
    /// [`BundleManifest::check`].
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let raw = raw_entry(&mut archive, MANIFEST_FILE_NAME)?;
        let json = String::from_utf8(raw)
            .map_err(|_| BundleError::Manifest("not UTF-8".to_string()))?;
        let manifest = BundleManifest::from_json(&json)?;
        manifest.check()?;
        debug!(device = %manifest.device_name, label = %manifest.label, "archive opened");
        Ok(Self { manifest, archive })
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.manifest.files
    }

    /// Contents of `path`, verified against its manifest digest.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let expected = match self.manifest.entry(path) {
            Some(entry) => entry.sha256.clone(),
            None => return Err(BundleError::MissingFile(path.to_string())),
        };
        let data = raw_entry(&mut self.archive, path)?;
        let actual = sha256_hex(&data);
        if actual != expected {
            return Err(BundleError::ChecksumMismatch {
                path: path.to_string(),
                expected,
                actual,
            });
        }
        Ok(data)
    }

    /// Paths whose content is missing or does not match.
    pub fn verify_all(&mut self) -> Vec<String> {
        let paths: Vec<String> = self.manifest.files.iter().map(|f| f.path.clone()).collect();
        paths
            .into_iter()
            .filter(|path| match self.read_file(path) {
                Ok(_) => false,
                Err(e) => {
                    warn!(path = %path, error = %e, "archive entry failed verification");
                    true
                }
            })
            .collect()
    }
}

fn raw_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(path)
        .map_err(|_| BundleError::MissingFile(path.to_string()))?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}
