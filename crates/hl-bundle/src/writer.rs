//! Builds delivery archives: `manifest.json` first, then artifacts by path.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::{BundleError, BundleManifest, Result, MANIFEST_FILE_NAME};

pub struct BundleWriter {
    manifest: BundleManifest,
    content: BTreeMap<String, Vec<u8>>,
}

impl BundleWriter {
    pub fn new(device_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            manifest: BundleManifest::new(device_name, label),
            content: BTreeMap::new(),
        }
    }

    /// Store `data` at `path` inside the archive.
    pub fn add_file(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        let entry = self.manifest.record(&path, &data);
        debug!(path = %entry.path, bytes = entry.bytes, "queued archive entry");
        self.content.insert(path, data);
    }

    /// Store a file from disk under its own file name.
    pub fn add_path(&mut self, source: &Path) -> Result<()> {
        let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
            return Err(BundleError::MissingFile(source.display().to_string()));
        };
        let data = std::fs::read(source)?;
        self.add_file(name, data);
        Ok(())
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn file_count(&self) -> usize {
        self.content.len()
    }

    pub fn write(self, path: &Path) -> Result<BundleManifest> {
        let manifest = self.finish(File::create(path)?)?;
        info!(
            path = %path.display(),
            files = manifest.file_count(),
            bytes = manifest.total_bytes(),
            label = %manifest.label,
            "archive written"
        );
        Ok(manifest)
    }

    pub fn write_to_vec(self) -> Result<(Vec<u8>, BundleManifest)> {
        let mut sink = Cursor::new(Vec::new());
        let manifest = self.finish(&mut sink)?;
        debug!(files = manifest.file_count(), zipped = sink.get_ref().len(), "archive built in memory");
        Ok((sink.into_inner(), manifest))
    }

    fn finish<W: Write + Seek>(self, sink: W) -> Result<BundleManifest> {
        if self.content.is_empty() {
            return Err(BundleError::Empty);
        }
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let mut zip = ZipWriter::new(sink);
        zip.start_file(MANIFEST_FILE_NAME, options)?;
        zip.write_all(self.manifest.to_json()?.as_bytes())?;
        for (path, data) in &self.content {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(data)?;
        }
        zip.finish()?;
        Ok(self.manifest)
    }
}
