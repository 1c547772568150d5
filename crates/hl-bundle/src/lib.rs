//! Delivery archives and sealed report documents for hostlog.
//!
//! # Delivery archive
//!
//! A delivery archive is a ZIP file holding sealed report artifacts:
//! - `manifest.json`: device name, batch label, file listing with SHA-256 checksums
//! - one entry per artifact, stored under its artifact file name
//!
//! # Sealed reports
//!
//! A report artifact is a [`ReportDocument`] serialized to JSON and encrypted
//! with a passphrase (see [`encryption`]).
//!
//! # Example
//!
//! ```no_run
//! use hl_bundle::{BundleReader, BundleWriter};
//! use std::path::Path;
//!
//! let mut writer = BundleWriter::new("office-pc", "2024-01-05");
//! writer.add_file("dev_2024-01-05_UTC+8_hardware.hlr", b"sealed".to_vec());
//! writer.write(Path::new("Logs_office-pc(2024-01-05).zip")).unwrap();
//!
//! let mut reader = BundleReader::open(Path::new("Logs_office-pc(2024-01-05).zip")).unwrap();
//! assert!(reader.verify_all().is_empty());
//! ```

pub mod encryption;
pub mod error;
pub mod manifest;
pub mod reader;
pub mod report;
pub mod writer;

pub use encryption::{decrypt_bytes, encrypt_bytes, is_encrypted};
pub use error::{BundleError, Result};
pub use manifest::{sha256_hex, BundleManifest, FileEntry, BUNDLE_SCHEMA_VERSION, MANIFEST_FILE_NAME};
pub use reader::BundleReader;
pub use report::{HostInfo, ReportDocument, ReportTable, MISSING_CELL};
pub use writer::BundleWriter;
