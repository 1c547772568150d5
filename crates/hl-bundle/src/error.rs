//! Bundle error type.

use hl_common::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entry content does not hash to the manifest checksum.
    #[error("checksum mismatch for '{path}': manifest says {expected}, content is {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("'{0}' is not in the archive")]
    MissingFile(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("refusing to write an archive with no artifacts")]
    Empty,

    #[error("cannot seal: {0}")]
    Seal(String),

    /// Wrong passphrase, foreign file, or damaged ciphertext.
    #[error("cannot unseal: {0}")]
    Unseal(String),
}

impl Classify for BundleError {
    fn class(&self) -> ErrorClass {
        match self {
            BundleError::Io(e) => e.class(),
            BundleError::Json(e) => e.class(),
            BundleError::Archive(_) | BundleError::Empty | BundleError::Seal(_) => ErrorClass::Partial,
            _ => ErrorClass::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
