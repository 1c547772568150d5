//! Turning a day's records into sealed artifact bytes.

use super::Report;
use hl_bundle::{decrypt_bytes, encrypt_bytes, BundleError, HostInfo, ReportDocument};
use hl_common::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("sealer rejected report: {0}")]
    Rejected(String),
}

impl Classify for SealError {
    fn class(&self) -> ErrorClass {
        match self {
            SealError::Bundle(e) => e.class(),
            SealError::Rejected(_) => ErrorClass::Partial,
        }
    }
}

/// Produces the bytes of a sealed report artifact.
pub trait ReportSealer: Send + Sync {
    fn seal(&self, report: &Report) -> Result<Vec<u8>, SealError>;
}

/// Seals reports as passphrase-encrypted JSON documents.
#[derive(Debug, Clone)]
pub struct EncryptedSealer {
    passphrase: String,
    device_id: String,
    timezone: String,
    host: HostInfo,
}

impl EncryptedSealer {
    pub fn new(
        passphrase: impl Into<String>,
        device_id: impl Into<String>,
        timezone: impl Into<String>,
        host: HostInfo,
    ) -> Self {
        Self {
            passphrase: passphrase.into(),
            device_id: device_id.into(),
            timezone: timezone.into(),
            host,
        }
    }
}

impl ReportSealer for EncryptedSealer {
    fn seal(&self, report: &Report) -> Result<Vec<u8>, SealError> {
        let document = ReportDocument::new(
            report.kind,
            report.day,
            &self.device_id,
            &self.timezone,
            self.host.clone(),
            &report.records,
        );
        let plain = document.to_json_bytes()?;
        Ok(encrypt_bytes(&plain, &self.passphrase)?)
    }
}

/// Decrypt and parse an artifact produced by [`EncryptedSealer`].
pub fn unseal(data: &[u8], passphrase: &str) -> Result<ReportDocument, SealError> {
    let plain = decrypt_bytes(data, passphrase)?;
    Ok(ReportDocument::from_json_bytes(&plain)?)
}
