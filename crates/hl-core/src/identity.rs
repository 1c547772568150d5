//! Device identity and timezone labelling.

use crate::config::IdentityConfig;
use crate::layout::StorageLayout;
use chrono::Local;
use std::io;
use tracing::{debug, info, warn};

/// Name used when the host name cannot be read.
pub const UNKNOWN_DEVICE: &str = "UnknownDevice";

/// How this machine names its reports and bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Prefix of every report artifact name.
    pub device_id: String,
    /// Names delivery bundles and mail subjects.
    pub device_name: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
        }
    }

    /// Resolve the identity: config overrides first, then the persisted id
    /// and the host name.
    pub fn resolve(layout: &StorageLayout, config: &IdentityConfig) -> io::Result<Self> {
        let device_id = match config.device_id.as_deref().map(sanitize).filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => persisted_device_id(layout)?,
        };

        let device_name = config
            .device_name
            .as_deref()
            .map(sanitize)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(host_device_name);

        debug!(device_id = %device_id, device_name = %device_name, "Device identity resolved");
        Ok(Self::new(device_id, device_name))
    }
}

/// Read `device.id`, creating it with a fresh UUID on first run.
fn persisted_device_id(layout: &StorageLayout) -> io::Result<String> {
    let path = layout.device_id_path();
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let id = sanitize(&text);
            if !id.is_empty() {
                return Ok(id);
            }
            warn!(path = %path.display(), "device.id is empty, regenerating");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, format!("{}\n", id))?;
    info!(device_id = %id, path = %path.display(), "Generated device id");
    Ok(id)
}

fn host_device_name() -> String {
    hostname::get()
        .ok()
        .map(|name| sanitize(&name.to_string_lossy()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
}

/// Keep names usable as `_`-separated file name fields.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '_' | '/' | '\\' | ':' | '(' | ')' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect()
}

/// `UTC±H` label for an offset from UTC in seconds; minutes are dropped.
pub fn tz_label(offset_secs: i32) -> String {
    format!("UTC{:+}", offset_secs / 3600)
}

/// Label of the current local offset.
pub fn local_tz_label() -> String {
    tz_label(Local::now().offset().local_minus_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tz_label() {
        assert_eq!(tz_label(8 * 3600), "UTC+8");
        assert_eq!(tz_label(-5 * 3600), "UTC-5");
        assert_eq!(tz_label(0), "UTC+0");
        assert_eq!(tz_label(5 * 3600 + 1800), "UTC+5");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(" my_box "), "my-box");
        assert_eq!(sanitize("a/b(c)"), "a-b-c-");
    }

    #[test]
    fn test_device_id_persists() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.prepare().unwrap();

        let first = DeviceIdentity::resolve(&layout, &IdentityConfig::default()).unwrap();
        let second = DeviceIdentity::resolve(&layout, &IdentityConfig::default()).unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert!(!first.device_id.contains('_'));
        assert!(layout.device_id_path().exists());
    }

    #[test]
    fn test_config_overrides() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.prepare().unwrap();

        let config = IdentityConfig {
            device_id: Some("lab_07".into()),
            device_name: Some("Front Desk".into()),
        };
        let identity = DeviceIdentity::resolve(&layout, &config).unwrap();
        assert_eq!(identity.device_id, "lab-07");
        assert_eq!(identity.device_name, "Front-Desk");
        assert!(!layout.device_id_path().exists());
    }
}
