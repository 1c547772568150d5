//! Configuration loading and validation for the hostlog agent.
//!
//! This module handles:
//! - Config file resolution order (CLI > env > XDG > /etc > defaults)
//! - TOML parsing with every field defaulted
//! - Semantic validation (non-zero intervals, usable ports, passphrase set)
//! - A masked rendering for `hostlog config`

use crate::delivery::SenderCredential;
use hl_common::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name looked up in every candidate directory.
pub const CONFIG_FILE_NAME: &str = "hostlog.toml";

/// Directory name under the XDG config home and /etc.
const CONFIG_DIR_NAME: &str = "hostlog";

/// Passphrase used when none is configured.
pub const DEFAULT_PASSPHRASE: &str = "hostlog-reports";

/// Recipient used when the recipient file does not name one.
pub const DEFAULT_FALLBACK_RECIPIENT: &str = "reports@hostlog.local";

const MASK: &str = "********";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl Classify for ConfigError {
    fn class(&self) -> ErrorClass {
        match self {
            ConfigError::Render(_) => ErrorClass::Fatal,
            _ => ErrorClass::Configuration,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of caches, reports and delivery state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Executables under these directories are not reported unless they own
    /// a visible window. Compared case-insensitively.
    pub system_dirs: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            system_dirs: default_system_dirs(),
        }
    }
}

fn default_system_dirs() -> Vec<String> {
    if cfg!(windows) {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
        vec![root]
    } else if cfg!(target_os = "macos") {
        ["/System", "/usr/libexec", "/usr/sbin", "/sbin"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        ["/usr/lib/systemd", "/lib/systemd", "/usr/libexec", "/usr/sbin", "/sbin"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Passphrase sealed reports are encrypted with.
    pub passphrase: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            passphrase: DEFAULT_PASSPHRASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Overrides the persisted device id used in report names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Overrides the host name used in delivery bundles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub enabled: bool,
    pub initial_delay_secs: u64,
    pub retry_interval_secs: u64,
    pub max_retries: u32,
    /// `host:port` dialled to decide whether the network is up.
    pub probe_address: String,
    pub probe_timeout_secs: u64,
    pub send_timeout_secs: u64,
    /// Used when the recipient file is absent, unreadable, empty or holds
    /// no address.
    pub fallback_recipient: String,
    /// Tried in order; the first success wins.
    pub senders: Vec<SenderCredential>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: 300,
            retry_interval_secs: 600,
            max_retries: 3,
            probe_address: "114.114.114.114:53".to_string(),
            probe_timeout_secs: 3,
            send_timeout_secs: 60,
            fallback_recipient: DEFAULT_FALLBACK_RECIPIENT.to_string(),
            senders: Vec::new(),
        }
    }
}

/// Full agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub report: ReportConfig,
    pub identity: IdentityConfig,
    pub delivery: DeliveryConfig,
}

impl AgentConfig {
    /// Parse TOML text.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Semantic validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.monitor.poll_interval_secs == 0 {
            return invalid("monitor.poll_interval_secs must be positive".into());
        }
        if self.report.passphrase.is_empty() {
            return invalid("report.passphrase must not be empty".into());
        }

        let delivery = &self.delivery;
        if delivery.retry_interval_secs == 0 {
            return invalid("delivery.retry_interval_secs must be positive".into());
        }
        if delivery.max_retries == 0 {
            return invalid("delivery.max_retries must be positive".into());
        }
        if delivery.probe_timeout_secs == 0 || delivery.send_timeout_secs == 0 {
            return invalid("delivery timeouts must be positive".into());
        }
        match delivery.probe_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().map_or(false, |p| p != 0) => {}
            _ => {
                return invalid(format!(
                    "delivery.probe_address '{}' is not host:port",
                    delivery.probe_address
                ))
            }
        }
        for sender in &delivery.senders {
            if sender.host.is_empty() {
                return invalid("delivery.senders entry has an empty host".into());
            }
            if sender.port == 0 {
                return invalid(format!("delivery sender {} has port 0", sender.host));
            }
        }
        if !delivery.fallback_recipient.trim().contains('@') {
            return invalid(format!(
                "delivery.fallback_recipient '{}' is not an address",
                delivery.fallback_recipient
            ));
        }

        Ok(())
    }

    /// Copy with secrets replaced for display.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.report.passphrase = MASK.to_string();
        for sender in &mut copy.delivery.senders {
            sender.secret = MASK.to_string();
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file (CLI `--config` or `HOSTLOG_CONFIG`).
    pub config_path: Option<PathBuf>,
    /// Overrides `storage.base_dir` (CLI `--base-dir` or `HOSTLOG_BASE_DIR`).
    pub base_dir: Option<PathBuf>,
}

/// Loaded configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AgentConfig,
    /// File the config was read from; `None` means built-in defaults.
    pub path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit config path (CLI flag or `HOSTLOG_CONFIG`)
/// 2. `HOSTLOG_CONFIG_DIR/hostlog.toml`
/// 3. XDG config home (`~/.config/hostlog/hostlog.toml`)
/// 4. `/etc/hostlog/hostlog.toml`
/// 5. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    load_config_with(options, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(options: &ConfigOptions, lookup: F) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = resolve_config_path(options, &lookup)?;

    let mut config = match &path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
                path: path.clone(),
                source,
            })?;
            AgentConfig::from_toml_str(&text, path)?
        }
        None => AgentConfig::default(),
    };

    if let Some(base_dir) = &options.base_dir {
        config.storage.base_dir = Some(base_dir.clone());
    }

    config.validate()?;
    Ok(ResolvedConfig { config, path })
}

fn resolve_config_path<F>(options: &ConfigOptions, lookup: &F) -> Result<Option<PathBuf>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = options
        .config_path
        .clone()
        .or_else(|| lookup("HOSTLOG_CONFIG").map(PathBuf::from));
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound { path });
        }
        return Ok(Some(path));
    }

    let mut candidates = Vec::new();
    if let Some(dir) = lookup("HOSTLOG_CONFIG_DIR") {
        candidates.push(PathBuf::from(dir).join(CONFIG_FILE_NAME));
    }
    let xdg = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir);
    if let Some(dir) = xdg {
        candidates.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    candidates.push(Path::new("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));

    Ok(candidates.into_iter().find(|p| p.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_validate() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.delivery.initial_delay_secs, 300);
        assert_eq!(config.delivery.retry_interval_secs, 600);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.probe_address, "114.114.114.114:53");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let text = r#"
            [delivery]
            max_retries = 5

            [[delivery.senders]]
            host = "smtp.example.com"
            port = 465
            identity = "agent@example.com"
            secret = "s3cret"
        "#;
        let config = AgentConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.delivery.max_retries, 5);
        assert_eq!(config.delivery.retry_interval_secs, 600);
        assert_eq!(config.delivery.senders.len(), 1);
        assert_eq!(config.delivery.senders[0].port, 465);
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let mut config = AgentConfig::default();
        config.delivery.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.monitor.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.report.passphrase.clear();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.delivery.probe_address = "114.114.114.114:0".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_recipient_defaults_and_must_be_an_address() {
        let config = AgentConfig::default();
        assert_eq!(config.delivery.fallback_recipient, DEFAULT_FALLBACK_RECIPIENT);

        let mut config = AgentConfig::default();
        config.delivery.fallback_recipient = "nobody".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfig::default();
        config.delivery.fallback_recipient.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sender_port_zero() {
        let mut config = AgentConfig::default();
        config.delivery.senders.push(SenderCredential::new("smtp.example.com", 0, "a@b", "x"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = AgentConfig::default();
        config.delivery.senders.push(SenderCredential::new("smtp.example.com", 465, "a@b", "hunter2"));
        let rendered = config.masked().to_toml().unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains(DEFAULT_PASSPHRASE));
        assert!(rendered.contains("smtp.example.com"));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let options = ConfigOptions {
            config_path: Some(PathBuf::from("/nonexistent/hostlog.toml")),
            base_dir: None,
        };
        assert!(matches!(
            load_config_with(&options, no_env),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_config_dir_env_and_base_dir_override() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[storage]\nbase_dir = \"/from/file\"\n[monitor]\npoll_interval_secs = 9\n",
        )
        .unwrap();
        let config_dir = dir.path().to_string_lossy().to_string();
        let lookup = move |name: &str| (name == "HOSTLOG_CONFIG_DIR").then(|| config_dir.clone());

        let resolved = load_config_with(&ConfigOptions::default(), &lookup).unwrap();
        assert_eq!(resolved.path, Some(dir.path().join(CONFIG_FILE_NAME)));
        assert_eq!(resolved.config.monitor.poll_interval_secs, 9);
        assert_eq!(resolved.config.storage.base_dir, Some(PathBuf::from("/from/file")));

        let options = ConfigOptions {
            config_path: None,
            base_dir: Some(PathBuf::from("/from/cli")),
        };
        let resolved = load_config_with(&options, &lookup).unwrap();
        assert_eq!(resolved.config.storage.base_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[delivery\nmax_retries = ").unwrap();
        let options = ConfigOptions {
            config_path: Some(path),
            base_dir: None,
        };
        let err = load_config_with(&options, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
