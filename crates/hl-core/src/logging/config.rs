//! Logging configuration.
//!
//! Supports configuration via:
//! - Environment variables (HOSTLOG_LOG, RUST_LOG, HOSTLOG_LOG_FORMAT, HOSTLOG_LOG_FILE)
//! - CLI flags (-v/-q, --log-format, --log-file)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line.
    Jsonl,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "text" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format '{}' (expected human or jsonl)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum level that is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const NAMES: [(LogLevel, &'static str, LevelFilter); 6] = [
        (LogLevel::Trace, "trace", LevelFilter::TRACE),
        (LogLevel::Debug, "debug", LevelFilter::DEBUG),
        (LogLevel::Info, "info", LevelFilter::INFO),
        (LogLevel::Warn, "warn", LevelFilter::WARN),
        (LogLevel::Error, "error", LevelFilter::ERROR),
        (LogLevel::Off, "off", LevelFilter::OFF),
    ];

    fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(level, _, _)| *level == self)
            .map_or("info", |(_, name, _)| *name)
    }

    /// Most verbose level named anywhere in a `RUST_LOG`-style directive list.
    fn from_directives(directives: &str) -> Option<Self> {
        let directives = directives.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .filter(|(level, _, _)| *level != LogLevel::Off)
            .find(|(_, name, _)| directives.contains(name))
            .map(|(level, _, _)| *level)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = match s.to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "none" | "quiet" => "off".to_string(),
            other => other.to_string(),
        };
        Self::NAMES
            .iter()
            .find(|(_, name, _)| *name == wanted)
            .map(|(level, _, _)| *level)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        LogLevel::NAMES
            .iter()
            .find(|(l, _, _)| *l == level)
            .map_or(LevelFilter::INFO, |(_, _, filter)| *filter)
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Whether to include timestamps in human output.
    pub timestamps: bool,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
            file: None,
        }
    }
}

impl LogConfig {
    /// Create config from environment and CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), cli_level, cli_format)
    }

    /// Same as [`LogConfig::from_env`] with an explicit variable lookup.
    pub fn from_lookup<F>(lookup: F, cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();

        // HOSTLOG_LOG wins over RUST_LOG
        let env_level = match lookup("HOSTLOG_LOG") {
            Some(val) => val.parse::<LogLevel>().ok(),
            None => lookup("RUST_LOG").and_then(|val| LogLevel::from_directives(&val)),
        };
        if let Some(level) = env_level {
            config.level = level;
        }

        if let Some(val) = lookup("HOSTLOG_LOG_FORMAT") {
            if let Ok(format) = val.parse::<LogFormat>() {
                config.format = format;
            }
        }

        if let Some(val) = lookup("HOSTLOG_LOG_FILE") {
            if !val.trim().is_empty() {
                config.file = Some(PathBuf::from(val));
            }
        }

        if let Some(level) = cli_level {
            config.level = level;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }

        config
    }

    /// Log to `path` unless a file was already chosen.
    pub fn with_default_file(mut self, path: PathBuf) -> Self {
        if self.file.is_none() {
            self.file = Some(path);
        }
        self
    }

    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.file = path;
        }
        self
    }
}
