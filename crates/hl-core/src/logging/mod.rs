//! tracing setup for the agent and the one-shot commands.
//!
//! Command payloads (JSON summaries, rendered TOML) own stdout. Log lines go
//! to stderr or are appended to a file, either human formatted or as JSONL.
//! Common structured fields: `kind`, `day`, `key`, `artifact`, `sender`, `class`.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events pass the level filter.
const LOG_TARGETS: [&str; 4] = ["hl_core", "hl_bundle", "hl_common", "hostlog"];

fn filter_for(level: LogLevel) -> EnvFilter {
    let directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber described by `config`.
///
/// Only the first call installs anything. Errors come from opening the log file.
pub fn init_logging(config: &LogConfig) -> std::io::Result<()> {
    let (writer, use_ansi) = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            std::io::stderr().is_terminal(),
        ),
    };

    let filter = filter_for(config.level);
    let result = match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_thread_names(true)
                .with_ansi(use_ansi);
            if config.timestamps {
                tracing_subscriber::registry().with(filter).with(layer).try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => {
            let layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_writer(writer);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };

    if result.is_err() {
        tracing::debug!("subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_mentions_every_target() {
        let rendered = filter_for(LogLevel::Debug).to_string();
        for target in LOG_TARGETS {
            assert!(rendered.contains(&format!("{}=debug", target)), "{}", rendered);
        }
    }

    #[test]
    fn test_init_logging_to_file_creates_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/agent.log");
        let config = LogConfig::default().with_file(Some(path.clone()));
        init_logging(&config).unwrap();
        assert!(path.exists());
    }
}
