//! Recipient file handling.
//!
//! The recipient file is read fresh on every delivery cycle. Its first line
//! decides the outcome: `do not send` (any case) disables delivery, a line
//! containing `@` is the recipient, anything else falls back to the
//! configured fallback address.

use std::io;
use std::path::Path;
use tracing::{debug, info};

const DISABLED_SENTINEL: &str = "do not send";

const TEMPLATE: &str = "\
do not send
# Replace the first line with the address sealed reports should be mailed to,
# for example: reports@example.com
# Keep `do not send` on the first line to disable delivery.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientConfig {
    Disabled,
    Address(String),
}

/// Resolve the recipient from `path`, using `fallback` when the file holds
/// no decision. Only the sentinel line disables delivery.
pub fn resolve_recipient(path: &Path, fallback: &str) -> RecipientConfig {
    let fallback = || RecipientConfig::Address(fallback.to_string());

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Recipient file unreadable, using fallback");
            return fallback();
        }
    };
    let first = text.lines().next().unwrap_or("").trim();

    if first.eq_ignore_ascii_case(DISABLED_SENTINEL) {
        RecipientConfig::Disabled
    } else if first.contains('@') {
        RecipientConfig::Address(first.to_string())
    } else {
        fallback()
    }
}

/// Write the instruction template unless the file already exists.
pub fn ensure_recipient_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, TEMPLATE)?;
    info!(path = %path.display(), "Created recipient file; delivery disabled until edited");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, text: &str) -> std::path::PathBuf {
        let path = dir.path().join("recipient.conf");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_disabled_any_case() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "  Do Not Send \nops@example.com\n");
        assert_eq!(resolve_recipient(&path, "fb@example.com"), RecipientConfig::Disabled);
    }

    #[test]
    fn test_address_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "ops@example.com\n");
        assert_eq!(
            resolve_recipient(&path, "fb@example.com"),
            RecipientConfig::Address("ops@example.com".into())
        );
    }

    #[test]
    fn test_fallbacks() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.conf");
        assert_eq!(
            resolve_recipient(&missing, "fb@example.com"),
            RecipientConfig::Address("fb@example.com".into())
        );

        let empty = write(&dir, "");
        assert_eq!(
            resolve_recipient(&empty, "fb@example.com"),
            RecipientConfig::Address("fb@example.com".into())
        );
        let junk = write(&dir, "nobody home\n");
        assert_eq!(
            resolve_recipient(&junk, "fb@example.com"),
            RecipientConfig::Address("fb@example.com".into())
        );
    }

    #[test]
    fn test_template_is_disabled_and_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipient.conf");
        assert!(ensure_recipient_file(&path).unwrap());
        assert_eq!(resolve_recipient(&path, "fb@example.com"), RecipientConfig::Disabled);

        std::fs::write(&path, "ops@example.com\n").unwrap();
        assert!(!ensure_recipient_file(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ops@example.com\n");
    }
}
