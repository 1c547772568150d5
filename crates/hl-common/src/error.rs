//! Error taxonomy for hostlog.
//!
//! Every failure in the agent falls into one of four classes, which decide
//! how the owning loop reacts:
//!
//! | class           | reaction                                              |
//! |-----------------|-------------------------------------------------------|
//! | `transient`     | retried on the owning loop's own schedule             |
//! | `partial`       | isolated to one kind/day, siblings continue           |
//! | `configuration` | degrade to defaults or skip the cycle entirely        |
//! | `fatal`         | ends the current loop only; other loops keep running  |
//!
//! Crate error enums implement [`Classify`] so log lines can carry the class
//! as a structured field (`class = %err.class()`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network unreachable, lock contention, temporary file errors.
    Transient,
    /// One kind's report failed; the rest of the run proceeds.
    Partial,
    /// Unreadable or invalid configuration.
    Configuration,
    /// Unexpected failure that ends the current loop.
    Fatal,
}

impl ErrorClass {
    /// Whether the owning loop should try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Partial)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Partial => write!(f, "partial"),
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Implemented by error types that can report their [`ErrorClass`].
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for std::io::Error {
    fn class(&self) -> ErrorClass {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::Unsupported => {
                ErrorClass::Fatal
            }
            _ => ErrorClass::Transient,
        }
    }
}

impl Classify for serde_json::Error {
    fn class(&self) -> ErrorClass {
        if self.is_io() {
            ErrorClass::Transient
        } else {
            ErrorClass::Partial
        }
    }
}
