//! hostlog common types.
//!
//! This crate provides foundational types shared by the bundle and core crates:
//! - Record kinds and timestamped records
//! - Cache keys derived from record creation instants
//! - Report artifact naming
//! - The error taxonomy used to classify failures in logs

pub mod error;
pub mod id;
pub mod record;

pub use error::{Classify, ErrorClass};
pub use id::{embedded_day, ArtifactName, CacheKey, CacheKeyError, ARTIFACT_EXTENSION, CACHE_EXTENSION};
pub use record::{EventType, Payload, Record, RecordKind};

/// Schema version stamped into report documents and bundle manifests.
pub const SCHEMA_VERSION: &str = "1.0.0";
