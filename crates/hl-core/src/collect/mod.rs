//! Seams to the machine: hardware snapshots and process enumeration.
//!
//! The core only talks to [`SnapshotSource`] and [`ProcessProbe`]; the
//! sysinfo-backed implementations live in [`system`].

pub mod system;

pub use system::{SysinfoProbe, SysinfoSource};

use hl_bundle::HostInfo;
use hl_common::{Classify, ErrorClass, Payload};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),

    #[error("process {0} not found")]
    NoSuchProcess(u32),
}

impl Classify for CollectError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Transient
    }
}

/// Produces hardware snapshots and static host information.
pub trait SnapshotSource: Send {
    /// Current machine state as an opaque payload.
    fn hardware_snapshot(&mut self) -> Result<Payload, CollectError>;

    /// Static description of the host, attached to sealed reports.
    fn host_info(&mut self) -> HostInfo;
}

/// What a process looks like to the event monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Executable path; empty when it cannot be read.
    pub path: String,
}

/// Enumerates processes.
pub trait ProcessProbe: Send {
    fn live_pids(&mut self) -> Result<BTreeSet<u32>, CollectError>;

    fn describe(&mut self, pid: u32) -> Result<ProcessInfo, CollectError>;

    /// Whether `pid` owns a visible top-level window with a title.
    fn has_visible_window(&mut self, pid: u32) -> bool;
}
