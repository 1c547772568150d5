//! hostlog agent library.
//!
//! This library provides the agent's building blocks:
//! - Record cache and day-boundary aggregation into sealed reports
//! - Process start/close monitoring and minute-aligned hardware sampling
//! - Idempotent delivery of sealed reports with sender fallback
//! - Configuration, logging, exit codes and the agent lifecycle
//!
//! The binary entry point is in `main.rs`.

pub mod aggregate;
pub mod cache;
pub mod collect;
pub mod config;
pub mod delivery;
pub mod exit_codes;
pub mod identity;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod report;
pub mod sampler;
