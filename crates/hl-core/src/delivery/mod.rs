//! Idempotent delivery of sealed reports.
//!
//! A cycle resolves the recipient, checks connectivity, selects every
//! artifact not yet in [`DeliveryHistory`], bundles them into one archive and
//! walks the sender chain until one transmission succeeds. Only then are the
//! bundled names committed to the history. The archive is removed whatever
//! the outcome.

pub mod history;
pub mod probe;
pub mod recipient;
pub mod sender;

pub use history::{DeliveryHistory, HistoryError};
pub use probe::{ConnectivityProbe, TcpProbe};
pub use recipient::{ensure_recipient_file, resolve_recipient, RecipientConfig};
pub use sender::{OutgoingMessage, SenderCredential, SmtpsTransport, Transport, TransportError};

use crate::config::DeliveryConfig;
use crate::layout::StorageLayout;
use crate::lifecycle::ShutdownSignal;
use crate::report::ReportStore;
use hl_bundle::BundleWriter;
use hl_common::{embedded_day, Classify};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Label used when no candidate name carries a day.
pub const UNDATED_LABEL: &str = "undated";

/// Batch label from the days embedded in artifact names: the earliest day, or
/// `earliest~latest` when they differ.
pub fn batch_label<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let days: BTreeSet<String> = names
        .into_iter()
        .filter_map(|name| embedded_day(name.as_ref()).map(str::to_string))
        .collect();
    match (days.iter().next(), days.iter().next_back()) {
        (Some(first), Some(last)) if first != last => format!("{}~{}", first, last),
        (Some(first), _) => first.clone(),
        _ => UNDATED_LABEL.to_string(),
    }
}

/// Result of one delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The recipient file disables delivery.
    Disabled,
    Offline,
    NothingToSend,
    Delivered {
        label: String,
        count: usize,
        sender: String,
    },
    Failed {
        reason: String,
    },
}

impl CycleOutcome {
    /// Whether the loop is done for this run.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Disabled | CycleOutcome::NothingToSend | CycleOutcome::Delivered { .. }
        )
    }

    fn failed(reason: impl Into<String>) -> Self {
        CycleOutcome::Failed {
            reason: reason.into(),
        }
    }
}

/// Result of a whole dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub cycles: u32,
    /// Outcome of the last cycle run, if any ran.
    pub last: Option<CycleOutcome>,
    pub interrupted: bool,
}

/// Removes the bundle file when dropped.
struct BundleGuard(PathBuf);

impl Drop for BundleGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "Failed to remove bundle"),
        }
    }
}

pub struct Dispatcher {
    layout: StorageLayout,
    reports: ReportStore,
    history: Arc<DeliveryHistory>,
    device_name: String,
    config: DeliveryConfig,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ConnectivityProbe>,
}

impl Dispatcher {
    /// Dispatcher using SMTPS and a TCP connectivity probe built from `config`.
    pub fn new(
        layout: StorageLayout,
        reports: ReportStore,
        history: Arc<DeliveryHistory>,
        device_name: impl Into<String>,
        config: DeliveryConfig,
    ) -> Self {
        let transport = Arc::new(SmtpsTransport::new(Duration::from_secs(config.send_timeout_secs)));
        let probe = Arc::new(TcpProbe::new(
            config.probe_address.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        ));
        Self {
            layout,
            reports,
            history,
            device_name: device_name.into(),
            config,
            transport,
            probe,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Artifacts not yet delivered, ordered by file name.
    pub fn pending(&self) -> Result<Vec<PathBuf>, crate::report::StoreError> {
        Ok(self
            .reports
            .list_artifacts()?
            .into_iter()
            .filter(|path| !self.history.contains(&file_name(path)))
            .collect())
    }

    /// One delivery attempt.
    pub fn run_cycle(&self) -> CycleOutcome {
        let recipient = match resolve_recipient(
            &self.layout.recipient_path(),
            &self.config.fallback_recipient,
        ) {
            RecipientConfig::Disabled => {
                info!("Delivery disabled by recipient file");
                return CycleOutcome::Disabled;
            }
            RecipientConfig::Address(address) => address,
        };

        if !self.probe.is_online() {
            warn!("Network unreachable, delivery skipped");
            return CycleOutcome::Offline;
        }

        let candidates = match self.pending() {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, class = %e.class(), "Failed to list reports");
                return CycleOutcome::failed(e.to_string());
            }
        };
        if candidates.is_empty() {
            info!("No new reports to deliver");
            return CycleOutcome::NothingToSend;
        }

        let names: Vec<String> = candidates.iter().map(|p| file_name(p)).collect();
        let label = batch_label(&names);
        let bundle_path = self.layout.bundle_path(&self.device_name, &label);
        let _guard = BundleGuard(bundle_path.clone());

        let attachment = match self.bundle(&candidates, &label, &bundle_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, class = %e.class(), "Failed to build delivery bundle");
                return CycleOutcome::failed(e.to_string());
            }
        };
        info!(count = names.len(), %label, bytes = attachment.len(), "Delivery bundle ready");

        let subject = format!("Logs_{}({})", self.device_name, label);
        let message = OutgoingMessage {
            to: recipient.clone(),
            body: format!("{}'s Logs", self.device_name),
            attachment_name: file_name(&bundle_path),
            subject,
            attachment,
        };

        let mut last_error = String::from("no usable sender configured");
        let mut delivered_by = None;
        for sender in &self.config.senders {
            if sender.is_placeholder() {
                continue;
            }
            info!(sender = %sender.host, "Sending bundle");
            match self.transport.send(sender, &message) {
                Ok(()) => {
                    delivered_by = Some(sender.host.clone());
                    break;
                }
                Err(e) => {
                    error!(sender = %sender.host, error = %e, class = %e.class(), "Send failed");
                    last_error = e.to_string();
                }
            }
        }

        let Some(sender) = delivered_by else {
            error!(reason = %last_error, "All senders failed");
            return CycleOutcome::failed(last_error);
        };

        info!(%recipient, sender = %sender, count = names.len(), "Bundle delivered");
        let count = names.len();
        if let Err(e) = self.history.commit(names) {
            error!(error = %e, class = %e.class(), "Failed to persist delivery history");
        }
        CycleOutcome::Delivered {
            label,
            count,
            sender,
        }
    }

    fn bundle(&self, candidates: &[PathBuf], label: &str, path: &Path) -> hl_bundle::Result<Vec<u8>> {
        let mut writer = BundleWriter::new(&self.device_name, label);
        for artifact in candidates {
            writer.add_path(artifact)?;
        }
        writer.write(path)?;
        Ok(std::fs::read(path)?)
    }

    /// Wait out the quiet period, then run cycles until one completes, the
    /// retry budget is spent or shutdown is requested.
    pub fn run(&self, shutdown: &ShutdownSignal) -> DispatchSummary {
        let mut summary = DispatchSummary {
            cycles: 0,
            last: None,
            interrupted: false,
        };

        info!(delay_secs = self.config.initial_delay_secs, "Dispatcher waiting");
        if shutdown.wait(Duration::from_secs(self.config.initial_delay_secs)) {
            summary.interrupted = true;
            return summary;
        }

        let retry_interval = Duration::from_secs(self.config.retry_interval_secs);
        while !shutdown.is_triggered() {
            let outcome = self.run_cycle();
            summary.cycles += 1;
            let complete = outcome.is_complete();
            summary.last = Some(outcome);
            if complete {
                info!(cycles = summary.cycles, "Delivery task completed");
                return summary;
            }
            if summary.cycles >= self.config.max_retries {
                warn!(cycles = summary.cycles, "Delivery retries exhausted");
                return summary;
            }
            info!(retry_in_secs = retry_interval.as_secs(), "Delivery will retry");
            if shutdown.wait(retry_interval) {
                break;
            }
        }
        summary.interrupted = true;
        summary
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
