//! sysinfo-backed snapshot source and process probe.

use super::{CollectError, ProcessInfo, ProcessProbe, SnapshotSource};
use crate::identity::local_tz_label;
use hl_bundle::HostInfo;
use hl_common::Payload;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Instant;
use sysinfo::{Components, Disks, Networks, Pid, System};
use tracing::trace;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Hardware snapshots from sysinfo. Owns the handles and the previous
/// network sample used for rate computation.
pub struct SysinfoSource {
    device_name: String,
    system: System,
    networks: Networks,
    disks: Disks,
    components: Components,
    last_network_sample: Instant,
}

impl SysinfoSource {
    pub fn new(device_name: impl Into<String>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            device_name: device_name.into(),
            system,
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            last_network_sample: Instant::now(),
        }
    }

    fn cpu_temperature(&self) -> Value {
        self.components
            .iter()
            .filter(|c| {
                let label = c.label().to_lowercase();
                label.contains("cpu") || label.contains("package") || label.contains("core")
            })
            .map(|c| c.temperature())
            .filter(|t| t.is_finite() && *t > 0.0)
            .fold(None, |max: Option<f32>, t| Some(max.map_or(t, |m| m.max(t))))
            .map(|t| json!(round2(t as f64)))
            .unwrap_or_else(|| json!("N/A"))
    }
}

impl SnapshotSource for SysinfoSource {
    fn hardware_snapshot(&mut self) -> Result<Payload, CollectError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();
        self.components.refresh();
        self.networks.refresh();

        let elapsed = self.last_network_sample.elapsed().as_secs_f64().max(1.0);
        self.last_network_sample = Instant::now();

        let total = self.system.total_memory() as f64;
        if total <= 0.0 {
            return Err(CollectError::Unavailable("memory totals not readable".into()));
        }
        let available = self.system.available_memory() as f64;

        let mut adapters: Vec<(&String, f64, f64)> = self
            .networks
            .iter()
            .map(|(name, data)| {
                (
                    name,
                    round2(data.transmitted() as f64 / 1024.0 / elapsed),
                    round2(data.received() as f64 / 1024.0 / elapsed),
                )
            })
            .collect();
        adapters.sort_by(|a, b| a.0.cmp(b.0));

        let mut payload = Payload::new();
        payload.insert(
            "cpu_util".into(),
            json!(round2(self.system.global_cpu_info().cpu_usage() as f64)),
        );
        payload.insert("cpu_temp".into(), self.cpu_temperature());
        payload.insert("mem_util".into(), json!(round2((total - available) / total * 100.0)));
        payload.insert("mem_avail".into(), json!(round2(available / GIB)));
        payload.insert(
            "disk_avail".into(),
            Value::Array(
                self.disks
                    .iter()
                    .map(|d| json!(round2(d.available_space() as f64 / GIB)))
                    .collect(),
            ),
        );
        payload.insert(
            "net_adapter".into(),
            Value::Array(adapters.iter().map(|a| json!(a.0)).collect()),
        );
        payload.insert(
            "net_upload".into(),
            Value::Array(adapters.iter().map(|a| json!(a.1)).collect()),
        );
        payload.insert(
            "net_download".into(),
            Value::Array(adapters.iter().map(|a| json!(a.2)).collect()),
        );

        trace!(keys = payload.len(), "Hardware snapshot taken");
        Ok(payload)
    }

    fn host_info(&mut self) -> HostInfo {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh_list();
        self.networks.refresh_list();

        let mut cpus: Vec<String> = self
            .system
            .cpus()
            .iter()
            .map(|c| c.brand().trim().to_string())
            .collect();
        cpus.dedup();

        let mut adapters: Vec<String> = self.networks.iter().map(|(name, _)| name.clone()).collect();
        adapters.sort();

        HostInfo {
            device_name: self.device_name.clone(),
            os: System::name().unwrap_or_else(|| "N/A".into()),
            os_version: System::long_os_version()
                .or_else(System::os_version)
                .unwrap_or_else(|| "N/A".into()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "N/A".into()),
            cpus,
            total_memory_bytes: self.system.total_memory(),
            disks: self
                .disks
                .iter()
                .map(|d| {
                    format!(
                        "{} ({}) {:.2} GiB",
                        d.name().to_string_lossy(),
                        d.mount_point().display(),
                        d.total_space() as f64 / GIB
                    )
                })
                .collect(),
            adapters,
            timezone: local_tz_label(),
        }
    }
}

/// Process enumeration from sysinfo.
///
/// Window ownership is not observable through sysinfo, so
/// [`ProcessProbe::has_visible_window`] always answers `false` and only the
/// path rule decides loggability.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn live_pids(&mut self) -> Result<BTreeSet<u32>, CollectError> {
        self.system.refresh_processes();
        let pids: BTreeSet<u32> = self.system.processes().keys().map(|p| p.as_u32()).collect();
        if pids.is_empty() {
            return Err(CollectError::Unavailable("process table is empty".into()));
        }
        Ok(pids)
    }

    fn describe(&mut self, pid: u32) -> Result<ProcessInfo, CollectError> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or(CollectError::NoSuchProcess(pid))?;
        Ok(ProcessInfo {
            pid,
            name: process.name().to_string(),
            path: process
                .exe()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        })
    }

    fn has_visible_window(&mut self, _pid: u32) -> bool {
        false
    }
}
