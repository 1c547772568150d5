//! Agent lifecycle: background threads, day-change rollups and cooperative
//! shutdown.
//!
//! ```text
//! startup rollup
//!   ├── thread hostlog-monitor   EventMonitor::run   (every poll interval)
//!   ├── thread hostlog-dispatch  Dispatcher::run     (once per process run)
//!   └── calling thread           Sampler::tick + rollup on day change
//! ```
//!
//! Every loop waits on the same [`ShutdownSignal`], so a trigger wakes all of
//! them at once.

use crate::aggregate::{Aggregator, RollupSummary};
use crate::cache::{CacheError, CacheStore};
use crate::collect::{ProcessProbe, SnapshotSource};
use crate::config::AgentConfig;
use crate::delivery::{
    ensure_recipient_file, ConnectivityProbe, DeliveryHistory, DispatchSummary, Dispatcher, Transport,
};
use crate::identity::{local_tz_label, DeviceIdentity};
use crate::layout::StorageLayout;
use crate::monitor::{Classifier, EventMonitor};
use crate::report::{EncryptedSealer, ReportSealer, ReportStore};
use crate::sampler::{delay_until_next_minute, Sampler};
use chrono::{Local, NaiveDate};
use hl_bundle::HostInfo;
use hl_common::{Classify, ErrorClass};
use std::any::Any;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Shared cancellation flag with interruptible waits.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        let mut triggered = flag.lock().unwrap_or_else(|e| e.into_inner());
        *triggered = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`; returns `true` as soon as shutdown is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut triggered = flag.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *triggered {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = cvar
                .wait_timeout(triggered, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

/// Route Ctrl-C and SIGTERM to `shutdown`. May be called once per process.
pub fn install_signal_handler(shutdown: &ShutdownSignal) -> Result<(), AgentError> {
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        signal.trigger();
    })?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("storage I/O error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl Classify for AgentError {
    fn class(&self) -> ErrorClass {
        match self {
            AgentError::Storage { source, .. } => source.class(),
            AgentError::Cache(e) => e.class(),
            AgentError::Spawn { .. } | AgentError::Signal(_) => ErrorClass::Fatal,
        }
    }
}

/// Stores and ledgers shared by the agent and the one-shot commands.
pub struct Services {
    pub layout: StorageLayout,
    pub identity: DeviceIdentity,
    pub cache: CacheStore,
    pub reports: ReportStore,
    pub history: Arc<DeliveryHistory>,
    pub sealer: Arc<dyn ReportSealer>,
}

impl Services {
    /// Prepare `layout` and resolve the device identity.
    pub fn prepare(config: &AgentConfig, layout: &StorageLayout) -> Result<DeviceIdentity, AgentError> {
        layout.prepare().map_err(|source| AgentError::Storage {
            path: layout.base().to_path_buf(),
            source,
        })?;
        DeviceIdentity::resolve(layout, &config.identity).map_err(|source| AgentError::Storage {
            path: layout.device_id_path(),
            source,
        })
    }

    /// Open every store. `host` is embedded in each sealed report.
    pub fn open(
        config: &AgentConfig,
        layout: StorageLayout,
        identity: DeviceIdentity,
        host: HostInfo,
    ) -> Result<Self, AgentError> {
        let timezone = local_tz_label();
        let cache = CacheStore::open(layout.clone())?;
        let reports = ReportStore::new(layout.clone(), &identity.device_id, &timezone);
        let history = Arc::new(DeliveryHistory::load(layout.history_path()));
        let sealer = Arc::new(EncryptedSealer::new(
            &config.report.passphrase,
            &identity.device_id,
            &timezone,
            host,
        ));
        Ok(Self {
            layout,
            identity,
            cache,
            reports,
            history,
            sealer,
        })
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.cache.clone(), self.reports.clone(), self.sealer.clone())
    }

    pub fn dispatcher(&self, config: &AgentConfig) -> Dispatcher {
        Dispatcher::new(
            self.layout.clone(),
            self.reports.clone(),
            self.history.clone(),
            &self.identity.device_name,
            config.delivery.clone(),
        )
    }
}

/// What a finished agent run did.
#[derive(Debug, Clone, Default)]
pub struct AgentSummary {
    pub samples: u64,
    pub rollups: Vec<RollupSummary>,
    pub dispatch: Option<DispatchSummary>,
    /// Names of background threads that panicked.
    pub panicked: Vec<String>,
}

pub struct Agent {
    config: AgentConfig,
    services: Services,
    sampler: Sampler,
    probe: Box<dyn ProcessProbe>,
    transport: Option<Arc<dyn Transport>>,
    connectivity: Option<Arc<dyn ConnectivityProbe>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        services: Services,
        source: Box<dyn SnapshotSource>,
        probe: Box<dyn ProcessProbe>,
    ) -> Self {
        let sampler = Sampler::new(source, services.cache.clone());
        Self {
            config,
            services,
            sampler,
            probe,
            transport: None,
            connectivity: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = Some(probe);
        self
    }

    fn dispatcher(&self) -> Dispatcher {
        let mut dispatcher = self.services.dispatcher(&self.config);
        if let Some(transport) = &self.transport {
            dispatcher = dispatcher.with_transport(transport.clone());
        }
        if let Some(probe) = &self.connectivity {
            dispatcher = dispatcher.with_probe(probe.clone());
        }
        dispatcher
    }

    /// Run until `shutdown` is triggered.
    pub fn run(self, shutdown: &ShutdownSignal) -> Result<AgentSummary, AgentError> {
        let mut summary = AgentSummary::default();
        let aggregator = self.services.aggregator();

        if let Err(e) = ensure_recipient_file(&self.services.layout.recipient_path()) {
            warn!(error = %e, "Could not create recipient file");
        }

        info!(
            base = %self.services.layout.base().display(),
            device_id = %self.services.identity.device_id,
            "Agent starting"
        );
        let mut last_day = today();
        summary.rollups.push(aggregator.run(last_day));

        let dispatcher = self.config.delivery.enabled.then(|| self.dispatcher());
        let Agent {
            config,
            services,
            mut sampler,
            probe,
            ..
        } = self;

        let monitor_handle = {
            let signal = shutdown.clone();
            let classifier = Classifier::new(&config.monitor.system_dirs);
            let interval = Duration::from_secs(config.monitor.poll_interval_secs);
            let cache = services.cache.clone();
            spawn("hostlog-monitor", move || {
                EventMonitor::new(probe, cache, classifier).run(&signal, interval);
                None
            })?
        };

        let dispatch_handle = match dispatcher {
            Some(dispatcher) => {
                let signal = shutdown.clone();
                match spawn("hostlog-dispatch", move || Some(dispatcher.run(&signal))) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        shutdown.trigger();
                        join(monitor_handle, &mut summary);
                        return Err(e);
                    }
                }
            }
            None => {
                info!("Delivery disabled in configuration");
                None
            }
        };

        while !shutdown.is_triggered() {
            let now = Local::now().naive_local();
            if sampler.tick(now).is_some() {
                summary.samples += 1;
            }
            if now.date() != last_day {
                info!(day = %now.date(), "Day changed, rolling up");
                summary.rollups.push(aggregator.run(now.date()));
                last_day = now.date();
            }
            if shutdown.wait(delay_until_next_minute(Local::now().naive_local())) {
                break;
            }
        }

        shutdown.trigger();
        join(monitor_handle, &mut summary);
        if let Some(handle) = dispatch_handle {
            join(handle, &mut summary);
        }
        info!(samples = summary.samples, "Agent stopped");
        Ok(summary)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

type Worker = JoinHandle<Option<DispatchSummary>>;

fn spawn<F>(name: &'static str, body: F) -> Result<(&'static str, Worker), AgentError>
where
    F: FnOnce() -> Option<DispatchSummary> + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map(|handle| (name, handle))
        .map_err(|source| AgentError::Spawn { name, source })
}

fn join((name, handle): (&'static str, Worker), summary: &mut AgentSummary) {
    match handle.join() {
        Ok(Some(dispatch)) => summary.dispatch = Some(dispatch),
        Ok(None) => {}
        Err(payload) => {
            error!(thread = name, panic = %panic_message(&*payload), "Background thread panicked");
            summary.panicked.push(name.to_string());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
