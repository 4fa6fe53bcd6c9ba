//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eagle_common::DiscoveryConfig;
use eagle_metrics::BridgeMetrics;
use eagle_rt::{FixedDelaySchedule, ScheduleHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::MeterGateway;
use crate::error::ErrorKind;
use crate::observer::{BridgeObserver, DeviceDiscovery};

#[derive(Debug, Clone, Copy)]
pub struct DiscoverySettings {
    /// Delay between the end of one scan and the start of the next.
    pub interval: Duration,
    pub initial_delay: Duration,
    /// Refresh interval advertised with each discovered meter.
    pub suggested_refresh: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            initial_delay: Duration::ZERO,
            suggested_refresh: Duration::from_secs(60),
        }
    }
}

impl From<&DiscoveryConfig> for DiscoverySettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            interval: config.interval,
            initial_delay: config.initial_delay,
            suggested_refresh: config.suggested_refresh,
        }
    }
}

/// What one scan cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was still in progress.
    AlreadyRunning,
    IncompleteConfiguration,
    Failed(ErrorKind),
    Completed {
        /// Addresses reported for the first time, in gateway order.
        discovered: Vec<String>,
        /// Meters the gateway listed.
        seen: usize,
    },
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::AlreadyRunning => "already_running",
            ScanOutcome::IncompleteConfiguration => "incomplete_configuration",
            ScanOutcome::Failed(_) => "failed",
            ScanOutcome::Completed { .. } => "completed",
        }
    }
}

struct DiscoveryShared {
    gateway: Arc<dyn MeterGateway>,
    observer: Arc<dyn BridgeObserver>,
    settings: DiscoverySettings,
    metrics: Option<BridgeMetrics>,
    reported: Mutex<HashSet<String>>,
    scanning: AtomicBool,
}

struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DiscoveryShared {
    async fn scan(&self) -> ScanOutcome {
        let outcome = self.scan_inner().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_scan(outcome.as_str());
        }
        outcome
    }

    async fn scan_inner(&self) -> ScanOutcome {
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            debug!("discovery scan already in progress");
            return ScanOutcome::AlreadyRunning;
        };

        if !self.gateway.endpoint_complete() {
            info!("gateway configuration incomplete; skipping discovery scan");
            return ScanOutcome::IncompleteConfiguration;
        }

        let addresses = match self.gateway.list_meter_addresses().await {
            Ok(addresses) => addresses,
            Err(err) => {
                warn!(error = %err, "discovery scan failed");
                return ScanOutcome::Failed(err.kind());
            }
        };

        let seen = addresses.len();
        let discovered: Vec<String> = {
            let mut reported = self.reported.lock();
            addresses
                .into_iter()
                .filter(|address| reported.insert(address.clone()))
                .collect()
        };

        for address in &discovered {
            info!(meter = %address, "new meter discovered");
            self.observer.on_device_discovered(&DeviceDiscovery {
                address: address.clone(),
                suggested_refresh: self.settings.suggested_refresh,
            });
            if let Some(metrics) = &self.metrics {
                metrics.record_discovered();
            }
        }
        debug!(seen, new = discovered.len(), "discovery scan completed");
        ScanOutcome::Completed { discovered, seen }
    }
}

/// Cloneable handle running one discovery scan outside of the schedule.
#[derive(Clone)]
pub struct ScanCycle {
    shared: Arc<DiscoveryShared>,
}

impl ScanCycle {
    /// Scan once. Yields [`ScanOutcome::AlreadyRunning`] while another scan is in flight.
    pub async fn run(&self) -> ScanOutcome {
        self.shared.scan().await
    }
}

/// Recurring scan reporting each meter once per scheduler activation.
pub struct DiscoveryScheduler {
    shared: Arc<DiscoveryShared>,
    schedule: Option<ScheduleHandle>,
}

impl DiscoveryScheduler {
    pub fn new(
        gateway: Arc<dyn MeterGateway>,
        observer: Arc<dyn BridgeObserver>,
        settings: DiscoverySettings,
        metrics: Option<BridgeMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(DiscoveryShared {
                gateway,
                observer,
                settings,
                metrics,
                reported: Mutex::new(HashSet::new()),
                scanning: AtomicBool::new(false),
            }),
            schedule: None,
        }
    }

    pub fn settings(&self) -> DiscoverySettings {
        self.shared.settings
    }

    pub fn is_running(&self) -> bool {
        self.schedule.is_some()
    }

    /// Addresses reported since the scheduler was last started.
    pub fn reported(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.shared.reported.lock().iter().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Run one scan outside of the schedule. Never overlaps a scheduled scan.
    pub async fn run_scan_cycle(&self) -> ScanOutcome {
        self.scan_cycle().run().await
    }

    pub fn scan_cycle(&self) -> ScanCycle {
        ScanCycle {
            shared: self.shared.clone(),
        }
    }

    /// (Re)start the recurring scan and forget previously reported meters.
    pub async fn start(&mut self) {
        if let Some(previous) = self.schedule.take() {
            previous.shutdown().await;
        }
        self.shared.reported.lock().clear();

        let settings = self.shared.settings;
        let shared = self.shared.clone();
        let handle = FixedDelaySchedule::new("discovery", settings.interval)
            .with_initial_delay(settings.initial_delay)
            .spawn(move || {
                let shared = shared.clone();
                async move {
                    shared.scan().await;
                }
            });
        info!(interval_secs = settings.interval.as_secs(), "discovery started");
        self.schedule = Some(handle);
    }

    /// Cancel the recurring scan. No discovery is reported after this returns.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.schedule.take() {
            handle.shutdown().await;
            info!("discovery stopped");
        }
    }
}
