//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Host-facing entry point owning the client, the discovery scheduler and one
//! poller per meter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eagle_common::AppConfig;
use eagle_metrics::BridgeMetrics;
use eagle_protocol::validate_hardware_address;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::{GatewayClient, MeterGateway};
use crate::discovery::{DiscoveryScheduler, DiscoverySettings, ScanOutcome};
use crate::endpoint::GatewayEndpoint;
use crate::error::{GatewayError, Result};
use crate::observer::{BridgeObserver, ConnectivityScope, ConnectivityStatus, OfflineReason};
use crate::poller::{PollOutcome, TelemetryPoller};

#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub discovery: DiscoverySettings,
    /// Delay before the first poll of a newly started meter.
    pub poll_initial_delay: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            discovery: DiscoverySettings::default(),
            poll_initial_delay: Duration::from_secs(1),
        }
    }
}

impl From<&AppConfig> for BridgeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            discovery: DiscoverySettings::from(&config.discovery),
            poll_initial_delay: config.polling.initial_delay,
        }
    }
}

pub struct GatewayBridge {
    client: Arc<GatewayClient>,
    observer: Arc<dyn BridgeObserver>,
    settings: BridgeSettings,
    metrics: Option<BridgeMetrics>,
    discovery: Mutex<DiscoveryScheduler>,
    pollers: Mutex<HashMap<String, TelemetryPoller>>,
}

impl GatewayBridge {
    pub fn new(
        client: Arc<GatewayClient>,
        observer: Arc<dyn BridgeObserver>,
        settings: BridgeSettings,
        metrics: Option<BridgeMetrics>,
    ) -> Self {
        let discovery = DiscoveryScheduler::new(
            client.clone(),
            observer.clone(),
            settings.discovery,
            metrics.clone(),
        );
        Self {
            client,
            observer,
            settings,
            metrics,
            discovery: Mutex::new(discovery),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<GatewayClient> {
        &self.client
    }

    /// Replace the gateway endpoint and report the resulting gateway status.
    ///
    /// An incomplete endpoint is accepted but leaves the gateway offline with a
    /// configuration error; scans and polls fail fast until it is completed.
    pub fn configure(&self, endpoint: GatewayEndpoint) -> ConnectivityStatus {
        let status = match endpoint.missing_field() {
            None => ConnectivityStatus::Online,
            Some(field) => {
                warn!(missing = field, "gateway configuration incomplete");
                ConnectivityStatus::Offline(OfflineReason::ConfigurationError)
            }
        };
        self.client.configure(endpoint);
        self.observer
            .on_connectivity_changed(&ConnectivityScope::Gateway, status);
        status
    }

    pub async fn start_discovery(&self) {
        self.discovery.lock().await.start().await;
    }

    pub async fn stop_discovery(&self) {
        self.discovery.lock().await.stop().await;
    }

    /// Run one discovery scan now, independent of the schedule.
    pub async fn scan_now(&self) -> ScanOutcome {
        let cycle = self.discovery.lock().await.scan_cycle();
        cycle.run().await
    }

    /// Start polling a meter, or re-time it when it is already polled.
    pub async fn start_polling(&self, meter: &str, interval: Duration) -> Result<()> {
        validate_hardware_address(meter)?;
        if interval.is_zero() {
            return Err(GatewayError::InvalidInterval);
        }
        let mut pollers = self.pollers.lock().await;
        let poller = pollers.entry(meter.to_owned()).or_insert_with(|| {
            let gateway: Arc<dyn MeterGateway> = self.client.clone();
            let poller = TelemetryPoller::new(meter, gateway, self.observer.clone())
                .with_initial_delay(self.settings.poll_initial_delay);
            match &self.metrics {
                Some(metrics) => poller.with_metrics(metrics.clone()),
                None => poller,
            }
        });
        poller.start(interval).await
    }

    /// Stop and dispose of a meter's poller. Returns false when it was not polled.
    pub async fn stop_polling(&self, meter: &str) -> bool {
        let removed = self.pollers.lock().await.remove(meter);
        match removed {
            Some(mut poller) => {
                poller.stop().await;
                true
            }
            None => false,
        }
    }

    /// Poll a meter immediately; `None` when the meter is not polled.
    ///
    /// Waits for a scheduled cycle of the same meter that is already in flight.
    pub async fn poll_now(&self, meter: &str) -> Option<PollOutcome> {
        let cycle = self.pollers.lock().await.get(meter).map(TelemetryPoller::cycle)?;
        Some(cycle.run().await)
    }

    pub async fn meter_status(&self, meter: &str) -> Option<ConnectivityStatus> {
        self.pollers
            .lock()
            .await
            .get(meter)
            .and_then(|poller| poller.status())
    }

    pub async fn active_meters(&self) -> Vec<String> {
        let mut meters: Vec<_> = self.pollers.lock().await.keys().cloned().collect();
        meters.sort();
        meters
    }

    /// Stop discovery and every poller.
    pub async fn shutdown(&self) {
        self.stop_discovery().await;
        let pollers: Vec<_> = self.pollers.lock().await.drain().collect();
        for (_, mut poller) in pollers {
            poller.stop().await;
        }
        info!("gateway bridge stopped");
    }
}
