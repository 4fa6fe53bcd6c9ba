//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::telemetry::{ChannelDescriptor, FieldChange};

/// A meter reported for the first time by a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDiscovery {
    pub address: String,
    pub suggested_refresh: Duration,
}

/// What a connectivity report refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectivityScope {
    Gateway,
    Device(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    CommunicationError,
    ConfigurationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Online,
    Offline(OfflineReason),
}

impl ConnectivityStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityStatus::Online)
    }
}

/// Receives everything the bridge reports to its host.
///
/// Callbacks run on the scheduling tasks and must not block.
pub trait BridgeObserver: Send + Sync + 'static {
    fn on_device_discovered(&self, discovery: &DeviceDiscovery);

    fn on_telemetry_changed(&self, meter: &str, change: &FieldChange);

    fn on_connectivity_changed(&self, scope: &ConnectivityScope, status: ConnectivityStatus);

    fn on_channels_synthesized(&self, _meter: &str, _channels: &[ChannelDescriptor]) {}
}

/// Owned form of an observer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    DeviceDiscovered(DeviceDiscovery),
    TelemetryChanged {
        meter: String,
        change: FieldChange,
    },
    ConnectivityChanged {
        scope: ConnectivityScope,
        status: ConnectivityStatus,
    },
    ChannelsSynthesized {
        meter: String,
        channels: Vec<ChannelDescriptor>,
    },
}

impl BridgeEvent {
    /// Deliver this event to another observer.
    pub fn dispatch(&self, observer: &dyn BridgeObserver) {
        match self {
            BridgeEvent::DeviceDiscovered(discovery) => observer.on_device_discovered(discovery),
            BridgeEvent::TelemetryChanged { meter, change } => {
                observer.on_telemetry_changed(meter, change)
            }
            BridgeEvent::ConnectivityChanged { scope, status } => {
                observer.on_connectivity_changed(scope, *status)
            }
            BridgeEvent::ChannelsSynthesized { meter, channels } => {
                observer.on_channels_synthesized(meter, channels)
            }
        }
    }
}

/// Forwards every callback as a [`BridgeEvent`] over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            trace!("bridge event receiver dropped");
        }
    }
}

impl BridgeObserver for ChannelObserver {
    fn on_device_discovered(&self, discovery: &DeviceDiscovery) {
        self.forward(BridgeEvent::DeviceDiscovered(discovery.clone()));
    }

    fn on_telemetry_changed(&self, meter: &str, change: &FieldChange) {
        self.forward(BridgeEvent::TelemetryChanged {
            meter: meter.to_owned(),
            change: change.clone(),
        });
    }

    fn on_connectivity_changed(&self, scope: &ConnectivityScope, status: ConnectivityStatus) {
        self.forward(BridgeEvent::ConnectivityChanged {
            scope: scope.clone(),
            status,
        });
    }

    fn on_channels_synthesized(&self, meter: &str, channels: &[ChannelDescriptor]) {
        self.forward(BridgeEvent::ChannelsSynthesized {
            meter: meter.to_owned(),
            channels: channels.to_vec(),
        });
    }
}

/// Logs every callback as a structured event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BridgeObserver for TracingObserver {
    fn on_device_discovered(&self, discovery: &DeviceDiscovery) {
        info!(
            meter = %discovery.address,
            refresh_secs = discovery.suggested_refresh.as_secs(),
            "meter discovered"
        );
    }

    fn on_telemetry_changed(&self, meter: &str, change: &FieldChange) {
        info!(
            meter = %meter,
            channel = %change.channel,
            state = ?change.state,
            value = %change.value,
            "telemetry updated"
        );
    }

    fn on_connectivity_changed(&self, scope: &ConnectivityScope, status: ConnectivityStatus) {
        match status {
            ConnectivityStatus::Online => info!(scope = ?scope, "online"),
            ConnectivityStatus::Offline(reason) => warn!(scope = ?scope, reason = ?reason, "offline"),
        }
    }

    fn on_channels_synthesized(&self, meter: &str, channels: &[ChannelDescriptor]) {
        info!(meter = %meter, channels = channels.len(), "channels synthesised");
    }
}
