//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Core of the Eagle-200 bridge: an authenticated gateway client, a discovery
//! scheduler reporting newly seen meters, and per-meter telemetry pollers that
//! emit only changed fields to a [`BridgeObserver`].

pub mod bridge;
pub mod client;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod observer;
pub mod poller;
pub mod telemetry;

pub use bridge::{BridgeSettings, GatewayBridge};
pub use client::{ClientSettings, GatewayClient, MeterGateway};
pub use discovery::{DiscoveryScheduler, DiscoverySettings, ScanCycle, ScanOutcome};
pub use endpoint::GatewayEndpoint;
pub use error::{ErrorKind, GatewayError, Result};
pub use observer::{
    BridgeEvent, BridgeObserver, ChannelObserver, ConnectivityScope, ConnectivityStatus,
    DeviceDiscovery, OfflineReason, TracingObserver,
};
pub use poller::{PollCycle, PollOutcome, PollerState, TelemetryPoller};
pub use telemetry::{
    typed_value, ChannelDescriptor, FieldChange, FieldState, SnapshotTracker, TelemetryDelta,
    TelemetryValue, ValueKind,
};
