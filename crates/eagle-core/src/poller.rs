//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use eagle_metrics::BridgeMetrics;
use eagle_protocol::TelemetrySnapshot;
use eagle_rt::{FixedDelaySchedule, ScheduleHandle};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::MeterGateway;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::observer::{BridgeObserver, ConnectivityScope, ConnectivityStatus, OfflineReason};
use crate::telemetry::{ChannelDescriptor, SnapshotTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Uninitialized,
    Polling,
    Stopped,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated { emitted: usize },
    Failed(ErrorKind),
}

struct PollerCore {
    tracker: SnapshotTracker,
    status: Option<ConnectivityStatus>,
}

struct PollerInner {
    meter: String,
    gateway: Arc<dyn MeterGateway>,
    observer: Arc<dyn BridgeObserver>,
    core: Mutex<PollerCore>,
    /// Held for a whole cycle so scheduled and manual polls of a meter never overlap.
    cycle: tokio::sync::Mutex<()>,
}

impl PollerInner {
    async fn poll(&self, metrics: Option<&BridgeMetrics>) -> PollOutcome {
        let _cycle = self.cycle.lock().await;
        let snapshot = match self.gateway.query_meter(&self.meter).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(meter = %self.meter, error = %err, "telemetry poll failed");
                let reason = match err.kind() {
                    ErrorKind::Configuration => OfflineReason::ConfigurationError,
                    ErrorKind::Transport | ErrorKind::Protocol => {
                        OfflineReason::CommunicationError
                    }
                };
                self.transition(ConnectivityStatus::Offline(reason));
                return PollOutcome::Failed(err.kind());
            }
        };

        let delta = self.core.lock().tracker.apply(snapshot);
        self.transition(ConnectivityStatus::Online);

        if let Some(channels) = &delta.synthesized {
            self.observer.on_channels_synthesized(&self.meter, channels);
        }
        let mut emitted = 0;
        for change in delta.emitted() {
            self.observer.on_telemetry_changed(&self.meter, change);
            emitted += 1;
        }
        if let Some(metrics) = metrics {
            metrics.record_updates(&self.meter, emitted);
        }
        debug!(meter = %self.meter, fields = delta.fields.len(), emitted, "telemetry polled");
        PollOutcome::Updated { emitted }
    }

    fn transition(&self, status: ConnectivityStatus) {
        {
            let mut core = self.core.lock();
            if core.status == Some(status) {
                return;
            }
            core.status = Some(status);
        }
        self.observer
            .on_connectivity_changed(&ConnectivityScope::Device(self.meter.clone()), status);
    }
}

/// Cloneable handle running one poll cycle of a meter.
///
/// Shares the meter's diff baseline and status with its [`TelemetryPoller`].
#[derive(Clone)]
pub struct PollCycle {
    inner: Arc<PollerInner>,
    metrics: Option<BridgeMetrics>,
}

impl PollCycle {
    pub fn meter(&self) -> &str {
        &self.inner.meter
    }

    /// Query the meter once and emit what changed. Waits for a cycle already in flight.
    pub async fn run(&self) -> PollOutcome {
        self.inner.poll(self.metrics.as_ref()).await
    }
}

/// Periodic telemetry query of one meter, emitting only changed fields.
pub struct TelemetryPoller {
    cycle: PollCycle,
    initial_delay: Duration,
    state: PollerState,
    schedule: Option<ScheduleHandle>,
}

impl TelemetryPoller {
    pub fn new(
        meter: impl Into<String>,
        gateway: Arc<dyn MeterGateway>,
        observer: Arc<dyn BridgeObserver>,
    ) -> Self {
        Self {
            cycle: PollCycle {
                inner: Arc::new(PollerInner {
                    meter: meter.into(),
                    gateway,
                    observer,
                    core: Mutex::new(PollerCore {
                        tracker: SnapshotTracker::new(),
                        status: None,
                    }),
                    cycle: tokio::sync::Mutex::new(()),
                }),
                metrics: None,
            },
            initial_delay: Duration::from_secs(1),
            state: PollerState::Uninitialized,
            schedule: None,
        }
    }

    /// Delay before the first poll after each `start`.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.cycle.metrics = Some(metrics);
        self
    }

    /// Skip channel synthesis because the host already holds these channels.
    pub fn with_existing_channels(self, channels: Vec<ChannelDescriptor>) -> Self {
        self.cycle.inner.core.lock().tracker = SnapshotTracker::with_channels(channels);
        self
    }

    pub fn meter(&self) -> &str {
        self.cycle.meter()
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Connectivity after the latest completed cycle; `None` before the first.
    pub fn status(&self) -> Option<ConnectivityStatus> {
        self.cycle.inner.core.lock().status
    }

    pub fn previous_snapshot(&self) -> Option<TelemetrySnapshot> {
        self.cycle.inner.core.lock().tracker.previous().cloned()
    }

    pub fn channels(&self) -> Option<Vec<ChannelDescriptor>> {
        self.cycle
            .inner
            .core
            .lock()
            .tracker
            .channels()
            .map(<[ChannelDescriptor]>::to_vec)
    }

    /// Run one poll cycle immediately.
    pub async fn poll_once(&self) -> PollOutcome {
        self.cycle.run().await
    }

    /// Handle for polling this meter without borrowing the poller.
    pub fn cycle(&self) -> PollCycle {
        self.cycle.clone()
    }

    /// Begin (or re-time) periodic polling. The diff baseline survives restarts.
    pub async fn start(&mut self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(GatewayError::InvalidInterval);
        }
        if let Some(previous) = self.schedule.take() {
            previous.shutdown().await;
        }

        let cycle = self.cycle.clone();
        let handle = FixedDelaySchedule::new(format!("poll:{}", self.meter()), interval)
            .with_initial_delay(self.initial_delay)
            .spawn(move || {
                let cycle = cycle.clone();
                async move {
                    cycle.run().await;
                }
            });

        info!(meter = %self.meter(), interval_secs = interval.as_secs(), "telemetry polling started");
        self.schedule = Some(handle);
        self.state = PollerState::Polling;
        Ok(())
    }

    /// Cancel polling. No telemetry is emitted after this returns.
    ///
    /// A manual cycle already in flight is allowed to finish first.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.schedule.take() {
            handle.shutdown().await;
            info!(meter = %self.meter(), "telemetry polling stopped");
        }
        drop(self.cycle.inner.cycle.lock().await);
        if self.state == PollerState::Polling {
            self.state = PollerState::Stopped;
        }
    }
}
