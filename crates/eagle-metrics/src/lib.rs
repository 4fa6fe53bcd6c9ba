//! ---
//! eagle_section: "03-observability"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Metrics collection and export utilities."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the listener actually bound (resolves port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters for gateway traffic, discovery and telemetry updates.
#[derive(Clone, Debug)]
pub struct BridgeMetrics {
    registry: SharedRegistry,
    requests: IntCounterVec,
    failures: IntCounterVec,
    scans: IntCounterVec,
    discovered: IntCounter,
    updates: IntCounterVec,
}

impl BridgeMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new(
                "eagle_gateway_requests_total",
                "Commands posted to the gateway by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "eagle_gateway_failures_total",
                "Failed gateway commands by operation and error kind",
            ),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let scans = IntCounterVec::new(
            Opts::new(
                "eagle_discovery_scans_total",
                "Discovery scan cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(scans.clone()))?;

        let discovered = IntCounter::with_opts(Opts::new(
            "eagle_devices_discovered_total",
            "Meters reported as newly discovered",
        ))?;
        registry.register(Box::new(discovered.clone()))?;

        let updates = IntCounterVec::new(
            Opts::new(
                "eagle_telemetry_updates_total",
                "Telemetry field updates emitted per meter",
            ),
            &["meter"],
        )?;
        registry.register(Box::new(updates.clone()))?;

        Ok(Self {
            registry,
            requests,
            failures,
            scans,
            discovered,
            updates,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_request(&self, operation: &str) {
        self.requests.with_label_values(&[operation]).inc();
    }

    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.failures.with_label_values(&[operation, kind]).inc();
    }

    pub fn record_scan(&self, outcome: &str) {
        self.scans.with_label_values(&[outcome]).inc();
    }

    pub fn record_discovered(&self) {
        self.discovered.inc();
    }

    pub fn record_updates(&self, meter: &str, count: usize) {
        if count > 0 {
            self.updates
                .with_label_values(&[meter])
                .inc_by(count as u64);
        }
    }
}

pub use prometheus;
