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

use async_trait::async_trait;
use eagle_common::GatewayConfig;
use eagle_metrics::BridgeMetrics;
use eagle_protocol::{
    decode_device_list, decode_telemetry_snapshot, encode_list_devices_command,
    encode_query_command, DeviceRecord, TelemetrySnapshot,
};
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, trace, warn};

use crate::endpoint::GatewayEndpoint;
use crate::error::{GatewayError, Result};

const OP_DEVICE_LIST: &str = "device_list";
const OP_DEVICE_QUERY: &str = "device_query";

/// Transport timeouts applied to every gateway request.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&GatewayConfig> for ClientSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

/// Meter-level view of the gateway used by discovery and polling.
#[async_trait]
pub trait MeterGateway: Send + Sync + 'static {
    /// Whether an endpoint with every required field is configured.
    fn endpoint_complete(&self) -> bool;

    /// Hardware addresses of every electricity meter the gateway knows.
    async fn list_meter_addresses(&self) -> Result<Vec<String>>;

    /// Current telemetry of one meter.
    async fn query_meter(&self, address: &str) -> Result<TelemetrySnapshot>;
}

/// Authenticated HTTP client for the gateway's `post_manager` endpoint.
///
/// Safe to share between tasks; [`GatewayClient::configure`] swaps the endpoint
/// atomically and in-flight requests finish against the endpoint they started with.
pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: RwLock<Option<Arc<GatewayEndpoint>>>,
    metrics: Option<BridgeMetrics>,
}

impl GatewayClient {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: RwLock::new(None),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the endpoint used by subsequent requests.
    pub fn configure(&self, endpoint: GatewayEndpoint) {
        debug!(host = %endpoint.host(), complete = endpoint.is_complete(), "gateway endpoint configured");
        *self.endpoint.write() = Some(Arc::new(endpoint));
    }

    pub fn endpoint(&self) -> Option<Arc<GatewayEndpoint>> {
        self.endpoint.read().clone()
    }

    /// Every device the gateway reports, meters or not.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let result = self.fetch_devices().await;
        self.observe(OP_DEVICE_LIST, &result);
        result
    }

    async fn fetch_devices(&self) -> Result<Vec<DeviceRecord>> {
        let endpoint = self.usable_endpoint()?;
        let body = self
            .post(&endpoint, OP_DEVICE_LIST, encode_list_devices_command())
            .await?;
        Ok(decode_device_list(&body)?)
    }

    async fn fetch_snapshot(&self, address: &str) -> Result<TelemetrySnapshot> {
        let endpoint = self.usable_endpoint()?;
        let command = encode_query_command(address)?;
        let body = self.post(&endpoint, OP_DEVICE_QUERY, command).await?;
        Ok(decode_telemetry_snapshot(&body)?)
    }

    fn usable_endpoint(&self) -> Result<Arc<GatewayEndpoint>> {
        let endpoint = self.endpoint().ok_or(GatewayError::NotConfigured)?;
        if let Some(field) = endpoint.missing_field() {
            return Err(GatewayError::IncompleteConfiguration(field));
        }
        Ok(endpoint)
    }

    async fn post(
        &self,
        endpoint: &GatewayEndpoint,
        operation: &'static str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(endpoint.post_manager_url())
            .header(CONTENT_TYPE, "text/xml")
            .header(AUTHORIZATION, endpoint.authorization_header())
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        trace!(operation, body = %String::from_utf8_lossy(&body), "gateway response");
        Ok(body.to_vec())
    }

    fn observe<T>(&self, operation: &'static str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(operation);
            if let Err(err) = result {
                metrics.record_failure(operation, err.kind().as_str());
            }
        }
    }
}

#[async_trait]
impl MeterGateway for GatewayClient {
    fn endpoint_complete(&self) -> bool {
        self.endpoint()
            .map(|endpoint| endpoint.is_complete())
            .unwrap_or(false)
    }

    async fn list_meter_addresses(&self) -> Result<Vec<String>> {
        let devices = self.list_devices().await?;
        let mut addresses = Vec::new();
        for device in devices {
            if !device.is_electric_meter() {
                trace!(address = %device.hardware_address, model = %device.model_id, "ignoring non-meter device");
                continue;
            }
            if device.hardware_address.is_empty() {
                warn!(model = %device.model_id, "meter reported without hardware address");
                continue;
            }
            addresses.push(device.hardware_address);
        }
        Ok(addresses)
    }

    async fn query_meter(&self, address: &str) -> Result<TelemetrySnapshot> {
        let result = self.fetch_snapshot(address).await;
        self.observe(OP_DEVICE_QUERY, &result);
        result
    }
}
