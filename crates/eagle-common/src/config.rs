//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Shared configuration and logging for the gateway bridge."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_discovery_enabled() -> bool {
    true
}

fn default_discovery_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_suggested_refresh() -> Duration {
    Duration::from_secs(60)
}

fn default_auto_poll() -> bool {
    true
}

fn default_poll_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9899))
}

/// Primary configuration object for the bridge daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "EAGLE_CONFIG";

    /// Load configuration from disk, respecting the `EAGLE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    ///
    /// Missing gateway credentials are not an error here; the bridge reports
    /// them as a configuration fault at runtime.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.discovery.validate()?;
        self.polling.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn ensure_positive(section: &str, field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(anyhow!("{section}.{field} must be greater than zero"));
    }
    Ok(())
}

/// Connection parameters of the Eagle-200 gateway.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub cloud_id: String,
    #[serde(default)]
    pub install_code: String,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("gateway", "connect_timeout", self.connect_timeout)?;
        ensure_positive("gateway", "request_timeout", self.request_timeout)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            cloud_id: String::new(),
            install_code: String::new(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("cloud_id", &self.cloud_id)
            .field("install_code", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    #[serde(default = "default_discovery_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default)]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    /// Refresh interval advertised alongside each discovered meter.
    #[serde(default = "default_suggested_refresh")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub suggested_refresh: Duration,
    /// Start polling discovered meters without operator action.
    #[serde(default = "default_auto_poll")]
    pub auto_poll: bool,
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("discovery", "interval", self.interval)?;
        ensure_positive("discovery", "suggested_refresh", self.suggested_refresh)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            interval: default_discovery_interval(),
            initial_delay: Duration::ZERO,
            suggested_refresh: default_suggested_refresh(),
            auto_poll: default_auto_poll(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_initial_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub default_interval: Duration,
    /// Per-meter interval overrides in seconds, keyed by hardware address.
    #[serde(default)]
    pub meters: IndexMap<String, u64>,
}

impl PollingConfig {
    /// Polling interval for a meter: its override when declared, else the default.
    pub fn interval_for(&self, address: &str) -> Duration {
        self.meters
            .get(address)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(self.default_interval)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("polling", "default_interval", self.default_interval)?;
        for (address, secs) in &self.meters {
            if *secs == 0 {
                return Err(anyhow!(
                    "polling interval for meter '{}' must be greater than zero",
                    address
                ));
            }
        }
        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_poll_initial_delay(),
            default_interval: default_poll_interval(),
            meters: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
