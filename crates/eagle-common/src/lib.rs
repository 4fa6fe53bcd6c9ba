//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Shared configuration and logging for the gateway bridge."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Shared primitives for the Eagle-200 bridge workspace: configuration loading
//! and tracing initialisation consumed by the daemon and its tests.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, DiscoveryConfig, GatewayConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    PollingConfig,
};
pub use logging::{init_tracing, LogFormat};
