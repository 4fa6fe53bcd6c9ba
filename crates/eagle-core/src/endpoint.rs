//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use eagle_common::GatewayConfig;

const POST_MANAGER_PATH: &str = "/cgi-bin/post_manager";

/// Address and credentials of one gateway. Replaced wholesale on reconfiguration.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    host: String,
    cloud_id: String,
    install_code: String,
}

impl GatewayEndpoint {
    pub fn new(
        host: impl Into<String>,
        cloud_id: impl Into<String>,
        install_code: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            cloud_id: cloud_id.into(),
            install_code: install_code.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cloud_id(&self) -> &str {
        &self.cloud_id
    }

    /// True when host, cloud id and install code are all non-empty.
    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }

    /// Name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.host.is_empty() {
            Some("host")
        } else if self.cloud_id.is_empty() {
            Some("cloud_id")
        } else if self.install_code.is_empty() {
            Some("install_code")
        } else {
            None
        }
    }

    pub fn post_manager_url(&self) -> String {
        format!("http://{}{}", self.host, POST_MANAGER_PATH)
    }

    /// `Basic` authorization header value built from `cloud_id:install_code`.
    pub fn authorization_header(&self) -> String {
        let credentials = format!("{}:{}", self.cloud_id, self.install_code);
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

impl std::fmt::Debug for GatewayEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayEndpoint")
            .field("host", &self.host)
            .field("cloud_id", &self.cloud_id)
            .field("install_code", &"<redacted>")
            .finish()
    }
}

impl From<&GatewayConfig> for GatewayEndpoint {
    fn from(config: &GatewayConfig) -> Self {
        Self::new(
            config.host.trim(),
            config.cloud_id.trim(),
            config.install_code.trim(),
        )
    }
}
