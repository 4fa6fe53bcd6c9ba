//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use eagle_protocol::ProtocolError;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failures raised by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No endpoint has been configured yet.
    #[error("gateway endpoint not configured")]
    NotConfigured,
    /// The configured endpoint lacks a required field.
    #[error("gateway configuration incomplete: missing {0}")]
    IncompleteConfiguration(&'static str),
    /// A polling or scan interval of zero was requested.
    #[error("interval must be greater than zero")]
    InvalidInterval,
    /// Network failure, timeout or non-success HTTP status.
    #[error("gateway transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response could not be decoded, or the request could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Coarse error classification used for connectivity reporting and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Protocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotConfigured
            | GatewayError::IncompleteConfiguration(_)
            | GatewayError::InvalidInterval => ErrorKind::Configuration,
            GatewayError::Transport(_) => ErrorKind::Transport,
            GatewayError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}
