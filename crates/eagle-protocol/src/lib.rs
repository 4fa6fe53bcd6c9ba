//! ---
//! eagle_section: "02-protocol"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway XML command/response codec."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Pure translation between the gateway's `post_manager` XML protocol and the
//! device/telemetry data model. Nothing in this crate performs I/O.
#![warn(missing_docs)]

pub mod codec;
pub mod types;

/// Shared result type for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding commands or decoding gateway responses.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The hardware address cannot be embedded in a query command.
    #[error("invalid hardware address {0:?}")]
    InvalidAddress(String),
    /// The response body is not UTF-8 text.
    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The response body is not well-formed XML or has an unexpected shape.
    #[error("malformed XML response: {0}")]
    Xml(#[from] quick_xml::de::DeError),
    /// A device query response did not carry any component.
    #[error("device query response contains no components")]
    NoComponents,
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        ProtocolError::Xml(err.into())
    }
}

pub use codec::{
    decode_device_list, decode_telemetry_snapshot, encode_list_devices_command,
    encode_query_command, escape_stray_ampersands, validate_hardware_address,
};
pub use types::{DeviceRecord, TelemetrySnapshot, ELECTRIC_METER_MODEL};
