//! ---
//! eagle_section: "02-protocol"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway XML command/response codec."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Command envelopes and response decoders for the `post_manager` endpoint.
//!
//! ```text
//! device_list   <Command><Name>device_list</Name></Command>
//! device_query  <Command><Name>device_query</Name>
//!                 <DeviceDetails><HardwareAddress>{addr}</HardwareAddress></DeviceDetails>
//!                 <Components><All>Y</All></Components>
//!               </Command>
//! ```
//!
//! Responses are decoded leniently: elements the model does not know about are
//! skipped so newer firmware revisions keep working. Device lists go through
//! serde; telemetry is read from the event stream so values stay byte-exact.
use std::borrow::Cow;

use quick_xml::de::DeError;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::debug;

use crate::types::{DeviceRecord, TelemetrySnapshot};
use crate::{ProtocolError, Result};

const LIST_DEVICES_COMMAND: &str = "<Command><Name>device_list</Name></Command>";
const QUERY_COMMAND_PREFIX: &str =
    "<Command><Name>device_query</Name><DeviceDetails><HardwareAddress>";
const QUERY_COMMAND_SUFFIX: &str =
    "</HardwareAddress></DeviceDetails><Components><All>Y</All></Components></Command>";

/// Literal ampersand the gateway leaves unescaped inside text values.
const STRAY_AMPERSAND: &str = " & ";
const ESCAPED_AMPERSAND: &str = " &amp; ";

/// Encode the request for the complete device list.
pub fn encode_list_devices_command() -> Vec<u8> {
    LIST_DEVICES_COMMAND.as_bytes().to_vec()
}

/// Encode a "query all components" request for one device.
pub fn encode_query_command(hardware_address: &str) -> Result<Vec<u8>> {
    validate_hardware_address(hardware_address)?;
    let mut frame = Vec::with_capacity(
        QUERY_COMMAND_PREFIX.len() + hardware_address.len() + QUERY_COMMAND_SUFFIX.len(),
    );
    frame.extend_from_slice(QUERY_COMMAND_PREFIX.as_bytes());
    frame.extend_from_slice(hardware_address.as_bytes());
    frame.extend_from_slice(QUERY_COMMAND_SUFFIX.as_bytes());
    Ok(frame)
}

/// Check that an address is a single token that can be embedded verbatim.
///
/// Gateway addresses look like `0x0013500100abcdef`; anything outside ASCII
/// alphanumerics and `:`, `-`, `_` would need escaping and is rejected.
pub fn validate_hardware_address(hardware_address: &str) -> Result<()> {
    let valid = !hardware_address.is_empty()
        && hardware_address
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidAddress(hardware_address.to_owned()))
    }
}

/// Escape the ` & ` sequences the gateway emits inside text content.
pub fn escape_stray_ampersands(xml: &str) -> Cow<'_, str> {
    if xml.contains(STRAY_AMPERSAND) {
        Cow::Owned(xml.replace(STRAY_AMPERSAND, ESCAPED_AMPERSAND))
    } else {
        Cow::Borrowed(xml)
    }
}

/// Decode a `device_list` response into records, in document order.
pub fn decode_device_list(payload: &[u8]) -> Result<Vec<DeviceRecord>> {
    let text = std::str::from_utf8(payload)?;
    let document: wire::DeviceList = quick_xml::de::from_str(text)?;
    Ok(document
        .devices
        .into_iter()
        .map(DeviceRecord::from)
        .collect())
}

/// Decode a `device_query` response; the first component's variables form the snapshot.
///
/// Variable names and values are taken verbatim, surrounding whitespace included.
pub fn decode_telemetry_snapshot(payload: &[u8]) -> Result<TelemetrySnapshot> {
    let text = std::str::from_utf8(payload)?;
    let text = escape_stray_ampersands(text);
    let mut reader = Reader::from_str(&text);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut components = 0usize;
    let mut pending: Option<PendingVariable> = None;
    let mut snapshot = TelemetrySnapshot::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let name = start.name().as_ref().to_vec();
                if is_child_of(&path, COMPONENTS, &name, COMPONENT) {
                    components += 1;
                }
                if components == 1 && is_variable_start(&path, &name) {
                    pending = Some(PendingVariable::default());
                }
                path.push(name);
            }
            Event::Empty(empty) => {
                if is_child_of(&path, COMPONENTS, empty.name().as_ref(), COMPONENT) {
                    components += 1;
                }
            }
            Event::Text(chunk) => {
                if let Some(field) = pending_field(&path, pending.as_mut()) {
                    field.push_str(&chunk.unescape()?);
                }
            }
            Event::CData(cdata) => {
                if let Some(field) = pending_field(&path, pending.as_mut()) {
                    field.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Event::End(_) => {
                if path.pop().as_deref() == Some(VARIABLE) {
                    if let Some(variable) = pending.take() {
                        if variable.name.is_empty() {
                            debug!("skipping unnamed telemetry variable");
                        } else {
                            snapshot.insert(variable.name, variable.value);
                        }
                    }
                }
            }
            Event::Eof if path.is_empty() => break,
            Event::Eof => return Err(ProtocolError::Xml(DeError::UnexpectedEof)),
            _ => {}
        }
    }

    if components == 0 {
        return Err(ProtocolError::NoComponents);
    }
    Ok(snapshot)
}

const COMPONENTS: &[u8] = b"Components";
const COMPONENT: &[u8] = b"Component";
const VARIABLES: &[u8] = b"Variables";
const VARIABLE: &[u8] = b"Variable";
const VARIABLE_NAME: &[u8] = b"Name";
const VARIABLE_VALUE: &[u8] = b"Value";

#[derive(Debug, Default)]
struct PendingVariable {
    name: String,
    value: String,
}

fn is_child_of(path: &[Vec<u8>], parent: &[u8], name: &[u8], child: &[u8]) -> bool {
    name == child && path.last().map(Vec::as_slice) == Some(parent)
}

fn is_variable_start(path: &[Vec<u8>], name: &[u8]) -> bool {
    match path {
        [.., component, variables] => {
            name == VARIABLE
                && component.as_slice() == COMPONENT
                && variables.as_slice() == VARIABLES
        }
        _ => false,
    }
}

/// Text buffer of the `Name` or `Value` element currently open inside a variable.
fn pending_field<'a>(
    path: &[Vec<u8>],
    pending: Option<&'a mut PendingVariable>,
) -> Option<&'a mut String> {
    let variable = pending?;
    match path {
        [.., parent, field] if parent.as_slice() == VARIABLE => match field.as_slice() {
            VARIABLE_NAME => Some(&mut variable.name),
            VARIABLE_VALUE => Some(&mut variable.value),
            _ => None,
        },
        _ => None,
    }
}

/// Serde shape of the `device_list` document. Only the consumed elements are modelled.
mod wire {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub(super) struct DeviceList {
        #[serde(rename = "Device", default)]
        pub devices: Vec<Device>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct Device {
        #[serde(rename = "HardwareAddress", default)]
        pub hardware_address: String,
        #[serde(rename = "ModelId", default)]
        pub model_id: String,
        #[serde(rename = "ConnectionStatus", default)]
        pub connection_status: Option<String>,
        #[serde(rename = "Manufacturer", default)]
        pub manufacturer: Option<String>,
        #[serde(rename = "Protocol", default)]
        pub protocol: Option<String>,
        #[serde(rename = "LastContact", default)]
        pub last_contact: Option<String>,
        #[serde(rename = "NetworkAddress", default)]
        pub network_address: Option<String>,
    }

    impl From<Device> for DeviceRecord {
        fn from(device: Device) -> Self {
            Self {
                hardware_address: device.hardware_address,
                model_id: device.model_id,
                connection_status: device.connection_status,
                manufacturer: device.manufacturer,
                protocol: device.protocol,
                last_contact: device.last_contact,
                network_address: device.network_address,
            }
        }
    }
}
