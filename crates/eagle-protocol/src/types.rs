//! ---
//! eagle_section: "02-protocol"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway XML command/response codec."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Model identifier the gateway reports for electricity meters.
pub const ELECTRIC_METER_MODEL: &str = "electric_meter";

/// One entry of a `device_list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable hardware address used to address telemetry queries.
    pub hardware_address: String,
    /// Model identifier (e.g. `electric_meter`).
    pub model_id: String,
    /// Connection status as reported by the gateway.
    pub connection_status: Option<String>,
    /// Manufacturer string, informational only.
    pub manufacturer: Option<String>,
    /// Metering network protocol (e.g. `Zigbee`), informational only.
    pub protocol: Option<String>,
    /// Last contact timestamp in the gateway's hex notation, informational only.
    pub last_contact: Option<String>,
    /// Network-level short address, informational only.
    pub network_address: Option<String>,
}

impl DeviceRecord {
    /// True when the model identifier denotes an electricity meter (case-insensitive).
    pub fn is_electric_meter(&self) -> bool {
        self.model_id.eq_ignore_ascii_case(ELECTRIC_METER_MODEL)
    }
}

/// Field-name to raw value mapping returned by one telemetry query.
///
/// Iteration follows the order in which the gateway listed the variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetrySnapshot {
    fields: IndexMap<String, String>,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning the previous value when the name repeats.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.fields.insert(name.into(), value.into())
    }

    /// Raw value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Whether the snapshot carries the field.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields were reported.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in protocol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Field names in protocol order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for TelemetrySnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (name, value) in iter {
            snapshot.insert(name, value);
        }
        snapshot
    }
}
