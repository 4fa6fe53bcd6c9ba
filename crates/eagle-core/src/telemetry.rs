//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Gateway client, discovery and telemetry polling."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
//! Snapshot diffing, value typing and channel synthesis.

use eagle_protocol::TelemetrySnapshot;
use rust_decimal::Decimal;

/// Namespace prefix the gateway puts on metering variable names.
pub const NAMESPACE_PREFIX: &str = "zigbee:";

/// Declared channel type of a telemetry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Number,
    Text,
}

impl ValueKind {
    /// Numeric iff the whole value is an optionally negative integer or decimal
    /// (`-?\d+(\.\d+)?`); everything else is text.
    pub fn infer(raw: &str) -> Self {
        if is_decimal_literal(raw) {
            ValueKind::Number
        } else {
            ValueKind::Text
        }
    }

    /// Convert a raw value according to this kind.
    ///
    /// Numbers keep the exact digits and scale of the raw text. A literal too
    /// wide for [`Decimal`] falls back to text.
    pub fn convert(self, raw: &str) -> TelemetryValue {
        match self {
            ValueKind::Number => Decimal::from_str_exact(raw)
                .map(TelemetryValue::Number)
                .unwrap_or_else(|_| TelemetryValue::Text(raw.to_owned())),
            ValueKind::Text => TelemetryValue::Text(raw.to_owned()),
        }
    }
}

fn is_decimal_literal(raw: &str) -> bool {
    fn digits(part: &str) -> bool {
        !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
    }
    let unsigned = raw.strip_prefix('-').unwrap_or(raw);
    match unsigned.split_once('.') {
        Some((int, frac)) => digits(int) && digits(frac),
        None => digits(unsigned),
    }
}

/// Typed value handed to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryValue {
    Number(Decimal),
    Text(String),
}

impl TelemetryValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TelemetryValue::Number(_) => ValueKind::Number,
            TelemetryValue::Text(_) => ValueKind::Text,
        }
    }
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryValue::Number(value) => write!(f, "{value}"),
            TelemetryValue::Text(value) => f.write_str(value),
        }
    }
}

/// Channel name for a field key: the key with the gateway namespace removed.
pub fn channel_name(key: &str) -> String {
    key.replace(NAMESPACE_PREFIX, "")
}

/// Typed form of a raw value, inferred from the value alone.
pub fn typed_value(raw: &str) -> TelemetryValue {
    ValueKind::infer(raw).convert(raw)
}

/// Channel synthesised from the first successful snapshot of a meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Raw field key as reported by the gateway.
    pub key: String,
    pub name: String,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    FirstSeen,
    Changed,
    Unchanged,
}

/// Diff entry for one field of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub key: String,
    pub channel: String,
    pub state: FieldState,
    pub raw: String,
    pub value: TelemetryValue,
}

impl FieldChange {
    pub fn is_emitted(&self) -> bool {
        !matches!(self.state, FieldState::Unchanged)
    }
}

/// Result of applying one snapshot to a [`SnapshotTracker`].
#[derive(Debug, Clone, Default)]
pub struct TelemetryDelta {
    /// Every field of the snapshot, in snapshot order.
    pub fields: Vec<FieldChange>,
    /// Channels created by this snapshot; only set on the first one.
    pub synthesized: Option<Vec<ChannelDescriptor>>,
}

impl TelemetryDelta {
    /// First-seen and changed fields.
    pub fn emitted(&self) -> impl Iterator<Item = &FieldChange> {
        self.fields.iter().filter(|change| change.is_emitted())
    }
}

/// Previous snapshot and channel set of one meter.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTracker {
    previous: Option<TelemetrySnapshot>,
    channels: Option<Vec<ChannelDescriptor>>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for a meter whose channels already exist on the host side.
    pub fn with_channels(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            previous: None,
            channels: Some(channels),
        }
    }

    pub fn previous(&self) -> Option<&TelemetrySnapshot> {
        self.previous.as_ref()
    }

    pub fn channels(&self) -> Option<&[ChannelDescriptor]> {
        self.channels.as_deref()
    }

    /// Diff `snapshot` against the previous one and make it the new baseline.
    pub fn apply(&mut self, snapshot: TelemetrySnapshot) -> TelemetryDelta {
        let fields = snapshot
            .iter()
            .map(|(key, raw)| {
                let state = match self.previous.as_ref().and_then(|prev| prev.get(key)) {
                    None => FieldState::FirstSeen,
                    Some(old) if old != raw => FieldState::Changed,
                    Some(_) => FieldState::Unchanged,
                };
                FieldChange {
                    key: key.to_owned(),
                    channel: channel_name(key),
                    state,
                    raw: raw.to_owned(),
                    value: typed_value(raw),
                }
            })
            .collect();

        let synthesized = if self.channels.is_none() {
            let channels = synthesize_channels(&snapshot);
            self.channels = Some(channels.clone());
            Some(channels)
        } else {
            None
        };

        self.previous = Some(snapshot);
        TelemetryDelta {
            fields,
            synthesized,
        }
    }
}

/// One channel per field, in snapshot order.
pub fn synthesize_channels(snapshot: &TelemetrySnapshot) -> Vec<ChannelDescriptor> {
    snapshot
        .iter()
        .map(|(key, raw)| ChannelDescriptor {
            key: key.to_owned(),
            name: channel_name(key),
            kind: ValueKind::infer(raw),
        })
        .collect()
}
