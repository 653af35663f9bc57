//! In-memory LIN cluster model produced by the LDF parser (spec §3, §4.2).

use std::collections::BTreeMap;

/// Kind of value-encoding a LIN signal resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodingKind {
    /// `physical_value` entries present, no `logical_value` entries.
    Physical,
    /// `logical_value` entries present, no `physical_value` entries.
    Logical,
    /// Both kinds of entries present.
    Hybrid,
    /// Signal carries an explicit byte-array init value (`{...}`).
    ByteArray,
    /// No encoding block bound to this signal.
    Unknown,
}

/// A single `logical_value raw "label"` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalValue {
    pub raw: u64,
    pub label: String,
}

/// Resolved encoding for a `LinSignalInstance`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEncoding {
    pub kind: EncodingKind,
    pub factor: f64,
    pub offset: f64,
    pub unit: Option<String>,
    pub logical_values: Vec<LogicalValue>,
    pub physical_range: Option<(f64, f64)>,
}

impl Default for SignalEncoding {
    fn default() -> Self {
        Self {
            kind: EncodingKind::Unknown,
            factor: 1.0,
            offset: 0.0,
            unit: None,
            logical_values: Vec::new(),
            physical_range: None,
        }
    }
}

impl SignalEncoding {
    /// Looks up the label for a raw value, when this is a `Logical`/`Hybrid`
    /// encoding with a matching entry.
    pub fn label_for(&self, raw: u64) -> Option<&str> {
        self.logical_values
            .iter()
            .find(|v| v.raw == raw)
            .map(|v| v.label.as_str())
    }
}

/// A signal as it appears inside one specific frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LinSignalInstance {
    pub name: String,
    pub bit_length: u16,
    pub start_bit: u16,
    pub publisher: String,
    pub subscribers: Vec<String>,
    pub encoding: SignalEncoding,
}

/// Kind-specific payload of a `LinFrame`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Unconditional {
        id: u8,
        publisher: String,
        dlc: u8,
        signals: Vec<LinSignalInstance>,
    },
    Sporadic {
        associated_frames: Vec<String>,
    },
    EventTriggered {
        associated_frames: Vec<String>,
    },
    Diagnostic {
        id: u8,
        publisher: String,
    },
}

/// A single named LIN frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LinFrame {
    pub name: String,
    pub kind: FrameKind,
}

impl LinFrame {
    /// The wire id, when this frame has one assigned (Unconditional or
    /// Diagnostic frames do; Sporadic/EventTriggered frames do not carry
    /// their own id).
    pub fn id(&self) -> Option<u8> {
        match &self.kind {
            FrameKind::Unconditional { id, .. } => Some(*id),
            FrameKind::Diagnostic { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// DLC, when known statically (Unconditional/Diagnostic frames only).
    pub fn dlc(&self) -> Option<u8> {
        match &self.kind {
            FrameKind::Unconditional { dlc, .. } => Some(*dlc),
            FrameKind::Diagnostic { .. } => Some(8),
            _ => None,
        }
    }

    /// Publisher node name, when known statically.
    pub fn publisher(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::Unconditional { publisher, .. } => Some(publisher.as_str()),
            FrameKind::Diagnostic { publisher, .. } => Some(publisher.as_str()),
            _ => None,
        }
    }

    /// Signals carried by this frame, empty for non-Unconditional kinds.
    pub fn signals(&self) -> &[LinSignalInstance] {
        match &self.kind {
            FrameKind::Unconditional { signals, .. } => signals.as_slice(),
            _ => &[],
        }
    }
}

/// One entry of a schedule table: publish `frame` after waiting `delay_ms`
/// from the previous entry's start.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub frame_name: String,
    pub delay_ms: f64,
}

/// An ordered schedule table, after equivalence grouping (§4.5) has picked a
/// representative name for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTable {
    pub entries: Vec<ScheduleEntry>,
}

/// The complete LIN cluster description.
#[derive(Debug, Clone, PartialEq)]
pub struct BusModelLIN {
    pub master_name: String,
    pub master_timebase_s: f64,
    pub master_jitter_s: f64,
    pub slaves: Vec<String>,
    /// Slave name → declared `response_error` signal name.
    pub response_error_signals: BTreeMap<String, String>,
    pub frames: BTreeMap<String, LinFrame>,
    /// Schedule name (post-grouping representative) → table.
    pub schedules: BTreeMap<String, ScheduleTable>,
}

impl BusModelLIN {
    /// Looks up an Unconditional/Diagnostic frame by its wire id.
    pub fn frame_by_id(&self, id: u8) -> Option<&LinFrame> {
        self.frames.values().find(|f| f.id() == Some(id))
    }

    /// `true` when `node` is the declared master.
    pub fn is_master(&self, node: &str) -> bool {
        node == self.master_name
    }
}
