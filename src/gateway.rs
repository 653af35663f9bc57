//! Gateway map loading and resolution against a `BusModel` (spec §4.6).
//!
//! This is structural validation only — whether a record's observed value
//! actually correlates across networks is the correlator's job
//! ([`crate::correlator`]).

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::model::{BusModel, Channel};

/// Fatal gateway-map errors: the supplied JSON itself is malformed. Per-record
/// resolution failures are warnings, not errors (spec §7).
#[derive(Debug, Error, PartialEq)]
pub enum GatewayMapError {
    #[error("gateway map JSON error: {0}")]
    Json(String),
    #[error("gateway map entry {index} is missing or has a non-string value for key `{key}`")]
    MalformedEntry { index: usize, key: &'static str },
}

/// A gateway mapping after structural validation but before network/signal
/// resolution.
#[derive(Debug, Clone)]
struct ValidatedEntry {
    index: usize,
    source_network: Channel,
    source_message: String,
    source_signal: String,
    target_network: Channel,
    target_message: String,
    target_signal: String,
}

/// A gateway mapping whose endpoints have been resolved against a
/// `BusModel` (spec §3 `GatewayMapping`).
#[derive(Debug, Clone)]
pub struct GatewayMapping {
    /// Index into the original input list.
    pub index: usize,
    pub source_network: Channel,
    pub source_frame_id: u32,
    pub source_message: String,
    pub source_signal: String,
    pub target_network: Channel,
    pub target_frame_id: u32,
    pub target_message: String,
    pub target_signal: String,
}

/// A gateway map entry that failed structural validation or resolution,
/// carried as data rather than printed (spec §11 supplement: "resolution
/// diagnostics as data").
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayWarning {
    pub index: usize,
    pub reason: String,
}

/// Dual index over resolved mappings, keyed the way the engine's per-record
/// dispatch needs them: `(channel, frame_id) -> mappings where this side is
/// the source (resp. target)`.
#[derive(Debug, Clone, Default)]
pub struct GatewayIndex {
    pub by_source: BTreeMap<(Channel, u32), Vec<usize>>,
    pub by_target: BTreeMap<(Channel, u32), Vec<usize>>,
    pub mappings: Vec<GatewayMapping>,
}

impl GatewayIndex {
    pub fn sources_for(&self, channel: Channel, frame_id: u32) -> &[usize] {
        self.by_source
            .get(&(channel, frame_id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn targets_for(&self, channel: Channel, frame_id: u32) -> &[usize] {
        self.by_target
            .get(&(channel, frame_id))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

fn parse_raw_entries(text: &str) -> Result<Vec<serde_json::Value>, GatewayMapError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| GatewayMapError::Json(e.to_string()))?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(GatewayMapError::Json("top-level value is not an array".to_string())),
    }
}

fn string_field<'a>(
    obj: &'a serde_json::Value,
    key: &'static str,
    index: usize,
) -> Result<&'a str, GatewayMapError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .ok_or(GatewayMapError::MalformedEntry { index, key })
}

fn validate_entries(
    raw: Vec<serde_json::Value>,
    warnings: &mut Vec<GatewayWarning>,
) -> Result<Vec<ValidatedEntry>, GatewayMapError> {
    let mut out = Vec::new();
    for (index, obj) in raw.into_iter().enumerate() {
        let source_network_s = string_field(&obj, "source_network", index)?;
        let source_message = string_field(&obj, "source_message", index)?.to_string();
        let source_signal = string_field(&obj, "source_signal", index)?.to_string();
        let target_network_s = string_field(&obj, "target_network", index)?;
        let target_message = string_field(&obj, "target_message", index)?.to_string();
        let target_signal = string_field(&obj, "target_signal", index)?.to_string();

        let (Some(source_network), Some(target_network)) = (
            Channel::parse(source_network_s),
            Channel::parse(target_network_s),
        ) else {
            warnings.push(GatewayWarning {
                index,
                reason: format!(
                    "unknown network name (source=`{source_network_s}`, target=`{target_network_s}`)"
                ),
            });
            continue;
        };

        out.push(ValidatedEntry {
            index,
            source_network,
            source_message,
            source_signal,
            target_network,
            target_message,
            target_signal,
        });
    }
    Ok(out)
}

fn resolve_endpoint(
    model: &BusModel,
    network: Channel,
    message: &str,
    signal: &str,
) -> Option<u32> {
    if network == Channel::Lin {
        let lin = model.lin.as_ref()?;
        let frame = lin.frames.get(message)?;
        let id = frame.id()?;
        let found = frame.signals().iter().any(|s| s.name == signal);
        return found.then_some(id as u32);
    }
    let can = model.can.get(&network)?;
    let (_, msg) = can.messages.iter().find(|(_, m)| m.name == message)?;
    msg.signal(signal)?;
    Some(msg.id)
}

/// Validates and resolves a JSON gateway map against a bus model
/// (spec §4.6). Returns the resolved index plus any per-entry diagnostics;
/// only malformed JSON is a fatal `GatewayMapError`.
pub fn load(text: &str, model: &BusModel) -> Result<(GatewayIndex, Vec<GatewayWarning>), GatewayMapError> {
    let raw = parse_raw_entries(text)?;
    let mut warnings = Vec::new();
    let validated = validate_entries(raw, &mut warnings)?;

    let mut index = GatewayIndex::default();

    for entry in validated {
        let source_id = resolve_endpoint(model, entry.source_network, &entry.source_message, &entry.source_signal);
        let target_id = resolve_endpoint(model, entry.target_network, &entry.target_message, &entry.target_signal);

        let (Some(source_frame_id), Some(target_frame_id)) = (source_id, target_id) else {
            debug!(index = entry.index, "gateway mapping entry failed resolution");
            warnings.push(GatewayWarning {
                index: entry.index,
                reason: if source_id.is_none() {
                    format!(
                        "source signal `{}.{}.{}` not found",
                        entry.source_network, entry.source_message, entry.source_signal
                    )
                } else {
                    format!(
                        "target signal `{}.{}.{}` not found",
                        entry.target_network, entry.target_message, entry.target_signal
                    )
                },
            });
            continue;
        };

        let mapping_idx = index.mappings.len();
        index
            .by_source
            .entry((entry.source_network, source_frame_id))
            .or_default()
            .push(mapping_idx);
        index
            .by_target
            .entry((entry.target_network, target_frame_id))
            .or_default()
            .push(mapping_idx);

        index.mappings.push(GatewayMapping {
            index: entry.index,
            source_network: entry.source_network,
            source_frame_id,
            source_message: entry.source_message,
            source_signal: entry.source_signal,
            target_network: entry.target_network,
            target_frame_id,
            target_message: entry.target_message,
            target_signal: entry.target_signal,
        });
    }

    Ok((index, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldf::parse_ldf;

    const LDF: &str = r#"
LIN_description_file;
LIN_protocol_version = "2.1";
LIN_language_version = "2.1";
LIN_speed = 19.2 kbps;

Nodes {
    Master: ECU, 5 ms, 0.1 ms;
    Slaves: Sensor;
}

Signals {
    A: 8, 0, ECU, Sensor;
}

Frames {
    F1: 1, ECU, 1 {
        A, 0;
    }
}
"#;

    #[test]
    fn resolves_valid_entry_and_drops_unknown_network() {
        let (bus_lin, _) = parse_ldf(LDF).unwrap();
        let model = BusModel {
            lin: Some(bus_lin),
            can: Default::default(),
        };

        let json = r#"[
            {"source_network":"LIN","source_message":"F1","source_signal":"A",
             "target_network":"LIN","target_message":"F1","target_signal":"A"},
            {"source_network":"BOGUS","source_message":"F1","source_signal":"A",
             "target_network":"LIN","target_message":"F1","target_signal":"A"}
        ]"#;

        let (index, warnings) = load(json, &model).unwrap();
        assert_eq!(index.mappings.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].index, 1);
        assert!(!index.sources_for(Channel::Lin, 1).is_empty());
    }

    #[test]
    fn malformed_json_is_fatal() {
        let model = BusModel::default();
        let err = load("not json", &model).unwrap_err();
        assert!(matches!(err, GatewayMapError::Json(_)));
    }

    #[test]
    fn missing_signal_is_a_warning_not_an_error() {
        let (bus_lin, _) = parse_ldf(LDF).unwrap();
        let model = BusModel {
            lin: Some(bus_lin),
            can: Default::default(),
        };
        let json = r#"[{"source_network":"LIN","source_message":"F1","source_signal":"NoSuchSignal",
             "target_network":"LIN","target_message":"F1","target_signal":"A"}]"#;
        let (index, warnings) = load(json, &model).unwrap();
        assert_eq!(index.mappings.len(), 0);
        assert_eq!(warnings.len(), 1);
    }
}
