//! DBC text parser (spec §4.3): line-oriented, recognizing `BO_`, `SG_`,
//! `BA_DEF_DEF_`, `BA_` and `VAL_` statements and resolving multiplexing and
//! the 11-/29-bit id-format flag.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::model::{decode_id_format, BusModelCAN, CanMessage, CanSignal, ValueDescription};
use crate::numeric::ByteOrder;

/// Fatal DBC parse/merge errors (spec §4.3, §7).
#[derive(Debug, Error, PartialEq)]
pub enum DbcError {
    #[error("channel has conflicting explicit baud rates: {a} vs {b}")]
    BaudRateConflict { a: f64, b: f64 },
}

static BO_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^BO_\s+(\d+)\s+(\w+)\s*:\s*(\d+)\s+(\S+)"#).unwrap());

static SG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*SG_\s+(\w+)\s*(M|m\d+)?\s*:\s*(\d+)\|(\d+)@(\d)([+-])\s*\(([^,]+),([^)]+)\)\s*\[([^|\]]*)\|([^\]]*)\]\s*"([^"]*)"\s*(.*)$"#,
    )
    .unwrap()
});

static BA_DEF_DEF_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^BA_DEF_DEF_\s+"(\w+)"\s+(.+);\s*$"#).unwrap());

static BA_MESSAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^BA_\s+"(\w+)"\s+BO_\s+(\d+)\s+(.+);\s*$"#).unwrap());

static BA_GLOBAL_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^BA_\s+"(\w+)"\s+(.+);\s*$"#).unwrap());

static VAL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^VAL_\s+(\d+)\s+(\w+)\s+(.+);\s*$"#).unwrap());

static VAL_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(-?\d+)\s+"([^"]*)""#).unwrap());

/// Result of parsing a single DBC text, before cross-file merging.
#[derive(Debug, Clone, Default)]
pub struct ParsedDbc {
    pub messages: BTreeMap<u32, CanMessage>,
    pub explicit_baudrate: Option<f64>,
    pub default_baudrate: Option<f64>,
}

/// Parses one DBC text into a `ParsedDbc`.
pub fn parse_dbc(text: &str) -> ParsedDbc {
    let mut parsed = ParsedDbc::default();
    let mut current_id: Option<u32> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = BO_LINE.captures(line) {
            let raw_id: u32 = caps[1].parse().unwrap_or(0);
            let (id, is_extended) = decode_id_format(raw_id);
            let name = caps[2].to_string();
            let dlc: u8 = caps[3].parse().unwrap_or(0);
            let sender = Some(caps[4].to_string()).filter(|s| s != "Vector__XXX");

            parsed.messages.insert(
                id,
                CanMessage {
                    name,
                    id,
                    is_extended,
                    dlc,
                    sender,
                    attributes: BTreeMap::new(),
                    signals: Vec::new(),
                },
            );
            current_id = Some(id);
            continue;
        }

        if let Some(caps) = SG_LINE.captures(line) {
            if let Some(id) = current_id {
                if let Some(msg) = parsed.messages.get_mut(&id) {
                    let name = caps[1].to_string();
                    let mux = caps.get(2).map(|m| m.as_str());
                    let (is_mux_switch, mux_value) = match mux {
                        Some("M") => (true, None),
                        Some(m) if m.starts_with('m') => {
                            (false, m[1..].parse::<u64>().ok())
                        }
                        _ => (false, None),
                    };
                    let start_bit: u16 = caps[3].parse().unwrap_or(0);
                    let length: u16 = caps[4].parse().unwrap_or(0);
                    let byte_order = if &caps[5] == "0" {
                        ByteOrder::BigEndian
                    } else {
                        ByteOrder::LittleEndian
                    };
                    let is_signed = &caps[6] == "-";
                    let factor: f64 = caps[7].trim().parse().unwrap_or(1.0);
                    let offset: f64 = caps[8].trim().parse().unwrap_or(0.0);
                    let min: f64 = caps[9].trim().parse().unwrap_or(0.0);
                    let max: f64 = caps[10].trim().parse().unwrap_or(0.0);
                    let unit = caps[11].to_string();

                    msg.signals.push(CanSignal {
                        name,
                        start_bit,
                        length,
                        byte_order,
                        is_signed,
                        factor,
                        offset,
                        unit: (!unit.is_empty()).then_some(unit),
                        range: (min != 0.0 || max != 0.0).then_some((min, max)),
                        is_mux_switch,
                        mux_value,
                        value_descriptions: Vec::new(),
                    });
                }
            }
            continue;
        }

        if let Some(caps) = BA_DEF_DEF_LINE.captures(line) {
            if &caps[1] == "Baudrate" || caps[1].eq_ignore_ascii_case("baudrate") {
                if let Ok(v) = caps[2].trim().trim_matches('"').parse::<f64>() {
                    parsed.default_baudrate = Some(v);
                }
            }
            continue;
        }

        if let Some(caps) = BA_MESSAGE_LINE.captures(line) {
            if let (Ok(id_raw), attr_name) = (caps[2].parse::<u32>(), caps[1].to_string()) {
                let (id, _) = decode_id_format(id_raw);
                let value = caps[3].trim().trim_matches('"').to_string();
                if let Some(msg) = parsed.messages.get_mut(&id) {
                    msg.attributes.insert(attr_name, value);
                }
            }
            continue;
        }

        if let Some(caps) = BA_GLOBAL_LINE.captures(line) {
            let attr_name = &caps[1];
            if attr_name == "Baudrate" || attr_name.eq_ignore_ascii_case("baudrate") {
                if let Ok(v) = caps[2].trim().trim_matches('"').parse::<f64>() {
                    parsed.explicit_baudrate = Some(v);
                }
            }
            continue;
        }

        if let Some(caps) = VAL_LINE.captures(line) {
            if let Ok(id_raw) = caps[1].parse::<u32>() {
                let (id, _) = decode_id_format(id_raw);
                let signal_name = &caps[2];
                if let Some(msg) = parsed.messages.get_mut(&id) {
                    if let Some(sig) = msg.signals.iter_mut().find(|s| s.name == signal_name) {
                        for entry in VAL_ENTRY.captures_iter(&caps[3]) {
                            if let Ok(raw) = entry[1].parse::<i64>() {
                                sig.value_descriptions.push(ValueDescription {
                                    raw: raw as u64,
                                    label: entry[2].to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    parsed
}

/// Merges multiple DBC texts sharing a channel (spec §4.3 per-channel
/// aggregation rules): signals union by name (later wins), DLC/sender fill
/// only if previously null, attributes merged, explicit baud conflicts are
/// a hard error.
pub fn parse_dbcs_for_channel(texts: &[&str]) -> Result<BusModelCAN, DbcError> {
    let mut merged = BusModelCAN::default();
    let mut explicit_baud: Option<f64> = None;
    let mut default_baud: Option<f64> = None;

    for text in texts {
        let parsed = parse_dbc(text);

        if let Some(b) = parsed.explicit_baudrate {
            match explicit_baud {
                Some(existing) if (existing - b).abs() > f64::EPSILON => {
                    return Err(DbcError::BaudRateConflict { a: existing, b });
                }
                _ => explicit_baud = Some(b),
            }
        }
        if default_baud.is_none() {
            default_baud = parsed.default_baudrate;
        }

        for (id, incoming) in parsed.messages {
            match merged.messages.get_mut(&id) {
                None => {
                    merged.messages.insert(id, incoming);
                }
                Some(existing) => {
                    if existing.dlc == 0 {
                        existing.dlc = incoming.dlc;
                    }
                    if existing.sender.is_none() {
                        existing.sender = incoming.sender;
                    }
                    for (k, v) in incoming.attributes {
                        existing.attributes.insert(k, v);
                    }
                    for signal in incoming.signals {
                        if let Some(pos) = existing.signals.iter().position(|s| s.name == signal.name) {
                            existing.signals[pos] = signal;
                        } else {
                            existing.signals.push(signal);
                        }
                    }
                }
            }
        }
    }

    merged.baudrate = explicit_baud.or(default_baud);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
BO_ 256 EngineData: 8 ECU
 SG_ RPM : 0|16@1+ (0.25,0) [0|16383.75] "rpm" Dash
 SG_ MuxSel M : 16|8@1+ (1,0) [0|255] "" Dash
 SG_ DiagA m0 : 24|8@1+ (1,0) [0|255] "" Dash
 SG_ DiagB m1 : 24|8@1+ (1,0) [0|255] "" Dash

BA_DEF_DEF_ "Baudrate" 500000;
VAL_ 256 MuxSel 0 "ModeA" 1 "ModeB" ;
"#;

    #[test]
    fn parses_message_and_signals() {
        let parsed = parse_dbc(SAMPLE);
        let msg = &parsed.messages[&256];
        assert_eq!(msg.name, "EngineData");
        assert_eq!(msg.dlc, 8);
        assert_eq!(msg.signals.len(), 4);
        let rpm = msg.signal("RPM").unwrap();
        assert_eq!(rpm.factor, 0.25);
        assert_eq!(rpm.byte_order, ByteOrder::LittleEndian);
        assert!(!rpm.is_signed);

        let mux = msg.mux_switch().unwrap();
        assert_eq!(mux.name, "MuxSel");
        assert_eq!(mux.label_for(0), Some("ModeA"));

        let diag_a = msg.signal("DiagA").unwrap();
        assert_eq!(diag_a.mux_value, Some(0));
        assert!(diag_a.active_under(Some(0)));
        assert!(!diag_a.active_under(Some(1)));

        assert_eq!(parsed.default_baudrate, Some(500_000.0));
    }

    #[test]
    fn extended_id_in_bo_line_is_decoded() {
        let text = "BO_ 2147484001 Extended: 8 ECU\n";
        let parsed = parse_dbc(text);
        // 2147484001 = 0x8000_0000 | 0x321
        assert!(parsed.messages.contains_key(&0x321));
        assert!(parsed.messages[&0x321].is_extended);
    }

    #[test]
    fn baud_conflict_across_files_is_an_error() {
        let a = "BA_ \"Baudrate\" 500000;\nBO_ 1 A: 8 X\n";
        let b = "BA_ \"Baudrate\" 250000;\nBO_ 2 B: 8 X\n";
        let err = parse_dbcs_for_channel(&[a, b]).unwrap_err();
        assert_eq!(
            err,
            DbcError::BaudRateConflict {
                a: 500_000.0,
                b: 250_000.0
            }
        );
    }

    #[test]
    fn later_file_signals_win_on_merge() {
        let a = "BO_ 1 A: 8 X\n SG_ S : 0|8@1+ (1,0) [0|0] \"\" R\n";
        let b = "BO_ 1 A: 0 Y\n SG_ S : 0|8@1+ (2,0) [0|0] \"\" R\n";
        let merged = parse_dbcs_for_channel(&[a, b]).unwrap();
        let msg = &merged.messages[&1];
        assert_eq!(msg.dlc, 8, "DLC should fill from first file since second is null");
        assert_eq!(msg.sender.as_deref(), Some("X"));
        assert_eq!(msg.signal("S").unwrap().factor, 2.0, "later signal definition wins");
    }
}
