//! Signal decoding, per-signal statistics, and the slave response-error
//! fault signal (spec §4.1 decoding primitives applied per record, §4.7
//! "Analysis engine" responsibility list: "signal range and value
//! analysis, slave response performance").

use std::collections::BTreeMap;

use crate::dbc::{CanMessage, CanSignal};
use crate::ldf::{EncodingKind, LinFrame, LinSignalInstance, SignalEncoding};
use crate::numeric::{extract_raw, sign_extend, ByteOrder};

use super::EventBucket;

/// One decoded signal observation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    pub raw: u64,
    pub physical: Option<f64>,
    pub logical: Option<String>,
}

fn decode_lin_signal(signal: &LinSignalInstance, data: &[u8]) -> DecodedValue {
    let raw = extract_raw(data, signal.start_bit, signal.bit_length, ByteOrder::LittleEndian);
    decode_with_encoding(raw, &signal.encoding)
}

fn decode_with_encoding(raw: u64, encoding: &SignalEncoding) -> DecodedValue {
    let logical = encoding.label_for(raw).map(|s| s.to_string());
    let physical = match encoding.kind {
        EncodingKind::Logical | EncodingKind::ByteArray => None,
        _ => Some(raw as f64 * encoding.factor + encoding.offset),
    };
    DecodedValue { raw, physical, logical }
}

fn decode_can_signal(signal: &CanSignal, data: &[u8]) -> DecodedValue {
    let raw_unsigned = extract_raw(data, signal.start_bit, signal.length, signal.byte_order);
    let logical = signal.label_for(raw_unsigned).map(|s| s.to_string());
    let physical_raw = if signal.is_signed {
        sign_extend(raw_unsigned, signal.length) as f64
    } else {
        raw_unsigned as f64
    };
    DecodedValue {
        raw: raw_unsigned,
        physical: logical.is_none().then(|| physical_raw * signal.factor + signal.offset),
        logical,
    }
}

/// Running min/max/mean for one signal's physical value.
#[derive(Debug, Clone, Default)]
pub struct SignalStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub logical_counts: BTreeMap<String, u64>,
}

impl SignalStats {
    fn observe(&mut self, value: &DecodedValue) {
        if let Some(phys) = value.physical {
            if self.count == 0 {
                self.min = phys;
                self.max = phys;
            } else {
                self.min = self.min.min(phys);
                self.max = self.max.max(phys);
            }
            self.sum += phys;
        }
        if let Some(label) = &value.logical {
            *self.logical_counts.entry(label.clone()).or_insert(0) += 1;
        }
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Signal-level decoding and statistics, plus range-violation and
/// slave-fault detection.
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    pub lin_stats: BTreeMap<(String, String), SignalStats>,
    pub can_stats: BTreeMap<(String, String), SignalStats>,
    pub range_violations: BTreeMap<(String, String), EventBucket>,
    pub slave_faults: BTreeMap<String, EventBucket>,
}

impl SignalEngine {
    /// Decodes every signal in `frame` against `data`, updating statistics
    /// and range-violation buckets. Returns the decoded values keyed by
    /// signal name for callers (e.g. gateway capture) that need the raw
    /// values too.
    pub fn decode_lin_frame(
        &mut self,
        ts: f64,
        frame_name: &str,
        frame: &LinFrame,
        data: &[u8],
    ) -> BTreeMap<String, DecodedValue> {
        let mut decoded = BTreeMap::new();
        for signal in frame.signals() {
            let value = decode_lin_signal(signal, data);

            if let (Some(phys), Some((min, max))) = (value.physical, signal.encoding.physical_range) {
                if phys < min || phys > max {
                    self.range_violations
                        .entry((frame_name.to_string(), signal.name.clone()))
                        .or_default()
                        .record(ts, format!("{phys} outside [{min},{max}]"));
                }
            }

            self.lin_stats
                .entry((frame_name.to_string(), signal.name.clone()))
                .or_default()
                .observe(&value);
            decoded.insert(signal.name.clone(), value);
        }
        decoded
    }

    /// Checks a slave's declared `response_error` signal for a fault value
    /// (any decoded raw != 0 is treated as asserted, matching the common LIN
    /// convention of a single-bit error flag).
    pub fn check_response_error(&mut self, ts: f64, slave: &str, value: &DecodedValue) {
        if value.raw != 0 {
            self.slave_faults
                .entry(slave.to_string())
                .or_default()
                .record(ts, format!("response_error raw={}", value.raw));
        }
    }

    pub fn decode_can_message(
        &mut self,
        ts: f64,
        message_name: &str,
        message: &CanMessage,
        data: &[u8],
    ) -> BTreeMap<String, DecodedValue> {
        let mut decoded = BTreeMap::new();
        let mux_value = message.mux_switch().map(|m| {
            let v = decode_can_signal(m, data);
            decoded.insert(m.name.clone(), v.clone());
            v.raw
        });

        for signal in &message.signals {
            if signal.is_mux_switch {
                continue;
            }
            if !signal.active_under(mux_value) {
                continue;
            }
            let value = decode_can_signal(signal, data);

            if let (Some(phys), Some((min, max))) = (value.physical, signal.range) {
                if phys < min || phys > max {
                    self.range_violations
                        .entry((message_name.to_string(), signal.name.clone()))
                        .or_default()
                        .record(ts, format!("{phys} outside [{min},{max}]"));
                }
            }

            self.can_stats
                .entry((message_name.to_string(), signal.name.clone()))
                .or_default()
                .observe(&value);
            decoded.insert(signal.name.clone(), value);
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldf::parse_ldf;

    const LDF: &str = r#"
Nodes {
    Master: ECU, 5 ms;
    Slaves: Sensor;
}

Signals {
    Temp: 8, 0, Sensor, ECU;
}

Signal_encoding_types {
    TempEnc {
        physical_value, 0, 255, 0.5, -40, "C";
    }
}

Signal_representation {
    TempEnc: Temp;
}

Frames {
    F1: 1, Sensor, 1 {
        Temp, 0;
    }
}
"#;

    #[test]
    fn decodes_physical_value_and_updates_stats() {
        let (model, _) = parse_ldf(LDF).unwrap();
        let frame = model.frames.get("F1").unwrap();
        let mut engine = SignalEngine::default();
        let decoded = engine.decode_lin_frame(0.0, "F1", frame, &[100]);
        let temp = &decoded["Temp"];
        assert_eq!(temp.raw, 100);
        assert_eq!(temp.physical, Some(100.0 * 0.5 - 40.0));

        let stats = &engine.lin_stats[&("F1".to_string(), "Temp".to_string())];
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn slave_fault_signal_recorded_on_nonzero_raw() {
        let mut engine = SignalEngine::default();
        engine.check_response_error(0.0, "Sensor", &DecodedValue { raw: 1, physical: None, logical: None });
        assert_eq!(engine.slave_faults["Sensor"].count, 1);
    }

    #[test]
    fn multi_byte_lin_signal_decodes_little_endian() {
        let ldf = r#"
Nodes {
    Master: ECU, 5 ms;
    Slaves: Sensor;
}

Signals {
    Counter: 16, 0, Sensor, ECU;
}

Frames {
    F1: 1, Sensor, 2 {
        Counter, 0;
    }
}
"#;
        let (model, _) = parse_ldf(ldf).unwrap();
        let frame = model.frames.get("F1").unwrap();
        let mut engine = SignalEngine::default();
        // Little-endian 16-bit: low byte 0x34, high byte 0x12 -> 0x1234.
        let decoded = engine.decode_lin_frame(0.0, "F1", frame, &[0x34, 0x12]);
        let counter = &decoded["Counter"];
        assert_eq!(counter.raw, 0x1234);
    }
}
