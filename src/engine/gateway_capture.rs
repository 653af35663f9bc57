//! Gateway event capture buffers (spec §4.7 "Gateway event capture"),
//! populated only while the network cycle is Active and drained by the
//! post-pass correlator (§4.8).

use std::collections::{BTreeMap, VecDeque};

use super::signals::DecodedValue;

/// Per-mapping, per-direction queue of observed `(timestamp, value)` pairs,
/// in non-decreasing timestamp order (the record stream is already
/// timestamp-ordered).
#[derive(Debug, Clone, Default)]
pub struct GatewayCapture {
    pub source_events: BTreeMap<usize, VecDeque<(f64, DecodedValue)>>,
    pub target_events: BTreeMap<usize, VecDeque<(f64, DecodedValue)>>,
}

impl GatewayCapture {
    pub fn push_source(&mut self, mapping_index: usize, ts: f64, value: DecodedValue) {
        self.source_events.entry(mapping_index).or_default().push_back((ts, value));
    }

    pub fn push_target(&mut self, mapping_index: usize, ts: f64, value: DecodedValue) {
        self.target_events.entry(mapping_index).or_default().push_back((ts, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_events_per_mapping_and_direction() {
        let mut capture = GatewayCapture::default();
        let v = DecodedValue { raw: 5, physical: Some(5.0), logical: None };
        capture.push_source(0, 0.0, v.clone());
        capture.push_target(0, 0.010, v);
        assert_eq!(capture.source_events[&0].len(), 1);
        assert_eq!(capture.target_events[&0].len(), 1);
    }
}
