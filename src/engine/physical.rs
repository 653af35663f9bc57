//! Physical-layer timing validators (spec §4.7 "Physical layer"), run only
//! for LIN frame records that carry a `physical_meta`.

use crate::config::AnalysisConfig;
use crate::log::PhysicalMeta;

use super::network_cycle::MinAvgMax;
use super::EventBucket;

/// Physical-layer validator state. Byte-interval and inter-frame-spacing
/// checks need the previous frame's timing, so this carries a small amount
/// of state across calls.
#[derive(Debug, Clone, Default)]
pub struct PhysicalValidator {
    pub baud_deviation: EventBucket,
    pub break_violations: EventBucket,
    pub delimiter_violations: EventBucket,
    pub frame_duration_violations: EventBucket,
    pub byte_interval_violations: EventBucket,
    pub ifs_violations: EventBucket,
    pub header_duration: MinAvgMax,
    /// Header slot offset, metrics only (spec §4.7 "HSO/RSO: accumulate as
    /// metrics only").
    pub hso: MinAvgMax,
    /// Response slot offset, metrics only.
    pub rso: MinAvgMax,
    previous_eof: Option<f64>,
}

impl PhysicalValidator {
    pub fn check(&mut self, ts: f64, dlc: u8, meta: &PhysicalMeta, config: &AnalysisConfig, master_jitter_s: f64) {
        let tb = config.nominal_bit_time();
        let jitter = master_jitter_s.max(config.schedule_min_absolute_tolerance_s);

        for (label, measured) in [("BR", meta.br), ("RBR", meta.rbr), ("HBR", meta.hbr)] {
            if let Some(measured) = measured {
                let tolerance = config.lin_baudrate * config.physical_baud_tolerance_percent / 100.0;
                if (measured - config.lin_baudrate).abs() > tolerance {
                    self.baud_deviation
                        .record(ts, format!("{label} measured {measured} vs nominal {}", config.lin_baudrate));
                }
            }
        }

        if let Some(&break_ns) = meta.break_info.first() {
            let break_us = break_ns / 1000.0;
            let min_us = config.physical_break_bits[0] * tb * 1e6 - config.physical_break_abs_tolerance_us;
            let max_us = config.physical_break_bits[1] * tb * 1e6 + config.physical_break_abs_tolerance_us;
            if break_us < min_us || break_us > max_us {
                self.break_violations.record(ts, format!("break {break_us}us outside [{min_us},{max_us}]"));
            }
        }

        if let Some(&delimiter_ns) = meta.break_info.get(1) {
            let delimiter_us = delimiter_ns / 1000.0;
            let expected_us = tb * 1e6;
            if (delimiter_us - expected_us).abs() > config.physical_break_abs_tolerance_us {
                self.delimiter_violations.record(ts, format!("delimiter {delimiter_us}us"));
            }
        }

        if let (Some(sof), Some(eof)) = (meta.sof, meta.eof) {
            let observed = eof - sof;
            let expected = (43.0 + 10.0 * dlc as f64) * tb;
            let tolerance = (expected * config.physical_timing_relative_tolerance_factor).max(jitter);
            if (observed - expected).abs() > tolerance {
                self.frame_duration_violations
                    .record(ts, format!("frame duration {observed}s vs expected {expected}s"));
            }

            if let Some(prev_eof) = self.previous_eof {
                let spacing = sof - prev_eof;
                let min_spacing = config.physical_ifs_min_bits * tb;
                if spacing < min_spacing {
                    self.ifs_violations.record(ts, format!("inter-frame spacing {spacing}s < {min_spacing}s"));
                }
            }
            self.previous_eof = Some(eof);
        }

        if meta.eob.len() >= 2 {
            let expected = 10.0 * tb;
            let tolerance = (expected * config.physical_timing_relative_tolerance_factor).max(jitter);
            for pair in meta.eob.windows(2) {
                let observed = pair[1] - pair[0];
                if (observed - expected).abs() > tolerance {
                    self.byte_interval_violations
                        .record(ts, format!("byte interval {observed}s vs expected {expected}s"));
                }
            }
        }

        if let (Some(sof), Some(eoh)) = (meta.sof, meta.eoh) {
            let duration = eoh - sof;
            if duration > 0.0 && duration < 0.1 {
                self.header_duration.observe(duration);
            }
        }

        if let Some(hso) = meta.hso {
            self.hso.observe(hso);
        }
        if let Some(rso) = meta.rso {
            self.rso.observe(rso);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(sof: f64, eof: f64, dlc_expected_duration: bool) -> PhysicalMeta {
        let _ = dlc_expected_duration;
        PhysicalMeta {
            sof: Some(sof),
            eof: Some(eof),
            ..Default::default()
        }
    }

    #[test]
    fn frame_duration_within_tolerance_is_silent() {
        let config = AnalysisConfig::default();
        let tb = config.nominal_bit_time();
        let mut validator = PhysicalValidator::default();
        let expected = (43.0 + 10.0 * 2.0) * tb;
        let meta = meta_with(0.0, expected, true);
        validator.check(0.0, 2, &meta, &config, 0.0);
        assert_eq!(validator.frame_duration_violations.count, 0);
    }

    #[test]
    fn frame_duration_far_off_is_flagged() {
        let config = AnalysisConfig::default();
        let mut validator = PhysicalValidator::default();
        let meta = meta_with(0.0, 0.5, true);
        validator.check(0.0, 2, &meta, &config, 0.0);
        assert_eq!(validator.frame_duration_violations.count, 1);
    }

    #[test]
    fn break_field_outside_bit_window_is_flagged() {
        let config = AnalysisConfig::default();
        let mut validator = PhysicalValidator::default();
        let meta = PhysicalMeta {
            break_info: vec![1.0],
            ..Default::default()
        };
        validator.check(0.0, 1, &meta, &config, 0.0);
        assert_eq!(validator.break_violations.count, 1);
    }

    #[test]
    fn hso_and_rso_are_accumulated_as_metrics_only() {
        let config = AnalysisConfig::default();
        let mut validator = PhysicalValidator::default();
        let meta = PhysicalMeta { hso: Some(5.0), rso: Some(7.0), ..Default::default() };
        validator.check(0.0, 1, &meta, &config, 0.0);
        assert_eq!(validator.hso.count, 1);
        assert_eq!(validator.hso.avg(), 5.0);
        assert_eq!(validator.rso.avg(), 7.0);
    }
}
