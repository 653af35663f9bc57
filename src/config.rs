//! Analysis configuration knobs (spec §6).
//!
//! `AnalysisConfig` is a plain, fully-`Default`-able struct. Loading it from
//! a config file or CLI flags is the external collaborator's job (spec §1);
//! the crate only defines the shape and the defaults.

/// Runtime-tunable thresholds and toggles for a single analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Nominal LIN baud rate in bits/second.
    pub lin_baudrate: f64,
    /// Width of a bus-load accounting window, in seconds.
    pub bus_load_window_s: f64,
    /// Max latency between a source and target gateway event to still count
    /// as a match.
    pub gateway_tolerance_s: f64,
    /// Relative tolerance factor applied to expected schedule-slot delay.
    pub schedule_tolerance_factor: f64,
    /// Absolute floor for schedule timing tolerance, in seconds.
    pub schedule_min_absolute_tolerance_s: f64,
    /// Percent tolerance for measured vs. nominal baud rate.
    pub physical_baud_tolerance_percent: f64,
    /// Acceptable break-field width, in bit-times, as `[min, max]`.
    pub physical_break_bits: [f64; 2],
    /// Absolute tolerance, in microseconds, added to physical timing checks.
    pub physical_break_abs_tolerance_us: f64,
    /// Relative tolerance factor for frame/byte-interval timing checks.
    pub physical_timing_relative_tolerance_factor: f64,
    /// Minimum inter-frame spacing, in bit-times.
    pub physical_ifs_min_bits: f64,
    /// Epsilon below which two physical values are considered equal.
    pub physical_comparison_epsilon: f64,
    /// Gap between consecutive LIN records, in seconds, above which the bus
    /// is considered inactive.
    pub inactivity_threshold_s: f64,

    /// Validate LIN checksums.
    pub enable_checksum_validation: bool,
    /// Run the physical-layer timing validators.
    pub enable_physical_validation: bool,
    /// Run the schedule-adherence state machine.
    pub enable_schedule_validation: bool,
    /// Run gateway capture and correlation.
    pub enable_gateway_validation: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lin_baudrate: 19_200.0,
            bus_load_window_s: 1.0,
            gateway_tolerance_s: 0.022,
            schedule_tolerance_factor: 0.1,
            schedule_min_absolute_tolerance_s: 0.005,
            physical_baud_tolerance_percent: 2.0,
            physical_break_bits: [13.0, 18.0],
            physical_break_abs_tolerance_us: 50.0,
            physical_timing_relative_tolerance_factor: 0.1,
            physical_ifs_min_bits: 3.0,
            physical_comparison_epsilon: 1e-6,
            inactivity_threshold_s: 0.5,

            enable_checksum_validation: true,
            enable_physical_validation: true,
            enable_schedule_validation: true,
            enable_gateway_validation: true,
        }
    }
}

impl AnalysisConfig {
    /// Effective jitter tolerance used by physical-layer checks: the larger
    /// of the master's declared jitter and the absolute schedule tolerance.
    pub fn effective_jitter(&self, master_jitter_s: f64) -> f64 {
        master_jitter_s.max(self.schedule_min_absolute_tolerance_s)
    }

    /// Nominal LIN bit duration in seconds.
    pub fn nominal_bit_time(&self) -> f64 {
        1.0 / self.lin_baudrate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.lin_baudrate, 19_200.0);
        assert_eq!(cfg.bus_load_window_s, 1.0);
        assert_eq!(cfg.gateway_tolerance_s, 0.022);
        assert_eq!(cfg.physical_break_bits, [13.0, 18.0]);
    }

    #[test]
    fn effective_jitter_takes_the_larger_bound() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.effective_jitter(0.0), cfg.schedule_min_absolute_tolerance_s);
        assert_eq!(cfg.effective_jitter(1.0), 1.0);
    }
}
