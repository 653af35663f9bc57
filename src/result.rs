//! Result finalizer (spec §4.10, C9): turns one run's [`AnalysisState`] plus
//! the correlator's output into the sealed, immutable [`AnalysisResult`] a
//! caller reports on.
//!
//! Nothing here re-walks the log; every field is either moved straight out
//! of an accumulator or derived from it with one arithmetic pass (percentage
//! and average rollups).

use std::collections::BTreeMap;

use crate::config::AnalysisConfig;
use crate::correlator::{self, MappingCorrelation};
use crate::engine::{
    ActivityPeriod, AnalysisState, EventBucket, MinAvgMax, PhysicalValidator, ScheduleCursorSummary,
    SignalStats, SlaveResponseStats,
};
use crate::gateway::{GatewayIndex, GatewayMapping};
use crate::model::Channel;

/// Network-cycle health summary (spec §4.7 "Network cycle machine").
#[derive(Debug, Clone, Default)]
pub struct NetworkCycleSummary {
    pub wake_to_master_delay_ms: MinAvgMax,
    pub incomplete_cycles: u64,
    pub no_master_response: u64,
    pub implicit_starts: u64,
}

/// LIN bus-load summary (spec §4.7 "Bus load", §4.10 rollups).
#[derive(Debug, Clone, Default)]
pub struct BusLoadSummary {
    pub total_busy_s: f64,
    pub overall_percent: f64,
    pub windows_percent: Vec<f64>,
    pub average_percent: f64,
    pub peak_percent: f64,
    /// Percentage of log duration each publishing node held the bus.
    pub per_node_percent: BTreeMap<String, f64>,
}

/// One resolved gateway mapping paired with its correlation outcome
/// (spec §4.8, §4.9).
#[derive(Debug, Clone)]
pub struct GatewayMappingResult {
    pub mapping: GatewayMapping,
    pub correlation: MappingCorrelation,
    pub average_latency_ms: f64,
}

/// The sealed result of a single analysis run (spec §3 `AnalysisResult`,
/// §4.10).
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub log_start_ts: Option<f64>,
    pub log_end_ts: Option<f64>,
    pub log_duration_s: f64,
    pub skipped_log_lines: u64,

    pub foreign_lin_ids: EventBucket,
    pub dlc_errors: BTreeMap<u8, EventBucket>,
    pub pid_parity_errors: BTreeMap<u8, EventBucket>,
    pub checksum_errors: BTreeMap<u8, EventBucket>,
    pub transmission_errors: BTreeMap<(&'static str, Option<u8>), EventBucket>,
    pub timestamp_negative_jumps: EventBucket,
    pub inactivity_periods: Vec<(f64, f64)>,

    pub network_cycle: NetworkCycleSummary,
    pub logger_activity_periods: Vec<ActivityPeriod>,
    pub schedule: ScheduleCursorSummary,
    pub physical: PhysicalValidator,
    pub bus_load: BusLoadSummary,
    pub slave_response: BTreeMap<String, SlaveResponseStats>,

    /// Per-channel Rx-to-Rx frame-timing summary (spec §4.10).
    pub channel_timing: BTreeMap<Channel, MinAvgMax>,
    pub lin_signal_stats: BTreeMap<(String, String), SignalStats>,
    pub can_signal_stats: BTreeMap<(String, String), SignalStats>,
    pub range_violations: BTreeMap<(String, String), EventBucket>,
    pub slave_faults: BTreeMap<String, EventBucket>,

    pub gateway_mappings: Vec<GatewayMappingResult>,
}

impl AnalysisResult {
    /// Total LIN-only inactivity time, in seconds, across every recorded
    /// gap (spec §11 supplement: "inactivity-period accumulator").
    pub fn total_inactivity_s(&self) -> f64 {
        self.inactivity_periods.iter().map(|(start, end)| end - start).sum()
    }
}

fn percent_of_duration(busy_s: f64, duration_s: f64) -> f64 {
    if duration_s > 0.0 {
        (busy_s / duration_s * 100.0).min(100.0)
    } else {
        0.0
    }
}

/// Consumes a finished engine run plus the resolved gateway index to
/// produce the sealed result. `skipped_log_lines` comes from the
/// tokenizer's `skipped_counter()` (spec §4.5).
pub fn finalize(
    state: AnalysisState,
    config: &AnalysisConfig,
    gateway: Option<&GatewayIndex>,
    skipped_log_lines: u64,
) -> AnalysisResult {
    let correlated = correlator::correlate(&state.gateway_capture, config);

    let log_start_ts = state.first_ts;
    let log_end_ts = state.last_ts;
    let log_duration_s = match (log_start_ts, log_end_ts) {
        (Some(start), Some(end)) => (end - start).max(0.0),
        _ => 0.0,
    };

    let total_busy_s = state.bus_load.total_busy_s;
    let windows_percent = state.bus_load.windows_percent();
    let average_percent = state.bus_load.average_percent();
    let peak_percent = state.bus_load.peak_percent();
    let overall_percent = percent_of_duration(total_busy_s, log_duration_s);
    let per_node_percent = state
        .node_busy_s
        .iter()
        .map(|(node, busy_s)| (node.clone(), percent_of_duration(*busy_s, log_duration_s)))
        .collect();

    let network_cycle = NetworkCycleSummary {
        wake_to_master_delay_ms: state.network_cycle.wake_to_master_delay_ms,
        incomplete_cycles: state.network_cycle.incomplete_cycles,
        no_master_response: state.network_cycle.no_master_response,
        implicit_starts: state.network_cycle.implicit_starts,
    };

    let schedule = state.schedule_cursor.map(|cursor| cursor.into_summary()).unwrap_or_default();

    let gateway_mappings = gateway
        .map(|index| {
            correlated
                .into_iter()
                .filter_map(|(idx, correlation)| {
                    index.mappings.get(idx).map(|mapping| GatewayMappingResult {
                        mapping: mapping.clone(),
                        average_latency_ms: correlation.latency_ms.avg(),
                        correlation,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    AnalysisResult {
        log_start_ts,
        log_end_ts,
        log_duration_s,
        skipped_log_lines,

        foreign_lin_ids: state.foreign_lin_ids,
        dlc_errors: state.dlc_errors,
        pid_parity_errors: state.pid_parity_errors,
        checksum_errors: state.checksum_errors,
        transmission_errors: state.transmission_errors,
        timestamp_negative_jumps: state.timestamp_negative_jumps,
        inactivity_periods: state.inactivity_periods,

        network_cycle,
        logger_activity_periods: state.logger_activity.periods,
        schedule,
        physical: state.physical,
        bus_load: BusLoadSummary {
            total_busy_s,
            overall_percent,
            windows_percent,
            average_percent,
            peak_percent,
            per_node_percent,
        },
        slave_response: state.slave_response,

        channel_timing: state.channel_intervals,
        lin_signal_stats: state.signals.lin_stats,
        can_signal_stats: state.signals.can_stats,
        range_violations: state.signals.range_violations,
        slave_faults: state.signals.slave_faults,

        gateway_mappings,
    }
}
