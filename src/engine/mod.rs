//! Single-pass analysis engine (spec §4.7, C7): owns per-record dispatch,
//! the network-cycle/logger-activity/schedule-cursor state machines, and
//! every validator's accumulators.
//!
//! The engine is deliberately single-threaded and cooperative (spec §5):
//! every validator for a record finishes before the next record is pulled,
//! because the cross-validator state below must observe records in
//! timestamp-monotonic order.

mod bus_load;
mod gateway_capture;
mod network_cycle;
mod physical;
mod schedule_cursor;
mod signals;

pub use bus_load::BusLoadAccountant;
pub use gateway_capture::GatewayCapture;
pub use network_cycle::{ActivityPeriod, LoggerActivityMachine, MinAvgMax, NetworkCycleMachine};
pub use physical::PhysicalValidator;
pub use schedule_cursor::{
    PublisherStats, ScheduleCursor, ScheduleCursorSummary, ScheduleEvent, SlotJitterAccumulator,
};
pub use signals::{DecodedValue, SignalEngine, SignalStats};

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::AnalysisConfig;
use crate::gateway::GatewayIndex;
use crate::log::{ChecksumKind, Direction, LinEventKind, LogRecord};
use crate::model::{BusModel, Channel};
use crate::numeric::{classic_checksum, enhanced_checksum, check_pid_parity, protected_id};

/// First-occurrence detail captured alongside a counter.
#[derive(Debug, Clone, PartialEq)]
pub struct EventExample {
    pub ts: f64,
    pub detail: String,
}

/// A generic "count + first/last timestamp + example" bucket, the shape
/// spec §4.7's intro mandates for every validator counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBucket {
    pub count: u64,
    pub first_ts: Option<f64>,
    pub last_ts: Option<f64>,
    pub example: Option<EventExample>,
}

impl EventBucket {
    pub fn record(&mut self, ts: f64, detail: impl Into<String>) {
        if self.first_ts.is_none() {
            self.first_ts = Some(ts);
            self.example = Some(EventExample { ts, detail: detail.into() });
        }
        self.last_ts = Some(ts);
        self.count += 1;
    }
}

/// Per-node slave response-time performance (spec §4.7 "Slave response
/// performance"). `frames_published` counts every Rx frame observed from
/// this publisher; `count`/`min_ms`/`max_ms`/`sum_ms` track only the subset
/// whose `response_time` fell in the valid `(0, 10ms)` window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlaveResponseStats {
    pub count: u64,
    pub sum_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub frames_published: u64,
}

impl SlaveResponseStats {
    fn observe(&mut self, ms: f64) {
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.sum_ms += ms;
        self.count += 1;
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }
}

/// Mutable state threaded through per-record dispatch (spec §9: "the
/// engine's state is a single `AnalysisState` value").
pub struct AnalysisState<'a> {
    pub network_cycle: NetworkCycleMachine,
    pub logger_activity: LoggerActivityMachine,
    pub schedule_cursor: Option<ScheduleCursor<'a>>,
    pub bus_load: BusLoadAccountant,
    pub signals: SignalEngine,
    pub physical: PhysicalValidator,
    pub gateway_capture: GatewayCapture,

    pub foreign_lin_ids: EventBucket,
    pub dlc_errors: BTreeMap<u8, EventBucket>,
    pub pid_parity_errors: BTreeMap<u8, EventBucket>,
    pub checksum_errors: BTreeMap<u8, EventBucket>,
    pub transmission_errors: BTreeMap<(&'static str, Option<u8>), EventBucket>,
    pub timestamp_negative_jumps: EventBucket,
    pub inactivity_periods: Vec<(f64, f64)>,
    pub channel_intervals: BTreeMap<Channel, MinAvgMax>,
    /// Airtime attributed to each publishing node's LIN frames, for the
    /// finalizer's per-node bus-load percentage.
    pub node_busy_s: BTreeMap<String, f64>,
    pub slave_response: BTreeMap<String, SlaveResponseStats>,

    pub(crate) first_ts: Option<f64>,
    pub(crate) last_ts: Option<f64>,
    last_lin_ts: Option<f64>,
    last_rx_ts_by_channel: BTreeMap<Channel, f64>,
}

impl<'a> AnalysisState<'a> {
    pub fn new(model: &'a BusModel, config: &'a AnalysisConfig) -> Self {
        Self {
            network_cycle: NetworkCycleMachine::default(),
            logger_activity: LoggerActivityMachine::default(),
            schedule_cursor: model.lin.as_ref().map(|lin| ScheduleCursor::new(lin, config)),
            bus_load: BusLoadAccountant::new(config.bus_load_window_s),
            signals: SignalEngine::default(),
            physical: PhysicalValidator::default(),
            gateway_capture: GatewayCapture::default(),
            foreign_lin_ids: EventBucket::default(),
            dlc_errors: BTreeMap::new(),
            pid_parity_errors: BTreeMap::new(),
            checksum_errors: BTreeMap::new(),
            transmission_errors: BTreeMap::new(),
            timestamp_negative_jumps: EventBucket::default(),
            inactivity_periods: Vec::new(),
            channel_intervals: BTreeMap::new(),
            node_busy_s: BTreeMap::new(),
            slave_response: BTreeMap::new(),
            first_ts: None,
            last_ts: None,
            last_lin_ts: None,
            last_rx_ts_by_channel: BTreeMap::new(),
        }
    }
}

/// The single-pass orchestrator (spec §2 C7). Owns nothing across runs;
/// construct one per log.
pub struct AnalysisEngine<'a> {
    model: &'a BusModel,
    config: &'a AnalysisConfig,
    gateway: Option<&'a GatewayIndex>,
}

impl<'a> AnalysisEngine<'a> {
    pub fn new(model: &'a BusModel, config: &'a AnalysisConfig, gateway: Option<&'a GatewayIndex>) -> Self {
        Self { model, config, gateway }
    }

    /// Drives `records` to completion, returning the accumulated state for
    /// the correlator (§4.8) and finalizer (§4.10) to consume.
    pub fn run(&self, records: impl Iterator<Item = LogRecord>) -> AnalysisState<'a> {
        let mut state = AnalysisState::new(self.model, self.config);
        for record in records {
            self.dispatch(&mut state, &record);
        }
        state.network_cycle.finalize_end_of_log();
        state
    }

    fn dispatch(&self, state: &mut AnalysisState<'a>, record: &LogRecord) {
        let ts = record.timestamp();
        self.check_monotonicity(state, ts);

        match record {
            LogRecord::LinFrame { .. } => self.dispatch_lin_frame(state, ts, record),
            LogRecord::LinEvent { kind, .. } => self.dispatch_lin_event(state, ts, kind),
            LogRecord::CanFrame { .. } => self.dispatch_can_frame(state, ts, record),
        }
    }

    fn check_monotonicity(&self, state: &mut AnalysisState<'a>, ts: f64) {
        state.first_ts.get_or_insert(ts);
        if let Some(prev) = state.last_ts {
            if ts < prev {
                state.timestamp_negative_jumps.record(ts, format!("prev={prev} current={ts} delta={}", ts - prev));
            }
        }
        state.last_ts = Some(ts);
    }

    fn dispatch_lin_event(&self, state: &mut AnalysisState<'a>, ts: f64, kind: &LinEventKind) {
        state.network_cycle.on_lin_event(ts, kind);
        state.logger_activity.on_lin_event(ts, kind);

        let (label, id): (&'static str, Option<u8>) = match kind {
            LinEventKind::Spike => ("Spike", None),
            LinEventKind::TransmErr { id } => ("TransmErr", *id),
            LinEventKind::RcvError { id } => ("RcvError", *id),
            _ => return,
        };
        state.transmission_errors.entry((label, id)).or_default().record(ts, label);

        if matches!(kind, LinEventKind::TransmErr { .. } | LinEventKind::RcvError { .. }) {
            state.bus_load.observe(ts, 34.0 * self.config.nominal_bit_time());
        }

        if self.config.enable_schedule_validation && state.network_cycle.is_active() {
            if let Some(cursor) = state.schedule_cursor.as_mut() {
                let frame_name = id.and_then(|i| self.model.lin.as_ref()?.frame_by_id(i)).map(|f| f.name.clone());
                cursor.on_entry(ts, frame_name.as_deref());
            }
        }
    }

    fn dispatch_lin_frame(&self, state: &mut AnalysisState<'a>, ts: f64, record: &LogRecord) {
        let LogRecord::LinFrame {
            pid_raw,
            direction,
            data,
            declared_checksum,
            csm,
            physical_meta,
            full_time_tbit,
            ..
        } = record
        else {
            unreachable!("caller matched on LinFrame")
        };

        self.track_inactivity(state, ts);

        let frame_id = pid_raw & 0x3F;
        let Some(lin) = self.model.lin.as_ref() else {
            return;
        };
        let frame = lin.frame_by_id(frame_id);

        if *direction == Direction::Rx {
            match frame {
                None => {
                    state.foreign_lin_ids.record(ts, format!("id={frame_id:#04x}"));
                }
                Some(f) => {
                    if let Some(expected_dlc) = f.dlc() {
                        if expected_dlc as usize != data.len() {
                            state
                                .dlc_errors
                                .entry(frame_id)
                                .or_default()
                                .record(ts, format!("expected {expected_dlc} observed {}", data.len()));
                        }
                    }
                }
            }
        }

        if *direction == Direction::Rx && *pid_raw >= 0x40 {
            let (_, parity_ok) = check_pid_parity(*pid_raw);
            if !parity_ok {
                state.pid_parity_errors.entry(*pid_raw).or_default().record(ts, format!("pid={pid_raw:#04x}"));
            }
        }

        if self.config.enable_checksum_validation && *direction == Direction::Rx {
            if let (Some(declared), Some(kind)) = (declared_checksum, csm) {
                let computed = match kind {
                    ChecksumKind::Classic => classic_checksum(data),
                    ChecksumKind::Enhanced => {
                        let pid = protected_id(frame_id).unwrap_or(frame_id);
                        enhanced_checksum(pid, data)
                    }
                };
                if computed != *declared {
                    state
                        .checksum_errors
                        .entry(frame_id)
                        .or_default()
                        .record(ts, format!("expected {computed:#04x} observed {declared:#04x}"));
                }
            }
        }

        let is_master_request_0x3c = frame_id == 0x3C;
        let publisher_is_master = frame.and_then(|f| f.publisher()).map(|p| lin.is_master(p)).unwrap_or(false);
        state.network_cycle.on_lin_frame(ts, is_master_request_0x3c, data.first().copied(), publisher_is_master);

        if self.config.enable_schedule_validation && *direction == Direction::Rx && state.network_cycle.is_active() {
            if let Some(cursor) = state.schedule_cursor.as_mut() {
                cursor.on_entry(ts, frame.map(|f| f.name.as_str()));
            }
        }

        self.track_channel_interval(state, Channel::Lin, ts);

        let decoded = frame
            .map(|f| state.signals.decode_lin_frame(ts, &f.name, f, data))
            .unwrap_or_default();

        for (slave_name, sig_name) in &lin.response_error_signals {
            if let Some(value) = decoded.get(sig_name) {
                state.signals.check_response_error(ts, slave_name, value);
            }
        }

        if self.config.enable_physical_validation {
            if let Some(meta) = physical_meta {
                let dlc = frame.and_then(|f| f.dlc()).unwrap_or(data.len() as u8);
                state.physical.check(ts, dlc, meta, self.config, lin.master_jitter_s);
            }
        }

        if self.config.enable_gateway_validation && state.network_cycle.is_active() {
            if let (Some(gateway), Some(f)) = (self.gateway, frame) {
                self.capture_gateway_events(state, gateway, Channel::Lin, f.id().unwrap_or(frame_id) as u32, ts, &decoded);
            }
        }

        if *direction == Direction::Rx {
            let frame_duration_s = match *full_time_tbit {
                Some(tbit) => tbit * self.config.nominal_bit_time(),
                None => (34.0 + 10.0 * (data.len() + 1) as f64) * self.config.nominal_bit_time(),
            };
            state.bus_load.observe(ts, frame_duration_s);

            if let Some(publisher) = frame.and_then(|f| f.publisher()) {
                *state.node_busy_s.entry(publisher.to_string()).or_insert(0.0) += frame_duration_s;

                if !publisher_is_master {
                    let stats = state.slave_response.entry(publisher.to_string()).or_default();
                    stats.frames_published += 1;
                    if let Some(meta) = physical_meta {
                        if let (Some(eoh), Some(&first_eob)) = (meta.eoh, meta.eob.first()) {
                            let response_time_s = first_eob - eoh;
                            if response_time_s > 0.0 && response_time_s < 0.010 {
                                stats.observe(response_time_s * 1000.0);
                            }
                        }
                    }
                }
            }
        }
    }

    fn dispatch_can_frame(&self, state: &mut AnalysisState<'a>, ts: f64, record: &LogRecord) {
        let LogRecord::CanFrame { channel, can_id, direction, data, .. } = record else {
            unreachable!("caller matched on CanFrame")
        };

        if *direction == Direction::Rx {
            self.track_channel_interval(state, *channel, ts);
        }

        let Some(bus_can) = self.model.can.get(channel) else {
            return;
        };
        let Some(message) = bus_can.message(*can_id) else {
            return;
        };

        let decoded = state.signals.decode_can_message(ts, &message.name, message, data);

        if self.config.enable_gateway_validation && state.network_cycle.is_active() {
            if let Some(gateway) = self.gateway {
                self.capture_gateway_events(state, gateway, *channel, *can_id, ts, &decoded);
            }
        }
    }

    fn capture_gateway_events(
        &self,
        state: &mut AnalysisState<'a>,
        gateway: &GatewayIndex,
        channel: Channel,
        frame_id: u32,
        ts: f64,
        decoded: &BTreeMap<String, DecodedValue>,
    ) {
        for &idx in gateway.sources_for(channel, frame_id) {
            let mapping = &gateway.mappings[idx];
            if let Some(value) = decoded.get(&mapping.source_signal) {
                state.gateway_capture.push_source(idx, ts, value.clone());
            }
        }
        for &idx in gateway.targets_for(channel, frame_id) {
            let mapping = &gateway.mappings[idx];
            if let Some(value) = decoded.get(&mapping.target_signal) {
                state.gateway_capture.push_target(idx, ts, value.clone());
            }
        }
    }

    fn track_inactivity(&self, state: &mut AnalysisState<'a>, ts: f64) {
        if let Some(prev) = state.last_lin_ts {
            let gap = ts - prev;
            if gap > self.config.inactivity_threshold_s {
                state.inactivity_periods.push((prev, ts));
                debug!(gap, "LIN inactivity period detected");
            }
        }
        state.last_lin_ts = Some(ts);
    }

    fn track_channel_interval(&self, state: &mut AnalysisState<'a>, channel: Channel, ts: f64) {
        if !state.network_cycle.is_active() {
            state.last_rx_ts_by_channel.remove(&channel);
            return;
        }
        if let Some(&prev) = state.last_rx_ts_by_channel.get(&channel) {
            let gap = ts - prev;
            if gap <= 1.0 {
                state.channel_intervals.entry(channel).or_default().observe(gap);
            }
        }
        state.last_rx_ts_by_channel.insert(channel, ts);
    }
}
