//! Schedule adherence cursor and slot jitter accumulator (spec §4.7).

use std::collections::{BTreeMap, BTreeSet};

use crate::config::AnalysisConfig;
use crate::ldf::BusModelLIN;

use super::EventBucket;

/// Running count of latency samples with min/avg/max/stddev, keyed per
/// `(schedule, slot_index)` (spec §4.7 "Slot jitter accumulator").
#[derive(Debug, Clone, Default)]
pub struct SlotJitterAccumulator {
    pub count: u64,
    pub sum_ms: f64,
    pub sum_sq_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl SlotJitterAccumulator {
    pub fn observe(&mut self, ms: f64) {
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.sum_ms += ms;
        self.sum_sq_ms += ms * ms;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let radicand = self.sum_sq_ms / self.count as f64 - mean * mean;
        radicand.max(0.0).sqrt()
    }
}

/// Per-node request/response counters feeding the "slave response
/// performance" summary (spec §2 C7 responsibility list).
#[derive(Debug, Clone, Copy, Default)]
pub struct PublisherStats {
    pub requests: u64,
    pub responses: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEvent {
    CycleStart { schedules: Vec<String>, ts: f64 },
    CycleCompleted { schedule: String, ts: f64 },
    SequenceMismatch { expected: Vec<String>, observed: String, ts: f64 },
}

#[derive(Debug, Clone)]
struct ActiveCursor {
    active_schedules: Vec<String>,
    current_index: usize,
    cycle_start_ts: f64,
    last_event_ts: f64,
    cycle_log: Vec<ScheduleEvent>,
    has_timing_errors: bool,
}

/// Tracks which LDF schedule tables are plausibly driving the bus right
/// now, pruning candidates as observations disambiguate them.
#[derive(Debug)]
pub struct ScheduleCursor<'a> {
    model: &'a BusModelLIN,
    config: &'a AnalysisConfig,
    active: Option<ActiveCursor>,
    pub completed_cycles: u64,
    pub intrusion_frames: EventBucket,
    pub sequence_mismatches: u64,
    pub timing_mismatches: BTreeMap<(String, usize), (EventBucket, SlotJitterAccumulator)>,
    pub slot_jitter: BTreeMap<(String, usize), SlotJitterAccumulator>,
    pub publisher_stats: BTreeMap<String, PublisherStats>,
    /// Event log of the most recently completed cycle, kept as a
    /// representative example the way every other validator keeps one
    /// (spec §4.7 testable property: a completed cycle's events contain
    /// exactly one `CycleStart`, one `CycleCompleted`, no `SequenceMismatch`).
    pub last_completed_cycle: Option<Vec<ScheduleEvent>>,
}

impl<'a> ScheduleCursor<'a> {
    pub fn new(model: &'a BusModelLIN, config: &'a AnalysisConfig) -> Self {
        Self {
            model,
            config,
            active: None,
            completed_cycles: 0,
            intrusion_frames: EventBucket::default(),
            sequence_mismatches: 0,
            timing_mismatches: BTreeMap::new(),
            slot_jitter: BTreeMap::new(),
            publisher_stats: BTreeMap::new(),
            last_completed_cycle: None,
        }
    }

    fn bump_request(&mut self, publisher: &str) {
        self.publisher_stats.entry(publisher.to_string()).or_default().requests += 1;
    }

    fn bump_response(&mut self, publisher: &str) {
        self.publisher_stats.entry(publisher.to_string()).or_default().responses += 1;
    }

    /// Entry point for every LIN Rx/TransmErr/RcvError record while the
    /// network cycle is Active. `observed_frame` is `None` when the record
    /// carries no resolvable frame id (a bare transmission error); such
    /// records cannot start, advance or break a cycle, so they are ignored
    /// here and only tallied as transmission errors elsewhere.
    pub fn on_entry(&mut self, ts: f64, observed_frame: Option<&str>) {
        let Some(frame) = observed_frame else { return };

        if self.active.is_none() {
            let starters: Vec<String> = self
                .model
                .schedules
                .iter()
                .filter(|(_, t)| t.entries.first().map(|e| e.frame_name.as_str()) == Some(frame))
                .map(|(name, _)| name.clone())
                .collect();

            if starters.is_empty() {
                self.intrusion_frames.record(ts, frame.to_string());
                return;
            }

            if let Some(publisher) = self.publisher_of(frame) {
                if !self.model.is_master(&publisher) {
                    self.bump_request(&publisher);
                }
                self.bump_response(&publisher);
            }

            self.active = Some(ActiveCursor {
                cycle_log: vec![ScheduleEvent::CycleStart {
                    schedules: starters.clone(),
                    ts,
                }],
                active_schedules: starters,
                current_index: 1,
                cycle_start_ts: ts,
                last_event_ts: ts,
                has_timing_errors: false,
            });
            return;
        }

        self.advance(ts, frame);
    }

    fn publisher_of(&self, frame_name: &str) -> Option<String> {
        self.model.frames.get(frame_name)?.publisher().map(|s| s.to_string())
    }

    fn advance(&mut self, ts: f64, observed: &str) {
        let cursor = self.active.as_mut().expect("checked by caller");

        let expected: Vec<(String, Option<(String, f64)>)> = cursor
            .active_schedules
            .iter()
            .map(|name| {
                let expected = self
                    .model
                    .schedules
                    .get(name)
                    .and_then(|t| t.entries.get(cursor.current_index))
                    .map(|e| (e.frame_name.clone(), e.delay_ms));
                (name.clone(), expected)
            })
            .collect();

        let expected_names: BTreeSet<&str> = expected
            .iter()
            .filter_map(|(_, e)| e.as_ref().map(|(name, _)| name.as_str()))
            .collect();

        for (_, exp) in &expected {
            if let Some((exp_frame, _)) = exp {
                if let Some(publisher) = self.publisher_of(exp_frame) {
                    if !self.model.is_master(&publisher) {
                        self.bump_request(&publisher);
                    }
                }
            }
        }

        if !expected_names.contains(observed) {
            cursor.cycle_log.push(ScheduleEvent::SequenceMismatch {
                expected: expected_names.iter().map(|s| s.to_string()).collect(),
                observed: observed.to_string(),
                ts,
            });
            self.sequence_mismatches += 1;
            self.active = None;
            return;
        }

        if let Some(publisher) = self.publisher_of(observed) {
            self.bump_response(&publisher);
        }

        let slot_index = cursor.current_index;
        let tolerance_factor = self.config.schedule_tolerance_factor;
        let min_abs = self.config.schedule_min_absolute_tolerance_s;
        let jitter = self.config.effective_jitter(self.model.master_jitter_s);

        let surviving: Vec<String> = expected
            .iter()
            .filter(|(_, e)| e.as_ref().map(|(name, _)| name.as_str()) == Some(observed))
            .map(|(name, _)| name.clone())
            .collect();

        // Observed inter-event delay, measured from the previous matched
        // slot (or cycle start for the first slot), in milliseconds.
        let observed_delay_ms = (ts - cursor.last_event_ts) * 1000.0;

        if let Some((name, Some((_, expected_delay_ms)))) =
            expected.iter().find(|(n, _)| surviving.contains(n))
        {
            let tolerance_ms = (expected_delay_ms * tolerance_factor).max(min_abs * 1000.0) + jitter * 1000.0;
            let jitter_acc = self.slot_jitter.entry((name.clone(), slot_index)).or_default();
            jitter_acc.observe(observed_delay_ms);

            if (observed_delay_ms - expected_delay_ms).abs() > tolerance_ms {
                cursor.has_timing_errors = true;
                let entry = self
                    .timing_mismatches
                    .entry((name.clone(), slot_index))
                    .or_default();
                entry.0.record(ts, format!("expected {expected_delay_ms}ms observed {observed_delay_ms}ms"));
                entry.1.observe(observed_delay_ms);
            }
        }

        cursor.active_schedules = surviving;
        cursor.current_index += 1;
        cursor.last_event_ts = ts;

        if cursor.active_schedules.len() == 1 {
            let sole = cursor.active_schedules[0].clone();
            let len = self.model.schedules.get(&sole).map(|t| t.entries.len()).unwrap_or(0);
            if cursor.current_index >= len {
                cursor.cycle_log.push(ScheduleEvent::CycleCompleted { schedule: sole, ts });
                self.completed_cycles += 1;
                self.last_completed_cycle = Some(cursor.cycle_log.clone());
                self.active = None;
            }
        }
    }

    /// Call once after the log is exhausted; an in-progress cycle at EOF is
    /// simply left uncompleted (the network-cycle machine separately counts
    /// "Incomplete Cycle").
    pub fn is_mid_cycle(&self) -> bool {
        self.active.is_some()
    }

    /// Consumes the cursor, handing its public counters to the finalizer
    /// (§4.10). `model`/`config`/`active` stay behind; only the run's
    /// accumulated findings survive past a single pass (spec §5).
    pub fn into_summary(self) -> ScheduleCursorSummary {
        ScheduleCursorSummary {
            completed_cycles: self.completed_cycles,
            intrusion_frames: self.intrusion_frames,
            sequence_mismatches: self.sequence_mismatches,
            timing_mismatches: self.timing_mismatches,
            slot_jitter: self.slot_jitter,
            publisher_stats: self.publisher_stats,
            last_completed_cycle: self.last_completed_cycle,
        }
    }
}

/// Owned snapshot of a [`ScheduleCursor`]'s counters, detached from the
/// `BusModelLIN`/`AnalysisConfig` borrows the cursor needed while running.
#[derive(Debug, Clone, Default)]
pub struct ScheduleCursorSummary {
    pub completed_cycles: u64,
    pub intrusion_frames: EventBucket,
    pub sequence_mismatches: u64,
    pub timing_mismatches: BTreeMap<(String, usize), (EventBucket, SlotJitterAccumulator)>,
    pub slot_jitter: BTreeMap<(String, usize), SlotJitterAccumulator>,
    pub publisher_stats: BTreeMap<String, PublisherStats>,
    pub last_completed_cycle: Option<Vec<ScheduleEvent>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldf::parse_ldf;

    const LDF: &str = r#"
Nodes {
    Master: ECU, 5 ms, 0.1 ms;
    Slaves: Sensor;
}

Signals {
    A: 8, 0, ECU, Sensor;
    B: 8, 0, Sensor, ECU;
}

Frames {
    F1: 1, ECU, 1 {
        A, 0;
    }
    F2: 2, Sensor, 1 {
        B, 0;
    }
}

Schedule_tables {
    Normal {
        F1 delay 10 ms;
        F2 delay 10 ms;
    }
}
"#;

    #[test]
    fn happy_path_completes_one_cycle() {
        let (model, _) = parse_ldf(LDF).unwrap();
        let config = AnalysisConfig::default();
        let mut cursor = ScheduleCursor::new(&model, &config);
        cursor.on_entry(0.0, Some("F1"));
        cursor.on_entry(0.010, Some("F2"));
        assert_eq!(cursor.completed_cycles, 1);
        assert!(!cursor.is_mid_cycle());

        let events = cursor.last_completed_cycle.as_ref().unwrap();
        let starts = events.iter().filter(|e| matches!(e, ScheduleEvent::CycleStart { .. })).count();
        let completions = events.iter().filter(|e| matches!(e, ScheduleEvent::CycleCompleted { .. })).count();
        let mismatches = events.iter().filter(|e| matches!(e, ScheduleEvent::SequenceMismatch { .. })).count();
        assert_eq!((starts, completions, mismatches), (1, 1, 0));
    }

    #[test]
    fn intrusion_frame_with_no_candidate_schedule() {
        let (model, _) = parse_ldf(LDF).unwrap();
        let config = AnalysisConfig::default();
        let mut cursor = ScheduleCursor::new(&model, &config);
        cursor.on_entry(0.0, Some("ThereIsNoSuchFrame"));
        assert_eq!(cursor.intrusion_frames.count, 1);
    }

    #[test]
    fn unexpected_frame_mid_cycle_is_a_sequence_mismatch() {
        let (model, _) = parse_ldf(LDF).unwrap();
        let config = AnalysisConfig::default();
        let mut cursor = ScheduleCursor::new(&model, &config);
        cursor.on_entry(0.0, Some("F1"));
        cursor.on_entry(0.005, Some("F1"));
        assert_eq!(cursor.sequence_mismatches, 1);
        assert!(!cursor.is_mid_cycle());
    }
}
