//! Network-cycle and logger-activity state machines (spec §4.7).

use crate::log::LinEventKind;

fn is_wake_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("wake") || lower.contains("waking")
}

fn is_sleep_text(text: &str) -> bool {
    text.to_ascii_lowercase().contains("entering sleep mode")
}

/// Running min/avg/max over a f64 series.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinAvgMax {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl MinAvgMax {
    pub fn observe(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.sum += v;
        self.count += 1;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveCycle {
    pub started_at: f64,
    pub first_master_found: bool,
    pub last_wake_ts: Option<f64>,
    pub implicit_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCycleState {
    Idle,
    Active(ActiveCycle),
}

/// Tracks when the LIN bus is awake and whether the master responded to a
/// wake event within a bounded delay (spec §4.7 "Network cycle machine").
#[derive(Debug, Clone, Default)]
pub struct NetworkCycleMachine {
    pub state: NetworkCycleState,
    pub wake_to_master_delay_ms: MinAvgMax,
    pub incomplete_cycles: u64,
    pub no_master_response: u64,
    pub implicit_starts: u64,
}

impl Default for NetworkCycleState {
    fn default() -> Self {
        NetworkCycleState::Idle
    }
}

impl NetworkCycleMachine {
    pub fn is_active(&self) -> bool {
        matches!(self.state, NetworkCycleState::Active(_))
    }

    /// Call for every `LinEvent` record.
    pub fn on_lin_event(&mut self, ts: f64, kind: &LinEventKind) {
        if let LinEventKind::SleepModeEvent { channel, text } = kind {
            if *channel != 1 {
                return;
            }
            if is_wake_text(text) {
                self.state = NetworkCycleState::Active(ActiveCycle {
                    started_at: ts,
                    first_master_found: false,
                    last_wake_ts: Some(ts),
                    implicit_start: false,
                });
            } else if is_sleep_text(text) {
                self.transition_to_idle();
            }
        }
    }

    /// Call for every LIN frame record, in order. `is_master_request_0x3c`
    /// and `first_data_byte` drive the explicit sleep-by-diagnostic-request
    /// transition; `publisher_is_master` drives the "first master response"
    /// delay measurement.
    pub fn on_lin_frame(
        &mut self,
        ts: f64,
        is_master_request_0x3c: bool,
        first_data_byte: Option<u8>,
        publisher_is_master: bool,
    ) {
        if matches!(self.state, NetworkCycleState::Idle) {
            self.state = NetworkCycleState::Active(ActiveCycle {
                started_at: ts,
                first_master_found: publisher_is_master,
                last_wake_ts: None,
                implicit_start: true,
            });
            self.implicit_starts += 1;
            return;
        }

        if is_master_request_0x3c && first_data_byte == Some(0x00) {
            self.transition_to_idle();
            return;
        }

        if let NetworkCycleState::Active(active) = &mut self.state {
            if publisher_is_master && !active.first_master_found {
                active.first_master_found = true;
                if let Some(wake_ts) = active.last_wake_ts {
                    self.wake_to_master_delay_ms.observe((ts - wake_ts) * 1000.0);
                }
            }
        }
    }

    fn transition_to_idle(&mut self) {
        self.state = NetworkCycleState::Idle;
    }

    /// Call once after the log is exhausted.
    pub fn finalize_end_of_log(&mut self) {
        if let NetworkCycleState::Active(active) = &self.state {
            self.incomplete_cycles += 1;
            if !active.first_master_found {
                self.no_master_response += 1;
            }
        }
    }
}

/// One completed logger-activity period (spec §4.7 "used only for
/// reporting").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityPeriod {
    pub start_ts: f64,
    pub end_ts: f64,
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum LoggerActivityState {
    Idle,
    Active { start_ts: f64 },
}

/// Same event family as the network-cycle machine but keyed on
/// `SleepModeEvent { channel: 0, .. }`.
#[derive(Debug, Clone)]
pub struct LoggerActivityMachine {
    state: LoggerActivityState,
    pub periods: Vec<ActivityPeriod>,
}

impl Default for LoggerActivityMachine {
    fn default() -> Self {
        Self {
            state: LoggerActivityState::Idle,
            periods: Vec::new(),
        }
    }
}

impl LoggerActivityMachine {
    pub fn on_lin_event(&mut self, ts: f64, kind: &LinEventKind) {
        if let LinEventKind::SleepModeEvent { channel, text } = kind {
            if *channel != 0 {
                return;
            }
            if is_wake_text(text) {
                self.state = LoggerActivityState::Active { start_ts: ts };
            } else if is_sleep_text(text) {
                if let LoggerActivityState::Active { start_ts } = self.state {
                    self.periods.push(ActivityPeriod {
                        start_ts,
                        end_ts: ts,
                        duration_s: ts - start_ts,
                    });
                }
                self.state = LoggerActivityState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_wake_then_master_response_records_delay() {
        let mut m = NetworkCycleMachine::default();
        m.on_lin_event(
            0.0,
            &LinEventKind::SleepModeEvent {
                channel: 1,
                text: "waking up".into(),
            },
        );
        assert!(m.is_active());
        m.on_lin_frame(0.015, false, None, true);
        assert_eq!(m.wake_to_master_delay_ms.count, 1);
        assert!((m.wake_to_master_delay_ms.avg() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn implicit_start_flagged_and_counted() {
        let mut m = NetworkCycleMachine::default();
        m.on_lin_frame(0.0, false, None, false);
        assert!(m.is_active());
        if let NetworkCycleState::Active(active) = &m.state {
            assert!(active.implicit_start);
        } else {
            panic!("expected Active");
        }
        assert_eq!(m.implicit_starts, 1);
    }

    #[test]
    fn diagnostic_sleep_request_transitions_to_idle() {
        let mut m = NetworkCycleMachine::default();
        m.on_lin_frame(0.0, false, None, false);
        m.on_lin_frame(1.0, true, Some(0x00), false);
        assert!(!m.is_active());
    }

    #[test]
    fn end_of_log_while_active_counts_incomplete_and_no_master() {
        let mut m = NetworkCycleMachine::default();
        m.on_lin_frame(0.0, false, None, false);
        m.finalize_end_of_log();
        assert_eq!(m.incomplete_cycles, 1);
        assert_eq!(m.no_master_response, 1);
    }

    #[test]
    fn logger_activity_tracks_periods_independently() {
        let mut m = LoggerActivityMachine::default();
        m.on_lin_event(0.0, &LinEventKind::SleepModeEvent { channel: 0, text: "waking".into() });
        m.on_lin_event(2.5, &LinEventKind::SleepModeEvent { channel: 0, text: "entering sleep mode".into() });
        assert_eq!(m.periods.len(), 1);
        assert_eq!(m.periods[0].duration_s, 2.5);
    }
}
