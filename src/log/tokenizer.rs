//! Lazy log tokenizer (spec §4.4, §6).
//!
//! Produces a finite, non-restartable, pull-based sequence of `LogRecord`s.
//! For each non-empty line, recognizers are tried in the priority order
//! spec.md fixes: Spike, TransmErr, RcvError, LIN frame, CAN-FD, CAN frame,
//! sleep/wake event. The first match wins; a line matching none of them is
//! silently skipped but tallied in `skipped()`.

use std::cell::Cell;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::record::{ChecksumKind, Direction, LinEventKind, LogRecord, PhysicalMeta};
use crate::model::Channel;

static SPIKE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+spike\s+rx\b(.*)$").unwrap());

static TRANSM_ERR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+(?:([0-9a-f]+)\s+)?transmerr\b").unwrap());

static RCV_ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+(?:([0-9a-f]+)\s+)?(?:\d+\s+)?rcverror\s*:").unwrap()
});

static SLEEP_WAKE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+sleepmodeevent\s+(\d+)\s*(.*)$").unwrap());

static WAKEUP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+wakeupframe\b(.*)$").unwrap());

static SCHED_MOD_CHNG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(\d+\.\d+)\s+li\s+schedmodchng.*?prior\s+scheduler\s+mode\s*=\s*(\w+).*?next\s+scheduler\s+mode\s*=\s*(\w+)",
    )
    .unwrap()
});

static LIN_FRAME_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+\.\d+)\s+li\s+([0-9a-f]+)\s+(rx|tx)\b(?:\s+(\d+))?").unwrap()
});

static CANFD_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+\.\d+)\s+canfd\s+(\d+)\s+(rx|tx)\s+([0-9a-f]+)(?:\s+(\d+))?(.*)$").unwrap()
});

static CAN_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(\d+\.\d+)\s+(can\d|canfd\d|lin)\s+([0-9a-f]+)(x)?\s*(?:f\s+)?(rx|tx)\s*(?:d\s*(\d+))?(.*)$",
    )
    .unwrap()
});

macro_rules! field_regex {
    ($name:ident, $pat:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pat).unwrap());
    };
}

field_regex!(CHECKSUM_FIELD, r"(?i)checksum\s*=\s*([0-9a-f]{2})");
field_regex!(HEADER_TIME_FIELD, r"(?i)header\s*time\s*=\s*(\d+)");
field_regex!(FULL_TIME_FIELD, r"(?i)full\s*time\s*=\s*(\d+)");
field_regex!(SOF_FIELD, r"(?i)\bsof\s*=\s*(\d+\.?\d*)");
field_regex!(BR_FIELD, r"(?i)\bbr\s*=\s*(\d+\.?\d*)");
field_regex!(BREAK_FIELD, r"(?i)\bbreak\s*=\s*((?:\d+(?:\.\d+)?\s*)+)");
field_regex!(EOH_FIELD, r"(?i)\beoh\s*=\s*(\d+\.?\d*)");
field_regex!(EOB_FIELD, r"(?i)\beob\s*=\s*((?:\d+(?:\.\d+)?\s*)+)");
field_regex!(EOF_FIELD, r"(?i)\beof\s*=\s*(\d+\.?\d*)");
field_regex!(RBR_FIELD, r"(?i)\brbr\s*=\s*(\d+\.?\d*)");
field_regex!(HBR_FIELD, r"(?i)\bhbr\s*=\s*(\d+\.?\d*)");
field_regex!(HSO_FIELD, r"(?i)\bhso\s*=\s*(\d+\.?\d*)");
field_regex!(RSO_FIELD, r"(?i)\brso\s*=\s*(\d+\.?\d*)");
field_regex!(CSM_FIELD, r"(?i)\bcsm\s*=\s*(\w+)");

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

fn parse_float_list(s: &str) -> Vec<f64> {
    s.split_whitespace().filter_map(|t| t.parse().ok()).collect()
}

fn parse_hex_u32(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 16).ok()
}

fn parse_hex_u8(s: &str) -> Option<u8> {
    u8::from_str_radix(s, 16).ok()
}

fn extract_physical_meta(line: &str) -> Option<PhysicalMeta> {
    let meta = PhysicalMeta {
        sof: SOF_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        eoh: EOH_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        eob: EOB_FIELD
            .captures(line)
            .map(|c| parse_float_list(&c[1]))
            .unwrap_or_default(),
        eof: EOF_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        br: BR_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        rbr: RBR_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        hbr: HBR_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        break_info: BREAK_FIELD
            .captures(line)
            .map(|c| parse_float_list(&c[1]))
            .unwrap_or_default(),
        hso: HSO_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
        rso: RSO_FIELD.captures(line).and_then(|c| parse_f64(&c[1])),
    };
    (!meta.is_empty()).then_some(meta)
}

/// Consumes whitespace-separated two-hex-digit byte tokens from the start
/// of `rest`, stopping at the first token that is not a bare byte (i.e. the
/// first `key=value` field or a non-hex token).
fn take_data_bytes(rest: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for token in rest.split_whitespace() {
        if token.len() == 2 && token.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Some(b) = parse_hex_u8(token) {
                bytes.push(b);
                continue;
            }
        }
        break;
    }
    bytes
}

fn parse_lin_frame(line: &str) -> Option<LogRecord> {
    let head = LIN_FRAME_HEAD.captures(line)?;
    let ts: f64 = head[1].parse().ok()?;
    let pid_raw = parse_hex_u8(&head[2])?;
    let direction = if head[3].eq_ignore_ascii_case("rx") {
        Direction::Rx
    } else {
        Direction::Tx
    };

    let after_head = &line[head.get(0).unwrap().end()..];
    let data = take_data_bytes(after_head);

    let declared_checksum = CHECKSUM_FIELD.captures(line).and_then(|c| parse_hex_u8(&c[1]));
    let csm = CSM_FIELD.captures(line).and_then(|c| {
        if c[1].eq_ignore_ascii_case("classic") {
            Some(ChecksumKind::Classic)
        } else if c[1].eq_ignore_ascii_case("enhanced") {
            Some(ChecksumKind::Enhanced)
        } else {
            None
        }
    });
    let header_time_tbit = HEADER_TIME_FIELD.captures(line).and_then(|c| parse_f64(&c[1]));
    let full_time_tbit = FULL_TIME_FIELD.captures(line).and_then(|c| parse_f64(&c[1]));
    let physical_meta = extract_physical_meta(line);

    Some(LogRecord::LinFrame {
        ts,
        pid_raw,
        direction,
        data,
        declared_checksum,
        csm,
        physical_meta,
        header_time_tbit,
        full_time_tbit,
    })
}

fn parse_canfd_frame(line: &str) -> Option<LogRecord> {
    let caps = CANFD_HEAD.captures(line)?;
    let ts: f64 = caps[1].parse().ok()?;
    let channel_num: u8 = caps[2].parse().ok()?;
    let channel = match channel_num {
        1 => Channel::CanFd1,
        2 => Channel::CanFd2,
        _ => Channel::CanFd3,
    };
    let direction = if caps[3].eq_ignore_ascii_case("rx") {
        Direction::Rx
    } else {
        Direction::Tx
    };
    let can_id = parse_hex_u32(&caps[4])?;
    let rest = caps.get(6).map(|m| m.as_str()).unwrap_or("");
    let data = take_data_bytes(rest);

    Some(LogRecord::CanFrame {
        ts,
        channel,
        can_id,
        direction,
        data,
        fd: true,
    })
}

fn parse_can_frame(line: &str) -> Option<LogRecord> {
    let caps = CAN_HEAD.captures(line)?;
    let ts: f64 = caps[1].parse().ok()?;
    let channel = Channel::parse(&caps[2])?;
    let can_id = parse_hex_u32(&caps[3])?;
    let direction = if caps[5].eq_ignore_ascii_case("rx") {
        Direction::Rx
    } else {
        Direction::Tx
    };
    let rest = caps.get(7).map(|m| m.as_str()).unwrap_or("");
    let data = take_data_bytes(rest);

    Some(LogRecord::CanFrame {
        ts,
        channel,
        can_id,
        direction,
        data,
        fd: false,
    })
}

fn parse_spike(line: &str) -> Option<LogRecord> {
    let caps = SPIKE_LINE.captures(line)?;
    Some(LogRecord::LinEvent {
        ts: caps[1].parse().ok()?,
        kind: LinEventKind::Spike,
    })
}

fn parse_transm_err(line: &str) -> Option<LogRecord> {
    let caps = TRANSM_ERR_LINE.captures(line)?;
    let ts: f64 = caps[1].parse().ok()?;
    let id = caps.get(2).and_then(|m| parse_hex_u8(m.as_str()));
    Some(LogRecord::LinEvent {
        ts,
        kind: LinEventKind::TransmErr { id },
    })
}

fn parse_rcv_error(line: &str) -> Option<LogRecord> {
    let caps = RCV_ERROR_LINE.captures(line)?;
    let ts: f64 = caps[1].parse().ok()?;
    let id = caps.get(2).and_then(|m| parse_hex_u8(m.as_str()));
    Some(LogRecord::LinEvent {
        ts,
        kind: LinEventKind::RcvError { id },
    })
}

fn parse_sleep_wake(line: &str) -> Option<LogRecord> {
    if let Some(caps) = SLEEP_WAKE_LINE.captures(line) {
        return Some(LogRecord::LinEvent {
            ts: caps[1].parse().ok()?,
            kind: LinEventKind::SleepModeEvent {
                channel: caps[2].parse().ok()?,
                text: caps[3].trim().to_string(),
            },
        });
    }
    if let Some(caps) = WAKEUP_LINE.captures(line) {
        return Some(LogRecord::LinEvent {
            ts: caps[1].parse().ok()?,
            kind: LinEventKind::WakeupFrame {
                text: caps[2].trim().to_string(),
            },
        });
    }
    if let Some(caps) = SCHED_MOD_CHNG_LINE.captures(line) {
        return Some(LogRecord::LinEvent {
            ts: caps[1].parse().ok()?,
            kind: LinEventKind::ScheduleModeChange {
                prior: caps[2].to_string(),
                next: caps[3].to_string(),
            },
        });
    }
    None
}

/// Attempts to tokenize a single non-empty line, in spec.md's fixed
/// priority order.
fn tokenize_line(line: &str) -> Option<LogRecord> {
    parse_spike(line)
        .or_else(|| parse_transm_err(line))
        .or_else(|| parse_rcv_error(line))
        .or_else(|| parse_lin_frame(line))
        .or_else(|| parse_canfd_frame(line))
        .or_else(|| parse_can_frame(line))
        .or_else(|| parse_sleep_wake(line))
}

/// A lazy, finite, non-restartable iterator over `LogRecord`s from a text
/// log (spec §4.4, §5: "records are consumed in order").
pub struct LogTokenizer<'a> {
    lines: std::str::Lines<'a>,
    skipped: Rc<Cell<usize>>,
}

impl<'a> LogTokenizer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            skipped: Rc::new(Cell::new(0)),
        }
    }

    /// Handle to the running count of lines that matched no recognizer.
    /// Shares state with the iterator so it can be read after exhaustion.
    pub fn skipped_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.skipped)
    }
}

impl<'a> Iterator for LogTokenizer<'a> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<LogRecord> {
        loop {
            let line = self.lines.next()?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match tokenize_line(trimmed) {
                Some(record) => return Some(record),
                None => {
                    self.skipped.set(self.skipped.get() + 1);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lin_rx_with_checksum_and_csm() {
        let line = "0.010 Li 02 Rx 05 FA checksum=4E header time=34 full time=100 CSM=Enhanced";
        let record = tokenize_line(line).expect("should tokenize");
        match record {
            LogRecord::LinFrame {
                ts,
                pid_raw,
                direction,
                data,
                declared_checksum,
                csm,
                header_time_tbit,
                full_time_tbit,
                ..
            } => {
                assert_eq!(ts, 0.010);
                assert_eq!(pid_raw, 0x02);
                assert_eq!(direction, Direction::Rx);
                assert_eq!(data, vec![0x05, 0xFA]);
                assert_eq!(declared_checksum, Some(0x4E));
                assert_eq!(csm, Some(ChecksumKind::Enhanced));
                assert_eq!(header_time_tbit, Some(34.0));
                assert_eq!(full_time_tbit, Some(100.0));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn parses_physical_meta_fields() {
        let line = "0.0 Li 01 Rx SOF=0.001 BR=19200 break=13 1 EOH=0.0015 EOB=0.002 0.0025 EOF=0.003 RBR=19250 HBR=19180 HSO=5 RSO=7";
        let record = tokenize_line(line).unwrap();
        if let LogRecord::LinFrame { physical_meta, .. } = record {
            let meta = physical_meta.unwrap();
            assert_eq!(meta.sof, Some(0.001));
            assert_eq!(meta.br, Some(19200.0));
            assert_eq!(meta.break_info, vec![13.0, 1.0]);
            assert_eq!(meta.eoh, Some(0.0015));
            assert_eq!(meta.eob, vec![0.002, 0.0025]);
            assert_eq!(meta.eof, Some(0.003));
            assert_eq!(meta.rbr, Some(19250.0));
            assert_eq!(meta.hbr, Some(19180.0));
            assert_eq!(meta.hso, Some(5.0));
            assert_eq!(meta.rso, Some(7.0));
        } else {
            panic!("expected LinFrame");
        }
    }

    #[test]
    fn unparseable_numeric_subfield_leaves_slot_empty_not_whole_record() {
        // "SOF=notanumber" fails to match the numeric field regex, so `sof`
        // stays None, but the rest of the record still parses.
        let line = "0.0 Li 01 Rx SOF=notanumber BR=19200";
        let record = tokenize_line(line).unwrap();
        if let LogRecord::LinFrame { physical_meta, .. } = record {
            let meta = physical_meta.unwrap();
            assert_eq!(meta.sof, None);
            assert_eq!(meta.br, Some(19200.0));
        } else {
            panic!("expected LinFrame");
        }
    }

    #[test]
    fn recognizes_spike_transmerr_rcverror() {
        assert!(matches!(
            tokenize_line("0.1 Li Spike Rx noise"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::Spike,
                ..
            })
        ));
        assert!(matches!(
            tokenize_line("0.2 Li 05 TransmErr no response"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::TransmErr { id: Some(0x05) },
                ..
            })
        ));
        assert!(matches!(
            tokenize_line("0.3 Li 06 1 RcvError: framing"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::RcvError { id: Some(0x06) },
                ..
            })
        ));
    }

    #[test]
    fn recognizes_sleep_wake_and_schedmodchng() {
        assert!(matches!(
            tokenize_line("1.0 Li SleepModeEvent 1 entering sleep mode"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::SleepModeEvent { channel: 1, .. },
                ..
            })
        ));
        assert!(matches!(
            tokenize_line("1.1 Li WakeupFrame detected"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::WakeupFrame { .. },
                ..
            })
        ));
        assert!(matches!(
            tokenize_line("1.2 Li SchedModChng prior scheduler mode = Normal, next scheduler mode = Diag"),
            Some(LogRecord::LinEvent {
                kind: LinEventKind::ScheduleModeChange { .. },
                ..
            })
        ));
    }

    #[test]
    fn recognizes_can_and_canfd_frames() {
        let can = tokenize_line("0.5 CAN1 123 Rx d 4 11 22 33 44").unwrap();
        assert!(matches!(can, LogRecord::CanFrame { fd: false, .. }));

        let canfd = tokenize_line("0.6 CANFD 1 Rx 1A0 8 01 02 03 04 05 06 07 08").unwrap();
        assert!(matches!(canfd, LogRecord::CanFrame { fd: true, .. }));
    }

    #[test]
    fn unparseable_lines_are_skipped_and_counted() {
        let text = "garbage line\n0.0 Li 01 Rx\nanother bad line";
        let tok = LogTokenizer::new(text);
        let counter = tok.skipped_counter();
        let records: Vec<_> = tok.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(counter.get(), 2);
    }
}
