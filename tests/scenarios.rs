//! End-to-end scenarios, one per spec-level behavior: LDF → trace → sealed
//! `AnalysisResult` through the public `Analyzer` API only.

use linspector_rs::{AnalysisConfig, Analyzer, Channel};

const SIMPLE_LDF: &str = r#"
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
fn happy_path_completes_one_cycle_with_no_findings_and_nonzero_bus_load() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();

    let pid = linspector_rs::numeric::protected_id(0x02).unwrap();
    let enhanced = linspector_rs::numeric::enhanced_checksum(pid, &[0x05]);
    let trace = format!("0.000 Li 01 Rx\n0.010 Li 02 Rx 05 checksum={enhanced:02X} CSM=Enhanced\n");

    let result = analyzer.analyze(&trace);

    assert_eq!(result.schedule.completed_cycles, 1);
    assert_eq!(result.schedule.sequence_mismatches, 0);
    assert!(result.checksum_errors.is_empty());

    let sig = &result.lin_signal_stats[&("F2".to_string(), "B".to_string())];
    assert_eq!(sig.min, 5.0);
    assert_eq!(sig.max, 5.0);
    assert!(result.bus_load.total_busy_s > 0.0);
}

#[test]
fn checksum_failure_is_recorded_with_expected_and_observed() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();

    let trace = "0.000 Li 01 Rx\n0.010 Li 02 Rx 05 checksum=00 CSM=Enhanced\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.checksum_errors.len(), 1);
    assert_eq!(result.checksum_errors[&0x02].count, 1);
}

#[test]
fn intrusion_frame_flagged_when_schedule_has_no_candidate_for_it() {
    let ldf = r#"
Nodes {
    Master: ECU, 5 ms;
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
    }
}
"#;
    let analyzer = Analyzer::from_ldf(ldf, AnalysisConfig::default()).unwrap();

    let trace = "0.000 Li 01 Rx\n0.005 Li 02 Rx 00\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.schedule.intrusion_frames.count, 1);
}

#[test]
fn gateway_correlation_match_within_tolerance() {
    let dbc = r#"BO_ 16 MsgB: 1 Sensor
 SG_ B : 0|8@1+ (1,0) [0|0] "" ECU

BA_DEF_DEF_ "Baudrate" 500000;
"#;
    let json = r#"[{"source_network":"LIN","source_message":"F1","source_signal":"A",
        "target_network":"CAN1","target_message":"MsgB","target_signal":"B"}]"#;

    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default())
        .unwrap()
        .with_can_channel(Channel::Can1, &[dbc])
        .unwrap()
        .with_gateway_map(json)
        .unwrap();

    let trace = "0.000 Li 01 Rx 02\n0.010 Li 02 Rx 00\n0.010 CAN1 10 Rx d 1 02\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.gateway_mappings.len(), 1);
    let mapping_result = &result.gateway_mappings[0];
    assert_eq!(mapping_result.correlation.comparisons, 1);
    assert_eq!(mapping_result.correlation.matches, 1);
    assert!((mapping_result.average_latency_ms - 10.0).abs() < 1e-6);
}

#[test]
fn gateway_timing_miss_outside_tolerance_is_a_timing_mismatch() {
    let dbc = r#"BO_ 16 MsgB: 1 Sensor
 SG_ B : 0|8@1+ (1,0) [0|0] "" ECU
"#;
    let json = r#"[{"source_network":"LIN","source_message":"F1","source_signal":"A",
        "target_network":"CAN1","target_message":"MsgB","target_signal":"B"}]"#;

    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default())
        .unwrap()
        .with_can_channel(Channel::Can1, &[dbc])
        .unwrap()
        .with_gateway_map(json)
        .unwrap();

    // Target arrives roughly a second after the source; default
    // gateway_tolerance_s is 0.022s, so no source qualifies.
    let trace = "0.000 Li 01 Rx 02\n0.010 Li 02 Rx 00\n1.010 CAN1 10 Rx d 1 02\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.gateway_mappings.len(), 1);
    let mapping_result = &result.gateway_mappings[0];
    assert_eq!(mapping_result.correlation.mismatches_timing, 1);
    assert_eq!(mapping_result.correlation.matches, 0);
}

#[test]
fn implicit_cycle_start_with_no_prior_wake_event_is_not_a_fatal_error() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();

    let trace = "0.000 Li 01 Rx\n0.010 Li 02 Rx 05\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.network_cycle.implicit_starts, 1);
    assert_eq!(result.schedule.completed_cycles, 1);
}

#[test]
fn empty_log_yields_a_zero_valued_result() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();
    let result = analyzer.analyze("");

    assert_eq!(result.log_start_ts, None);
    assert_eq!(result.log_duration_s, 0.0);
    assert!(result.checksum_errors.is_empty());
    assert!(result.gateway_mappings.is_empty());
    assert_eq!(result.skipped_log_lines, 0);
}

#[test]
fn single_unknown_id_lin_line_is_one_foreign_lin_id_entry() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();
    let result = analyzer.analyze("0.000 Li 3F Rx\n");

    assert_eq!(result.foreign_lin_ids.count, 1);
}

#[test]
fn unparseable_lines_are_skipped_and_counted_not_fatal() {
    let analyzer = Analyzer::from_ldf(SIMPLE_LDF, AnalysisConfig::default()).unwrap();
    let trace = "this is not a log line\n0.000 Li 01 Rx\nneither is this\n";
    let result = analyzer.analyze(trace);

    assert_eq!(result.skipped_log_lines, 2);
}
