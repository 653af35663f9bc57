//! Gateway correlation post-pass (spec §4.8, §4.9, C8).
//!
//! Pairs each mapping's target events against its source events under a
//! latency tolerance, then compares the paired values per the value
//! comparison rules. Runs once, after the engine has consumed the whole log
//! (the source/target deques are already in non-decreasing timestamp order,
//! so neither list needs sorting).

use std::collections::BTreeMap;

use crate::config::AnalysisConfig;
use crate::engine::{DecodedValue, GatewayCapture, MinAvgMax};

/// One mismatch example, capturing both sides for diagnosis.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchExample {
    pub source_ts: f64,
    pub target_ts: f64,
    pub latency_ms: f64,
    pub source: DecodedValue,
    pub target: DecodedValue,
}

/// Per-mapping correlation outcome (spec §3 `MappingCorrelation`).
#[derive(Debug, Clone, Default)]
pub struct MappingCorrelation {
    pub comparisons: u64,
    pub matches: u64,
    pub mismatches_value: u64,
    pub mismatches_type: u64,
    pub mismatches_timing: u64,
    pub latency_ms: MinAvgMax,
    pub mismatch_examples: Vec<MismatchExample>,
}

enum Outcome {
    Match,
    MismatchValue,
    MismatchType,
}

/// Compares a paired source/target observation per spec §4.9.
fn compare_values(source: &DecodedValue, target: &DecodedValue, config: &AnalysisConfig) -> Outcome {
    match (&source.logical, &target.logical) {
        (Some(_), Some(_)) => {
            if source.raw == target.raw {
                Outcome::Match
            } else {
                Outcome::MismatchValue
            }
        }
        (None, None) => match (source.physical, target.physical) {
            (Some(sp), Some(tp)) => {
                if (sp - tp).abs() < config.physical_comparison_epsilon {
                    Outcome::Match
                } else {
                    Outcome::MismatchValue
                }
            }
            _ => Outcome::MismatchType,
        },
        // Exactly one side carries a logical label: spec calls this a
        // "hybrid_mismatch" and it never counts as a match.
        _ => Outcome::MismatchType,
    }
}

/// Correlates every mapping with at least one captured event.
pub fn correlate(capture: &GatewayCapture, config: &AnalysisConfig) -> BTreeMap<usize, MappingCorrelation> {
    let mut mapping_indices: Vec<usize> = capture
        .source_events
        .keys()
        .chain(capture.target_events.keys())
        .copied()
        .collect();
    mapping_indices.sort_unstable();
    mapping_indices.dedup();

    let mut results = BTreeMap::new();
    let empty = std::collections::VecDeque::new();

    for idx in mapping_indices {
        let sources = capture.source_events.get(&idx).unwrap_or(&empty);
        let targets = capture.target_events.get(&idx).unwrap_or(&empty);
        if targets.is_empty() {
            continue;
        }

        let mut result = MappingCorrelation::default();
        let mut src_ptr = 0usize;

        for (tt, target_value) in targets {
            while src_ptr < sources.len() && sources[src_ptr].0 < tt - config.gateway_tolerance_s {
                src_ptr += 1;
            }

            let mut latest: Option<usize> = None;
            let mut probe = src_ptr;
            while probe < sources.len() && sources[probe].0 < *tt {
                latest = Some(probe);
                probe += 1;
            }

            result.comparisons += 1;
            match latest {
                None => result.mismatches_timing += 1,
                Some(i) => {
                    let (source_ts, source_value) = &sources[i];
                    let latency_ms = (tt - source_ts) * 1000.0;
                    result.latency_ms.observe(latency_ms);

                    match compare_values(source_value, target_value, config) {
                        Outcome::Match => result.matches += 1,
                        Outcome::MismatchValue => {
                            result.mismatches_value += 1;
                            result.mismatch_examples.push(MismatchExample {
                                source_ts: *source_ts,
                                target_ts: *tt,
                                latency_ms,
                                source: source_value.clone(),
                                target: target_value.clone(),
                            });
                        }
                        Outcome::MismatchType => {
                            result.mismatches_type += 1;
                            result.mismatch_examples.push(MismatchExample {
                                source_ts: *source_ts,
                                target_ts: *tt,
                                latency_ms,
                                source: source_value.clone(),
                                target: target_value.clone(),
                            });
                        }
                    }
                }
            }
        }

        results.insert(idx, result);
    }

    results
}
