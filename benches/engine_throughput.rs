//! Throughput of the single-pass analysis engine over synthetic traces of
//! increasing size.
//!
//! Run with: cargo bench --bench engine_throughput

use std::time::{Duration, Instant};

use linspector_rs::numeric::classic_checksum;
use linspector_rs::{AnalysisConfig, Analyzer};

/// Benchmark result for a single operation.
struct BenchResult {
    name: String,
    duration: Duration,
    iterations: u32,
}

impl BenchResult {
    fn avg_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0 / self.iterations as f64
    }
}

/// Runs a benchmark function multiple times and measures average time.
fn bench<F: FnMut()>(name: &str, iterations: u32, mut f: F) -> BenchResult {
    // Warmup
    f();

    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    let duration = start.elapsed();

    BenchResult { name: name.to_string(), duration, iterations }
}

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

/// Builds a trace with `cycles` repetitions of the F1/F2 schedule, each
/// record correctly checksummed so no validator short-circuits on error
/// handling instead of the steady-state decode/dispatch path.
fn synthetic_trace(cycles: usize) -> String {
    let mut out = String::with_capacity(cycles * 64);
    let mut ts = 0.0_f64;
    for i in 0..cycles {
        let a = (i % 256) as u8;
        out.push_str(&format!("{ts:.3} Li 01 Rx {a:02X}\n"));
        ts += 0.005;

        let b = ((i * 3) % 256) as u8;
        let checksum = classic_checksum(&[b]);
        out.push_str(&format!("{ts:.3} Li 02 Rx {b:02X} checksum={checksum:02X} CSM=Classic\n"));
        ts += 0.005;
    }
    out
}

fn main() {
    println!("=== linspector-rs engine throughput ===\n");

    let configs = [(100, "Small (100 cycles)"), (1_000, "Medium (1K cycles)"), (10_000, "Large (10K cycles)")];

    for (cycles, desc) in configs {
        println!("--- {desc} ---");

        let trace = synthetic_trace(cycles);
        let lines = trace.lines().count();
        let analyzer = Analyzer::from_ldf(LDF, AnalysisConfig::default()).unwrap();

        let iterations = if cycles <= 1_000 { 20 } else { 5 };
        let result = bench(&format!("analyze ({lines} lines)"), iterations, || {
            let _ = analyzer.analyze(&trace);
        });

        let lines_per_ms = lines as f64 / result.avg_ms();
        println!(
            "  {:50} {:>10.3} ms  ({:.0} lines/ms)",
            result.name,
            result.avg_ms(),
            lines_per_ms
        );

        // Sanity: a full run should still report the expected number of
        // completed schedule cycles, so the timed path isn't short-circuiting.
        let sealed = analyzer.analyze(&trace);
        assert_eq!(sealed.schedule.completed_cycles as usize, cycles);
        println!();
    }
}
