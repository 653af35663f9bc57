#![forbid(unsafe_code)]

//! # linspector-rs
//!
//! An offline conformance analyzer for mixed LIN/CAN vehicle-bus traces.
//! Given a LIN Description File (LDF), zero or more CAN database (DBC)
//! files, an optional gateway map, and a bus logger trace, this crate
//! reconstructs the bus models, decodes every frame, and reports protocol
//! conformance findings: checksum and PID-parity failures, schedule
//! adherence, physical-layer timing, bus load, and cross-network gateway
//! correlation.
//!
//! ## Pipeline
//!
//! 1. Parse the LDF into a [`BusModelLIN`] with [`ldf::parse_ldf`].
//! 2. Parse one or more DBCs per CAN channel into a [`BusModelCAN`] with
//!    [`dbc::parse_dbcs_for_channel`].
//! 3. Load an optional gateway map against the combined [`BusModel`] with
//!    [`gateway::load`].
//! 4. Tokenize the trace with [`log::LogTokenizer`] and run it through an
//!    [`engine::AnalysisEngine`].
//! 5. Seal the run into an [`AnalysisResult`] with [`result::finalize`].
//!
//! [`Analyzer`] wraps steps 1-5 behind a single entry point.
//!
//! ## Quick start
//!
//! ```no_run
//! use linspector_rs::{Analyzer, AnalysisConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let ldf_text = std::fs::read_to_string("vehicle.ldf")?;
//!     let trace_text = std::fs::read_to_string("trace.log")?;
//!
//!     let analyzer = Analyzer::from_ldf(&ldf_text, AnalysisConfig::default())?;
//!     let result = analyzer.analyze(&trace_text);
//!
//!     println!("bus load: {:.1}%", result.bus_load.overall_percent);
//!     println!("checksum errors: {}", result.checksum_errors.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`ldf`] | LIN Description File parsing |
//! | [`dbc`] | CAN database (DBC) parsing and per-channel merging |
//! | [`model`] | The combined `BusModel` and `Channel` enum |
//! | [`schedule`] | Schedule-table equivalence grouping |
//! | [`log`] | Bus logger trace tokenization |
//! | [`numeric`] | PID, checksum, and signal-extraction primitives |
//! | [`gateway`] | Gateway map loading and resolution |
//! | [`engine`] | The single-pass analysis engine |
//! | [`correlator`] | Post-pass gateway event correlation |
//! | [`result`] | The sealed `AnalysisResult` and its finalizer |
//! | [`config`] | Runtime-tunable analysis thresholds |
//! | [`error`] | Crate-level error type and structural warnings |
//!
//! ## Error handling
//!
//! Parsing and model-construction failures return [`Result<T>`], an alias
//! over [`AnalysisError`]. Once a [`BusModel`] exists, trace analysis
//! itself never fails: anything the analyzer can't make sense of (an
//! unrecognized log line, an unresolvable gateway mapping, a foreign
//! frame id) is recorded as data in the [`AnalysisResult`] rather than
//! raised as an error.

pub mod config;
pub mod correlator;
pub mod dbc;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ldf;
pub mod log;
pub mod model;
pub mod numeric;
pub mod result;
pub mod schedule;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result, Warning};
pub use gateway::{GatewayIndex, GatewayMapError, GatewayMapping, GatewayWarning};
pub use ldf::LdfError;
pub use model::{BusModel, Channel};
pub use result::AnalysisResult;

use dbc::DbcError;
use engine::AnalysisEngine;
use log::LogTokenizer;

/// High-level entry point tying model construction, log tokenization, the
/// analysis engine, and the finalizer together (spec §1).
///
/// An `Analyzer` owns a fully resolved [`BusModel`] (and, if supplied, a
/// resolved [`GatewayIndex`]) and can run any number of traces against it
/// with [`Analyzer::analyze`].
pub struct Analyzer {
    model: BusModel,
    config: AnalysisConfig,
    gateway: Option<GatewayIndex>,
}

impl Analyzer {
    /// Builds an analyzer from a parsed [`BusModel`] and [`AnalysisConfig`],
    /// with no gateway map.
    pub fn new(model: BusModel, config: AnalysisConfig) -> Self {
        Self { model, config, gateway: None }
    }

    /// Parses `ldf_text` into a LIN-only [`BusModel`] and builds an
    /// analyzer from it. Discards structural LDF warnings; call
    /// [`ldf::parse_ldf`] directly to inspect them.
    pub fn from_ldf(ldf_text: &str, config: AnalysisConfig) -> Result<Self> {
        let (lin, _warnings) = ldf::parse_ldf(ldf_text)?;
        let model = BusModel { lin: Some(lin), can: Default::default() };
        Ok(Self::new(model, config))
    }

    /// Attaches one CAN channel's merged DBC model, replacing any model
    /// previously attached for that channel.
    pub fn with_can_channel(mut self, channel: Channel, dbc_texts: &[&str]) -> std::result::Result<Self, DbcError> {
        let merged = dbc::parse_dbcs_for_channel(dbc_texts)?;
        self.model.can.insert(channel, merged);
        Ok(self)
    }

    /// Resolves `gateway_map_json` against the analyzer's current bus
    /// model. Call after every `with_can_channel` the mapping refers to,
    /// since resolution happens once, here, not per-mapping at analysis
    /// time.
    pub fn with_gateway_map(mut self, gateway_map_json: &str) -> std::result::Result<Self, GatewayMapError> {
        let (index, _warnings) = gateway::load(gateway_map_json, &self.model)?;
        self.gateway = Some(index);
        Ok(self)
    }

    /// Returns the resolved bus model backing this analyzer.
    pub fn model(&self) -> &BusModel {
        &self.model
    }

    /// Runs a single trace through the engine and seals the result.
    /// Unrecognized log lines are counted, not rejected (spec §4.4).
    pub fn analyze(&self, trace_text: &str) -> AnalysisResult {
        let tokenizer = LogTokenizer::new(trace_text);
        let skipped = tokenizer.skipped_counter();
        let engine = AnalysisEngine::new(&self.model, &self.config, self.gateway.as_ref());
        let state = engine.run(tokenizer);
        result::finalize(state, &self.config, self.gateway.as_ref(), skipped.get())
    }
}
