//! Crate-level error surface.
//!
//! Each subsystem defines its own narrow error enum (`ldf::LdfError`,
//! `dbc::DbcError`, `gateway::GatewayMapError`) and this module unifies them
//! behind a single [`AnalysisError`] via `#[from]`, the way a multi-stage
//! pipeline keeps per-stage error types but still hands the caller one type
//! to match on.
//!
//! Structural warnings and trace findings are never represented here — per
//! spec §7 they are data (`Warning`, `AnalysisResult` buckets), not errors.

use crate::dbc::DbcError;
use crate::gateway::GatewayMapError;
use crate::ldf::LdfError;

/// Top-level fatal error for a single analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The LDF failed to parse into a `BusModelLIN`.
    #[error("LDF error: {0}")]
    Ldf(#[from] LdfError),

    /// A DBC file failed to parse, or channel merging hit a hard conflict.
    #[error("DBC error: {0}")]
    Dbc(#[from] DbcError),

    /// The gateway map failed structural validation (not individual-record
    /// resolution, which is a warning, but e.g. malformed JSON).
    #[error("gateway map error: {0}")]
    GatewayMap(#[from] GatewayMapError),

    /// The underlying log byte source could not be read to completion.
    #[error("log source I/O error: {0}")]
    LogIo(#[from] std::io::Error),

    /// No bus model at all was supplied (neither LIN nor any CAN channel).
    #[error("analysis requires at least one LIN or CAN bus model")]
    EmptyBusModel,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// A non-fatal structural issue retained alongside a successfully built
/// model or report (spec §7, "structural warnings").
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Human-readable description of the issue.
    pub message: String,
    /// Source line number, when the warning can be pinned to one.
    pub line: Option<usize>,
}

impl Warning {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub(crate) fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}
