//! LIN Description File parsing (spec §4.2) and the resulting in-memory
//! `BusModelLIN` (spec §3).

mod model;
mod parser;

pub use model::{
    BusModelLIN, EncodingKind, FrameKind, LinFrame, LinSignalInstance, LogicalValue,
    ScheduleEntry, ScheduleTable, SignalEncoding,
};
pub use parser::{parse_ldf, LdfError};
