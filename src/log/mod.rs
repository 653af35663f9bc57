//! Bus log tokenization (spec §4.4): turns raw log text into a lazy stream
//! of `LogRecord`s.

mod record;
mod tokenizer;

pub use record::{ChecksumKind, Direction, LinEventKind, LogRecord, PhysicalMeta};
pub use tokenizer::LogTokenizer;
