//! Core data model: raw lines, parsed entries, schemas and the ring buffer.

pub mod entry;
pub mod ring;
pub mod schema;

pub use entry::{LogEntry, RawLine};
pub use ring::Ring;
pub use schema::{FieldDef, ParseStrategy, Schema};
