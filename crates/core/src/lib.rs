// Module structure for the logsift ingestion core.

// Data model
pub mod model;

// Pipeline stages
pub mod ingest;
pub mod detect;
pub mod parse;
pub mod filter;
pub mod pipeline;

// Infrastructure
pub mod config;
pub mod telemetry;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use filter::{Criteria, Evaluator};
pub use model::{LogEntry, RawLine, Ring, Schema};
pub use pipeline::Session;
