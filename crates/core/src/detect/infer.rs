//! Schema inference backend seam. The pipeline only knows this trait; the
//! concrete backend (an external model, a rules engine, a test stub) is
//! injected at session start.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Schema;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("schema inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("schema inference cancelled")]
    Cancelled,

    #[error("inference backend returned a malformed schema: {0}")]
    Malformed(String),

    #[error("inference backend failed: {0}")]
    Backend(String),
}

/// Produces a refined schema from a sample of raw lines. Implementations
/// must be safe to call concurrently; the pipeline keeps at most one
/// inference in flight per session.
#[async_trait]
pub trait SchemaInfer: Send + Sync {
    async fn infer(&self, lines: &[String]) -> Result<Schema, InferError>;
}
