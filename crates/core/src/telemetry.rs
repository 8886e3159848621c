//! Telemetry — tracing / logging subsystem init.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the tracing / logging subsystem.
///
/// Honors `RUST_LOG`; defaults to `logsift=info`. Embedding applications
/// that install their own subscriber should skip this.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logsift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
