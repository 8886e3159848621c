//! Pipeline configuration: TOML file, environment overrides, defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::ingest::SourceKind;

/// Enforced floor for the ring buffer capacity.
pub const MIN_RING_CAPACITY: usize = 50_000;
/// Default ring buffer capacity.
pub const DEFAULT_RING_CAPACITY: usize = 200_000;
/// Per-line size cap (1 MiB); longer lines are reported and skipped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("file source requires a path")]
    MissingPath,
}

/// Format override supplied by the caller instead of heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceFormat {
    Json,
    Logfmt,
    Apache,
    Syslog,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where lines come from: stdin, a file, or the built-in demo generator.
    pub source: SourceKind,
    /// Log file path; required for the file source.
    pub path: Option<PathBuf>,
    /// Follow (tail) the file instead of a one-shot read.
    pub follow: bool,
    /// Ring buffer capacity in entries (floor: [`MIN_RING_CAPACITY`]).
    pub max_buffer: usize,
    /// For non-follow file reads: only read the last N MiB (0 = whole file).
    pub block_size_mb: u64,
    /// Per-line byte cap; oversized lines become non-fatal errors.
    pub max_line_bytes: usize,
    /// Disable external schema inference.
    pub offline: bool,
    /// Skip the schema cache entirely.
    pub no_cache: bool,
    /// Skip heuristics and force a parse strategy.
    pub force_format: Option<ForceFormat>,
    /// Force a timestamp layout (chrono strftime); overrides the schema's.
    pub time_layout: Option<String>,
    /// Timeout for one external inference call.
    pub infer_timeout_secs: u64,
    /// Minimum elapsed time for the initial detection window.
    pub detection_window_ms: u64,
    /// Poll interval for follow-mode tailing.
    pub tail_poll_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Demo,
            path: None,
            follow: false,
            max_buffer: DEFAULT_RING_CAPACITY,
            block_size_mb: 0,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            offline: false,
            no_cache: false,
            force_format: None,
            time_layout: None,
            infer_timeout_secs: 120,
            detection_window_ms: 1_000,
            tail_poll_ms: 250,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from file or environment variables.
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("LOGSIFT_CONFIG_FILE").unwrap_or_else(|_| String::new());

        let mut config = if !config_path.is_empty() && Path::new(&config_path).exists() {
            tracing::info!("loading configuration from {}", config_path);
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        if let Ok(path) = std::env::var("LOGSIFT_FILE") {
            config.source = SourceKind::File;
            config.path = Some(PathBuf::from(path));
        }
        if let Ok(v) = std::env::var("LOGSIFT_FOLLOW") {
            config.follow = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("LOGSIFT_MAX_BUFFER") {
            if let Ok(n) = v.parse() {
                config.max_buffer = n;
            }
        }
        if let Ok(v) = std::env::var("LOGSIFT_OFFLINE") {
            config.offline = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(secs) = std::env::var("LOGSIFT_INFER_TIMEOUT_SEC") {
            if let Ok(n) = secs.parse() {
                config.infer_timeout_secs = n;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: PathBuf::from(path),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(path),
            source,
        })
    }

    /// Clamp and cross-check settings. The ring floor is enforced rather
    /// than rejected so callers can pass a round number and move on.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.max_buffer < MIN_RING_CAPACITY {
            tracing::warn!(
                requested = self.max_buffer,
                floor = MIN_RING_CAPACITY,
                "max_buffer below floor; clamping"
            );
            self.max_buffer = MIN_RING_CAPACITY;
        }
        if self.max_line_bytes == 0 {
            self.max_line_bytes = DEFAULT_MAX_LINE_BYTES;
        }
        if matches!(self.source, SourceKind::File) && self.path.is_none() {
            return Err(ConfigError::MissingPath);
        }
        Ok(())
    }

    pub(crate) fn block_size_bytes(&self) -> u64 {
        self.block_size_mb * 1024 * 1024
    }
}
