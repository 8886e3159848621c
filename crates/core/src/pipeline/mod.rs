//! Session orchestration: owns the source reader, the detection round, the
//! active schema and parser, the ring buffer, filtering, and the background
//! inference round. Callers drive it with `detect` once and `drain_tick`
//! periodically.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ForceFormat, MIN_RING_CAPACITY, PipelineConfig};
use crate::detect::cache::SchemaCache;
use crate::detect::infer::{InferError, SchemaInfer};
use crate::detect::{
    apache_schema, json_schema, logfmt_schema, syslog_schema, FormatClassifier,
};
use crate::filter::{Criteria, Evaluator, FilterError};
use crate::ingest::{self, IngestError, IngestOptions, SourceKind};
use crate::model::{FieldDef, LogEntry, RawLine, Ring, Schema};
use crate::parse::{build_parser, LineParser};

/// Cap on the number of buffered lines fed to the heuristics.
pub const MAX_DETECT_SAMPLE: usize = 200;
/// Cap on lines sent to the inference backend.
pub const INFER_SAMPLE: usize = 50;
/// Per-tick drain bounds, so one tick never stalls on a firehose.
pub const MAX_LINES_PER_TICK: usize = 500;
pub const MAX_ERRORS_PER_TICK: usize = 20;
/// Re-detection looks at the newest entries only.
pub const REDETECT_WINDOW: usize = 50;
pub const REDETECT_SAMPLE: usize = 10;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("source produced no lines")]
    NoInput,

    #[error("session cancelled")]
    Cancelled,

    #[error("no entries buffered to re-detect from")]
    EmptyBuffer,

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Outcome of the initial detection round.
#[derive(Debug, Clone)]
pub struct Detection {
    pub format_name: String,
    pub confidence: f64,
    pub cache_hit: bool,
    /// Lines buffered during the window and re-parsed under the schema.
    pub replayed: usize,
}

/// What one `drain_tick` call did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub lines: usize,
    pub errors: Vec<IngestError>,
    pub source_closed: bool,
    /// An inference result arrived and replaced the active schema.
    pub schema_changed: bool,
    pub infer_error: Option<InferError>,
}

struct ActiveSchema {
    schema: Schema,
    parser: Box<dyn LineParser>,
}

/// One ingestion session over one source.
pub struct Session {
    cfg: PipelineConfig,
    cancel: CancellationToken,
    source_cancel: CancellationToken,
    lines: mpsc::Receiver<RawLine>,
    errors: mpsc::Receiver<IngestError>,
    ring: Ring,
    active: Arc<RwLock<ActiveSchema>>,
    criteria: Criteria,
    evaluator: Evaluator,
    cache: Arc<dyn SchemaCache>,
    infer: Option<Arc<dyn SchemaInfer>>,
    infer_tx: mpsc::Sender<Result<Schema, InferError>>,
    infer_rx: mpsc::Receiver<Result<Schema, InferError>>,
    inference_inflight: bool,
    follow: bool,
    source_closed: bool,
    /// End offset of a finished one-shot file read; enables follow later.
    resume_offset: Option<u64>,
    source_id: String,
}

impl Session {
    /// Validate the config, spawn the source reader, and return a session
    /// with the placeholder schema active. Call `detect` next.
    pub fn start(
        mut cfg: PipelineConfig,
        cache: Arc<dyn SchemaCache>,
        infer: Option<Arc<dyn SchemaInfer>>,
    ) -> Result<Self, SessionError> {
        cfg.validate()?;

        let cancel = CancellationToken::new();
        let source_cancel = cancel.child_token();
        let follow = cfg.follow;

        let source_id = match (&cfg.source, &cfg.path) {
            (SourceKind::File, Some(p)) => p.to_string_lossy().into_owned(),
            (SourceKind::Stdin, _) => "stdin".to_string(),
            _ => "demo".to_string(),
        };

        let opts = ingest_options(&cfg, None);
        let (lines, errors) = ingest::spawn(opts, source_cancel.clone());

        let placeholder = crate::detect::unknown_schema();
        let parser = build_parser(&placeholder, cfg.time_layout.as_deref());
        let (infer_tx, infer_rx) = mpsc::channel(1);

        Ok(Self {
            ring: Ring::new(cfg.max_buffer),
            cfg,
            cancel,
            source_cancel,
            lines,
            errors,
            active: Arc::new(RwLock::new(ActiveSchema {
                schema: placeholder,
                parser,
            })),
            criteria: Criteria::default(),
            evaluator: Evaluator::default(),
            cache,
            infer,
            infer_tx,
            infer_rx,
            inference_inflight: false,
            follow,
            source_closed: false,
            resume_offset: None,
            source_id,
        })
    }

    /// Initial detection round: buffer lines until the detection window has
    /// elapsed and at least one line has arrived, pick a schema (forced
    /// format, then cache, then heuristics), replay the buffered lines
    /// under it, and kick off background inference when enabled.
    pub async fn detect(&mut self) -> Result<Detection, SessionError> {
        let window = std::time::Duration::from_millis(self.cfg.detection_window_ms);
        let mut pending: Vec<RawLine> = Vec::new();
        let mut closed = false;

        let sleep = tokio::time::sleep(window);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = &mut sleep => break,
                line = self.lines.recv() => match line {
                    Some(l) => pending.push(l),
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }
        // Window elapsed with nothing buffered: wait for the first line
        // rather than classifying thin air.
        if pending.is_empty() && !closed {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                line = self.lines.recv() => match line {
                    Some(l) => pending.push(l),
                    None => closed = true,
                },
            }
        }
        if closed {
            self.note_source_closed();
        }
        if pending.is_empty() {
            return Err(SessionError::NoInput);
        }

        let sample: Vec<String> = pending
            .iter()
            .take(MAX_DETECT_SAMPLE)
            .map(|l| l.text.clone())
            .collect();

        let mut cache_hit = false;
        let (schema, confidence) = if let Some(forced) = self.cfg.force_format {
            let schema = forced_schema(forced);
            info!(format = %schema.format_name, "format forced, skipping heuristics");
            (schema, 1.0)
        } else if let Some(cached) = self.cached_schema() {
            cache_hit = true;
            info!(format = %cached.format_name, source = %self.source_id, "using cached schema");
            let confidence = cached.confidence;
            (cached, confidence)
        } else {
            let guess = FormatClassifier::new().classify(&sample);
            info!(
                format = %guess.schema.format_name,
                confidence = guess.confidence,
                lines = sample.len(),
                "format detected"
            );
            (guess.schema, guess.confidence)
        };

        let replayed = pending.len();
        self.install_schema(schema, &pending);

        if !cache_hit {
            self.spawn_inference(sample);
        }

        let active = self.active.read();
        Ok(Detection {
            format_name: active.schema.format_name.clone(),
            confidence,
            cache_hit,
            replayed,
        })
    }

    /// Drain pending lines and errors, bounded per call, and absorb an
    /// inference result if one arrived. Non-blocking.
    pub fn drain_tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        {
            let active = self.active.read();
            while report.lines < MAX_LINES_PER_TICK {
                match self.lines.try_recv() {
                    Ok(raw) => {
                        self.ring.push(active.parser.parse(&raw.text, &raw.source));
                        report.lines += 1;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        report.source_closed = true;
                        break;
                    }
                }
            }
        }
        if report.source_closed {
            self.note_source_closed();
        }

        while report.errors.len() < MAX_ERRORS_PER_TICK {
            match self.errors.try_recv() {
                Ok(e) => report.errors.push(e),
                Err(_) => break,
            }
        }

        match self.infer_rx.try_recv() {
            Ok(Ok(schema)) => {
                self.inference_inflight = false;
                info!(format = %schema.format_name, "inferred schema ready");
                self.apply_schema(schema.clone());
                if let Err(e) = self.save_schema(&schema) {
                    warn!(error = %e, "failed to persist inferred schema");
                }
                report.schema_changed = true;
            }
            Ok(Err(e)) => {
                self.inference_inflight = false;
                warn!(error = %e, "schema inference failed; keeping heuristic schema");
                report.infer_error = Some(e);
            }
            Err(_) => {}
        }

        report
    }

    /// Re-run the heuristics over the newest buffered entries and swap the
    /// result in immediately; also start a fresh inference round.
    pub fn redetect(&mut self) -> Result<Detection, SessionError> {
        let (entries, _, _) = self.ring.snapshot();
        if entries.is_empty() {
            return Err(SessionError::EmptyBuffer);
        }
        let window: Vec<String> = entries
            .iter()
            .rev()
            .take(REDETECT_WINDOW)
            .rev()
            .map(|e| e.raw.clone())
            .collect();
        let sample: Vec<String> = window.iter().take(REDETECT_SAMPLE).cloned().collect();

        let guess = FormatClassifier::new().classify(&sample);
        info!(
            format = %guess.schema.format_name,
            confidence = guess.confidence,
            "re-detection complete"
        );
        let confidence = guess.confidence;
        let format_name = guess.schema.format_name.clone();
        let replayed = entries.len();
        self.apply_schema(guess.schema);
        self.spawn_inference(sample);

        Ok(Detection {
            format_name,
            confidence,
            cache_hit: false,
            replayed,
        })
    }

    /// Swap the active schema and re-parse every buffered entry under it.
    /// Ring counters survive: the same lines were ingested either way.
    pub fn apply_schema(&mut self, mut schema: Schema) {
        let parser = build_parser(&schema, self.cfg.time_layout.as_deref());
        let (entries, _, _) = self.ring.snapshot();
        let raws: Vec<(String, String)> = entries
            .into_iter()
            .map(|e| (e.raw, e.source))
            .collect();
        let reparsed: Vec<LogEntry> = raws
            .iter()
            .map(|(raw, source)| parser.parse(raw, source))
            .collect();
        discover_fields(&mut schema, &reparsed);
        self.ring.replace_all(reparsed);
        let mut active = self.active.write();
        active.schema = schema;
        active.parser = parser;
    }

    /// Toggle follow mode by replacing the source reader. Enabling follow
    /// after a finished one-shot read resumes from the recorded offset.
    pub fn set_follow(&mut self, follow: bool) {
        if follow == self.follow {
            return;
        }
        self.follow = follow;
        self.source_cancel.cancel();
        self.source_cancel = self.cancel.child_token();
        self.source_closed = false;

        let start_offset = if follow { self.resume_offset.take() } else { None };
        let mut opts = ingest_options(&self.cfg, start_offset);
        opts.follow = follow;
        debug!(follow, ?start_offset, "replacing source reader");
        let (lines, errors) = ingest::spawn(opts, self.source_cancel.clone());
        self.lines = lines;
        self.errors = errors;
    }

    /// Replace the filter criteria; compiles eagerly so bad input surfaces
    /// here instead of silently matching nothing.
    pub fn set_criteria(&mut self, criteria: Criteria) -> Result<(), SessionError> {
        self.evaluator = Evaluator::compile(&criteria)?;
        self.criteria = criteria;
        Ok(())
    }

    pub fn snapshot(&self) -> (Vec<LogEntry>, u64, u64) {
        self.ring.snapshot()
    }

    /// Snapshot with the current criteria applied, plus the counters.
    pub fn filtered_snapshot(&self) -> (Vec<LogEntry>, u64, u64) {
        let (entries, total, dropped) = self.ring.snapshot();
        let filtered = entries
            .into_iter()
            .filter(|e| self.evaluator.matches(e, &self.criteria))
            .collect();
        (filtered, total, dropped)
    }

    /// Change ring capacity at runtime, clamped to the floor.
    pub fn resize_buffer(&mut self, capacity: usize) {
        let capacity = capacity.max(MIN_RING_CAPACITY);
        self.ring.resize(capacity);
    }

    pub fn schema(&self) -> Schema {
        self.active.read().schema.clone()
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn install_schema(&mut self, mut schema: Schema, pending: &[RawLine]) {
        let parser = build_parser(&schema, self.cfg.time_layout.as_deref());
        let entries: Vec<LogEntry> = pending
            .iter()
            .map(|l| parser.parse(&l.text, &l.source))
            .collect();
        discover_fields(&mut schema, &entries);
        for e in entries {
            self.ring.push(e);
        }
        let mut active = self.active.write();
        active.schema = schema;
        active.parser = parser;
    }

    fn spawn_inference(&mut self, sample: Vec<String>) {
        if self.cfg.offline || self.inference_inflight {
            return;
        }
        let backend = match &self.infer {
            Some(b) => Arc::clone(b),
            None => return,
        };
        self.inference_inflight = true;

        let sample: Vec<String> = sample.into_iter().take(INFER_SAMPLE).collect();
        let timeout = std::time::Duration::from_secs(self.cfg.infer_timeout_secs);
        let tx = self.infer_tx.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(InferError::Cancelled),
                r = tokio::time::timeout(timeout, backend.infer(&sample)) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(InferError::Timeout(timeout)),
                },
            };
            let _ = tx.send(result).await;
        });
    }

    fn cached_schema(&self) -> Option<Schema> {
        if self.cfg.no_cache || !matches!(self.cfg.source, SourceKind::File) {
            return None;
        }
        self.cache.load(&self.source_id)
    }

    fn save_schema(&self, schema: &Schema) -> Result<(), crate::detect::cache::CacheError> {
        if self.cfg.no_cache || !matches!(self.cfg.source, SourceKind::File) {
            return Ok(());
        }
        self.cache.save(&self.source_id, schema)
    }

    /// A finished one-shot file read leaves an offset to resume from if the
    /// caller later turns follow on.
    fn note_source_closed(&mut self) {
        if self.source_closed {
            return;
        }
        self.source_closed = true;
        if self.follow || !matches!(self.cfg.source, SourceKind::File) {
            return;
        }
        if let Some(path) = &self.cfg.path {
            if let Ok(md) = std::fs::metadata(path) {
                debug!(offset = md.len(), "recorded resume offset");
                self.resume_offset = Some(md.len());
            }
        }
    }
}

fn ingest_options(cfg: &PipelineConfig, start_offset: Option<u64>) -> IngestOptions {
    IngestOptions {
        kind: cfg.source,
        path: cfg.path.clone(),
        follow: cfg.follow,
        max_line_bytes: cfg.max_line_bytes,
        block_size_bytes: cfg.block_size_bytes(),
        start_offset,
        tail_poll_interval: std::time::Duration::from_millis(cfg.tail_poll_ms),
    }
}

fn forced_schema(forced: ForceFormat) -> Schema {
    match forced {
        ForceFormat::Json => json_schema(),
        ForceFormat::Logfmt => logfmt_schema(),
        ForceFormat::Apache => apache_schema(),
        ForceFormat::Syslog => syslog_schema(),
    }
}

/// Update a schema's field list from what actually parsed, but only when
/// parsing produced something beyond the catch-all message field. A replay
/// where every line fell through to `msg` keeps the schema's own fields.
fn discover_fields(schema: &mut Schema, entries: &[LogEntry]) {
    let mut names: Vec<String> = Vec::new();
    let mut best_row: Option<&LogEntry> = None;
    for e in entries {
        let mut informative = false;
        for (k, _) in e.fields.iter() {
            if k != "msg" && k != "message" {
                informative = true;
            }
            if !names.iter().any(|n| n == k) {
                names.push(k.clone());
            }
        }
        if informative && best_row.is_none() {
            best_row = Some(e);
        }
    }
    let informative = names.iter().any(|n| n != "msg" && n != "message");
    if !informative {
        return;
    }

    let sample = best_row.or_else(|| entries.first());
    schema.fields = names
        .iter()
        .map(|name| {
            let field_type = sample
                .and_then(|e| e.fields.get(name))
                .map(value_type_name)
                .unwrap_or("string");
            FieldDef::new(name, field_type, "", name)
        })
        .collect();
    if let Some(row) = sample {
        schema.sample_parsed_row = row.fields.clone();
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Number(_) => "number",
        Value::Bool(_) => "bool",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null | Value::String(_) => "string",
    }
}
