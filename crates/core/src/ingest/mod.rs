//! Source readers: stdin, static file, followed file and the demo
//! generator. Each variant emits lines on a bounded channel and errors on a
//! second channel, and stops promptly when the cancellation token fires.

mod tail;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::RawLine;

/// Burst absorption between the reader task and the drain loop.
pub const LINE_CHANNEL_CAPACITY: usize = 1024;
pub const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Interval between demo lines.
const DEMO_TICK: Duration = Duration::from_millis(500);

/// Canned multi-format sample lines for running without any real input.
const DEMO_SAMPLES: [&str; 4] = [
    r#"{"ts":"2025-01-01T12:00:00Z","level":"info","service":"api","msg":"server started","port":8080}"#,
    r#"time=2025-01-01T12:00:01Z level=warn user_id=42 msg="slow request" path=/v1/items lat_ms=512"#,
    r#"127.0.0.1 - - [01/Jan/2025:12:00:02 +0000] "GET /index.html HTTP/1.1" 200 1234 "-" "curl/8.0""#,
    r#"<34>1 2025-01-01T12:00:03Z myhost app - - - User login ok"#,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Stdin,
    File,
    Demo,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub kind: SourceKind,
    pub path: Option<PathBuf>,
    pub follow: bool,
    /// Per-line byte cap; longer lines become `LineTooLong` errors.
    pub max_line_bytes: usize,
    /// Non-follow file reads: read only the trailing block of this many
    /// bytes (0 = whole file). The first, possibly partial, line after the
    /// seek is dropped.
    pub block_size_bytes: u64,
    /// Resume offset for file reads (both one-shot and follow).
    pub start_offset: Option<u64>,
    pub tail_poll_interval: Duration,
}

impl IngestOptions {
    pub fn demo() -> Self {
        Self {
            kind: SourceKind::Demo,
            path: None,
            follow: false,
            max_line_bytes: crate::config::DEFAULT_MAX_LINE_BYTES,
            block_size_bytes: 0,
            start_offset: None,
            tail_poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("line too long: {len} bytes (max {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("tail target missing: {0}")]
    TailTargetMissing(PathBuf),

    #[error("file source requires a path")]
    MissingPath,
}

/// Launch the reader task for the selected source. Both channels close when
/// the source ends, fails to open, or the token is cancelled.
pub fn spawn(
    opts: IngestOptions,
    cancel: CancellationToken,
) -> (mpsc::Receiver<RawLine>, mpsc::Receiver<IngestError>) {
    let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        match opts.kind {
            SourceKind::Stdin => {
                let reader = BufReader::new(tokio::io::stdin());
                read_lines(reader, "stdin", opts.max_line_bytes, &line_tx, &err_tx, &cancel).await;
            }
            SourceKind::File => match opts.path.clone() {
                Some(path) => {
                    if opts.follow {
                        tail::tail_file(path, &opts, &line_tx, &err_tx, &cancel).await;
                    } else {
                        read_file(path, &opts, &line_tx, &err_tx, &cancel).await;
                    }
                }
                None => {
                    let _ = err_tx.send(IngestError::MissingPath).await;
                }
            },
            SourceKind::Demo => demo(&line_tx, &cancel).await,
        }
        debug!("source reader finished");
    });

    (line_rx, err_rx)
}

/// One step of the line scanner.
pub(super) enum Scan {
    Line(String),
    /// Line exceeded the cap and was discarded as it streamed; carries the
    /// payload length seen.
    TooLong(usize),
    /// No terminator yet and no more bytes right now (follow mode waits).
    Pending,
    Eof,
}

/// Byte-oriented line scanner with a hard per-line cap. Bytes past the cap
/// are discarded as they stream, so an unterminated line cannot grow the
/// buffer without bound; invalid UTF-8 is replaced per line, never fatal.
pub(super) struct LineScanner<R> {
    reader: R,
    buf: Vec<u8>,
    /// Payload bytes seen for the current line, including discarded ones.
    len: usize,
    max: usize,
    /// One-shot reads emit an unterminated final line at EOF; follow mode
    /// reports `Pending` and keeps it buffered instead.
    eof_flushes: bool,
    consumed: u64,
}

impl<R: AsyncBufRead + Unpin> LineScanner<R> {
    pub(super) fn new(reader: R, max: usize, eof_flushes: bool) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            len: 0,
            max,
            eof_flushes,
            consumed: 0,
        }
    }

    /// Total bytes consumed from the underlying reader.
    pub(super) fn consumed(&self) -> u64 {
        self.consumed
    }

    pub(super) async fn next_line(&mut self) -> std::io::Result<Scan> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.len == 0 {
                    return Ok(Scan::Eof);
                }
                if !self.eof_flushes {
                    return Ok(Scan::Pending);
                }
                return Ok(self.finish_line());
            }
            if let Some(i) = available.iter().position(|&b| b == b'\n') {
                self.len += i;
                if self.len <= self.max {
                    self.buf.extend_from_slice(&available[..i]);
                }
                self.reader.consume(i + 1);
                self.consumed += i as u64 + 1;
                return Ok(self.finish_line());
            }
            let n = available.len();
            self.len += n;
            if self.len <= self.max {
                self.buf.extend_from_slice(available);
            } else {
                self.buf.clear();
            }
            self.reader.consume(n);
            self.consumed += n as u64;
        }
    }

    fn finish_line(&mut self) -> Scan {
        let item = if self.len > self.max {
            Scan::TooLong(self.len)
        } else {
            let text = String::from_utf8_lossy(&self.buf);
            Scan::Line(text.trim_end_matches('\r').to_string())
        };
        self.buf.clear();
        self.len = 0;
        item
    }
}

/// Scan lines from any buffered reader until EOF or cancellation.
/// Oversized lines are reported and skipped; scanning continues.
async fn read_lines<R>(
    reader: R,
    source: &str,
    max_line_bytes: usize,
    out: &mpsc::Sender<RawLine>,
    errs: &mpsc::Sender<IngestError>,
    cancel: &CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut scanner = LineScanner::new(reader, max_line_bytes, true);
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            res = scanner.next_line() => match res {
                Ok(item) => item,
                Err(e) => {
                    let _ = errs.send(IngestError::Read(e)).await;
                    return;
                }
            },
        };
        match item {
            Scan::Eof | Scan::Pending => return,
            Scan::TooLong(len) => {
                let _ = errs
                    .send(IngestError::LineTooLong {
                        len,
                        max: max_line_bytes,
                    })
                    .await;
            }
            Scan::Line(text) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = out.send(RawLine::now(text, source)) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Skip bytes up to and including the next line terminator (or EOF).
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(());
            }
            None => {
                let n = available.len();
                reader.consume(n);
            }
        }
    }
}

/// One-shot file read, optionally bounded to the trailing block and
/// optionally resumed from a prior offset.
async fn read_file(
    path: PathBuf,
    opts: &IngestOptions,
    out: &mpsc::Sender<RawLine>,
    errs: &mpsc::Sender<IngestError>,
    cancel: &CancellationToken,
) {
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(source) => {
            let _ = errs.send(IngestError::Open { path, source }).await;
            return;
        }
    };
    let mut reader = BufReader::new(file);

    let mut dropped_partial = false;
    let start = match opts.start_offset {
        Some(off) => Some(off),
        None if opts.block_size_bytes > 0 => {
            match reader.get_ref().metadata().await {
                Ok(md) if md.len() > opts.block_size_bytes => {
                    dropped_partial = true;
                    Some(md.len() - opts.block_size_bytes)
                }
                _ => None,
            }
        }
        None => None,
    };
    if let Some(off) = start {
        if let Err(e) = reader.seek(std::io::SeekFrom::Start(off)).await {
            let _ = errs.send(IngestError::Read(e)).await;
            return;
        }
        if dropped_partial {
            // The seek likely landed mid-line; discard up to the next break.
            if let Err(e) = discard_line(&mut reader).await {
                let _ = errs.send(IngestError::Read(e)).await;
                return;
            }
        }
    }

    let source = path.to_string_lossy().into_owned();
    read_lines(reader, &source, opts.max_line_bytes, out, errs, cancel).await;
}

/// Cycle the canned sample lines on a fixed interval.
async fn demo(out: &mpsc::Sender<RawLine>, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(DEMO_TICK);
    let mut i = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let text = DEMO_SAMPLES[i % DEMO_SAMPLES.len()];
                i += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = out.send(RawLine::now(text, "demo")) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_opts(path: PathBuf) -> IngestOptions {
        IngestOptions {
            kind: SourceKind::File,
            path: Some(path),
            follow: false,
            max_line_bytes: crate::config::DEFAULT_MAX_LINE_BYTES,
            block_size_bytes: 0,
            start_offset: None,
            tail_poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_read_static_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let cancel = CancellationToken::new();
        let (mut lines, _errs) = spawn(file_opts(path), cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_open_failure_reports_and_closes() {
        let cancel = CancellationToken::new();
        let (mut lines, mut errs) =
            spawn(file_opts(PathBuf::from("/nonexistent/nowhere.log")), cancel);

        assert!(lines.recv().await.is_none());
        let err = errs.recv().await.expect("expected open error");
        assert!(matches!(err, IngestError::Open { .. }));
    }

    #[tokio::test]
    async fn test_oversized_line_skipped_scan_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "short one").unwrap();
        writeln!(f, "{}", "x".repeat(4096)).unwrap();
        writeln!(f, "short two").unwrap();

        let mut opts = file_opts(path);
        opts.max_line_bytes = 64;
        let cancel = CancellationToken::new();
        let (mut lines, mut errs) = spawn(opts, cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got, vec!["short one", "short two"]);
        assert!(matches!(
            errs.recv().await,
            Some(IngestError::LineTooLong { len: 4096, max: 64 })
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.log");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"good line one\n");
        // Latin-1 bytes, not valid UTF-8.
        bytes.extend_from_slice(&[0xE9, b' ', b'b', b'a', b'd', b'\n']);
        bytes.extend_from_slice(b"good line two\n");
        std::fs::write(&path, bytes).unwrap();

        let cancel = CancellationToken::new();
        let (mut lines, _errs) = spawn(file_opts(path), cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], "good line one");
        assert!(got[1].contains('\u{FFFD}'));
        assert_eq!(got[2], "good line two");
    }

    #[tokio::test]
    async fn test_line_of_exactly_max_bytes_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.log");
        std::fs::write(&path, "exactly8\nnine long\n").unwrap();

        let mut opts = file_opts(path);
        opts.max_line_bytes = 8;
        let cancel = CancellationToken::new();
        let (mut lines, mut errs) = spawn(opts, cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        // The terminator does not count against the cap.
        assert_eq!(got, vec!["exactly8"]);
        assert!(matches!(
            errs.recv().await,
            Some(IngestError::LineTooLong { len: 9, .. })
        ));
    }

    #[tokio::test]
    async fn test_unterminated_oversized_line_reported_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runaway.log");
        let mut bytes = Vec::from(&b"ok\n"[..]);
        bytes.extend(std::iter::repeat(b'y').take(300));
        std::fs::write(&path, bytes).unwrap();

        let mut opts = file_opts(path);
        opts.max_line_bytes = 64;
        let cancel = CancellationToken::new();
        let (mut lines, mut errs) = spawn(opts, cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got, vec!["ok"]);
        assert!(matches!(
            errs.recv().await,
            Some(IngestError::LineTooLong { len: 300, .. })
        ));
    }

    #[tokio::test]
    async fn test_block_read_drops_partial_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tailblock.log");
        std::fs::write(&path, "aaaa\nbbbb\ncccc\ndddd\n").unwrap();

        let mut opts = file_opts(path);
        // Lands inside "cccc"; that partial line must be discarded.
        opts.block_size_bytes = 7;
        let cancel = CancellationToken::new();
        let (mut lines, _errs) = spawn(opts, cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got, vec!["dddd"]);
    }

    #[tokio::test]
    async fn test_start_offset_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.log");
        std::fs::write(&path, "old\nnew\n").unwrap();

        let mut opts = file_opts(path);
        opts.start_offset = Some(4); // after "old\n"
        let cancel = CancellationToken::new();
        let (mut lines, _errs) = spawn(opts, cancel);

        let mut got = Vec::new();
        while let Some(l) = lines.recv().await {
            got.push(l.text);
        }
        assert_eq!(got, vec!["new"]);
    }

    #[tokio::test]
    async fn test_demo_emits_and_cancels() {
        let cancel = CancellationToken::new();
        let (mut lines, _errs) = spawn(IngestOptions::demo(), cancel.clone());

        let first = lines.recv().await.expect("demo line");
        assert_eq!(first.source, "demo");
        assert!(first.text.starts_with('{'));

        cancel.cancel();
        // Stream must close promptly after cancellation.
        while lines.recv().await.is_some() {}
    }
}
