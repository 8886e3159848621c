//! Follow-mode tailer: polls a file for appended content, tolerates
//! truncation and rotation by reopening, and resumes from end-of-file or a
//! caller-supplied offset.

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::RawLine;

use super::{IngestError, IngestOptions, LineScanner, Scan};

pub(super) async fn tail_file(
    path: PathBuf,
    opts: &IngestOptions,
    out: &mpsc::Sender<RawLine>,
    errs: &mpsc::Sender<IngestError>,
    cancel: &CancellationToken,
) {
    // The tail target must exist up front; everything after that is
    // recoverable (rotation, temporary removal).
    let file = match File::open(&path).await {
        Ok(f) => f,
        Err(source) => {
            let _ = errs.send(IngestError::Open { path, source }).await;
            return;
        }
    };

    // Offset the scanner starts from; a write may land mid-line between
    // polls, so partial lines stay buffered in the scanner until their
    // terminator shows up.
    let mut base = match opts.start_offset {
        Some(off) => off,
        None => file.metadata().await.map(|md| md.len()).unwrap_or(0),
    };
    let mut reader = BufReader::new(file);
    if base > 0 {
        if let Err(e) = reader.seek(std::io::SeekFrom::Start(base)).await {
            let _ = errs.send(IngestError::Read(e)).await;
            return;
        }
    }

    let source = path.to_string_lossy().into_owned();
    let mut scanner = LineScanner::new(reader, opts.max_line_bytes, false);
    let mut missing_reported = false;

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
            Scan::Line(text) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = out.send(RawLine::now(text, &source)) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }
            Scan::TooLong(len) => {
                let _ = errs
                    .send(IngestError::LineTooLong {
                        len,
                        max: opts.max_line_bytes,
                    })
                    .await;
                continue;
            }
            Scan::Eof | Scan::Pending => {}
        }

        // EOF: wait a poll interval, then check for growth or rotation.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(opts.tail_poll_interval) => {}
        }

        let pos = base + scanner.consumed();
        match tokio::fs::metadata(&path).await {
            Ok(md) => {
                missing_reported = false;
                if md.len() < pos {
                    info!(path = %source, "tail target truncated or rotated; reopening");
                    match File::open(&path).await {
                        Ok(f) => {
                            scanner =
                                LineScanner::new(BufReader::new(f), opts.max_line_bytes, false);
                            base = 0;
                        }
                        Err(e) => debug!(path = %source, error = %e, "reopen failed; will retry"),
                    }
                }
            }
            Err(_) => {
                if !missing_reported {
                    let _ = errs
                        .send(IngestError::TailTargetMissing(path.clone()))
                        .await;
                    missing_reported = true;
                }
                // Rotation in progress: keep trying to reopen.
                if let Ok(f) = File::open(&path).await {
                    scanner = LineScanner::new(BufReader::new(f), opts.max_line_bytes, false);
                    base = 0;
                    missing_reported = false;
                }
            }
        }
    }
}
