use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use super::LogEntry;

struct RingInner {
    buf: VecDeque<LogEntry>,
    capacity: usize,
    total: u64,
    dropped: u64,
}

/// Fixed-capacity FIFO store of parsed entries with oldest-overwrite
/// eviction. One writer, many concurrent readers; every operation holds the
/// lock only for a single push or a single full copy.
#[derive(Clone)]
pub struct Ring {
    inner: Arc<RwLock<RingInner>>,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RingInner {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                total: 0,
                dropped: 0,
            })),
        }
    }

    /// O(1). At capacity, the oldest entry is overwritten and counted as
    /// dropped; the ingested counter always advances.
    pub fn push(&self, entry: LogEntry) {
        let mut inner = self.inner.write();
        if inner.buf.len() >= inner.capacity {
            inner.buf.pop_front();
            inner.dropped += 1;
        }
        inner.buf.push_back(entry);
        inner.total += 1;
    }

    /// Point-in-time copy in ingestion order (oldest first), plus the
    /// total-ingested and total-dropped counters.
    pub fn snapshot(&self) -> (Vec<LogEntry>, u64, u64) {
        let inner = self.inner.read();
        (
            inner.buf.iter().cloned().collect(),
            inner.total,
            inner.dropped,
        )
    }

    /// Change capacity, keeping the newest `min(len, new_capacity)` entries.
    /// Counters are not reset.
    pub fn resize(&self, new_capacity: usize) {
        let mut inner = self.inner.write();
        while inner.buf.len() > new_capacity {
            inner.buf.pop_front();
        }
        inner.capacity = new_capacity;
    }

    /// Replace the visible entries wholesale (schema re-parse), keeping the
    /// ingest/drop counters: the same lines are still the ones that were
    /// ingested, they just carry new fields.
    pub fn replace_all(&self, entries: Vec<LogEntry>) {
        let mut inner = self.inner.write();
        let capacity = inner.capacity;
        inner.buf.clear();
        for e in entries.into_iter() {
            if inner.buf.len() >= capacity {
                inner.buf.pop_front();
            }
            inner.buf.push_back(e);
        }
    }

    /// Drop the visible entries without resetting counters.
    pub fn clear_visible(&self) {
        self.inner.write().buf.clear();
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().buf.is_empty()
    }
}
