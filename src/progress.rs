//! Thread-safe byte accounting shared by all workers.
//!
//! One tracker instance is owned by the session and handed to every
//! worker by reference; a single lock guards all counters.
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Immutable view of the session's progress at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes confirmed downloaded so far.
    pub bytes_done: u64,
    /// Total bytes expected, when known.
    pub total_bytes: Option<u64>,
    /// Time since the tracker was created.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0, 1]`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.total_bytes.filter(|t| *t > 0).map(|total| {
            (self.bytes_done as f64 / total as f64).min(1.0)
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkProgress {
    /// High-water mark across all attempts; what counts toward the total.
    committed: u64,
    /// Position within the current attempt.
    cursor: u64,
}

#[derive(Debug, Default)]
struct Inner {
    total: Option<u64>,
    done: u64,
    chunks: Vec<ChunkProgress>,
}

/// Byte counter with per-chunk attempt cursors.
///
/// `advance` calls from concurrent workers never lose updates, and a
/// retried chunk never double-counts: only bytes past the chunk's
/// previous high-water mark move the total, so snapshots are
/// monotonically non-decreasing even across retries.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    inner: Mutex<Inner>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Arms the tracker for a session of `chunk_count` chunks.
    pub fn begin(&self, total: Option<u64>, chunk_count: usize) {
        let mut inner = self.lock();
        inner.total = total;
        inner.done = 0;
        inner.chunks = vec![ChunkProgress::default(); chunk_count.max(1)];
    }

    /// Records `delta` freshly received bytes for a chunk.
    pub fn advance(&self, chunk: usize, delta: u64) {
        let mut inner = self.lock();
        if chunk >= inner.chunks.len() {
            inner.chunks.resize(chunk + 1, ChunkProgress::default());
        }
        let slot = &mut inner.chunks[chunk];
        slot.cursor += delta;
        let gain = slot.cursor.saturating_sub(slot.committed);
        slot.committed = slot.committed.max(slot.cursor);
        inner.done += gain;
    }

    /// Rewinds a chunk's attempt cursor before a retry.
    ///
    /// The committed high-water mark stays, so the re-fetched prefix of
    /// the chunk does not count twice.
    pub fn restart_attempt(&self, chunk: usize) {
        let mut inner = self.lock();
        if let Some(slot) = inner.chunks.get_mut(chunk) {
            slot.cursor = 0;
        }
    }

    /// Current progress; safe to call concurrently with any `advance`.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.lock();
        let bytes_done = match inner.total {
            Some(total) => inner.done.min(total),
            None => inner.done,
        };
        ProgressSnapshot {
            bytes_done,
            total_bytes: inner.total,
            elapsed: self.started.elapsed(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_advances_lose_nothing() {
        let tracker = Arc::new(ProgressTracker::new());
        let total: u64 = 8 * 1000 * 128;
        tracker.begin(Some(total), 8);

        let handles: Vec<_> = (0..8)
            .map(|chunk| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.advance(chunk, 128);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot().bytes_done, total);
    }

    #[test]
    fn retries_do_not_double_count() {
        let tracker = ProgressTracker::new();
        tracker.begin(Some(200), 2);

        // First attempt gets halfway, then fails.
        tracker.advance(0, 50);
        assert_eq!(tracker.snapshot().bytes_done, 50);

        // Retry re-downloads the same prefix.
        tracker.restart_attempt(0);
        tracker.advance(0, 30);
        assert_eq!(tracker.snapshot().bytes_done, 50);
        tracker.advance(0, 20);
        assert_eq!(tracker.snapshot().bytes_done, 50);

        // Only bytes past the old high-water mark count.
        tracker.advance(0, 50);
        assert_eq!(tracker.snapshot().bytes_done, 100);

        tracker.advance(1, 100);
        assert_eq!(tracker.snapshot().bytes_done, 200);
    }

    #[test]
    fn snapshots_are_monotone() {
        let tracker = ProgressTracker::new();
        tracker.begin(Some(1000), 4);

        let mut last = 0;
        for step in 0..40 {
            let chunk = step % 4;
            tracker.advance(chunk, 25);
            if step == 20 {
                tracker.restart_attempt(2);
            }
            let now = tracker.snapshot().bytes_done;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn snapshot_never_exceeds_total() {
        let tracker = ProgressTracker::new();
        tracker.begin(Some(100), 1);
        tracker.advance(0, 100);
        tracker.advance(0, 100);
        assert_eq!(tracker.snapshot().bytes_done, 100);
    }

    #[test]
    fn unknown_total_has_no_fraction() {
        let tracker = ProgressTracker::new();
        tracker.begin(None, 1);
        tracker.advance(0, 10);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.bytes_done, 10);
        assert_eq!(snapshot.fraction(), None);
    }
}
