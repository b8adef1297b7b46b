//! Chunk descriptors, the range planner, and the pure state
//! transitions the manager applies to worker outcomes.
use crate::client::ProbeResult;
use crate::error::ClientError;

/// Lifecycle of a single chunk.
///
/// `Pending → InProgress → Done`, or `InProgress → Failed → Pending`
/// when a retry is granted, or `Failed → Aborted` once attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Aborted,
}

/// One byte range of the target file.
///
/// The range is inclusive: `start` and `end` are both part of the chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk; defines merge order.
    pub index: usize,
    /// First byte of the range (0-based).
    pub start: u64,
    /// Last byte of the range.
    pub end: u64,
    /// Bytes confirmed received for the chunk.
    pub received: u64,
    pub status: ChunkStatus,
    /// Fetch attempts so far; never decreases.
    pub attempts: u32,
}

impl Chunk {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            received: 0,
            status: ChunkStatus::Pending,
            attempts: 0,
        }
    }

    /// Size of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Divides `total_size` into at most `connections` contiguous ranges.
///
/// The ranges partition `[0, total_size)` exactly, and sizes differ by
/// at most one byte: the division remainder is spread one byte each
/// over the leading chunks. Files smaller than the connection count get
/// one single-byte chunk per byte.
pub fn plan_chunks(total_size: u64, connections: u32) -> Vec<Chunk> {
    if total_size == 0 {
        return Vec::new();
    }

    let parts = u64::from(connections.max(1)).min(total_size);
    let base = total_size / parts;
    let remainder = total_size % parts;

    let mut chunks = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let size = base + u64::from(i < remainder);
        let end = start + size - 1;
        chunks.push(Chunk::new(i as usize, start, end));
        start = end + 1;
    }

    chunks
}

/// How a session downloads after probing the server.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadMode {
    /// Ranged fetches over concurrent connections.
    Parallel(Vec<Chunk>),
    /// One plain GET streamed sequentially.
    SingleStream,
}

/// Picks the download mode from the probe result.
///
/// Parallel mode requires the server to have explicitly confirmed range
/// support and a known, non-zero size; anything less falls back to a
/// single stream.
pub fn decide_mode(probe: &ProbeResult, connections: u32) -> DownloadMode {
    match probe.total_size {
        Some(total) if probe.supports_ranges && total > 0 => {
            DownloadMode::Parallel(plan_chunks(total, connections))
        }
        _ => DownloadMode::SingleStream,
    }
}

/// Result of one fetch attempt, reported by a worker.
#[derive(Debug)]
pub enum ChunkOutcome {
    Success { bytes: u64 },
    Failed(ClientError),
}

/// What the manager must do with a chunk after an outcome is applied.
#[derive(Debug)]
pub enum ChunkAction {
    Completed,
    Resubmit,
    Abort(ClientError),
}

/// Applies a worker outcome to a chunk.
///
/// Pure with respect to everything but the chunk itself, so the retry
/// policy can be tested without a pool or a network. A retryable
/// failure is granted another attempt while `attempts < retry_limit`;
/// otherwise the chunk aborts and the caller fails the session.
pub fn apply_outcome(chunk: &mut Chunk, outcome: ChunkOutcome, retry_limit: u32) -> ChunkAction {
    match outcome {
        ChunkOutcome::Success { bytes } => {
            chunk.received = bytes;
            chunk.status = ChunkStatus::Done;
            ChunkAction::Completed
        }
        ChunkOutcome::Failed(err) => {
            chunk.received = 0;
            chunk.status = ChunkStatus::Failed;
            if err.is_retryable() && chunk.attempts < retry_limit {
                chunk.status = ChunkStatus::Pending;
                ChunkAction::Resubmit
            } else {
                chunk.status = ChunkStatus::Aborted;
                ChunkAction::Abort(err)
            }
        }
    }
}
