//! # paraget
//!
//! `paraget` downloads a single large remote file faster than one HTTP
//! stream allows: it probes the server for byte-range support, splits
//! the file into chunks fetched over concurrent connections, and
//! merges them deterministically into one output file. It supports:
//! - Bounded per-chunk retry with idempotent re-fetches
//! - Safe fallback to a single stream when ranges are unavailable
//! - Live, race-free progress snapshots
//! - SHA-256 integrity verification
//!
//! The binary drives [`manager::DownloadManager`]; the internal
//! components are exposed for custom embedding.

pub mod args;
pub mod chunk;
pub mod client;
pub mod error;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod util;
pub mod worker;

pub use chunk::{decide_mode, plan_chunks, Chunk, ChunkStatus, DownloadMode};
pub use client::{ProbeResult, RangeClient};
pub use error::{ClientError, DownloadError};
pub use manager::{DownloadConfig, DownloadManager, DownloadReport, SessionState};
pub use progress::{ProgressSnapshot, ProgressTracker};
