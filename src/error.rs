//! Error taxonomy for the download engine.
//!
//! [`ClientError`] covers a single HTTP interaction and knows whether it
//! is worth retrying; [`DownloadError`] is the terminal failure of a
//! whole session.
use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of one HTTP request or one chunk attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a status the operation cannot accept,
    /// e.g. anything but 206 for a ranged fetch.
    #[error("server answered {0} where it was not acceptable")]
    UnexpectedStatus(StatusCode),

    /// The body ended with a different byte count than the range asked for.
    #[error("server sent {got} bytes for a {want}-byte range")]
    SizeMismatch { want: u64, got: u64 },

    #[error("chunk I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

impl ClientError {
    /// Transient failures that the retry loop is allowed to absorb.
    ///
    /// Timeouts, connection problems and 5xx answers are transient;
    /// 4xx answers, a 200 where 206 was required, and local I/O errors
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.is_body()
                    || err.status().is_some_and(|s| s.is_server_error())
            }
            ClientError::UnexpectedStatus(status) => status.is_server_error(),
            ClientError::SizeMismatch { .. } => true,
            ClientError::Io(_) => false,
            ClientError::Cancelled => false,
        }
    }
}

/// Terminal result of a download session.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("could not initialize HTTP client: {0}")]
    Setup(#[source] ClientError),

    #[error("probe of {url} failed: {source}")]
    ProbeFailed {
        url: String,
        #[source]
        source: ClientError,
    },

    /// A chunk hit a non-retryable failure.
    #[error("chunk {index} failed permanently: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: ClientError,
    },

    /// A chunk kept failing past the configured attempt limit.
    #[error("chunk {index} gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("failed to assemble {path}: {source}")]
    Merge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot prepare output path {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
