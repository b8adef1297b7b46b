//! Session orchestration: probe, plan, dispatch, retry, merge.
use crate::chunk::{
    apply_outcome, decide_mode, Chunk, ChunkAction, ChunkOutcome, ChunkStatus, DownloadMode,
};
use crate::client::RangeClient;
use crate::error::{ClientError, DownloadError};
use crate::pool::{WorkItem, WorkerPool};
use crate::progress::ProgressTracker;
use crate::worker::{fetch_chunk, part_path};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a session needs to know before it starts.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub url: String,
    pub output: PathBuf,
    /// Parallel connections; also the worker count.
    pub connections: u32,
    /// Fetch attempts allowed per chunk.
    pub retry_limit: u32,
    /// How long a connect or a single body read may stall.
    pub timeout: Duration,
}

impl DownloadConfig {
    pub fn new(url: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            connections: 4,
            retry_limit: 3,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn connections(mut self, connections: u32) -> Self {
        self.connections = connections;
        self
    }

    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Probing,
    Planning,
    Dispatching,
    Merging,
    Fallback,
    Completed,
    Failed,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy)]
pub struct DownloadReport {
    pub bytes_written: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Context cloned into every worker task.
struct WorkerContext {
    client: RangeClient,
    url: String,
    output: PathBuf,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

/// Owns one download session from probe to finished file.
///
/// The manager is the sole producer for the worker pool and the only
/// mutator of chunk bookkeeping; workers report back over a results
/// channel and never wait on one another.
pub struct DownloadManager {
    config: DownloadConfig,
    client: RangeClient,
    progress: Arc<ProgressTracker>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        if config.connections == 0 {
            return Err(DownloadError::InvalidConfig(
                "connections must be at least 1".into(),
            ));
        }
        if config.retry_limit == 0 {
            return Err(DownloadError::InvalidConfig(
                "retry limit must be at least 1".into(),
            ));
        }
        let client = RangeClient::new(config.timeout).map_err(DownloadError::Setup)?;
        Ok(Self {
            config,
            client,
            progress: Arc::new(ProgressTracker::new()),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Init),
        })
    }

    /// The session's progress counter, for live reporting.
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Token that aborts the session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = ?*state, to = ?next, "session state");
        *state = next;
    }

    /// Runs the whole session and returns once the output file is
    /// complete on disk or the session has failed.
    pub async fn run(&self) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let result = self.execute().await;
        match &result {
            Ok(_) => self.set_state(SessionState::Completed),
            Err(err) => {
                warn!(%err, "session failed");
                self.set_state(SessionState::Failed);
            }
        }
        result.map(|(bytes_written, chunks)| DownloadReport {
            bytes_written,
            chunks,
            elapsed: started.elapsed(),
        })
    }

    async fn execute(&self) -> Result<(u64, usize), DownloadError> {
        self.set_state(SessionState::Probing);
        let probe = self
            .client
            .probe(&self.config.url)
            .await
            .map_err(|source| DownloadError::ProbeFailed {
                url: self.config.url.clone(),
                source,
            })?;
        info!(
            total_size = ?probe.total_size,
            supports_ranges = probe.supports_ranges,
            "probe complete"
        );

        if let Some(parent) = self.config.output.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|source| {
                    DownloadError::Output {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        self.set_state(SessionState::Planning);
        match decide_mode(&probe, self.config.connections) {
            DownloadMode::Parallel(plan) => self.download_parallel(plan).await,
            DownloadMode::SingleStream => {
                info!("server did not confirm ranges, using a single stream");
                self.set_state(SessionState::Fallback);
                self.download_single(probe.total_size).await
            }
        }
    }

    async fn download_parallel(&self, mut chunks: Vec<Chunk>) -> Result<(u64, usize), DownloadError> {
        let total: u64 = chunks.iter().map(Chunk::len).sum();
        self.progress.begin(Some(total), chunks.len());
        info!(
            bytes = total,
            chunks = chunks.len(),
            connections = self.config.connections,
            "dispatching chunks"
        );

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<(usize, ChunkOutcome)>();
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            url: self.config.url.clone(),
            output: self.config.output.clone(),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        });

        let handler = move |item: WorkItem| {
            let ctx = Arc::clone(&ctx);
            let outcome_tx = outcome_tx.clone();
            async move {
                let outcome = fetch_chunk(
                    &ctx.client,
                    &ctx.url,
                    item,
                    &ctx.output,
                    &ctx.progress,
                    &ctx.cancel,
                )
                .await;
                // The manager may already have torn the session down.
                let _ = outcome_tx.send((item.index, outcome));
            }
        };

        let workers = (self.config.connections as usize).min(chunks.len()).max(1);
        // Capacity covers the whole plan, so the initial submission and
        // any resubmission never deadlocks against outcome handling.
        let mut pool = WorkerPool::new(workers, chunks.len(), handler);

        self.set_state(SessionState::Dispatching);
        for chunk in chunks.iter_mut() {
            chunk.status = ChunkStatus::InProgress;
            chunk.attempts += 1;
            if pool.submit(WorkItem::from(&*chunk)).await.is_err() {
                break;
            }
        }

        let mut completed = 0usize;
        let mut failure: Option<DownloadError> = None;

        while completed < chunks.len() {
            let Some((index, outcome)) = outcome_rx.recv().await else {
                break;
            };
            let chunk = &mut chunks[index];
            match apply_outcome(chunk, outcome, self.config.retry_limit) {
                ChunkAction::Completed => {
                    completed += 1;
                    debug!(chunk = index, done = completed, "chunk complete");
                }
                ChunkAction::Resubmit => {
                    warn!(
                        chunk = index,
                        attempt = chunk.attempts,
                        "transient chunk failure, requeueing"
                    );
                    chunk.status = ChunkStatus::InProgress;
                    chunk.attempts += 1;
                    let item = WorkItem::from(&*chunk);
                    if pool.submit(item).await.is_err() {
                        break;
                    }
                }
                ChunkAction::Abort(err) => {
                    failure = Some(match err {
                        ClientError::Cancelled => DownloadError::Cancelled,
                        err if err.is_retryable() => DownloadError::RetryExhausted {
                            index,
                            attempts: chunk.attempts,
                            source: err,
                        },
                        err => DownloadError::ChunkFailed { index, source: err },
                    });
                    self.cancel.cancel();
                    break;
                }
            }
        }

        pool.wait().await;

        if let Some(err) = failure {
            self.cleanup_parts(chunks.len()).await;
            return Err(err);
        }
        if completed < chunks.len() {
            self.cleanup_parts(chunks.len()).await;
            return Err(DownloadError::Cancelled);
        }

        self.set_state(SessionState::Merging);
        let bytes_written = self.merge(&chunks).await?;
        Ok((bytes_written, chunks.len()))
    }

    /// Stitches the part files into the output, in index order.
    async fn merge(&self, chunks: &[Chunk]) -> Result<u64, DownloadError> {
        match self.write_merged(chunks).await {
            Ok(written) => {
                self.cleanup_parts(chunks.len()).await;
                info!(bytes = written, path = %self.config.output.display(), "merge complete");
                Ok(written)
            }
            Err(source) => {
                // Never leave a half-assembled file looking complete.
                let _ = tokio::fs::remove_file(&self.config.output).await;
                self.cleanup_parts(chunks.len()).await;
                Err(DownloadError::Merge {
                    path: self.config.output.clone(),
                    source,
                })
            }
        }
    }

    async fn write_merged(&self, chunks: &[Chunk]) -> Result<u64, std::io::Error> {
        let file = tokio::fs::File::create(&self.config.output).await?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        for chunk in chunks {
            let part = part_path(&self.config.output, chunk.index);
            let mut reader = tokio::fs::File::open(&part).await?;
            written += tokio::io::copy(&mut reader, &mut writer).await?;
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    async fn cleanup_parts(&self, count: usize) {
        for index in 0..count {
            let part = part_path(&self.config.output, index);
            if let Err(err) = tokio::fs::remove_file(&part).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(part = %part.display(), %err, "could not remove part file");
                }
            }
        }
    }

    /// Single-stream fallback: one plain GET written sequentially,
    /// reported as one chunk, with the same bounded retry policy.
    async fn download_single(&self, total_size: Option<u64>) -> Result<(u64, usize), DownloadError> {
        self.progress.begin(total_size, 1);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.stream_full().await {
                Ok(bytes) => {
                    info!(bytes, "single-stream download complete");
                    return Ok((bytes, 1));
                }
                Err(ClientError::Cancelled) => {
                    self.discard_output().await;
                    return Err(DownloadError::Cancelled);
                }
                Err(err) if err.is_retryable() && attempts < self.config.retry_limit => {
                    warn!(attempt = attempts, %err, "stream attempt failed, retrying");
                    self.progress.restart_attempt(0);
                }
                Err(err) if err.is_retryable() => {
                    self.discard_output().await;
                    return Err(DownloadError::RetryExhausted {
                        index: 0,
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    self.discard_output().await;
                    return Err(DownloadError::ChunkFailed {
                        index: 0,
                        source: err,
                    });
                }
            }
        }
    }

    async fn stream_full(&self) -> Result<u64, ClientError> {
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
            stream = self.client.fetch_full(&self.config.url) => stream?,
        };

        let file = tokio::fs::File::create(&self.config.output).await?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                next = stream.next_chunk() => next?,
            };
            let Some(bytes) = next else { break };

            written += bytes.len() as u64;
            writer.write_all(&bytes).await?;
            self.progress.advance(0, bytes.len() as u64);
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    async fn discard_output(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.config.output).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(%err, "could not remove incomplete output");
            }
        }
    }
}
