//! One fetch attempt for one chunk.
use crate::chunk::ChunkOutcome;
use crate::client::RangeClient;
use crate::error::ClientError;
use crate::pool::WorkItem;
use crate::progress::ProgressTracker;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Path of the temporary file holding one chunk's bytes.
pub fn part_path(output: &Path, index: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".part{}", index));
    PathBuf::from(name)
}

/// Downloads one chunk's byte range into its part file.
///
/// The part file is truncated first, and the progress cursor for the
/// chunk is rewound, so a retried attempt is idempotent. Bytes are
/// reported to the tracker as they arrive; the write is flushed before
/// the attempt counts as successful.
pub async fn fetch_chunk(
    client: &RangeClient,
    url: &str,
    item: WorkItem,
    output: &Path,
    progress: &ProgressTracker,
    cancel: &CancellationToken,
) -> ChunkOutcome {
    match fetch_chunk_inner(client, url, item, output, progress, cancel).await {
        Ok(bytes) => {
            debug!(chunk = item.index, bytes, "chunk fetched");
            ChunkOutcome::Success { bytes }
        }
        Err(err) => ChunkOutcome::Failed(err),
    }
}

async fn fetch_chunk_inner(
    client: &RangeClient,
    url: &str,
    item: WorkItem,
    output: &Path,
    progress: &ProgressTracker,
    cancel: &CancellationToken,
) -> Result<u64, ClientError> {
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }

    progress.restart_attempt(item.index);
    // Cancellation must also interrupt a fetch still waiting on the
    // server's headers, not just the body loop below.
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        stream = client.fetch_range(url, item.start, item.end) => stream?,
    };

    let file = tokio::fs::File::create(part_path(output, item.index)).await?;
    let mut writer = BufWriter::new(file);
    let want = item.end - item.start + 1;
    let mut received = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            next = stream.next_chunk() => next?,
        };
        let Some(bytes) = next else { break };

        received += bytes.len() as u64;
        if received > want {
            return Err(ClientError::SizeMismatch {
                want,
                got: received,
            });
        }
        writer.write_all(&bytes).await?;
        progress.advance(item.index, bytes.len() as u64);
    }

    if received != want {
        return Err(ClientError::SizeMismatch {
            want,
            got: received,
        });
    }

    // All bytes must be on disk before the chunk counts as done.
    writer.flush().await?;
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_paths_are_per_chunk() {
        let output = Path::new("downloads/archive.zip");
        assert_eq!(
            part_path(output, 0),
            PathBuf::from("downloads/archive.zip.part0")
        );
        assert_eq!(
            part_path(output, 12),
            PathBuf::from("downloads/archive.zip.part12")
        );
    }
}
