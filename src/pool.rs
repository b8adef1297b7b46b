//! Bounded producer-consumer worker pool.
//!
//! A fixed set of workers consumes one FIFO queue. The queue is a
//! bounded mpsc channel whose receiver sits behind a mutex, so a
//! dequeue removes the item atomically and no two workers ever see the
//! same one. `submit` blocks the producer once the queue is full.
use crate::chunk::Chunk;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One unit of queued work: the byte range of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl From<&Chunk> for WorkItem {
    fn from(chunk: &Chunk) -> Self {
        Self {
            index: chunk.index,
            start: chunk.start,
            end: chunk.end,
        }
    }
}

/// Submitting to a pool whose intake has been closed.
#[derive(Debug, thiserror::Error)]
#[error("worker pool is closed")]
pub struct PoolClosed;

/// Fixed-size pool of async workers over a shared bounded queue.
///
/// The handler runs each item to completion before its worker dequeues
/// the next one, and reports results through whatever channel it
/// captured; a failed item never takes the pool down.
pub struct WorkerPool {
    queue: Option<mpsc::Sender<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` consumers over a queue of `capacity` items.
    pub fn new<H, Fut>(workers: usize, capacity: usize, handler: H) -> Self
    where
        H: Fn(WorkItem) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let handler = handler.clone();
                tokio::spawn(async move {
                    loop {
                        // The lock is held only for the dequeue itself,
                        // never while the item runs.
                        let item = { rx.lock().await.recv().await };
                        match item {
                            Some(item) => {
                                // A panicking handler must not kill the
                                // worker; the queue still has items.
                                let run = AssertUnwindSafe(handler(item)).catch_unwind();
                                if run.await.is_err() {
                                    warn!(worker = id, chunk = item.index, "task panicked");
                                }
                            }
                            None => break,
                        }
                    }
                    debug!(worker = id, "worker drained, exiting");
                })
            })
            .collect();

        Self {
            queue: Some(tx),
            workers,
        }
    }

    /// Enqueues an item, waiting while the queue is at capacity.
    pub async fn submit(&self, item: WorkItem) -> Result<(), PoolClosed> {
        match &self.queue {
            Some(tx) => tx.send(item).await.map_err(|_| PoolClosed),
            None => Err(PoolClosed),
        }
    }

    /// Stops intake; queued items still get processed.
    pub fn close(&mut self) {
        self.queue.take();
    }

    /// Closes intake and blocks until every worker has exited.
    pub async fn wait(mut self) {
        self.close();
        join_all(self.workers).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn every_item_is_processed_exactly_once() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let mut pool = WorkerPool::new(4, 16, move |item: WorkItem| {
            let done_tx = done_tx.clone();
            async move {
                let _ = done_tx.send(item.index);
            }
        });

        for i in 0..100 {
            pool.submit(WorkItem {
                index: i,
                start: 0,
                end: 0,
            })
            .await
            .unwrap();
        }
        pool.wait().await;

        let mut seen = HashSet::new();
        while let Some(index) = done_rx.recv().await {
            assert!(seen.insert(index), "item {} processed twice", index);
        }
        assert_eq!(seen.len(), 100);
    }

    #[tokio::test]
    async fn submit_fails_after_close() {
        let mut pool = WorkerPool::new(1, 1, |_item| async {});
        pool.close();
        assert!(pool
            .submit(WorkItem {
                index: 0,
                start: 0,
                end: 0
            })
            .await
            .is_err());
        pool.wait().await;
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let gate = Arc::new(Semaphore::new(0));
        let release = Arc::clone(&gate);

        let pool = WorkerPool::new(1, 1, move |_item: WorkItem| {
            let gate = Arc::clone(&gate);
            async move {
                gate.acquire_owned().await.unwrap().forget();
            }
        });

        let item = WorkItem {
            index: 0,
            start: 0,
            end: 0,
        };
        // First item goes to the worker, second fills the queue.
        pool.submit(item).await.unwrap();
        pool.submit(item).await.unwrap();

        // Third submission must block until the worker makes room.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.submit(item)).await;
        assert!(blocked.is_err(), "submit did not block on a full queue");

        release.add_permits(1);
        tokio::time::timeout(Duration::from_secs(1), pool.submit(item))
            .await
            .expect("queue never drained")
            .unwrap();

        release.add_permits(2);
        pool.wait().await;
    }

    #[tokio::test]
    async fn one_bad_task_does_not_stop_the_pool() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        // A single worker, so the one that hits the panic is the same
        // one that must keep draining the queue afterwards.
        let mut pool = WorkerPool::new(1, 8, move |item: WorkItem| {
            let done_tx = done_tx.clone();
            async move {
                if item.index == 0 {
                    panic!("simulated task crash");
                }
                let _ = done_tx.send(item.index);
            }
        });

        for i in 0..8 {
            pool.submit(WorkItem {
                index: i,
                start: 0,
                end: 0,
            })
            .await
            .unwrap();
        }
        pool.wait().await;

        let mut seen = HashSet::new();
        while let Some(index) = done_rx.recv().await {
            seen.insert(index);
        }
        assert_eq!(seen, (1..8).collect::<HashSet<_>>());
    }
}
