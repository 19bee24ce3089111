//! Background batching of soft deletions.
//!
//! [`DeleteBatcher::enqueue`] hands a request to a dedicated task and returns
//! at once. The task collects requests into a buffer and hands them to a
//! [`DeleteSink`] as one batch when either the buffer reaches
//! [`BatcherSettings::capacity`] or [`BatcherSettings::idle_timeout`] has
//! passed since the first request of the batch arrived.
//!
//! Deletion is best-effort: a batch the sink fails to apply is logged and
//! dropped. On shutdown every request already enqueued is still flushed.

use async_trait::async_trait;
use burrow_core::{LinkId, Owner, Result, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// A request to soft-delete `id`, honoured only if `owner` owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub id: LinkId,
    pub owner: Owner,
}

/// Where flushed batches go.
#[async_trait]
pub trait DeleteSink: Send + Sync + 'static {
    /// Applies a whole batch in one round-trip, returning how many records
    /// were actually flipped.
    async fn apply(&self, batch: &[DeleteRequest]) -> Result<u64>;
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherSettings {
    /// Flush as soon as this many requests are buffered.
    #[builder(default = DEFAULT_CAPACITY)]
    pub capacity: usize,
    /// Flush a partial batch this long after its first request.
    #[builder(default = DEFAULT_IDLE_TIMEOUT)]
    pub idle_timeout: Duration,
    /// How long shutdown waits for the worker before giving up on it.
    #[builder(default = DEFAULT_SHUTDOWN_GRACE)]
    pub shutdown_grace: Duration,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Handle to the background delete worker.
pub struct DeleteBatcher {
    sender: mpsc::UnboundedSender<DeleteRequest>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: OnceCell<()>,
    grace: Duration,
}

impl std::fmt::Debug for DeleteBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteBatcher")
            .field("stopped", &self.shutdown.is_cancelled())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl DeleteBatcher {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn<S: DeleteSink>(sink: S, settings: BatcherSettings) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = Worker {
            sink,
            receiver,
            shutdown: shutdown.clone(),
            capacity: settings.capacity.max(1),
            idle_timeout: settings.idle_timeout,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            sender,
            shutdown,
            worker: Mutex::new(Some(handle)),
            stopped: OnceCell::new(),
            grace: settings.shutdown_grace,
        }
    }

    /// Queues one request without waiting for it to be applied.
    pub fn enqueue(&self, request: DeleteRequest) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(StorageError::Closed);
        }
        self.sender.send(request).map_err(|_| StorageError::Closed)
    }

    /// Queues one request per id, all on behalf of `owner`.
    pub fn enqueue_all(&self, ids: &[LinkId], owner: Owner) -> Result<()> {
        for id in ids {
            self.enqueue(DeleteRequest {
                id: id.clone(),
                owner,
            })?;
        }
        Ok(())
    }

    /// Stops the worker after it has flushed everything already queued.
    ///
    /// Waits at most the configured grace period; a worker still running
    /// after that is aborted. Concurrent callers all wait for the same
    /// stop; later calls return immediately.
    pub async fn shutdown(&self) {
        self.stopped.get_or_init(|| self.stop_worker()).await;
    }

    async fn stop_worker(&self) {
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return;
        };

        match tokio::time::timeout(self.grace, &mut worker).await {
            Ok(Ok(())) => info!("delete batcher stopped"),
            Ok(Err(err)) => error!(error = %err, "delete batcher task failed"),
            Err(_) => {
                warn!(grace = ?self.grace, "delete batcher exceeded shutdown grace period, aborting it");
                worker.abort();
            }
        }
    }
}

struct Worker<S> {
    sink: S,
    receiver: mpsc::UnboundedReceiver<DeleteRequest>,
    shutdown: CancellationToken,
    capacity: usize,
    idle_timeout: Duration,
}

impl<S: DeleteSink> Worker<S> {
    async fn run(mut self) {
        let mut buffer = Vec::with_capacity(self.capacity);

        loop {
            let stop = self.collect(&mut buffer).await;
            if !buffer.is_empty() {
                self.flush(&mut buffer).await;
            }
            if stop {
                break;
            }
        }

        self.drain(&mut buffer).await;
    }

    /// Fills `buffer` until it is full or the batch times out. Returns
    /// `true` once the worker should stop.
    async fn collect(&mut self, buffer: &mut Vec<DeleteRequest>) -> bool {
        let first = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return true,
            request = self.receiver.recv() => match request {
                Some(request) => request,
                None => return true,
            },
        };
        buffer.push(first);

        let deadline = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(deadline);

        while buffer.len() < self.capacity {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return true,
                _ = &mut deadline => return false,
                request = self.receiver.recv() => match request {
                    Some(request) => buffer.push(request),
                    None => return true,
                },
            }
        }

        false
    }

    /// Flushes whatever is still queued, in capacity-sized batches.
    async fn drain(&mut self, buffer: &mut Vec<DeleteRequest>) {
        self.receiver.close();

        while let Ok(request) = self.receiver.try_recv() {
            buffer.push(request);
            if buffer.len() >= self.capacity {
                self.flush(buffer).await;
            }
        }

        if !buffer.is_empty() {
            self.flush(buffer).await;
        }
    }

    async fn flush(&self, buffer: &mut Vec<DeleteRequest>) {
        let size = buffer.len();

        match self.sink.apply(buffer).await {
            Ok(affected) => debug!(batch = size, affected, "delete batch applied"),
            Err(err) => error!(batch = size, error = %err, "delete batch failed, dropping it"),
        }

        buffer.clear();
    }
}
