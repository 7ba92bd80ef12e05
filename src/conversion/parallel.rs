//! Bounded worker pool using tokio
//!
//! A single dispatcher task walks the item list and spawns one task per item,
//! gated by a semaphore with one permit per worker. Outcomes come back over a
//! channel and are collected through [`BatchHandle::poll`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{OutcomeKind, TranscodeOutcome, WorkItem};
use crate::error::PoolError;

/// Worker count when none is configured
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Runs work items with at most `workers` in flight
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start processing `items`, returning immediately
    ///
    /// `handler` runs once per item with a token that is cancelled when the
    /// batch is. A panicking handler yields a failed outcome for its item.
    /// Must be called from within a tokio runtime.
    pub fn submit_all<F, Fut>(&self, items: Vec<WorkItem>, handler: F) -> BatchHandle
    where
        F: Fn(WorkItem, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TranscodeOutcome> + Send + 'static,
    {
        let total = items.len();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch(
            items,
            Arc::new(handler),
            Arc::new(Semaphore::new(self.workers)),
            cancel.clone(),
            tx,
        ));

        BatchHandle {
            total,
            received: 0,
            rx,
            dispatcher: Some(dispatcher),
            cancel,
            finished: false,
            failure: None,
        }
    }
}

async fn dispatch<F, Fut>(
    items: Vec<WorkItem>,
    handler: Arc<F>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tx: UnboundedSender<TranscodeOutcome>,
) -> Result<(), PoolError>
where
    F: Fn(WorkItem, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TranscodeOutcome> + Send + 'static,
{
    let mut running = FuturesUnordered::new();
    let mut queue = items.into_iter();

    while let Some(item) = queue.next() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let undispatched = std::iter::once(item).chain(queue.by_ref());
                let mut count = 0;
                for item in undispatched {
                    let _ = tx.send(TranscodeOutcome::not_processed(item.source));
                    count += 1;
                }
                log::debug!("Cancelled with {} items undispatched", count);
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.map_err(|e| PoolError::Dispatcher(e.to_string()))?
            }
        };

        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        let token = cancel.child_token();

        running.push(tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let source = item.source.clone();

            let outcome = match AssertUnwindSafe(async move { handler(item, token).await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(&*panic);
                    log::error!("Worker panicked on {}: {}", source.display(), message);
                    TranscodeOutcome::new(
                        source,
                        OutcomeKind::Failed(format!("worker panicked: {}", message)),
                        started.elapsed(),
                    )
                }
            };
            let _ = tx.send(outcome);
        }));
    }

    while let Some(joined) = running.next().await {
        if let Err(e) = joined {
            log::error!("Worker task failed: {}", e);
        }
    }

    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcomes collected by one call to [`BatchHandle::poll`]
#[derive(Debug, Default)]
pub struct BatchProgress {
    pub outcomes: Vec<TranscodeOutcome>,
    /// Every item has been reported; later polls return nothing new
    pub finished: bool,
}

/// Handle on a running batch
///
/// Dropping an unfinished handle cancels the batch.
#[derive(Debug)]
pub struct BatchHandle {
    total: usize,
    received: usize,
    rx: UnboundedReceiver<TranscodeOutcome>,
    dispatcher: Option<JoinHandle<Result<(), PoolError>>>,
    cancel: CancellationToken,
    finished: bool,
    failure: Option<PoolError>,
}

impl BatchHandle {
    pub fn total(&self) -> usize {
        self.total
    }

    /// Stop dispatching and signal every running item
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait up to `timeout` for outcomes, then take everything available
    pub async fn poll(&mut self, timeout: Duration) -> Result<BatchProgress, PoolError> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if self.finished {
            return Ok(BatchProgress {
                outcomes: Vec::new(),
                finished: true,
            });
        }

        let mut outcomes = Vec::new();
        let mut closed = false;

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => closed = true,
            Err(_) => {}
        }
        while !closed {
            match self.rx.try_recv() {
                Ok(outcome) => outcomes.push(outcome),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => closed = true,
            }
        }
        self.received += outcomes.len();

        if !closed {
            return Ok(BatchProgress {
                outcomes,
                finished: false,
            });
        }

        self.finished = true;
        if let Err(err) = self.check_complete().await {
            // Hand over what did arrive first; the error comes on the next poll
            if outcomes.is_empty() {
                return Err(err);
            }
            self.failure = Some(err);
            return Ok(BatchProgress {
                outcomes,
                finished: false,
            });
        }

        Ok(BatchProgress {
            outcomes,
            finished: true,
        })
    }

    async fn check_complete(&mut self) -> Result<(), PoolError> {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher
                .await
                .map_err(|e| PoolError::Dispatcher(e.to_string()))??;
        }
        if self.received < self.total {
            return Err(PoolError::LostOutcomes {
                missing: self.total - self.received,
                total: self.total,
            });
        }
        Ok(())
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}
