//! Fixed-size worker pool fed by a bounded queue.
//!
//! Work items are boxed futures. Each worker pulls the next item off the
//! shared receiver and runs it to completion in its own task, so a
//! panicking item is logged and the worker keeps going. Callers that
//! must never wait use [`WorkerPool::submit_or_spawn`], which runs the
//! item on its own task when the queue is full.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;

type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Where [`WorkerPool::submit_or_spawn`] put an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queued {
    Pooled,
    /// The queue was full; the item runs on its own task.
    Overflow,
}

pub struct WorkerPool {
    name: &'static str,
    /// `None` once the pool is closed.
    tx: Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Overflow tasks not yet known to be finished.
    overflow: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers sharing a queue of `capacity` items.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: &'static str, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<WorkItem>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let item = rx.lock().await.recv().await;
                        let Some(item) = item else { break };
                        if let Err(e) = tokio::spawn(item).await {
                            tracing::error!(pool = name, worker, error = %e, "Work item panicked");
                        }
                    }
                    tracing::debug!(pool = name, worker, "Worker stopped");
                })
            })
            .collect();

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            overflow: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue without waiting; fails with [`PipelineError::QueueFull`]
    /// when the queue is at capacity.
    pub fn try_submit<F>(&self, work: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self.sender()?;
        tx.try_send(Box::pin(work)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull(self.name),
            mpsc::error::TrySendError::Closed(_) => PipelineError::PoolClosed(self.name),
        })
    }

    /// Enqueue without waiting; when the queue is full the item runs on
    /// a task of its own instead. Fails only once the pool is closed.
    pub fn submit_or_spawn<F>(&self, work: F) -> Result<Queued, PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self.sender()?;
        match tx.try_send(Box::pin(work)) {
            Ok(()) => Ok(Queued::Pooled),
            Err(mpsc::error::TrySendError::Full(item)) => {
                let handle = tokio::spawn(item);
                let mut overflow = self.overflow.lock().unwrap_or_else(PoisonError::into_inner);
                overflow.retain(|h| !h.is_finished());
                overflow.push(handle);
                Ok(Queued::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::PoolClosed(self.name)),
        }
    }

    /// Stop accepting work and wait up to `timeout` for queued and
    /// overflow items to drain.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        let mut handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        handles.extend(
            self.overflow
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..),
        );

        let drained = tokio::time::timeout(timeout, join_all(handles)).await;
        if drained.is_err() {
            tracing::warn!(pool = self.name, "Workers did not drain before timeout");
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkItem>, PipelineError> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::PoolClosed(self.name))
    }
}
