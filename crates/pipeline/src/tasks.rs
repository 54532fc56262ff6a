//! Outstanding remote tasks, keyed by the id the remote service issued.
//!
//! The registry also covers the window between the remote service
//! issuing a task id and the dispatcher recording it: while any task
//! creation is in flight, a callback for an unknown id is parked and
//! handed back to whichever creation turns out to own it. Once no
//! creation is in flight, parked callbacks are dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use diffserver_core::types::{JobId, PartKey, TaskId};
use diffserver_runninghub::CallbackEvent;

/// Everything needed to finish a task once its callback arrives.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub task_id: TaskId,
    /// Where the result is written.
    pub output: PathBuf,
    pub job_id: JobId,
    pub part_key: PartKey,
    /// Patch results are feathered before saving; whole images are not.
    pub feather: bool,
    pub dispatched_at: Instant,
}

/// Result of looking up the task a callback belongs to.
#[derive(Debug)]
pub enum Claim {
    /// The task was outstanding; its entry is now consumed.
    Found(TaskMeta),
    /// A task creation is in flight; the event is held for it.
    Parked,
    /// Never registered, already consumed, or expired.
    Unknown,
}

#[derive(Default)]
struct Inner {
    live: HashMap<TaskId, TaskMeta>,
    /// Task creations started but not yet recorded or abandoned.
    creating: usize,
    early: HashMap<TaskId, CallbackEvent>,
}

impl Inner {
    fn end_create(&mut self) {
        self.creating = self.creating.saturating_sub(1);
        if self.creating == 0 && !self.early.is_empty() {
            tracing::debug!(dropped = self.early.len(), "Dropping unclaimed early callbacks");
            self.early.clear();
        }
    }
}

/// Task id to [`TaskMeta`]. An entry is consumed exactly once, either by
/// its first callback or by expiry.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<Inner>,
}

/// A task creation in flight. Finish it with the recorded metadata, or
/// drop it if the creation failed.
#[must_use]
pub struct PendingCreate<'a> {
    registry: &'a TaskRegistry,
    done: bool,
}

impl PendingCreate<'_> {
    /// Record the created task. If its callback already arrived, the
    /// entry is not stored and the parked event is returned with the
    /// metadata instead.
    pub fn finish(mut self, meta: TaskMeta) -> Option<(TaskMeta, CallbackEvent)> {
        self.done = true;
        let mut inner = self.registry.lock();
        let early = inner.early.remove(&meta.task_id);
        let replay = match early {
            Some(event) => Some((meta, event)),
            None => {
                inner.live.insert(meta.task_id.clone(), meta);
                None
            }
        };
        inner.end_create();
        replay
    }
}

impl Drop for PendingCreate<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.registry.lock().end_create();
        }
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a task creation as in flight until the returned guard is
    /// finished or dropped.
    pub fn begin_create(&self) -> PendingCreate<'_> {
        self.lock().creating += 1;
        PendingCreate {
            registry: self,
            done: false,
        }
    }

    /// Consume the entry for `task_id`, or park `event` if a task
    /// creation is still in flight.
    pub fn claim(&self, task_id: &str, event: &CallbackEvent) -> Claim {
        let mut inner = self.lock();
        if let Some(meta) = inner.live.remove(task_id) {
            return Claim::Found(meta);
        }
        if inner.creating > 0 {
            inner.early.insert(task_id.to_string(), event.clone());
            return Claim::Parked;
        }
        Claim::Unknown
    }

    /// Remove and return every entry dispatched more than `deadline`
    /// before `now`.
    pub fn take_expired(&self, now: Instant, deadline: Duration) -> Vec<TaskMeta> {
        let mut inner = self.lock();
        let expired: Vec<TaskId> = inner
            .live
            .values()
            .filter(|meta| now.saturating_duration_since(meta.dispatched_at) > deadline)
            .map(|meta| meta.task_id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|task_id| inner.live.remove(task_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
