//! Bounded gate over concurrently outstanding remote tasks.
//!
//! A [`Permit`] is taken immediately before a remote call. If the call
//! fails the permit is simply dropped, which returns the capacity. If a
//! task is created the permit is [bound](AdmissionController::bind) to
//! its task id and held until the task resolves, at which point
//! [`release`](AdmissionController::release) returns it exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use diffserver_core::types::TaskId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One unit of admission capacity. Dropping it returns the capacity.
#[derive(Debug)]
pub struct Permit(OwnedSemaphorePermit);

/// Result of [`AdmissionController::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Capacity was returned.
    Released,
    /// No permit is bound to this task id; nothing changed.
    AlreadyReleased,
}

/// The gate was closed during shutdown.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("admission controller is closed")]
pub struct AdmissionClosed;

pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    bound: Mutex<HashMap<TaskId, OwnedSemaphorePermit>>,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            bound: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until capacity is available.
    pub async fn acquire(&self) -> Result<Permit, AdmissionClosed> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(Permit)
            .map_err(|_| AdmissionClosed)
    }

    /// Hold `permit` until `task_id` is released.
    pub fn bind(&self, task_id: TaskId, permit: Permit) {
        let previous = self
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.clone(), permit.0);
        if previous.is_some() {
            tracing::warn!(task_id = %task_id, "Task id bound twice; earlier permit returned");
        }
    }

    /// Return the capacity bound to `task_id`. Never waits.
    pub fn release(&self, task_id: &str) -> Release {
        let permit = self
            .bound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        match permit {
            Some(permit) => {
                drop(permit);
                Release::Released
            }
            None => Release::AlreadyReleased,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held, bound or not.
    pub fn outstanding(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Fail all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
