//! Per-job aggregation of part outcomes.
//!
//! A job knows how many parts it expects. Each part is counted once,
//! keyed by its part key, and the call that counts the last part
//! receives a [`Completion`] carrying the [`JobReport`] and the job's
//! [`CompletionHook`]. The hook is invoked by that caller after every
//! lock has been dropped.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use diffserver_core::types::{JobId, JobKind, PartKey, TaskId, Timestamp};
use serde::Serialize;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Outcomes and reports
// ---------------------------------------------------------------------------

/// Why a part did not produce an output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("dispatch failed: {message}")]
    DispatchFailed { message: String },

    #[error("remote task failed with code {code}")]
    RemoteFailed { code: i64 },

    #[error("malformed callback: {message}")]
    Malformed { message: String },

    #[error("download failed: {message}")]
    Download { message: String },

    #[error("result could not be processed: {message}")]
    Decode { message: String },

    #[error("result could not be saved: {message}")]
    Save { message: String },

    #[error("no callback for task {task_id} before its deadline")]
    Expired { task_id: TaskId },
}

/// Final state of one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartOutcome {
    Saved { path: PathBuf },
    Failed { reason: FailureReason },
}

impl PartOutcome {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartRecord {
    pub part_key: PartKey,
    pub outcome: PartOutcome,
}

/// Handed to the [`CompletionHook`] when the last part is counted.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub kind: JobKind,
    /// Parts the job was registered with, including any abandoned at
    /// dispatch.
    pub expected: usize,
    /// In the order they were counted.
    pub parts: Vec<PartRecord>,
    pub completed_at: Timestamp,
}

impl JobReport {
    pub fn succeeded(&self) -> usize {
        self.parts.iter().filter(|p| p.outcome.is_saved()).count()
    }

    pub fn failed(&self) -> usize {
        self.parts.len() - self.succeeded()
    }

    pub fn is_full_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Point-in-time view of an active job.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub kind: JobKind,
    pub expected: usize,
    /// Parts counted so far, failed ones included.
    pub done: usize,
    pub failed: usize,
    pub created_at: Timestamp,
}

/// Receives each job's report exactly once.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_complete(
        &self,
        report: JobReport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Returned to the single caller that completed a job.
pub struct Completion {
    pub report: JobReport,
    pub hook: Arc<dyn CompletionHook>,
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

struct JobTracker {
    kind: JobKind,
    /// As registered; reported to the hook.
    planned: usize,
    /// Parts that will report back; lowered by `abandon_part`.
    expected: usize,
    /// Dispatched parts counted so far.
    done: usize,
    seen: HashSet<PartKey>,
    parts: Vec<PartRecord>,
    completed: bool,
    hook: Arc<dyn CompletionHook>,
    created_at: Timestamp,
}

impl JobTracker {
    /// Flip to completed if every expected part is in. Only the first
    /// caller to observe this gets `true`.
    fn try_complete(&mut self) -> bool {
        if self.completed || self.done < self.expected {
            return false;
        }
        self.completed = true;
        true
    }

    fn report(&self, job_id: JobId) -> JobReport {
        JobReport {
            job_id,
            kind: self.kind,
            expected: self.planned,
            parts: self.parts.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// All active jobs. Each job has its own lock; the map lock is only
/// held long enough to look a job up, insert it, or remove it.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<JobTracker>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and register a job expecting `expected` parts.
    pub fn start_job(
        &self,
        kind: JobKind,
        expected: usize,
        hook: Arc<dyn CompletionHook>,
    ) -> JobId {
        let job_id = JobId::new();
        self.map().insert(job_id, Self::tracker(kind, expected, hook));
        job_id
    }

    /// Register a job under an id allocated earlier.
    pub fn register(
        &self,
        job_id: JobId,
        kind: JobKind,
        expected: usize,
        hook: Arc<dyn CompletionHook>,
    ) -> Result<(), PipelineError> {
        let mut jobs = self.map();
        if jobs.contains_key(&job_id) {
            return Err(PipelineError::DuplicateJob(job_id));
        }
        jobs.insert(job_id, Self::tracker(kind, expected, hook));
        Ok(())
    }

    /// Count one dispatched part. A part key already counted is a no-op.
    ///
    /// Returns the completion if and only if this call completed the job.
    pub fn mark_part_done(
        &self,
        job_id: JobId,
        part_key: &str,
        outcome: PartOutcome,
    ) -> Option<Completion> {
        self.update(job_id, part_key, |tracker| {
            tracker.done += 1;
            tracker.parts.push(PartRecord {
                part_key: part_key.to_string(),
                outcome,
            });
        })
    }

    /// Account for a part that never reached the remote service: it no
    /// longer counts toward `expected` but its failure is reported.
    pub fn abandon_part(
        &self,
        job_id: JobId,
        part_key: &str,
        reason: FailureReason,
    ) -> Option<Completion> {
        self.update(job_id, part_key, |tracker| {
            tracker.expected = tracker.expected.saturating_sub(1);
            tracker.parts.push(PartRecord {
                part_key: part_key.to_string(),
                outcome: PartOutcome::failed(reason),
            });
        })
    }

    /// Complete a job that has nothing left to wait for, such as a batch
    /// with no usable regions.
    pub fn finish_if_complete(&self, job_id: JobId) -> Option<Completion> {
        let tracker = self.get(job_id)?;
        let completion = {
            let mut guard = lock(&tracker);
            guard.try_complete().then(|| Completion {
                report: guard.report(job_id),
                hook: Arc::clone(&guard.hook),
            })
        };
        if completion.is_some() {
            self.map().remove(&job_id);
        }
        completion
    }

    pub fn progress(&self, job_id: JobId) -> Option<JobProgress> {
        let tracker = self.get(job_id)?;
        let guard = lock(&tracker);
        Some(JobProgress {
            job_id,
            kind: guard.kind,
            expected: guard.planned,
            done: guard.parts.len(),
            failed: guard.parts.iter().filter(|p| !p.outcome.is_saved()).count(),
            created_at: guard.created_at,
        })
    }

    /// Drop a job that will never receive parts, without completing it.
    pub(crate) fn discard(&self, job_id: JobId) {
        self.map().remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- private helpers ----

    fn tracker(
        kind: JobKind,
        expected: usize,
        hook: Arc<dyn CompletionHook>,
    ) -> Arc<Mutex<JobTracker>> {
        Arc::new(Mutex::new(JobTracker {
            kind,
            planned: expected,
            expected,
            done: 0,
            seen: HashSet::new(),
            parts: Vec::new(),
            completed: false,
            hook,
            created_at: Utc::now(),
        }))
    }

    fn map(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Mutex<JobTracker>>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, job_id: JobId) -> Option<Arc<Mutex<JobTracker>>> {
        self.map().get(&job_id).cloned()
    }

    /// Apply `record` for a not-yet-seen part under the job's lock, then
    /// complete the job if that was the last one.
    fn update(
        &self,
        job_id: JobId,
        part_key: &str,
        record: impl FnOnce(&mut JobTracker),
    ) -> Option<Completion> {
        let Some(tracker) = self.get(job_id) else {
            tracing::debug!(job_id = %job_id, part = part_key, "Part for unknown or finished job");
            return None;
        };

        let completion = {
            let mut guard = lock(&tracker);
            if guard.completed || !guard.seen.insert(part_key.to_string()) {
                tracing::debug!(job_id = %job_id, part = part_key, "Part already counted");
                return None;
            }
            record(&mut *guard);
            guard.try_complete().then(|| Completion {
                report: guard.report(job_id),
                hook: Arc::clone(&guard.hook),
            })
        };

        if completion.is_some() {
            self.map().remove(&job_id);
        }
        completion
    }
}

fn lock(tracker: &Mutex<JobTracker>) -> MutexGuard<'_, JobTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}
