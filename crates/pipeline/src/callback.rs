//! Completion callback handling.
//!
//! Ingestion is synchronous bookkeeping only: take the task's metadata,
//! return its admission capacity, and queue the rest on the callback
//! pool. The deferred half downloads, feathers and saves the result,
//! then counts the part toward its job. Unfeathered results are
//! re-encoded when their format does not match the output extension.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use diffserver_core::feather::{self, FeatherParams};
use diffserver_core::patch;
use diffserver_core::types::TaskId;
use diffserver_runninghub::CallbackEvent;
use serde::Serialize;

use crate::admission::Release;
use crate::events::PipelineEvent;
use crate::jobs::{FailureReason, PartOutcome};
use crate::orchestrator::Shared;
use crate::pool::{Queued, WorkerPool};
use crate::tasks::{Claim, TaskMeta};

/// What happened to an ingested callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum CallbackDisposition {
    /// The task was known; its result is being processed.
    Accepted { task_id: TaskId },
    /// The task is still being created; the callback is processed once
    /// the task is recorded.
    Deferred { task_id: TaskId },
    /// Nothing changed.
    Discarded {
        task_id: Option<TaskId>,
        reason: DiscardReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The payload carried no task id.
    MissingTaskId,
    /// Unknown, already processed, or expired.
    UnknownTask,
}

/// Never waits: a full callback queue overflows onto a dedicated task.
pub(crate) fn ingest(
    shared: &Arc<Shared>,
    pool: &WorkerPool,
    event: CallbackEvent,
) -> CallbackDisposition {
    let Some(task_id) = event.task_id().map(str::to_string) else {
        tracing::warn!(event = ?event, "Callback without task id discarded");
        return CallbackDisposition::Discarded {
            task_id: None,
            reason: DiscardReason::MissingTaskId,
        };
    };

    let meta = match shared.tasks.claim(&task_id, &event) {
        Claim::Found(meta) => meta,
        Claim::Parked => {
            tracing::info!(task_id = %task_id, "Callback arrived before its task was recorded");
            return CallbackDisposition::Deferred { task_id };
        }
        Claim::Unknown => {
            tracing::debug!(task_id = %task_id, "Callback for unknown task discarded");
            return CallbackDisposition::Discarded {
                task_id: Some(task_id),
                reason: DiscardReason::UnknownTask,
            };
        }
    };

    if shared.admission.release(&task_id) == Release::AlreadyReleased {
        tracing::warn!(task_id = %task_id, "Admission already released for task");
    }

    tracing::info!(
        job_id = %meta.job_id,
        part = %meta.part_key,
        task_id = %task_id,
        "Callback received",
    );

    let deferred = {
        let shared = Arc::clone(shared);
        async move { process(&shared, meta, event).await }
    };
    match pool.submit_or_spawn(deferred) {
        Ok(Queued::Pooled) => {}
        Ok(Queued::Overflow) => {
            tracing::warn!(task_id = %task_id, "Callback queue full, processing on overflow task");
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Callback could not be queued");
        }
    }

    CallbackDisposition::Accepted { task_id }
}

/// Resolve the part's outcome and count it.
pub(crate) async fn process(shared: &Shared, meta: TaskMeta, event: CallbackEvent) {
    let outcome = match event {
        CallbackEvent::Success { file_url, .. } => {
            match fetch_and_save(shared, &meta, &file_url).await {
                Ok(path) => PartOutcome::Saved { path },
                Err(reason) => PartOutcome::failed(reason),
            }
        }
        CallbackEvent::Failure { code, .. } => {
            PartOutcome::failed(FailureReason::RemoteFailed { code })
        }
        CallbackEvent::Malformed { reason, .. } => {
            PartOutcome::failed(FailureReason::Malformed { message: reason })
        }
    };

    match &outcome {
        PartOutcome::Saved { path } => tracing::info!(
            job_id = %meta.job_id,
            part = %meta.part_key,
            task_id = %meta.task_id,
            path = %path.display(),
            "Result saved",
        ),
        PartOutcome::Failed { reason } => tracing::error!(
            job_id = %meta.job_id,
            part = %meta.part_key,
            task_id = %meta.task_id,
            reason = %reason,
            "Part failed",
        ),
    }

    shared.emit(PipelineEvent::TaskDelivered {
        job_id: meta.job_id,
        part_key: meta.part_key.clone(),
        task_id: meta.task_id.clone(),
        outcome: outcome.clone(),
    });

    if let Some(completion) = shared.jobs.mark_part_done(meta.job_id, &meta.part_key, outcome) {
        shared.complete(completion).await;
    }
}

async fn fetch_and_save(
    shared: &Shared,
    meta: &TaskMeta,
    file_url: &str,
) -> Result<PathBuf, FailureReason> {
    let bytes = shared
        .service
        .download(file_url)
        .await
        .map_err(|e| FailureReason::Download {
            message: e.to_string(),
        })?;

    let bytes = if meta.feather {
        feather_blocking(bytes, shared.config.feather).await?
    } else {
        conform_blocking(bytes, meta.output.clone()).await?
    };

    save(&meta.output, &bytes)
        .await
        .map_err(|e| FailureReason::Save {
            message: format!("{}: {e}", meta.output.display()),
        })?;
    Ok(meta.output.clone())
}

async fn feather_blocking(bytes: Vec<u8>, params: FeatherParams) -> Result<Vec<u8>, FailureReason> {
    tokio::task::spawn_blocking(move || feather::feather_bytes(&bytes, &params))
        .await
        .map_err(|e| FailureReason::Decode {
            message: e.to_string(),
        })?
        .map_err(|e| FailureReason::Decode {
            message: e.to_string(),
        })
}

async fn conform_blocking(bytes: Vec<u8>, output: PathBuf) -> Result<Vec<u8>, FailureReason> {
    tokio::task::spawn_blocking(move || patch::encode_for_path(bytes, &output))
        .await
        .map_err(|e| FailureReason::Decode {
            message: e.to_string(),
        })?
        .map_err(|e| FailureReason::Decode {
            message: e.to_string(),
        })
}

async fn save(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
