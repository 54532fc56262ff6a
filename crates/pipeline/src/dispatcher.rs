//! Hands jobs to the remote service.
//!
//! A whole-image job is one task; a batch job is one task per extracted
//! patch. Every task takes an admission permit immediately before the
//! upload and keeps it only if the task is created. Runs on the
//! submission pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use diffserver_core::error::CoreError;
use diffserver_core::naming;
use diffserver_core::patch::{self, Patch};
use diffserver_core::types::{JobId, JobKind, PartKey};
use diffserver_runninghub::workflow::{self, NodeInfo};

use crate::callback;
use crate::error::DispatchError;
use crate::events::PipelineEvent;
use crate::jobs::FailureReason;
use crate::orchestrator::{BatchRequest, Shared};
use crate::tasks::TaskMeta;

/// Part key of the single part of a whole-image job.
pub(crate) const WHOLE_IMAGE_PART: &str = "0";

/// One unit of remote work.
struct PartJob {
    part_key: PartKey,
    bytes: Vec<u8>,
    upload_name: String,
    workflow_id: String,
    prompt: Option<String>,
    output: PathBuf,
    feather: bool,
}

/// Dispatch the single task of a registered whole-image job.
pub(crate) async fn dispatch_whole_image(shared: Arc<Shared>, job_id: JobId, source: PathBuf) {
    let bytes = match tokio::fs::read(&source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = DispatchError::Core(CoreError::io(&source, e));
            abandon(&shared, job_id, WHOLE_IMAGE_PART, error).await;
            return;
        }
    };

    let part = PartJob {
        part_key: WHOLE_IMAGE_PART.to_string(),
        bytes,
        upload_name: file_name(&source),
        workflow_id: shared.workflows.whole_image.clone(),
        prompt: None,
        output: naming::whole_image_output(&source),
        feather: false,
    };
    dispatch_or_abandon(&shared, job_id, part).await;
}

/// Extract patches, register the job with their count, then dispatch
/// each patch.
pub(crate) async fn dispatch_batch(shared: Arc<Shared>, job_id: JobId, request: BatchRequest) {
    let patches = match extract(&request).await {
        Ok(patches) => patches,
        Err(e) => {
            tracing::error!(
                job_id = %job_id,
                image = %request.image.display(),
                config = %request.config.display(),
                error = %e,
                "Patch extraction failed",
            );
            shared.emit(PipelineEvent::DispatchFailed {
                job_id,
                part_key: None,
                error: e.to_string(),
            });
            Vec::new()
        }
    };

    if let Err(e) = shared.jobs.register(
        job_id,
        JobKind::Batch,
        patches.len(),
        Arc::clone(&shared.hook),
    ) {
        tracing::error!(job_id = %job_id, error = %e, "Failed to register batch job");
        return;
    }

    tracing::info!(
        job_id = %job_id,
        patches = patches.len(),
        image = %request.image.display(),
        "Batch job registered",
    );

    if patches.is_empty() {
        if let Some(completion) = shared.jobs.finish_if_complete(job_id) {
            shared.complete(completion).await;
        }
        return;
    }

    for patch in patches {
        let output = naming::patch_output(&request.image, &patch.part_id);
        let part = PartJob {
            upload_name: file_name(&output),
            part_key: patch.part_id,
            bytes: patch.png,
            workflow_id: shared.workflows.batch.clone(),
            prompt: Some(patch.prompt),
            output,
            feather: true,
        };
        dispatch_or_abandon(&shared, job_id, part).await;
    }
}

async fn extract(request: &BatchRequest) -> Result<Vec<Patch>, DispatchError> {
    let request = request.clone();
    tokio::task::spawn_blocking(move || {
        patch::extract_patches_from_paths(&request.image, &request.config, request.origin)
    })
    .await
    .map_err(|e| CoreError::Validation(format!("extraction task failed: {e}")))?
    .map_err(DispatchError::from)
}

async fn dispatch_or_abandon(shared: &Shared, job_id: JobId, part: PartJob) {
    let part_key = part.part_key.clone();
    if let Err(e) = dispatch_part(shared, job_id, part).await {
        abandon(shared, job_id, &part_key, e).await;
    }
}

/// Acquire, upload, create the task, then record it. The permit is
/// dropped on any error before the task exists.
async fn dispatch_part(shared: &Shared, job_id: JobId, part: PartJob) -> Result<(), DispatchError> {
    let permit = shared.admission.acquire().await?;

    let file_name = shared.service.upload(part.bytes, &part.upload_name).await?;
    let nodes: Vec<NodeInfo> = match &part.prompt {
        Some(prompt) => workflow::patch_nodes(&file_name, prompt),
        None => workflow::whole_image_nodes(&file_name),
    };

    // Callbacks arriving before `finish` are parked, not discarded.
    let creation = shared.tasks.begin_create();
    let task_id = shared.service.create_task(&part.workflow_id, &nodes).await?;

    // Bind before the meta is visible so a fast callback always finds
    // the permit.
    shared.admission.bind(task_id.clone(), permit);
    let early = creation.finish(TaskMeta {
        task_id: task_id.clone(),
        output: part.output,
        job_id,
        part_key: part.part_key.clone(),
        feather: part.feather,
        dispatched_at: Instant::now(),
    });

    tracing::info!(
        job_id = %job_id,
        part = %part.part_key,
        task_id = %task_id,
        "Task dispatched",
    );
    shared.emit(PipelineEvent::TaskDispatched {
        job_id,
        part_key: part.part_key,
        task_id,
    });

    if let Some((meta, event)) = early {
        shared.admission.release(&meta.task_id);
        tracing::info!(
            job_id = %meta.job_id,
            task_id = %meta.task_id,
            "Replaying callback that arrived before its task was recorded",
        );
        callback::process(shared, meta, event).await;
    }
    Ok(())
}

async fn abandon(shared: &Shared, job_id: JobId, part_key: &str, error: DispatchError) {
    tracing::error!(job_id = %job_id, part = part_key, error = %error, "Dispatch failed");
    shared.emit(PipelineEvent::DispatchFailed {
        job_id,
        part_key: Some(part_key.to_string()),
        error: error.to_string(),
    });

    let reason = FailureReason::DispatchFailed {
        message: error.to_string(),
    };
    if let Some(completion) = shared.jobs.abandon_part(job_id, part_key, reason) {
        shared.complete(completion).await;
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string())
}
