use diffserver_core::error::CoreError;
use diffserver_core::types::JobId;
use diffserver_runninghub::RunningHubError;

use crate::admission::AdmissionClosed;

/// Errors returned to callers of the orchestrator entry points.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0} queue is full")]
    QueueFull(&'static str),

    #[error("{0} pool is shut down")]
    PoolClosed(&'static str),

    #[error("Job {0} is already registered")]
    DuplicateJob(JobId),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Why a single part could not be handed to the remote service.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    Admission(#[from] AdmissionClosed),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Remote(#[from] RunningHubError),
}
