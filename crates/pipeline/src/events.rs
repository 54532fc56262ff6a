//! Events emitted by the orchestrator.
//!
//! Broadcast on a `tokio::sync::broadcast` channel; call
//! [`Orchestrator::subscribe`](crate::orchestrator::Orchestrator::subscribe)
//! to receive them. Dispatch failures are reported here as well as in
//! the log.

use diffserver_core::types::{JobId, PartKey, TaskId};
use serde::Serialize;

use crate::jobs::{JobReport, PartOutcome};

#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    /// A remote task was created for a part.
    TaskDispatched {
        job_id: JobId,
        part_key: PartKey,
        task_id: TaskId,
    },

    /// A part, or a whole batch whose regions could not be extracted,
    /// never reached the remote service.
    DispatchFailed {
        job_id: JobId,
        /// `None` when the failure happened before any part existed.
        part_key: Option<PartKey>,
        error: String,
    },

    /// A task's callback was processed.
    TaskDelivered {
        job_id: JobId,
        part_key: PartKey,
        task_id: TaskId,
        outcome: PartOutcome,
    },

    /// A task's callback never arrived.
    TaskExpired {
        job_id: JobId,
        part_key: PartKey,
        task_id: TaskId,
    },

    /// Every part of a job has been accounted for.
    JobCompleted { report: JobReport },
}
