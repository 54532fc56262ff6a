//! Forced resolution of tasks whose callback never arrived.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::events::PipelineEvent;
use crate::jobs::{FailureReason, PartOutcome};
use crate::orchestrator::Shared;

/// Periodically expires overdue tasks.
///
/// A single long-lived Tokio task owned by the orchestrator.
pub(crate) struct ExpirySweeper {
    shared: Arc<Shared>,
    deadline: Duration,
    interval: Duration,
}

impl ExpirySweeper {
    pub(crate) fn new(shared: Arc<Shared>, deadline: Duration, interval: Duration) -> Self {
        Self {
            shared,
            deadline,
            interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub(crate) async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            deadline_secs = self.deadline.as_secs(),
            interval_ms = self.interval.as_millis() as u64,
            "Task expiry sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Task expiry sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    expire_overdue(&self.shared, self.deadline, Instant::now()).await;
                }
            }
        }
    }
}

/// Expire every task dispatched more than `deadline` before `now`: take
/// its metadata, return its capacity, and count it as a failed part.
/// Returns how many tasks expired.
pub(crate) async fn expire_overdue(shared: &Shared, deadline: Duration, now: Instant) -> usize {
    let expired = shared.tasks.take_expired(now, deadline);
    let count = expired.len();

    for meta in expired {
        shared.admission.release(&meta.task_id);
        tracing::warn!(
            job_id = %meta.job_id,
            part = %meta.part_key,
            task_id = %meta.task_id,
            "Task expired without callback",
        );
        shared.emit(PipelineEvent::TaskExpired {
            job_id: meta.job_id,
            part_key: meta.part_key.clone(),
            task_id: meta.task_id.clone(),
        });

        let outcome = PartOutcome::failed(FailureReason::Expired {
            task_id: meta.task_id,
        });
        if let Some(completion) = shared.jobs.mark_part_done(meta.job_id, &meta.part_key, outcome) {
            shared.complete(completion).await;
        }
    }

    count
}
