//! The orchestrator: owns all pipeline state and background tasks.
//!
//! Created once at startup via [`Orchestrator::start`]; the returned
//! `Arc` can be cloned into request handlers. Pipeline events are
//! broadcast on a [`tokio::sync::broadcast`] channel; call
//! [`Orchestrator::subscribe`] to receive them.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use diffserver_core::region::CoordOrigin;
use diffserver_core::types::{JobId, JobKind};
use diffserver_runninghub::{CallbackEvent, TaskService, Workflows};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::callback::{self, CallbackDisposition};
use crate::config::PipelineConfig;
use crate::dispatcher;
use crate::error::PipelineError;
use crate::events::PipelineEvent;
use crate::expiry::{self, ExpirySweeper};
use crate::jobs::{Completion, CompletionHook, JobProgress, JobRegistry};
use crate::pool::WorkerPool;
use crate::tasks::TaskRegistry;

/// Broadcast channel capacity for pipeline events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each background task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A batch submission: one source image and its region config.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub image: PathBuf,
    pub config: PathBuf,
    pub origin: CoordOrigin,
}

/// Counters for health reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineStats {
    pub capacity: usize,
    pub available: usize,
    pub inflight_tasks: usize,
    pub active_jobs: usize,
}

/// State shared by the orchestrator, its pool workers, and the sweeper.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) workflows: Workflows,
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) hook: Arc<dyn CompletionHook>,
    pub(crate) admission: AdmissionController,
    pub(crate) tasks: TaskRegistry,
    pub(crate) jobs: JobRegistry,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Shared {
    pub(crate) fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Publish a finished job and run its hook. Called by whichever
    /// path counted the last part, with no locks held.
    pub(crate) async fn complete(&self, completion: Completion) {
        let Completion { report, hook } = completion;
        tracing::info!(
            job_id = %report.job_id,
            kind = ?report.kind,
            expected = report.expected,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Job completed",
        );
        self.emit(PipelineEvent::JobCompleted {
            report: report.clone(),
        });

        let job_id = report.job_id;
        if let Err(e) = hook.on_complete(report).await {
            tracing::error!(job_id = %job_id, error = %e, "Completion hook failed");
        }
    }
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    submit_pool: WorkerPool,
    callback_pool: WorkerPool,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build the pipeline and spawn its workers and expiry sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        workflows: Workflows,
        service: Arc<dyn TaskService>,
        hook: Arc<dyn CompletionHook>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let submit_pool = WorkerPool::new("submit", config.submit_workers, config.queue_capacity);
        let callback_pool =
            WorkerPool::new("callback", config.callback_workers, config.queue_capacity);

        let shared = Arc::new(Shared {
            admission: AdmissionController::new(config.max_inflight),
            tasks: TaskRegistry::new(),
            jobs: JobRegistry::new(),
            config,
            workflows,
            service,
            hook,
            event_tx,
        });

        let sweeper = shared.config.task_deadline.map(|deadline| {
            let sweeper =
                ExpirySweeper::new(Arc::clone(&shared), deadline, shared.config.sweep_interval);
            let token = cancel.clone();
            tokio::spawn(async move { sweeper.run(token).await })
        });

        tracing::info!(
            max_inflight = shared.config.max_inflight,
            submit_workers = shared.config.submit_workers,
            callback_workers = shared.config.callback_workers,
            expiry = sweeper.is_some(),
            "Orchestrator started",
        );

        Arc::new(Self {
            shared,
            submit_pool,
            callback_pool,
            cancel,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Queue a whole-image job. Returns as soon as the job is queued.
    pub fn submit_image(&self, source: impl Into<PathBuf>) -> Result<JobId, PipelineError> {
        let source = source.into();
        if source.as_os_str().is_empty() {
            return Err(PipelineError::Validation("image path is empty".into()));
        }

        let job_id = self
            .shared
            .jobs
            .start_job(JobKind::WholeImage, 1, Arc::clone(&self.shared.hook));

        let shared = Arc::clone(&self.shared);
        let work = dispatcher::dispatch_whole_image(shared, job_id, source.clone());
        if let Err(e) = self.submit_pool.try_submit(work) {
            self.shared.jobs.discard(job_id);
            return Err(e);
        }

        tracing::info!(job_id = %job_id, image = %source.display(), "Whole-image job queued");
        Ok(job_id)
    }

    /// Queue a batch job. Regions are extracted on the submission pool,
    /// so the job becomes visible to [`job_progress`](Self::job_progress)
    /// only once its part count is known.
    pub fn submit_batch(&self, request: BatchRequest) -> Result<JobId, PipelineError> {
        if request.image.as_os_str().is_empty() || request.config.as_os_str().is_empty() {
            return Err(PipelineError::Validation(
                "image and config paths are required".into(),
            ));
        }

        let job_id = JobId::new();
        let image = request.image.clone();
        let shared = Arc::clone(&self.shared);
        self.submit_pool
            .try_submit(dispatcher::dispatch_batch(shared, job_id, request))?;

        tracing::info!(job_id = %job_id, image = %image.display(), "Batch job queued");
        Ok(job_id)
    }

    /// Ingest one completion callback. Returns without waiting on the
    /// callback pool or any remote I/O.
    pub async fn handle_callback(&self, event: CallbackEvent) -> CallbackDisposition {
        callback::ingest(&self.shared, &self.callback_pool, event)
    }

    pub fn job_progress(&self, job_id: JobId) -> Option<JobProgress> {
        self.shared.jobs.progress(job_id)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            capacity: self.shared.admission.capacity(),
            available: self.shared.admission.available(),
            inflight_tasks: self.shared.tasks.len(),
            active_jobs: self.shared.jobs.len(),
        }
    }

    /// Run one expiry pass now, regardless of the sweep interval.
    /// Returns how many tasks expired; always 0 when expiry is disabled.
    pub async fn expire_overdue(&self) -> usize {
        match self.shared.config.task_deadline {
            Some(deadline) => expiry::expire_overdue(&self.shared, deadline, Instant::now()).await,
            None => 0,
        }
    }

    /// Stop the sweeper, fail waiting submissions, and drain both pools.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.cancel.cancel();

        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
        }

        self.shared.admission.close();
        self.submit_pool.shutdown(SHUTDOWN_TIMEOUT).await;
        self.callback_pool.shutdown(SHUTDOWN_TIMEOUT).await;

        tracing::info!(
            inflight_tasks = self.shared.tasks.len(),
            active_jobs = self.shared.jobs.len(),
            "Orchestrator shut down complete",
        );
    }
}
