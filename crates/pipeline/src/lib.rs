//! Job orchestration against the RunningHub task service.
//!
//! The [`Orchestrator`](orchestrator::Orchestrator) owns every piece of
//! shared state: the admission gate over outstanding remote tasks, the
//! task and job registries, the submission and callback worker pools,
//! and the expiry sweeper. Jobs go in through the submission entry
//! points, remote completion comes back through
//! [`Orchestrator::handle_callback`](orchestrator::Orchestrator::handle_callback),
//! and finished jobs are handed to a [`CompletionHook`](jobs::CompletionHook).

pub mod admission;
mod callback;
pub mod config;
mod dispatcher;
pub mod error;
pub mod events;
mod expiry;
pub mod jobs;
pub mod orchestrator;
pub mod pool;
pub mod tasks;

pub use callback::{CallbackDisposition, DiscardReason};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use events::PipelineEvent;
pub use jobs::{CompletionHook, FailureReason, JobProgress, JobReport, PartOutcome};
pub use orchestrator::{BatchRequest, Orchestrator, PipelineStats};
