//! Completion hooks installed by the server binary.

use async_trait::async_trait;
use diffserver_pipeline::{CompletionHook, JobReport, PartOutcome};

/// Logs each finished job, one line per failed part.
pub struct LogReport;

#[async_trait]
impl CompletionHook for LogReport {
    async fn on_complete(
        &self,
        report: JobReport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for part in &report.parts {
            if let PartOutcome::Failed { reason } = &part.outcome {
                tracing::warn!(
                    job_id = %report.job_id,
                    part = %part.part_key,
                    reason = %reason,
                    "Part failed",
                );
            }
        }
        tracing::info!(
            job_id = %report.job_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            full_success = report.is_full_success(),
            "Job report",
        );
        Ok(())
    }
}
