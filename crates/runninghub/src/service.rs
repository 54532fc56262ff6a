//! The remote task service contract.
//!
//! The pipeline only ever talks to the remote side through this trait,
//! so tests can substitute an in-memory fake for [`RunningHubApi`].
//!
//! [`RunningHubApi`]: crate::api::RunningHubApi

use async_trait::async_trait;
use diffserver_core::types::TaskId;

use crate::api::RunningHubError;
use crate::workflow::NodeInfo;

/// Upload / create-task / download, as exposed by the remote service.
///
/// None of these retry internally.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Upload image bytes; returns the remote file handle to reference
    /// from node parameters.
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String, RunningHubError>;

    /// Create a task on `workflow_id`. Completion is reported later via
    /// the configured webhook.
    async fn create_task(
        &self,
        workflow_id: &str,
        nodes: &[NodeInfo],
    ) -> Result<TaskId, RunningHubError>;

    /// Fetch a result file by URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, RunningHubError>;
}
