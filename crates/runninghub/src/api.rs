//! REST API client for the RunningHub OpenAPI endpoints.
//!
//! Wraps image upload, task creation and result download using
//! [`reqwest`]. Every OpenAPI response is a `{code, msg, data}` envelope;
//! a non-zero `code` is surfaced as [`RunningHubError::Api`].

use async_trait::async_trait;
use diffserver_core::types::TaskId;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::RunningHubConfig;
use crate::messages::id_from_value;
use crate::service::TaskService;
use crate::workflow::NodeInfo;

/// HTTP client for the RunningHub service.
pub struct RunningHubApi {
    client: reqwest::Client,
    config: RunningHubConfig,
}

/// Errors from the RunningHub REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum RunningHubError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// RunningHub returned a non-2xx status code.
    #[error("RunningHub HTTP error ({status}): {body}")]
    HttpStatus { status: u16, body: String },

    /// The envelope carried a non-zero `code`.
    #[error("RunningHub API error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    /// A successful envelope lacked the expected payload.
    #[error("RunningHub response missing {0}")]
    MissingData(&'static str),
}

/// The `{code, msg, data}` wrapper around every OpenAPI response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskData {
    #[serde(rename = "taskId")]
    task_id: Option<serde_json::Value>,
}

impl RunningHubApi {
    /// Build a client with the configured request timeout.
    pub fn new(config: RunningHubConfig) -> Result<Self, RunningHubError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    // ---- private helpers ----

    /// Return the response unchanged on a 2xx status, otherwise an
    /// [`RunningHubError::HttpStatus`] with the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RunningHubError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RunningHubError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Check the status, then unwrap the envelope's `data`.
    async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunningHubError> {
        let response = Self::ensure_success(response).await?;
        let envelope: Envelope<T> = response.json().await?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, RunningHubError> {
    if envelope.code != 0 {
        return Err(RunningHubError::Api {
            code: envelope.code,
            msg: envelope.msg.unwrap_or_default(),
        });
    }
    envelope.data.ok_or(RunningHubError::MissingData("data"))
}

/// MIME type for an upload, from the file extension.
fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl TaskService for RunningHubApi {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String, RunningHubError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(guess_mime(file_name))?;
        let form = reqwest::multipart::Form::new()
            .text("apiKey", self.config.api_key.clone())
            .text("fileType", "image")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/task/openapi/upload", self.config.api_base))
            .multipart(form)
            .send()
            .await?;

        let data: UploadData = Self::parse_envelope(response).await?;
        let remote = data
            .file_name
            .filter(|name| !name.is_empty())
            .ok_or(RunningHubError::MissingData("data.fileName"))?;

        tracing::debug!(file_name, remote = %remote, "Uploaded image to RunningHub");
        Ok(remote)
    }

    async fn create_task(
        &self,
        workflow_id: &str,
        nodes: &[NodeInfo],
    ) -> Result<TaskId, RunningHubError> {
        let body = serde_json::json!({
            "apiKey": self.config.api_key,
            "workflowId": workflow_id,
            "nodeInfoList": nodes,
            "webhookUrl": self.config.webhook_url,
        });

        let response = self
            .client
            .post(format!("{}/task/openapi/create", self.config.api_base))
            .json(&body)
            .send()
            .await?;

        let data: CreateTaskData = Self::parse_envelope(response).await?;
        let task_id = data
            .task_id
            .as_ref()
            .and_then(id_from_value)
            .ok_or(RunningHubError::MissingData("data.taskId"))?;

        tracing::debug!(workflow_id, task_id = %task_id, "Created RunningHub task");
        Ok(task_id)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RunningHubError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
