#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use diffserver_api::config::ServerConfig;
use diffserver_api::hooks::LogReport;
use diffserver_api::router::build_app_router;
use diffserver_api::state::AppState;
use diffserver_core::patch::encode_png;
use diffserver_core::types::TaskId;
use diffserver_pipeline::{Orchestrator, PipelineConfig, PipelineEvent};
use diffserver_runninghub::{NodeInfo, RunningHubError, TaskService, Workflows};
use http_body_util::BodyExt;
use image::{DynamicImage, Rgba, RgbaImage};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// RunningHub stand-in: every upload and task creation succeeds, every
/// download returns a small opaque PNG.
pub struct FakeTaskService {
    next_id: AtomicUsize,
}

#[async_trait]
impl TaskService for FakeTaskService {
    async fn upload(&self, _bytes: Vec<u8>, file_name: &str) -> Result<String, RunningHubError> {
        Ok(format!("api/{file_name}"))
    }

    async fn create_task(
        &self,
        _workflow_id: &str,
        _nodes: &[NodeInfo],
    ) -> Result<TaskId, RunningHubError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("task-{id}"))
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, RunningHubError> {
        let img = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));
        Ok(encode_png(&DynamicImage::ImageRgba8(img)).unwrap())
    }
}

pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    pub events: broadcast::Receiver<PipelineEvent>,
    pub dir: tempfile::TempDir,
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["*".into()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

pub fn build_test_app() -> TestApp {
    let pipeline = PipelineConfig {
        max_inflight: 4,
        submit_workers: 1,
        callback_workers: 1,
        queue_capacity: 8,
        task_deadline: None,
        ..PipelineConfig::default()
    };
    let workflows = Workflows {
        whole_image: "wf-whole".into(),
        batch: "wf-batch".into(),
    };
    let service = Arc::new(FakeTaskService {
        next_id: AtomicUsize::new(1),
    });
    let orchestrator = Orchestrator::start(pipeline, workflows, service, Arc::new(LogReport));
    let events = orchestrator.subscribe();

    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::clone(&orchestrator),
    };

    TestApp {
        router: build_app_router(state, &config),
        orchestrator,
        events,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl TestApp {
    /// Write an opaque test image into the temp dir and return its path.
    pub fn write_image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        RgbaImage::from_pixel(16, 16, Rgba([200, 100, 50, 255]))
            .save(&path)
            .unwrap();
        path
    }

    /// Wait for the next dispatched task id.
    pub async fn next_task(&mut self) -> TaskId {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Ok(PipelineEvent::TaskDispatched { task_id, .. }) => return task_id,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for a dispatched task")
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_raw(app: &Router, uri: &str, body: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::post(uri).body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
