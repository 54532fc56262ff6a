#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use diffserver_core::patch::encode_png;
use diffserver_core::types::{JobId, PartKey, TaskId};
use diffserver_pipeline::{CompletionHook, JobReport, Orchestrator, PipelineConfig, PipelineEvent};
use diffserver_runninghub::{CallbackEvent, NodeInfo, RunningHubError, TaskService, Workflows};
use image::{DynamicImage, Rgba, RgbaImage};
use tokio::sync::{broadcast, mpsc, watch};

pub const WHOLE_WORKFLOW: &str = "wf-whole";
pub const BATCH_WORKFLOW: &str = "wf-batch";

/// Blocks callers while held; open by default.
pub struct Gate(watch::Sender<bool>);

impl Gate {
    fn new() -> Self {
        Self(watch::channel(true).0)
    }

    pub fn hold(&self) {
        self.0.send_replace(false);
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// In-memory stand-in for RunningHub.
///
/// Uploads whose file name contains `fail`, or any needle added with
/// [`reject_uploads_containing`](Self::reject_uploads_containing), are
/// rejected; downloads of a URL containing `missing` return 404. Every
/// other download returns [`result_png`].
pub struct FakeTaskService {
    next_id: AtomicUsize,
    pub uploads: Mutex<Vec<String>>,
    pub created: Mutex<Vec<(String, Vec<NodeInfo>)>>,
    pub downloads: AtomicUsize,
    pub creates_started: AtomicUsize,
    rejected: Mutex<Vec<String>>,
    /// Held task creations wait before returning their id.
    pub create_gate: Gate,
    /// Held downloads wait before returning bytes.
    pub download_gate: Gate,
    result: Vec<u8>,
}

impl FakeTaskService {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            uploads: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
            creates_started: AtomicUsize::new(0),
            rejected: Mutex::new(Vec::new()),
            create_gate: Gate::new(),
            download_gate: Gate::new(),
            result: result_png(),
        }
    }

    pub fn reject_uploads_containing(&self, needle: &str) {
        self.rejected.lock().unwrap().push(needle.to_string());
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn result_bytes(&self) -> &[u8] {
        &self.result
    }
}

#[async_trait]
impl TaskService for FakeTaskService {
    async fn upload(&self, _bytes: Vec<u8>, file_name: &str) -> Result<String, RunningHubError> {
        let rejected = self
            .rejected
            .lock()
            .unwrap()
            .iter()
            .any(|needle| file_name.contains(needle.as_str()));
        if rejected || file_name.contains("fail") {
            return Err(RunningHubError::Api {
                code: 1001,
                msg: "upload rejected".into(),
            });
        }
        self.uploads.lock().unwrap().push(file_name.to_string());
        Ok(format!("api/{file_name}"))
    }

    async fn create_task(
        &self,
        workflow_id: &str,
        nodes: &[NodeInfo],
    ) -> Result<TaskId, RunningHubError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.creates_started.fetch_add(1, Ordering::SeqCst);
        self.create_gate.pass().await;
        self.created
            .lock()
            .unwrap()
            .push((workflow_id.to_string(), nodes.to_vec()));
        Ok(format!("task-{id}"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, RunningHubError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.download_gate.pass().await;
        if url.contains("missing") {
            return Err(RunningHubError::HttpStatus {
                status: 404,
                body: "not found".into(),
            });
        }
        Ok(self.result.clone())
    }
}

/// Forwards every report to a channel.
pub struct ChannelHook {
    tx: mpsc::UnboundedSender<JobReport>,
}

#[async_trait]
impl CompletionHook for ChannelHook {
    async fn on_complete(
        &self,
        report: JobReport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.tx.send(report)?;
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub service: Arc<FakeTaskService>,
    pub reports: mpsc::UnboundedReceiver<JobReport>,
    pub events: broadcast::Receiver<PipelineEvent>,
    pub dir: tempfile::TempDir,
}

/// Small pools, no expiry.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_inflight: 30,
        submit_workers: 2,
        callback_workers: 2,
        queue_capacity: 16,
        task_deadline: None,
        sweep_interval: Duration::from_secs(3600),
        ..PipelineConfig::default()
    }
}

pub fn workflows() -> Workflows {
    Workflows {
        whole_image: WHOLE_WORKFLOW.into(),
        batch: BATCH_WORKFLOW.into(),
    }
}

pub fn start(config: PipelineConfig) -> Harness {
    let service = Arc::new(FakeTaskService::new());
    let (tx, reports) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::start(
        config,
        workflows(),
        Arc::clone(&service) as Arc<dyn TaskService>,
        Arc::new(ChannelHook { tx }),
    );
    let events = orchestrator.subscribe();
    Harness {
        orchestrator,
        service,
        reports,
        events,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Harness {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write an opaque gradient image and return its path.
    pub fn write_image(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let path = self.path(name);
        img.save(&path).unwrap();
        path
    }

    pub fn write_regions(&self, name: &str, json: serde_json::Value) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    /// Wait for the next `TaskDispatched` event, skipping others.
    pub async fn next_dispatched(&mut self) -> (JobId, PartKey, TaskId) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(PipelineEvent::TaskDispatched {
                        job_id,
                        part_key,
                        task_id,
                    }) => return (job_id, part_key, task_id),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for a dispatched task")
    }

    /// Wait for the next `DispatchFailed` event, skipping others.
    pub async fn next_dispatch_failure(&mut self) -> (JobId, Option<PartKey>, String) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Ok(PipelineEvent::DispatchFailed {
                        job_id,
                        part_key,
                        error,
                    }) => return (job_id, part_key, error),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event channel closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for a dispatch failure")
    }

    pub async fn report(&mut self) -> JobReport {
        tokio::time::timeout(Duration::from_secs(5), self.reports.recv())
            .await
            .expect("timed out waiting for a job report")
            .expect("hook channel closed")
    }

    /// Assert no further report arrives within a short window.
    pub async fn assert_no_report(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(150), self.reports.recv()).await;
        assert!(extra.is_err(), "unexpected extra job report");
    }
}

pub fn success(task_id: &str) -> CallbackEvent {
    CallbackEvent::Success {
        task_id: task_id.into(),
        file_url: format!("https://cdn.example/{task_id}.png"),
    }
}

/// The image every successful fake download returns: 64x64, opaque.
pub fn result_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(64, 64, Rgba([10, 20, 30, 255]));
    encode_png(&DynamicImage::ImageRgba8(img)).unwrap()
}

/// A region spanning the given normalized rectangle.
pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "points": [
            {"x": x0, "y": y0},
            {"x": x1, "y": y0},
            {"x": x1, "y": y1},
            {"x": x0, "y": y1}
        ],
        "text": text
    })
}

pub fn decode(path: &Path) -> RgbaImage {
    image::open(path).unwrap().to_rgba8()
}
