mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use assert_matches::assert_matches;
use diffserver_core::region::CoordOrigin;
use diffserver_core::types::JobKind;
use diffserver_pipeline::{
    BatchRequest, CallbackDisposition, DiscardReason, FailureReason, PartOutcome,
};
use diffserver_runninghub::CallbackEvent;
use serde_json::json;

use common::{rect, start, success, test_config, BATCH_WORKFLOW, WHOLE_WORKFLOW};

#[tokio::test]
async fn whole_image_job_completes_once() {
    let mut h = start(test_config());
    let source = h.write_image("scene.png", 40, 30);

    let job_id = h.orchestrator.submit_image(&source).unwrap();
    let (dispatched_job, part, task_id) = h.next_dispatched().await;
    assert_eq!(dispatched_job, job_id);
    assert_eq!(part, "0");
    assert_eq!(h.orchestrator.stats().available, 29);

    let created = h.service.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, WHOLE_WORKFLOW);
    assert_eq!(created[0].1[0].node_id, "200");
    assert_eq!(created[0].1[0].field_value, "api/scene.png");

    let disposition = h.orchestrator.handle_callback(success(&task_id)).await;
    assert_eq!(disposition, CallbackDisposition::Accepted { task_id });

    let report = h.report().await;
    assert_eq!(report.job_id, job_id);
    assert_eq!(report.kind, JobKind::WholeImage);
    assert_eq!(report.expected, 1);
    assert!(report.is_full_success());

    let expected_output = h.path("scene_proto.png");
    assert_matches!(
        &report.parts[0].outcome,
        PartOutcome::Saved { path } if *path == expected_output
    );
    // Whole images are saved exactly as downloaded.
    assert_eq!(
        std::fs::read(&expected_output).unwrap(),
        h.service.result_bytes()
    );

    h.assert_no_report().await;
    let stats = h.orchestrator.stats();
    assert_eq!(stats.available, stats.capacity);
    assert_eq!(stats.inflight_tasks, 0);
    assert_eq!(stats.active_jobs, 0);
}

#[tokio::test]
async fn batch_skips_degenerate_region_and_feathers_patches() {
    let mut h = start(test_config());
    let source = h.write_image("room.png", 100, 80);
    let regions = h.write_regions(
        "room.json",
        json!({
            "differences": [
                rect(0.1, 0.1, 0.4, 0.4, "add a lamp"),
                rect(0.0, 0.2, 0.0, 0.6, "zero width"),
                rect(0.6, 0.6, 0.9, 0.9, "remove the chair"),
                rect(0.0, 0.5, 0.3, 1.0, "paint the wall"),
            ]
        }),
    );

    let job_id = h
        .orchestrator
        .submit_batch(BatchRequest {
            image: source,
            config: regions,
            origin: CoordOrigin::TopLeft,
        })
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let (dispatched_job, part, task_id) = h.next_dispatched().await;
        assert_eq!(dispatched_job, job_id);
        tasks.push((part, task_id));
    }
    let progress = h.orchestrator.job_progress(job_id).unwrap();
    assert_eq!(progress.expected, 3);

    let created = h.service.created.lock().unwrap().clone();
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|(wf, _)| wf == BATCH_WORKFLOW));
    let prompts: BTreeSet<_> = created
        .iter()
        .map(|(_, nodes)| nodes[0].field_value.clone())
        .collect();
    assert!(prompts.contains("add a lamp"));
    assert!(!prompts.contains("zero width"));

    for (_, task_id) in &tasks {
        h.orchestrator.handle_callback(success(task_id)).await;
    }

    let report = h.report().await;
    assert_eq!(report.kind, JobKind::Batch);
    assert_eq!(report.expected, 3);
    assert_eq!(report.parts.len(), 3);
    assert!(report.is_full_success());
    let parts: BTreeSet<_> = report.parts.iter().map(|p| p.part_key.as_str()).collect();
    assert_eq!(parts, BTreeSet::from(["0", "2", "3"]));

    let patch = common::decode(&h.path("room_region2.png"));
    assert_eq!(patch.get_pixel(0, 0)[3], 0, "outer ring is transparent");
    assert_eq!(patch.get_pixel(32, 32)[3], 255, "interior beyond radius is opaque");
    assert!(!h.path("room_region1.png").exists());

    h.assert_no_report().await;
}

#[tokio::test]
async fn redelivered_callback_changes_nothing() {
    let mut h = start(test_config());
    let source = h.write_image("dup.png", 20, 20);
    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;

    let first = h.orchestrator.handle_callback(success(&task_id)).await;
    assert_matches!(first, CallbackDisposition::Accepted { .. });
    let report = h.report().await;
    assert_eq!(report.parts.len(), 1);

    let second = h.orchestrator.handle_callback(success(&task_id)).await;
    assert_eq!(
        second,
        CallbackDisposition::Discarded {
            task_id: Some(task_id),
            reason: DiscardReason::UnknownTask,
        }
    );

    h.assert_no_report().await;
    assert_eq!(h.service.download_count(), 1);
    let stats = h.orchestrator.stats();
    assert_eq!(stats.available, stats.capacity);
}

#[tokio::test]
async fn redelivery_before_processing_is_also_discarded() {
    let mut h = start(test_config());
    let source = h.write_image("race.png", 20, 20);
    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;

    let (a, b) = tokio::join!(
        h.orchestrator.handle_callback(success(&task_id)),
        h.orchestrator.handle_callback(success(&task_id)),
    );
    let accepted = [&a, &b]
        .iter()
        .filter(|d| matches!(d, CallbackDisposition::Accepted { .. }))
        .count();
    assert_eq!(accepted, 1);

    h.report().await;
    h.assert_no_report().await;
    assert_eq!(h.service.download_count(), 1);
}

#[tokio::test]
async fn third_submission_waits_for_capacity() {
    let mut config = test_config();
    config.max_inflight = 2;
    config.submit_workers = 3;
    let mut h = start(config);

    for name in ["a.png", "b.png", "c.png"] {
        let source = h.write_image(name, 10, 10);
        h.orchestrator.submit_image(&source).unwrap();
    }

    let (_, _, first_task) = h.next_dispatched().await;
    let _ = h.next_dispatched().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.service.created_count(), 2, "third task must wait");
    assert_eq!(h.orchestrator.stats().available, 0);

    h.orchestrator.handle_callback(success(&first_task)).await;
    let _ = h.next_dispatched().await;
    assert_eq!(h.service.created_count(), 3);
}

#[tokio::test]
async fn dispatch_failure_returns_capacity_and_completes_job() {
    let mut config = test_config();
    config.max_inflight = 1;
    let mut h = start(config);

    let bad = h.write_image("fail.png", 10, 10);
    let good = h.write_image("good.png", 10, 10);
    let bad_job = h.orchestrator.submit_image(&bad).unwrap();

    let (failed_job, part, error) = h.next_dispatch_failure().await;
    assert_eq!(failed_job, bad_job);
    assert_eq!(part.as_deref(), Some("0"));
    assert!(error.contains("upload rejected"));

    let report = h.report().await;
    assert_eq!(report.job_id, bad_job);
    assert_matches!(
        &report.parts[0].outcome,
        PartOutcome::Failed { reason: FailureReason::DispatchFailed { .. } }
    );

    h.orchestrator.submit_image(&good).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;
    assert!(task_id.starts_with("task-"));
}

#[tokio::test]
async fn batch_without_usable_regions_completes_immediately() {
    let mut h = start(test_config());
    let source = h.write_image("empty.png", 50, 50);
    let regions = h.write_regions(
        "empty.json",
        json!({
            "differences": [
                {"points": [{"x": 0.1, "y": 0.1}, {"x": 0.2, "y": 0.2}], "text": "too few"},
                rect(0.0, 0.5, 0.0, 0.9, "zero width"),
            ]
        }),
    );

    let job_id = h
        .orchestrator
        .submit_batch(BatchRequest {
            image: source,
            config: regions,
            origin: CoordOrigin::BottomLeft,
        })
        .unwrap();

    let report = h.report().await;
    assert_eq!(report.job_id, job_id);
    assert_eq!(report.kind, JobKind::Batch);
    assert_eq!(report.expected, 0);
    assert!(report.parts.is_empty());

    h.assert_no_report().await;
    assert!(h.service.uploads.lock().unwrap().is_empty());
    assert_eq!(h.service.created_count(), 0);
    let stats = h.orchestrator.stats();
    assert_eq!(stats.available, stats.capacity);
}

#[tokio::test]
async fn remote_failure_counts_without_download() {
    let mut h = start(test_config());
    let source = h.write_image("broken.png", 20, 20);
    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;
    assert_eq!(h.orchestrator.stats().available, 29);

    let disposition = h
        .orchestrator
        .handle_callback(CallbackEvent::Failure {
            task_id: task_id.clone(),
            code: 805,
        })
        .await;
    assert_matches!(disposition, CallbackDisposition::Accepted { .. });
    assert_eq!(h.orchestrator.stats().available, 30);

    let report = h.report().await;
    assert_eq!(report.failed(), 1);
    assert_eq!(
        report.parts[0].outcome,
        PartOutcome::Failed {
            reason: FailureReason::RemoteFailed { code: 805 }
        }
    );
    assert_eq!(h.service.download_count(), 0);
    assert!(!h.path("broken_proto.png").exists());
}

#[tokio::test]
async fn failed_download_is_counted_as_failed_part() {
    let mut h = start(test_config());
    let source = h.write_image("gone.png", 20, 20);
    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;

    h.orchestrator
        .handle_callback(CallbackEvent::Success {
            task_id,
            file_url: "https://cdn.example/missing.png".into(),
        })
        .await;

    let report = h.report().await;
    assert_matches!(
        &report.parts[0].outcome,
        PartOutcome::Failed { reason: FailureReason::Download { .. } }
    );
}

#[tokio::test]
async fn malformed_callback_with_known_task_counts_as_failed() {
    let mut h = start(test_config());
    let source = h.write_image("odd.png", 20, 20);
    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;

    h.orchestrator
        .handle_callback(CallbackEvent::Malformed {
            task_id: Some(task_id),
            reason: "missing eventData".into(),
        })
        .await;

    let report = h.report().await;
    assert_matches!(
        &report.parts[0].outcome,
        PartOutcome::Failed { reason: FailureReason::Malformed { .. } }
    );
    assert_eq!(h.service.download_count(), 0);
}

#[tokio::test]
async fn callbacks_without_known_task_are_discarded() {
    let h = start(test_config());

    let missing = h
        .orchestrator
        .handle_callback(CallbackEvent::Malformed {
            task_id: None,
            reason: "missing taskId".into(),
        })
        .await;
    assert_matches!(
        missing,
        CallbackDisposition::Discarded {
            reason: DiscardReason::MissingTaskId,
            ..
        }
    );

    let unknown = h.orchestrator.handle_callback(success("stranger")).await;
    assert_matches!(
        unknown,
        CallbackDisposition::Discarded {
            reason: DiscardReason::UnknownTask,
            ..
        }
    );
    let stats = h.orchestrator.stats();
    assert_eq!(stats.available, stats.capacity);
}

#[tokio::test]
async fn unreadable_region_config_completes_empty_and_reports_failure() {
    let mut h = start(test_config());
    let source = h.write_image("img.png", 20, 20);

    let job_id = h
        .orchestrator
        .submit_batch(BatchRequest {
            image: source,
            config: h.path("does-not-exist.json"),
            origin: CoordOrigin::TopLeft,
        })
        .unwrap();

    let (failed_job, part, _) = h.next_dispatch_failure().await;
    assert_eq!(failed_job, job_id);
    assert!(part.is_none());

    let report = h.report().await;
    assert_eq!(report.job_id, job_id);
    assert!(report.parts.is_empty());
}

#[tokio::test]
async fn empty_paths_are_rejected() {
    let h = start(test_config());
    assert!(h.orchestrator.submit_image("").is_err());
    assert!(h
        .orchestrator
        .submit_batch(BatchRequest {
            image: "a.png".into(),
            config: "".into(),
            origin: CoordOrigin::TopLeft,
        })
        .is_err());
}

#[tokio::test]
async fn batch_with_one_rejected_patch_completes_with_that_part_failed() {
    let mut h = start(test_config());
    h.service.reject_uploads_containing("_region1");
    let source = h.write_image("hall.png", 100, 80);
    let regions = h.write_regions(
        "hall.json",
        json!({
            "differences": [
                rect(0.1, 0.1, 0.4, 0.4, "hang a mirror"),
                rect(0.5, 0.1, 0.9, 0.4, "rejected upstream"),
                rect(0.1, 0.5, 0.4, 0.9, "add a rug"),
            ]
        }),
    );

    let job_id = h
        .orchestrator
        .submit_batch(BatchRequest {
            image: source,
            config: regions,
            origin: CoordOrigin::TopLeft,
        })
        .unwrap();

    // Patches dispatch in index order on one submission worker.
    let (_, first_part, first_task) = h.next_dispatched().await;
    assert_eq!(first_part, "0");
    let (failed_job, failed_part, error) = h.next_dispatch_failure().await;
    assert_eq!(failed_job, job_id);
    assert_eq!(failed_part.as_deref(), Some("1"));
    assert!(error.contains("upload rejected"), "{error}");
    let (_, last_part, last_task) = h.next_dispatched().await;
    assert_eq!(last_part, "2");

    let progress = h.orchestrator.job_progress(job_id).unwrap();
    assert_eq!(progress.expected, 3);
    assert_eq!(progress.done, 1);
    assert_eq!(progress.failed, 1);
    // The rejected patch gave its permit back straight away.
    assert_eq!(h.orchestrator.stats().available, 28);

    h.orchestrator.handle_callback(success(&first_task)).await;
    h.orchestrator.handle_callback(success(&last_task)).await;

    let report = h.report().await;
    assert_eq!(report.job_id, job_id);
    assert_eq!(report.expected, 3);
    assert_eq!(report.parts.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let rejected = report.parts.iter().find(|p| p.part_key == "1").unwrap();
    assert_matches!(
        &rejected.outcome,
        PartOutcome::Failed {
            reason: FailureReason::DispatchFailed { .. }
        }
    );
    assert!(h.path("hall_region0.png").exists());
    assert!(!h.path("hall_region1.png").exists());
    assert!(h.path("hall_region2.png").exists());

    h.assert_no_report().await;
    let stats = h.orchestrator.stats();
    assert_eq!(stats.available, stats.capacity);
    assert_eq!(stats.inflight_tasks, 0);
    assert_eq!(stats.active_jobs, 0);
}

#[tokio::test]
async fn whole_image_result_matches_source_extension() {
    let mut h = start(test_config());
    let source = h.path("shot.jpg");
    image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(20, 20, image::Rgb([90, 60, 30])))
        .save(&source)
        .unwrap();

    h.orchestrator.submit_image(&source).unwrap();
    let (_, _, task_id) = h.next_dispatched().await;
    h.orchestrator.handle_callback(success(&task_id)).await;

    let report = h.report().await;
    assert!(report.is_full_success());
    let output = h.path("shot_proto.jpg");
    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    // The downloaded result is 64x64, unlike the 20x20 source.
    assert_eq!(image::load_from_memory(&bytes).unwrap().width(), 64);
}
