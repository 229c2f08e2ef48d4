use dupelink::config::{MemorySettings, ScanRequest, Settings};
use dupelink::job::{JobController, JobId, JobKind, JobStatus, MemoryJobStore, Phase};
use dupelink::memory::{MemoryAction, MemoryProbe};
use dupelink::progress::ProgressEvent;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

fn many_files(dir: &TempDir, count: usize) -> PathBuf {
    let root = dir.path().join("data");
    fs::create_dir(&root).unwrap();
    for i in 0..count {
        let content = format!("payload {}", i % (count / 4).max(1));
        fs::write(root.join(format!("file_{i:04}.txt")), content.repeat(64)).unwrap();
    }
    root
}

fn controller(dir: &TempDir) -> JobController {
    let settings = Settings {
        undo_dir: Some(dir.path().join("undo")),
        hash_threads: 2,
        ..Default::default()
    };
    JobController::new(Arc::new(MemoryJobStore::new()), settings)
}

fn wait_for(controller: &JobController, id: JobId, status: JobStatus) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let current = controller.get_progress(id).status;
        if current == status {
            return true;
        }
        if current.is_terminal() {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_pause_resume_never_decreases_progress() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 400);
    let controller = controller(&dir);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    let mut last = (Phase::FindingFiles, 0usize);
    loop {
        controller.pause(id).unwrap();
        let paused = controller.get_progress(id);
        thread::sleep(Duration::from_millis(2));
        let still_paused = controller.get_progress(id);
        controller.resume(id).unwrap();

        for snapshot in [&paused, &still_paused] {
            let current = (snapshot.phase, snapshot.processed);
            assert!(current >= last, "progress went from {last:?} to {current:?}");
            last = current;
        }
        if still_paused.status.is_terminal() {
            break;
        }
    }

    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Done);
    assert_eq!(controller.get_results(id).unwrap().duplicates.len(), 100);
}

#[test]
fn test_paused_job_reports_paused_until_resumed() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 200);
    let controller = controller(&dir);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    controller.pause(id).unwrap();
    let snapshot = controller.get_progress(id);
    if !snapshot.status.is_terminal() {
        assert!(snapshot.paused);
        let frozen = controller.get_progress(id);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(controller.get_progress(id).processed, frozen.processed);
        // pausing twice is a no-op
        controller.pause(id).unwrap();
        controller.resume(id).unwrap();
    }
    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Done);
}

#[test]
fn test_cancel_scan_ends_cancelled_without_results() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 200);
    let controller = controller(&dir);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    controller.pause(id).unwrap();
    controller.cancel(id).unwrap();
    controller.cancel(id).unwrap();

    let status = controller.wait(id, Some(Duration::from_secs(10))).unwrap();
    // A tiny scan can finish before the cancel is observed.
    assert!(matches!(status, JobStatus::Cancelled | JobStatus::Done));
    if status == JobStatus::Cancelled {
        assert!(controller.get_results(id).is_err());
    }
}

struct HugeProbe;

impl MemoryProbe for HugeProbe {
    fn rss_bytes(&self) -> Option<u64> {
        Some(u64::MAX / 2)
    }
}

fn memory_settings(dir: &TempDir, action: MemoryAction) -> Settings {
    Settings {
        undo_dir: Some(dir.path().join("undo")),
        memory: MemorySettings {
            ceiling_bytes: Some(1024),
            action,
            sample_interval_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_memory_ceiling_pauses_job_without_auto_resume() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 400);
    let controller = JobController::new(
        Arc::new(MemoryJobStore::new()),
        memory_settings(&dir, MemoryAction::Pause),
    )
    .with_memory_probe(Arc::new(HugeProbe));

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    assert!(wait_for(&controller, id, JobStatus::MemoryPaused));

    thread::sleep(Duration::from_millis(50));
    let snapshot = controller.get_progress(id);
    assert_eq!(snapshot.status, JobStatus::MemoryPaused);
    assert!(snapshot.paused);

    controller.cancel(id).unwrap();
    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Cancelled);
}

#[test]
fn test_memory_ceiling_abort_ends_in_error() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 400);
    let controller = JobController::new(
        Arc::new(MemoryJobStore::new()),
        memory_settings(&dir, MemoryAction::Abort),
    )
    .with_memory_probe(Arc::new(HugeProbe));

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    let status = controller.wait(id, None).unwrap();
    assert_eq!(status, JobStatus::Error);
    assert!(controller
        .get_progress(id)
        .last_error
        .unwrap()
        .contains("exceeds ceiling"));
}

#[test]
fn test_events_cover_every_scan_phase() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 40);
    let controller = controller(&dir);
    let events = controller.subscribe();

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    controller.wait(id, None).unwrap();

    let received: Vec<ProgressEvent> = events.try_iter().collect();
    let started: Vec<Phase> = received
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseStarted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![
            Phase::FindingFiles,
            Phase::PreHashing,
            Phase::FullHashing,
            Phase::AnalyzingHashes
        ]
    );
    assert!(received.iter().all(|e| e.job() == id));
    assert_eq!(
        received.last(),
        Some(&ProgressEvent::Finished {
            job: id,
            status: JobStatus::Done
        })
    );
}

#[test]
fn test_snapshot_after_completion() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 20);
    let controller = controller(&dir);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    controller.wait(id, None).unwrap();

    let snapshot = controller.get_progress(id);
    assert_eq!(snapshot.kind, JobKind::Scan);
    assert_eq!(snapshot.status, JobStatus::Done);
    assert_eq!(snapshot.percentage, 100);
    assert!(!snapshot.paused);
    assert!(snapshot.eta_seconds.is_none());
    assert!(snapshot.micro_progress.is_empty());

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["status"], "done");
    assert_eq!(json["phase"], "complete");
}

#[test]
fn test_jobs_lists_every_record() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 8);
    let controller = controller(&dir);

    let first = controller.start_scan(ScanRequest::new(vec![root.clone()])).unwrap();
    let second = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    assert_eq!(controller.wait(first, None).unwrap(), JobStatus::Done);
    assert_eq!(controller.wait(second, None).unwrap(), JobStatus::Done);

    let ids: Vec<JobId> = controller.jobs().iter().map(|s| s.job_id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(controller.cancel_all(), 0);
}

#[test]
fn test_auto_save_writes_results_file() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 8);
    let results_dir = dir.path().join("results");
    fs::create_dir(&results_dir).unwrap();
    let settings = Settings {
        undo_dir: Some(dir.path().join("undo")),
        results_dir: Some(results_dir.clone()),
        auto_save_results: true,
        ..Default::default()
    };
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Done);

    let saved = results_dir.join(format!("scan_results_{id}.json"));
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(saved).unwrap()).unwrap();
    let results = controller.get_results(id).unwrap();
    assert_eq!(
        json["summary"]["total_sets_found"],
        results.summary.total_sets_found
    );
    assert_eq!(
        json["duplicates"].as_array().unwrap().len(),
        results.duplicates.len()
    );
}

#[test]
fn test_auto_save_failure_is_a_warning() {
    let dir = tempdir().unwrap();
    let root = many_files(&dir, 8);
    let settings = Settings {
        undo_dir: Some(dir.path().join("undo")),
        results_dir: Some(dir.path().join("missing").join("nested")),
        auto_save_results: true,
        ..Default::default()
    };
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings);

    let id = controller.start_scan(ScanRequest::new(vec![root])).unwrap();
    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Done);

    let results = controller.get_results(id).unwrap();
    assert!(results
        .summary
        .warnings
        .iter()
        .any(|w| w.message.starts_with("Could not save scan results")));
}
