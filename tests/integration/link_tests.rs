use dupelink::actions::{
    plan_actions, ActionState, FileSystemOps, LinkExecutor, LinkKind, SpaceSaved, StdFileSystem,
    UndoLog,
};
use dupelink::config::{ScanConfig, ScanRequest, Settings};
use dupelink::duplicates::{DuplicateFinder, FinderConfig, OriginalStrategy, ScanResults};
use dupelink::job::{JobControl, JobController, JobId, JobStatus, LinkRequest, MemoryJobStore};
use dupelink::scanner::FileIdentity;
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn settings(dir: &TempDir) -> Settings {
    Settings {
        undo_dir: Some(dir.path().join("undo")),
        hash_threads: 2,
        ..Default::default()
    }
}

fn data_root(dir: &TempDir) -> PathBuf {
    let root = dir.path().join("data");
    fs::create_dir(&root).unwrap();
    root
}

fn scan_and_wait(controller: &JobController, root: &Path) -> JobId {
    let id = controller
        .start_scan(ScanRequest::new(vec![root.to_path_buf()]))
        .unwrap();
    assert_eq!(controller.wait(id, None).unwrap(), JobStatus::Done);
    id
}

fn scan_direct(root: &Path) -> ScanResults {
    let config = ScanConfig::build(&ScanRequest::new(vec![root.to_path_buf()]), &Settings::default())
        .unwrap();
    DuplicateFinder::new(FinderConfig::new(config))
        .find_duplicates()
        .unwrap()
}

#[cfg(unix)]
#[test]
fn test_hardlink_job_links_and_verifies() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a.txt"), b"same content").unwrap();
    fs::write(root.join("b.txt"), b"same content").unwrap();
    fs::write(root.join("c.txt"), b"same content").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Hard))
        .unwrap();
    assert_eq!(controller.wait(link, None).unwrap(), JobStatus::Done);

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_linked, 2);
    assert_eq!(result.files_verified, 2);
    assert_eq!(result.error_count, 0);
    assert_eq!(result.space_saved, SpaceSaved::Bytes(24));
    assert!(result.summary.starts_with("Hardlink complete. Linked: 2, Failed: 0."));
    assert!(result.undo_log.as_ref().unwrap().exists());

    let ids: Vec<_> = ["a.txt", "b.txt", "c.txt"]
        .iter()
        .map(|n| FileIdentity::of_path(&root.join(n)).unwrap())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));

    // A rescan now sees one linked set with nothing left to reclaim.
    let rescan = scan_and_wait(&controller, &root);
    let results = controller.get_results(rescan).unwrap();
    assert!(results.duplicates[0].already_linked);
    assert_eq!(results.summary.potential_savings, 0);
}

#[cfg(unix)]
#[test]
fn test_symlink_job_points_at_original() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    let deep = root.join("deep");
    fs::create_dir(&deep).unwrap();
    fs::write(root.join("keep.bin"), b"symlink me").unwrap();
    fs::write(deep.join("copy.bin"), b"symlink me").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let link = controller
        .perform_link(
            scan,
            LinkRequest::new(LinkKind::Symlink).with_strategy(OriginalStrategy::Shallowest),
        )
        .unwrap();
    controller.wait(link, None).unwrap();

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_verified, 1);
    let copy = deep.join("copy.bin");
    assert!(fs::symlink_metadata(&copy).unwrap().file_type().is_symlink());
    assert_eq!(
        fs::canonicalize(&copy).unwrap(),
        fs::canonicalize(root.join("keep.bin")).unwrap()
    );
    assert_eq!(fs::read(&copy).unwrap(), b"symlink me");
}

#[test]
fn test_delete_job_keeps_only_original() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("one"), b"delete dupes").unwrap();
    fs::write(root.join("two"), b"delete dupes").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let original = controller.get_results(scan).unwrap().duplicates[0]
        .original
        .path
        .clone();
    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Delete))
        .unwrap();
    controller.wait(link, None).unwrap();

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_linked, 1);
    assert!(original.exists());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 1);
}

#[test]
fn test_selection_limits_linked_sets() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a1"), b"first set").unwrap();
    fs::write(root.join("a2"), b"first set").unwrap();
    fs::write(root.join("b1"), b"second set!").unwrap();
    fs::write(root.join("b2"), b"second set!").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    assert_eq!(controller.get_results(scan).unwrap().duplicates.len(), 2);
    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Delete).with_selection(vec![1]))
        .unwrap();
    controller.wait(link, None).unwrap();

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.actions.len(), 1);
    assert!(result.actions.iter().all(|a| a.set_index == 1));
    assert_eq!(fs::read_dir(&root).unwrap().count(), 3);
}

/// Removes files normally but can never create links.
struct FailingLinks;

impl FileSystemOps for FailingLinks {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
    fn hard_link(&self, _original: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "injected link failure"))
    }
    fn symlink(&self, _original: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "injected link failure"))
    }
}

#[test]
fn test_delete_succeeds_but_link_fails_is_reported() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a.dat"), b"fragile content").unwrap();
    fs::write(root.join("b.dat"), b"fragile content").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir))
        .with_filesystem(Arc::new(FailingLinks));

    let scan = scan_and_wait(&controller, &root);
    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Hard))
        .unwrap();
    assert_eq!(controller.wait(link, None).unwrap(), JobStatus::Done);

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.actions[0].state, ActionState::Failed);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.files_linked, 0);
    assert_eq!(result.space_saved, SpaceSaved::Bytes(0));
    assert_eq!(result.deleted_not_linked.len(), 1);
    assert!(result.actions[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("DATA LOSS RISK:"));
    assert!(controller.get_progress(link).last_error.is_some());

    // The undo log still allows the deleted copy to be restored.
    let report = controller.undo_link(link).unwrap();
    assert_eq!(report.restored.len(), 1);
    assert_eq!(fs::read(&result.deleted_not_linked[0]).unwrap(), b"fragile content");
}

#[test]
fn test_original_is_never_a_target() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    for set in 0..4 {
        for copy in 0..(set + 2) {
            fs::write(root.join(format!("s{set}_{copy}")), format!("set {set}")).unwrap();
        }
    }
    let results = scan_direct(&root);

    for kind in [LinkKind::Hard, LinkKind::Symlink, LinkKind::Delete] {
        let actions = plan_actions(&results.duplicates, None, kind);
        assert_eq!(actions.len(), 2 + 3 + 4 + 5 - 4);
        for action in &actions {
            let set = &results.duplicates[action.set_index];
            assert_eq!(action.source, set.original.path);
            assert_ne!(action.target, set.original.path);
        }
    }
}

/// Cancels the job on the first removal.
struct CancelOnRemove {
    control: JobControl,
    removals: AtomicUsize,
}

impl FileSystemOps for CancelOnRemove {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.control.cancel();
        fs::remove_file(path)
    }
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        StdFileSystem.hard_link(original, link)
    }
    fn symlink(&self, original: &Path, link: &Path) -> io::Result<()> {
        StdFileSystem.symlink(original, link)
    }
}

#[cfg(unix)]
#[test]
fn test_no_action_starts_after_cancel() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    for set in 0..3 {
        for copy in 0..3 {
            fs::write(root.join(format!("s{set}_{copy}")), format!("content {set}")).unwrap();
        }
    }
    let results = scan_direct(&root);
    let actions = plan_actions(&results.duplicates, None, LinkKind::Hard);
    assert_eq!(actions.len(), 6);

    let control = JobControl::new();
    let ops = Arc::new(CancelOnRemove {
        control: control.clone(),
        removals: AtomicUsize::new(0),
    });
    let undo = UndoLog::create(&dir.path().join("undo.jsonl"), JobId::new(1)).unwrap();
    let executor = LinkExecutor::new(ops.clone(), undo)
        .with_threads(1)
        .with_control(control);
    let actions = executor.execute(actions).unwrap();

    // The action in flight completes; nothing else enters Deleting.
    assert_eq!(ops.removals.load(Ordering::SeqCst), 1);
    assert_eq!(actions.iter().filter(|a| a.state == ActionState::Linked).count(), 1);
    assert_eq!(actions.iter().filter(|a| a.state == ActionState::Planned).count(), 5);
    assert_eq!(executor.into_undo_log().len(), 1);
}

#[test]
fn test_modified_target_is_skipped() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a"), b"before edit").unwrap();
    fs::write(root.join("b"), b"before edit").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let set = controller.get_results(scan).unwrap().duplicates[0].clone();
    fs::write(&set.duplicates[0].path, b"edited after the scan").unwrap();

    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Hard))
        .unwrap();
    controller.wait(link, None).unwrap();

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_failed, 1);
    assert!(result.deleted_not_linked.is_empty());
    assert_eq!(
        fs::read(&set.duplicates[0].path).unwrap(),
        b"edited after the scan"
    );
}

#[test]
fn test_touched_target_is_skipped() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a"), b"same bytes").unwrap();
    fs::write(root.join("b"), b"same bytes").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let target = controller.get_results(scan).unwrap().duplicates[0].duplicates[0]
        .path
        .clone();
    set_file_mtime(&target, FileTime::from_unix_time(86_400, 0)).unwrap();

    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Delete))
        .unwrap();
    controller.wait(link, None).unwrap();

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_failed, 1);
    assert!(target.exists());
}

#[test]
fn test_original_edited_after_scan_keeps_duplicate() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a"), b"shared bytes").unwrap();
    fs::write(root.join("b"), b"shared bytes").unwrap();
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings(&dir));

    let scan = scan_and_wait(&controller, &root);
    let set = controller.get_results(scan).unwrap().duplicates[0].clone();
    fs::write(&set.original.path, b"edited after the dry run").unwrap();

    let link = controller
        .perform_link(scan, LinkRequest::new(LinkKind::Hard))
        .unwrap();
    assert_eq!(controller.wait(link, None).unwrap(), JobStatus::Done);

    let result = controller.get_link_result(link).unwrap();
    assert_eq!(result.files_linked, 0);
    assert_eq!(result.files_failed, 1);
    assert_eq!(result.space_saved, SpaceSaved::Bytes(0));
    assert!(result.actions[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("original modified since scan"));
    assert!(!result.actions[0].deleted_not_linked);

    let target = &set.duplicates[0].path;
    assert_eq!(fs::read(target).unwrap(), b"shared bytes");
    assert_ne!(
        FileIdentity::of_path(target).unwrap(),
        FileIdentity::of_path(&set.original.path).unwrap()
    );
}

#[test]
fn test_original_with_restored_size_but_new_mtime_is_rejected() {
    let dir = tempdir().unwrap();
    let root = data_root(&dir);
    fs::write(root.join("a"), b"shared bytes").unwrap();
    fs::write(root.join("b"), b"shared bytes").unwrap();

    let results = scan_direct(&root);
    let original = results.duplicates[0].original.path.clone();
    fs::write(&original, b"SHARED BYTES").unwrap();
    set_file_mtime(&original, FileTime::from_unix_time(172_800, 0)).unwrap();

    let actions = plan_actions(&results.duplicates, None, LinkKind::Delete);
    let log = UndoLog::create(&dir.path().join("undo.jsonl"), JobId::new(1)).unwrap();
    let actions = LinkExecutor::new(Arc::new(StdFileSystem), log)
        .execute(actions)
        .unwrap();

    assert_eq!(actions[0].state, ActionState::Failed);
    assert!(actions[0].target.exists());
    assert!(UndoLog::read_entries(&dir.path().join("undo.jsonl"))
        .unwrap()
        .is_empty());
}
