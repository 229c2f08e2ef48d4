use dupelink::actions::{rollback, LinkKind, UndoLog};
use dupelink::config::{ScanRequest, Settings};
use dupelink::job::{JobController, JobId, JobStatus, LinkRequest, MemoryJobStore};
use dupelink::scanner::{FileIdentity, Hasher};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Linked {
    controller: JobController,
    link: JobId,
    root: PathBuf,
}

fn link_tree(dir: &TempDir, kind: LinkKind) -> Linked {
    let root = dir.path().join("data");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"undo me please").unwrap();
    fs::write(root.join("b.txt"), b"undo me please").unwrap();
    fs::write(root.join("c.txt"), b"undo me please").unwrap();

    let settings = Settings {
        undo_dir: Some(dir.path().join("undo")),
        ..Default::default()
    };
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), settings);
    let scan = controller
        .start_scan(ScanRequest::new(vec![root.clone()]))
        .unwrap();
    controller.wait(scan, None).unwrap();
    let link = controller.perform_link(scan, LinkRequest::new(kind)).unwrap();
    assert_eq!(controller.wait(link, None).unwrap(), JobStatus::Done);

    Linked {
        controller,
        link,
        root,
    }
}

#[test]
fn test_undo_log_has_one_entry_per_action() {
    let dir = tempdir().unwrap();
    let linked = link_tree(&dir, LinkKind::Delete);
    let result = linked.controller.get_link_result(linked.link).unwrap();
    let path = result.undo_log.clone().unwrap();

    assert!(path.starts_with(dir.path().join("undo")));
    assert!(fs::metadata(&path).unwrap().permissions().readonly());

    let entries = UndoLog::read_entries(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sequence, 1);
    assert_eq!(entries[1].sequence, 2);
    assert!(entries.iter().all(|e| e.job_id == linked.link));
    assert!(entries.iter().all(|e| e.kind == LinkKind::Delete));
    assert!(entries.iter().all(|e| e.size == 14));
    assert!(entries.iter().all(|e| e.original_path != e.target_path));
}

#[test]
fn test_undo_restores_deleted_copies() {
    let dir = tempdir().unwrap();
    let linked = link_tree(&dir, LinkKind::Delete);
    assert_eq!(fs::read_dir(&linked.root).unwrap().count(), 1);

    let report = linked.controller.undo_link(linked.link).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.restored.len(), 2);
    assert_eq!(report.summary(), "Rollback complete. Restored: 2, Skipped: 0.");
    for name in ["a.txt", "b.txt", "c.txt"] {
        assert_eq!(fs::read(linked.root.join(name)).unwrap(), b"undo me please");
    }
}

#[cfg(unix)]
#[test]
fn test_undo_breaks_hard_links_apart() {
    let dir = tempdir().unwrap();
    let linked = link_tree(&dir, LinkKind::Hard);
    let a = FileIdentity::of_path(&linked.root.join("a.txt")).unwrap();
    assert_eq!(a, FileIdentity::of_path(&linked.root.join("b.txt")).unwrap());

    let result = linked.controller.get_link_result(linked.link).unwrap();
    let report = rollback(result.undo_log.as_ref().unwrap(), &Hasher::new()).unwrap();
    assert_eq!(report.restored.len(), 2);

    let ids: Vec<_> = ["a.txt", "b.txt", "c.txt"]
        .iter()
        .map(|n| FileIdentity::of_path(&linked.root.join(n)).unwrap())
        .collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
}

#[cfg(unix)]
#[test]
fn test_undo_skips_paths_changed_after_linking() {
    let dir = tempdir().unwrap();
    let linked = link_tree(&dir, LinkKind::Symlink);
    let result = linked.controller.get_link_result(linked.link).unwrap();
    let replaced = result.actions[0].target.clone();
    fs::remove_file(&replaced).unwrap();
    fs::write(&replaced, b"user wrote a new file here").unwrap();

    let report = rollback(result.undo_log.as_ref().unwrap(), &Hasher::new()).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, replaced);
    assert_eq!(fs::read(&replaced).unwrap(), b"user wrote a new file here");
}

#[test]
fn test_undo_skips_when_original_changed() {
    let dir = tempdir().unwrap();
    let linked = link_tree(&dir, LinkKind::Delete);
    let result = linked.controller.get_link_result(linked.link).unwrap();
    let original = result.actions[0].source.clone();
    fs::write(&original, b"original was edited").unwrap();

    let report = linked.controller.undo_link(linked.link).unwrap();

    assert!(report.restored.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped[0].reason.contains("changed"));
}

#[test]
fn test_rollback_of_missing_log_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(rollback(&dir.path().join("nope.jsonl"), &Hasher::new()).is_err());
}
