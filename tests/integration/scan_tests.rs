use dupelink::config::{ScanConfig, ScanRequest, Settings};
use dupelink::duplicates::{DuplicateFinder, FinderConfig, ScanResults};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn scan(roots: &[&Path], settings: &Settings) -> ScanResults {
    let request = ScanRequest::new(roots.iter().map(|r| r.to_path_buf()).collect());
    let config = ScanConfig::build(&request, settings).unwrap();
    DuplicateFinder::new(FinderConfig::new(config))
        .find_duplicates()
        .unwrap()
}

#[test]
fn test_scan_empty_directory() {
    let dir = tempdir().unwrap();
    let results = scan(&[dir.path()], &Settings::default());

    assert!(results.duplicates.is_empty());
    assert_eq!(results.summary.total_files, 0);
    assert!(results.summary.no_duplicates);
    assert_eq!(
        results.summary.action_taken,
        "Scan complete. No duplicates found."
    );
}

#[test]
fn test_scan_unique_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"content a").unwrap();
    fs::write(dir.path().join("b.txt"), b"content b").unwrap();
    fs::write(dir.path().join("c.txt"), b"content c").unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert!(results.duplicates.is_empty());
    assert_eq!(results.summary.total_files, 3);
    assert_eq!(results.summary.potential_savings, 0);
}

#[test]
fn test_scan_two_copies_and_one_unique() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"duplicate").unwrap();
    fs::write(dir.path().join("b.txt"), b"duplicate").unwrap();
    fs::write(dir.path().join("c.txt"), b"unique!!!").unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert_eq!(results.duplicates.len(), 1);
    let set = &results.duplicates[0];
    assert_eq!(set.len(), 2);
    assert_eq!(set.size, 9);
    assert!(!set.already_linked);
    assert_eq!(results.summary.total_sets_found, 1);
    assert_eq!(results.summary.duplicate_files, 1);
    assert_eq!(results.summary.potential_savings, 9);
    assert!(results.summary.is_dry_run);
    assert!(results
        .summary
        .action_taken
        .starts_with("Dry run complete. Found 1 sets"));
}

#[test]
fn test_scan_same_prefix_different_tail() {
    let dir = tempdir().unwrap();
    let mut first = vec![0u8; 10_000];
    let mut second = first.clone();
    first[9_999] = 1;
    second[9_999] = 2;
    fs::write(dir.path().join("first.bin"), &first).unwrap();
    fs::write(dir.path().join("second.bin"), &second).unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert!(results.duplicates.is_empty());
    assert_eq!(results.summary.eliminated_by_size, 0);
}

#[test]
fn test_scan_nested_and_overlapping_roots() {
    let dir = tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    fs::write(dir.path().join("top.txt"), b"shared").unwrap();
    fs::write(sub.join("inner.txt"), b"shared").unwrap();

    // The nested root is folded into its parent, so nothing is counted twice.
    let results = scan(&[dir.path(), &sub], &Settings::default());

    assert_eq!(results.summary.scan_paths.len(), 1);
    assert_eq!(results.summary.total_files, 2);
    assert_eq!(results.duplicates.len(), 1);
    assert_eq!(results.duplicates[0].len(), 2);
}

#[test]
fn test_scan_across_multiple_roots() {
    let left = tempdir().unwrap();
    let right = tempdir().unwrap();
    fs::write(left.path().join("photo.jpg"), b"jpeg bytes").unwrap();
    fs::write(right.path().join("copy.jpg"), b"jpeg bytes").unwrap();

    let results = scan(&[left.path(), right.path()], &Settings::default());

    assert_eq!(results.duplicates.len(), 1);
    assert_eq!(results.summary.scan_paths.len(), 2);
}

#[test]
fn test_scan_order_is_stable_across_runs() {
    let dir = tempdir().unwrap();
    for group in 0..5 {
        let content = format!("group {group} content");
        for copy in 0..3 {
            fs::write(dir.path().join(format!("g{group}_{copy}.dat")), &content).unwrap();
        }
    }

    let first = scan(&[dir.path()], &Settings::default());
    let second = scan(&[dir.path()], &Settings::default());

    assert_eq!(first.duplicates.len(), 5);
    assert_eq!(first.duplicates, second.duplicates);
}

#[test]
fn test_scan_respects_ignore_settings() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("cache");
    fs::create_dir(&cache).unwrap();
    fs::write(dir.path().join("a.txt"), b"same").unwrap();
    fs::write(cache.join("b.txt"), b"same").unwrap();
    fs::write(dir.path().join("c.TMP"), b"same").unwrap();

    let settings = Settings {
        ignore_dirs: vec!["cache".into()],
        ignore_extensions: vec!["tmp".into()],
        ..Default::default()
    };
    let results = scan(&[dir.path()], &settings);

    assert_eq!(results.summary.total_files, 1);
    assert!(results.duplicates.is_empty());
}

#[test]
fn test_scan_min_size_excludes_small_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("small1"), b"tiny").unwrap();
    fs::write(dir.path().join("small2"), b"tiny").unwrap();
    fs::write(dir.path().join("big1"), vec![7u8; 2048]).unwrap();
    fs::write(dir.path().join("big2"), vec![7u8; 2048]).unwrap();

    let settings = Settings {
        min_size: 1024,
        ..Default::default()
    };
    let results = scan(&[dir.path()], &settings);

    assert_eq!(results.duplicates.len(), 1);
    assert_eq!(results.duplicates[0].size, 2048);
}

#[cfg(unix)]
#[test]
fn test_scan_reports_existing_hardlinks_as_linked() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("original.bin");
    fs::write(&original, b"linked content").unwrap();
    fs::hard_link(&original, dir.path().join("alias.bin")).unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert_eq!(results.duplicates.len(), 1);
    assert!(results.duplicates[0].already_linked);
    assert_eq!(results.summary.sets_already_linked, 1);
    assert_eq!(results.summary.potential_savings, 0);
    assert!(results
        .summary
        .action_taken
        .contains("all already appear linked"));
}

#[cfg(unix)]
#[test]
fn test_scan_partial_hardlink_counts_distinct_savings() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.bin");
    fs::write(&a, b"partially linked").unwrap();
    fs::hard_link(&a, dir.path().join("b.bin")).unwrap();
    fs::write(dir.path().join("c.bin"), b"partially linked").unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert_eq!(results.duplicates.len(), 1);
    assert!(!results.duplicates[0].already_linked);
    assert_eq!(results.summary.potential_savings, 16);
}

#[cfg(unix)]
#[test]
fn test_scan_skips_symlinks() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("target.txt");
    fs::write(&target, b"pointed at").unwrap();
    std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();

    let results = scan(&[dir.path()], &Settings::default());

    assert_eq!(results.summary.total_files, 1);
    assert!(results.duplicates.is_empty());
}

#[test]
fn test_newest_strategy_uses_modification_time() {
    let dir = tempdir().unwrap();
    for (name, mtime) in [("a.log", 1_000), ("b.log", 3_000), ("c.log", 2_000)] {
        let path = dir.path().join(name);
        fs::write(&path, b"rotated log").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    let settings = Settings {
        strategy: "newest".into(),
        ..Default::default()
    };
    let results = scan(&[dir.path()], &settings);

    let set = &results.duplicates[0];
    assert!(set.original.path.ends_with("b.log"));
    let rest: Vec<_> = set
        .duplicates
        .iter()
        .map(|d| d.path.file_name().unwrap().to_owned())
        .collect();
    assert_eq!(rest, vec!["a.log", "c.log"]);
    assert_eq!(results.summary.strategy, "newest");
}
