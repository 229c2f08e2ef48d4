use dupelink::config::{ConfigError, ScanConfig, ScanRequest, Settings};
use dupelink::duplicates::OriginalStrategy;
use dupelink::memory::MemoryAction;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_settings_file_values_are_applied() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
hash_threads = 3
min_size = 4096
skip_hidden = true
ignore_dirs = ["node_modules", ".git"]
strategy = "newest"
auto_save_results = true

[memory]
ceiling_bytes = 1073741824
action = "abort"
"#,
    )
    .unwrap();

    let settings = Settings::load(Some(&path)).unwrap();

    assert_eq!(settings.hash_threads, 3);
    assert_eq!(settings.min_size, 4096);
    assert!(settings.skip_hidden);
    assert_eq!(settings.ignore_dirs, vec!["node_modules", ".git"]);
    assert_eq!(settings.strategy, "newest");
    assert!(settings.auto_save_results);

    let policy = settings.memory_policy().unwrap().unwrap();
    assert_eq!(policy.ceiling_bytes, 1_073_741_824);
    assert_eq!(policy.action, MemoryAction::Abort);
    // unset keys keep their defaults
    assert!((policy.warn_ratio - 0.8).abs() < f64::EPSILON);
}

#[test]
fn test_unknown_strategy_in_settings_fails_scan_config() {
    let dir = tempdir().unwrap();
    let settings = Settings {
        strategy: "biggest".into(),
        ..Default::default()
    };

    let result = ScanConfig::build(&ScanRequest::new(vec![dir.path().to_path_buf()]), &settings);

    assert!(matches!(result, Err(ConfigError::InvalidStrategy(_))));
}

#[test]
fn test_request_strategy_overrides_settings() {
    let dir = tempdir().unwrap();
    let mut request = ScanRequest::new(vec![dir.path().to_path_buf()]);
    request.strategy = Some("pattern:keep".into());

    let config = ScanConfig::build(&request, &Settings::default()).unwrap();

    assert!(matches!(config.strategy, OriginalStrategy::PathPattern(_)));
}

#[test]
fn test_strategy_aliases() {
    for (text, expected) in [
        ("oldest", "oldest"),
        ("oldest_creation", "oldest"),
        ("Newest", "newest"),
        ("newest_modification", "newest"),
        ("shallowest_path", "shallowest"),
    ] {
        let strategy: OriginalStrategy = text.parse().unwrap();
        assert_eq!(strategy.to_string(), expected);
    }
    assert!("pattern:(".parse::<OriginalStrategy>().is_err());
}

#[test]
fn test_file_root_is_dropped_with_warning() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("plain.txt");
    fs::write(&file, b"not a directory").unwrap();

    let request = ScanRequest::new(vec![file, dir.path().to_path_buf()]);
    let config = ScanConfig::build(&request, &Settings::default()).unwrap();

    assert_eq!(config.roots.len(), 1);
    assert_eq!(config.warnings.len(), 1);
}

#[test]
fn test_effective_settings_render_as_toml() {
    let rendered = Settings::default().to_toml().unwrap();
    assert!(rendered.contains("strategy = \"oldest\""));
    assert!(rendered.contains("[memory]"));

    let parsed: Settings = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, Settings::default());
}
