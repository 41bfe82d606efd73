// Configuration tests - defaults, file layering and validation
// Author: kelexine (https://github.com/kelexine)

use ocr_resources::config::AppConfig;
use ocr_resources::error::ResourceError;
use std::io::Write;

#[test]
fn test_defaults_match_documented_values() {
    let config = AppConfig::default();

    assert_eq!(config.limits.max_memory_mb, 2048.0);
    assert_eq!(config.limits.max_concurrent_requests, 3);
    assert_eq!(config.pool.max_queue_size, 100);
    assert!(config.pool.max_workers >= 1 && config.pool.max_workers <= 4);
    assert_eq!(config.optimization.model_cache_size, 5);
    assert_eq!(config.optimization.result_cache_size, 1000);
    assert_eq!(config.optimization.cleanup_interval_secs, 300);
    assert!((config.limits.critical_mb() - 2048.0 * 0.95).abs() < 1e-9);
}

#[test]
fn test_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[limits]
max_memory_mb = 1024

[pool]
max_workers = 2
max_queue_size = 7

[optimization]
enable_result_cache = false
"#
    )
    .unwrap();

    let config = AppConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.limits.max_memory_mb, 1024.0);
    assert_eq!(config.pool.max_workers, 2);
    assert_eq!(config.pool.max_queue_size, 7);
    assert!(!config.optimization.enable_result_cache);
    // Untouched sections keep their defaults
    assert_eq!(config.optimization.preprocessing_cache_size, 500);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_inconsistent_file_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[limits]
memory_warning_threshold = 0.97
memory_critical_threshold = 0.9
"#
    )
    .unwrap();

    let loaded = AppConfig::load(Some(file.path()));
    assert!(matches!(loaded, Err(ResourceError::Config(_))));
}

#[test]
fn test_huge_cache_ttl_in_file_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[optimization]
cache_ttl_hours = 1e300
"#
    )
    .unwrap();

    let loaded = AppConfig::load(Some(file.path()));
    assert!(matches!(loaded, Err(ResourceError::Config(_))));
}
