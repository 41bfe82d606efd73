// Optimizer tests - cache-or-compute round trips and model loading
// Author: kelexine (https://github.com/kelexine)

use ocr_resources::config::{OptimizationConfig, ResourceLimits};
use ocr_resources::error::Result;
use ocr_resources::memory::MemoryProbe;
use ocr_resources::monitor::PerformanceMonitor;
use ocr_resources::optimizer::{ModelFootprint, Optimizer};
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct RecognitionModel {
    language: String,
    size_mb: f64,
}

impl ModelFootprint for RecognitionModel {
    fn footprint_mb(&self) -> Option<f64> {
        Some(self.size_mb)
    }
}

fn optimizer(config: OptimizationConfig) -> Arc<Optimizer> {
    let probe: Arc<dyn MemoryProbe> = Arc::new(|| -> Result<f64> { Ok(128.0) });
    let monitor = PerformanceMonitor::builder(ResourceLimits::default())
        .probe(probe)
        .cache_config(config.clone())
        .build();
    Optimizer::new(config, monitor)
}

#[test]
fn test_identical_input_computes_once() {
    let optimizer = optimizer(OptimizationConfig::default());
    let calls = AtomicUsize::new(0);
    let params = json!({ "lang": "pol", "dpi": 300 });

    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(json!({ "text": "Faktura VAT 1/2024" }))
    };
    let first = optimizer.get_or_compute_result(b"scan", &params, compute).unwrap();
    let second = optimizer.get_or_compute_result(b"scan", &params, compute).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.cache_key, second.cache_key);
    assert_eq!(second.value["text"], "Faktura VAT 1/2024");
    assert_eq!(second.access_count, 1);
}

#[test]
fn test_changing_one_param_recomputes() {
    let optimizer = optimizer(OptimizationConfig::default());
    let calls = AtomicUsize::new(0);
    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(json!("text"))
    };

    optimizer
        .get_or_compute_result(b"scan", &json!({ "lang": "pol", "dpi": 300 }), compute)
        .unwrap();
    optimizer
        .get_or_compute_result(b"scan", &json!({ "lang": "eng", "dpi": 300 }), compute)
        .unwrap();
    // Same parameters in a different key order still hit
    let reordered = optimizer
        .get_or_compute_result(b"scan", &json!({ "dpi": 300, "lang": "eng" }), compute)
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(reordered.cache_hit);
}

#[test]
fn test_failed_computation_is_not_cached() {
    let optimizer = optimizer(OptimizationConfig::default());
    let failed = optimizer.get_or_compute_result(b"scan", &json!({}), || Err("engine crashed"));
    assert!(failed.is_err());

    let retried = optimizer
        .get_or_compute_result(b"scan", &json!({}), || Ok::<_, String>(json!("ok")))
        .unwrap();
    assert!(!retried.cache_hit);
}

#[test]
fn test_preprocessing_is_cached_by_content_and_params() {
    let optimizer = optimizer(OptimizationConfig::default());
    let calls = AtomicUsize::new(0);
    let preprocess = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(vec![1u8, 2, 3])
    };

    let first = optimizer
        .get_or_preprocess(b"scan", &json!({ "deskew": true }), preprocess)
        .unwrap();
    let second = optimizer
        .get_or_preprocess(b"scan", &json!({ "deskew": true }), preprocess)
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(second.cache_hit);
    assert_eq!(&first.value[..], &second.value[..]);
    assert_eq!(optimizer.preprocessing_cache().unwrap().total_bytes(), 3);
}

#[test]
fn test_concurrent_misses_load_model_once() {
    let optimizer = optimizer(OptimizationConfig::default());
    let loads = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let optimizer = optimizer.clone();
            let loads = loads.clone();
            std::thread::spawn(move || {
                optimizer
                    .get_or_load_model("ocr-pol", || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok::<_, String>(RecognitionModel {
                            language: "pol".to_string(),
                            size_mb: 120.0,
                        })
                    })
                    .unwrap()
            })
        })
        .collect();

    let models: Vec<Arc<RecognitionModel>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
    assert_eq!(models[0].language, "pol");

    let stats = optimizer.get_statistics();
    assert_eq!(stats.model_loads, 1);
    let cache = optimizer.model_cache().unwrap();
    assert!((cache.memory_mb() - 120.0).abs() < 0.01);
}

#[test]
fn test_model_over_budget_is_returned_but_not_cached() {
    let optimizer = optimizer(OptimizationConfig {
        model_cache_memory_mb: 100.0,
        ..OptimizationConfig::default()
    });
    let model = optimizer
        .get_or_load_model("huge", || {
            Ok::<_, String>(RecognitionModel {
                language: "pol".to_string(),
                size_mb: 500.0,
            })
        })
        .unwrap();

    assert_eq!(model.size_mb, 500.0);
    assert!(!optimizer.model_cache().unwrap().contains("huge"));
}

#[test]
fn test_sweep_removes_expired_entries() {
    let optimizer = optimizer(OptimizationConfig {
        cache_ttl_hours: 0.00001,
        ..OptimizationConfig::default()
    });
    optimizer
        .get_or_compute_result(b"a", &json!({}), || Ok::<_, String>(json!(1)))
        .unwrap();
    optimizer
        .get_or_preprocess(b"a", &json!({}), || Ok::<_, String>(vec![0u8; 4]))
        .unwrap();

    std::thread::sleep(Duration::from_millis(80));
    let report = optimizer.sweep_expired();

    assert_eq!(report.results, 1);
    assert_eq!(report.preprocessed, 1);
    assert_eq!(optimizer.sweep_expired().total(), 0);
}

#[test]
fn test_clear_all_caches_empties_everything() {
    let optimizer = optimizer(OptimizationConfig::default());
    optimizer
        .get_or_compute_result(b"a", &json!({}), || Ok::<_, String>(json!(1)))
        .unwrap();
    optimizer
        .get_or_load_model("m", || {
            Ok::<_, String>(RecognitionModel {
                language: "eng".to_string(),
                size_mb: 10.0,
            })
        })
        .unwrap();

    assert_eq!(optimizer.clear_all_caches(), 2);
    assert!(optimizer.result_cache().unwrap().is_empty());
    assert!(optimizer.model_cache().unwrap().is_empty());
    assert_eq!(optimizer.get_statistics().reclaim_passes, 1);
}

fn model(language: &str, size_mb: f64) -> impl FnOnce() -> std::result::Result<RecognitionModel, String> {
    let language = language.to_string();
    move || Ok(RecognitionModel { language, size_mb })
}

#[test]
fn test_new_applies_model_limits_to_existing_monitor() {
    let probe: Arc<dyn MemoryProbe> = Arc::new(|| -> Result<f64> { Ok(128.0) });
    let monitor = PerformanceMonitor::builder(ResourceLimits::default())
        .probe(probe)
        .build();
    let optimizer = Optimizer::new(
        OptimizationConfig {
            model_cache_size: 1,
            ..OptimizationConfig::default()
        },
        monitor.clone(),
    );

    optimizer.get_or_load_model("pol", model("pol", 10.0)).unwrap();
    optimizer.get_or_load_model("eng", model("eng", 10.0)).unwrap();

    let cache = optimizer.model_cache().unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("eng"));
    assert!(Arc::ptr_eq(&cache, &monitor.model_cache().unwrap()));
}

#[test]
fn test_critical_memory_clears_models_after_reconfigure() {
    let level = Arc::new(AtomicU64::new(128.0f64.to_bits()));
    let reader = level.clone();
    let probe: Arc<dyn MemoryProbe> =
        Arc::new(move || -> Result<f64> { Ok(f64::from_bits(reader.load(Ordering::SeqCst))) });
    let monitor = PerformanceMonitor::builder(ResourceLimits::default())
        .probe(probe)
        .build();
    let optimizer = Optimizer::new(OptimizationConfig::default(), monitor.clone());

    optimizer.reconfigure(OptimizationConfig {
        model_cache_size: 3,
        ..OptimizationConfig::default()
    });
    optimizer.get_or_load_model("pol", model("pol", 10.0)).unwrap();
    let cache = optimizer.model_cache().unwrap();
    assert!(Arc::ptr_eq(&cache, &monitor.model_cache().unwrap()));
    assert_eq!(cache.len(), 1);

    level.store(2040.0f64.to_bits(), Ordering::SeqCst);
    monitor.enforce_memory_limits();

    assert!(cache.is_empty());
    assert_eq!(monitor.get_performance_stats().model_cache.unwrap().entries, 0);
}
