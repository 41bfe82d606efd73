// ocr-resources - worker pool, caches and memory limits for OCR pipelines
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use ocr_resources::cli::Args;
use ocr_resources::config::AppConfig;
use ocr_resources::memory::ProcessMemoryProbe;
use ocr_resources::metrics;
use ocr_resources::monitor::PerformanceMonitor;
use ocr_resources::optimizer::{keys, Optimizer};
use ocr_resources::pool::{ProcessingRequest, ResourceManager, SubmitOptions};
use ocr_resources::utils::logging;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.pool.max_workers = workers;
        config.validate()?;
    }

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting ocr-resources v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Build monitor, optimizer and pool
    let monitor = PerformanceMonitor::from_config(&config, Arc::new(ProcessMemoryProbe::new()));
    let optimizer = Optimizer::new(config.optimization.clone(), monitor.clone());
    optimizer.start_background_sweep()?;
    let manager = ResourceManager::new(config.pool.clone(), monitor.clone())?;

    let digests = optimizer.clone();
    manager.register_processor("digest", move |request: &ProcessingRequest| {
        let text = request.args["text"].as_str().unwrap_or_default();
        let params = request.args.get("params").cloned().unwrap_or_else(|| json!({}));
        let lookup = digests.get_or_compute_result(text.as_bytes(), &params, || {
            Ok::<_, String>(json!({
                "sha256": keys::content_hash(text.as_bytes()),
                "bytes": text.len(),
            }))
        })?;
        Ok(json!({ "digest": lookup.value, "cache_hit": lookup.cache_hit }))
    });

    // Phase 4: Run the demo load, or idle until asked to stop
    let work = async {
        if args.demo == 0 {
            std::future::pending::<()>().await;
        }
        run_demo(&manager, args.demo).await;
    };
    tokio::select! {
        _ = work => {}
        _ = shutdown_signal() => {}
    }

    if args.stats {
        let report = json!({
            "performance": monitor.get_performance_stats(),
            "pool": manager.get_statistics(),
            "optimizer": optimizer.get_statistics(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if args.metrics {
        print!("{}", metrics::gather_metrics());
    }

    // Phase 5: Graceful shutdown
    manager.shutdown().await;
    optimizer.shutdown().await;
    info!("ocr-resources shut down gracefully");
    Ok(())
}

/// Submit `count` synthetic documents. Only four distinct documents exist,
/// so repeats are served from the result cache.
async fn run_demo(manager: &ResourceManager, count: usize) {
    let mut submitted = Vec::with_capacity(count);
    for i in 0..count {
        let args = json!({
            "text": format!("synthetic invoice #{}", i % 4),
            "params": { "lang": "pol", "dpi": 300 },
        });
        match manager.submit_request("digest", args, SubmitOptions::with_priority((i % 3) as i32)) {
            Ok(id) => submitted.push(id),
            Err(e) => warn!("Demo request {} rejected: {}", i, e),
        }
    }

    let mut succeeded = 0;
    for id in &submitted {
        let result = manager.get_result(id, Some(Duration::from_secs(30))).await;
        if result.success {
            succeeded += 1;
        } else if let Some(error) = &result.error {
            warn!("Demo request {} failed: {}", id, error);
        }
    }
    info!("Demo finished: {}/{} requests succeeded", succeeded, count);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
