// CLI module for ocr-resources
// Author: kelexine (https://github.com/kelexine)

use clap::Parser;
use std::path::PathBuf;

/// ocr-resources - worker pool, caches and memory limits for OCR pipelines
#[derive(Parser, Debug)]
#[command(name = "ocr-resources", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.ocr-resources/config.toml)
    #[arg(short, long, env = "OCR_RESOURCES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the number of pool workers (1-10)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Submit N synthetic documents to the demo `digest` processor
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub demo: usize,

    /// Print performance, pool and cache statistics as JSON before exiting
    #[arg(long)]
    pub stats: bool,

    /// Print Prometheus metrics in text exposition format before exiting
    #[arg(long)]
    pub metrics: bool,
}
