// ocr-resources - worker pool, caches and memory limits for OCR pipelines
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod optimizer;
pub mod pool;
pub mod utils;
