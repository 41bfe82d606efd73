//! Cross-cutting helpers for the binary and embedders.
//!
//! # Submodules
//!
//! - `logging`: tracing subscriber initialization.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
