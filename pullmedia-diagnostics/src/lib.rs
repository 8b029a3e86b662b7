//! # PullMedia Diagnostics
//!
//! Debugging tools for pullmedia pipelines: subscriber setup for structured
//! logging and a probing source wrapper that audits timestamp ordering.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod probe;

// Re-export main types
pub use debug_logger::{init_logging, DebugLogger, LoggingConfig, DEFAULT_FILTER};
pub use probe::{ProbeHandle, ProbeReport, ProbedSource};
