//! Typed error types for the weft engine.
//!
//! This module provides structured error types so callers at the crate
//! boundary can match on specific failure modes. Most problems inside a
//! script (bad triggers, unknown options) are *diagnostics*, not errors:
//! they are reported and the load continues. A `LoadError` means a whole
//! unit of work failed — a file that could not be read, a task that
//! panicked, or a broken engine invariant.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the script loading engine.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A script file could not be read from disk.
    #[error("script read failed for '{path}': {source}")]
    Io {
        /// Path of the script that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The script file could not be turned into a node tree.
    #[error(transparent)]
    Config(#[from] weft_config::ConfigError),

    /// A loading task panicked. The panic was caught at the task boundary
    /// so it never unwinds a worker thread.
    #[error("script loading task panicked: {0}")]
    Panic(String),

    /// An internal engine invariant was violated.
    #[error("internal loader invariant violated: {0}")]
    Internal(String),
}
