//! Shared integration test helpers for weft.
//!
//! This module provides canonical factory functions and fixture utilities
//! used across the `tests/` integration test suite.
//!
//! Note: Rust integration tests use `mod common;` (not `use`) to bring in
//! helpers from `tests/common/mod.rs`. The `#[allow(dead_code)]` attribute
//! suppresses warnings when only a subset of helpers are used per file.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use weft::diag::DiagnosticHandler;
use weft::{Host, LoaderSettings, ScriptLoader, Severity, StructureCatalog};

/// Create a temporary scripts directory.
///
/// The `TempDir` must be kept alive for the duration of the test — drop it
/// only after all loader I/O has completed.
pub fn scripts_dir() -> TempDir {
    TempDir::new().expect("failed to create temp scripts dir")
}

/// Write a script fixture under the scripts directory, creating any
/// intermediate subdirectories.
pub fn write_script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create script subdirectory");
    }
    fs::write(&path, content).expect("failed to write script fixture");
    path
}

/// A loader over the given directory with the built-in catalog.
pub fn loader_for(dir: &TempDir, threads: usize) -> ScriptLoader {
    loader_with_catalog(dir, threads, StructureCatalog::builtin())
}

/// A loader over the given directory with a custom catalog.
pub fn loader_with_catalog(
    dir: &TempDir,
    threads: usize,
    catalog: StructureCatalog,
) -> ScriptLoader {
    let settings = LoaderSettings {
        scripts_dir: dir.path().to_path_buf(),
        loader_threads: threads,
        keep_sources_loaded: false,
    };
    ScriptLoader::new(settings, Arc::new(Host::new()), catalog)
}

/// Collects every reported diagnostic for later inspection.
#[derive(Default)]
pub struct CollectingHandler {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl CollectingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True if any collected message contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(_, msg)| msg.contains(needle))
    }

    /// Number of messages collected at exactly `severity`.
    pub fn count_at(&self, severity: Severity) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }
}

impl DiagnosticHandler for CollectingHandler {
    fn handle(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}
