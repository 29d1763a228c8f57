//! Loader configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`ScriptLoader`](crate::loader::ScriptLoader).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderSettings {
    /// Directory scanned by `load_all`.
    pub scripts_dir: PathBuf,

    /// Number of background loader threads.
    ///
    /// `0` loads synchronously on the caller, `1` loads off the caller in
    /// submission order, `2+` loads in parallel.
    #[serde(default)]
    pub loader_threads: usize,

    /// Keep parsed sources in memory after loading for later inspection.
    #[serde(default)]
    pub keep_sources_loaded: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            loader_threads: 0,
            keep_sources_loaded: false,
        }
    }
}
