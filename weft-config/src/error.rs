//! Typed error variants for the weft-config crate.
//!
//! Provides structured error types for script file I/O and tree-building
//! operations, exposed for library consumers who want to match on specific
//! failure modes instead of opaque strings.

use std::fmt;

/// Errors that can occur when reading a script file into a node tree.
///
/// These errors are produced by [`ScriptSource::parse`](crate::ScriptSource::parse)
/// and [`ScriptSource::load`](crate::ScriptSource::load). Diagnostics about
/// individual lines (unparseable triggers, bad statements) are *not* config
/// errors — the reader is tolerant of content it does not understand and
/// leaves interpretation to the engine. A `ConfigError` means the file as a
/// whole could not be turned into a tree.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred reading the script file.
    Io(std::io::Error),

    /// The script file is not valid UTF-8.
    ///
    /// The inner value is the byte offset of the first invalid sequence.
    Utf8(usize),

    /// A line could not be placed in the tree.
    ///
    /// The inner values are the 1-based line number and a description of
    /// what is malformed (e.g. a section header with an empty key).
    Malformed { line: usize, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error reading script: {e}"),
            ConfigError::Utf8(offset) => {
                write!(f, "script is not valid UTF-8 (at byte {offset})")
            }
            ConfigError::Malformed { line, message } => {
                write!(f, "malformed script at line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Utf8(_) | ConfigError::Malformed { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}
