//! Script file format reader for the weft trigger-script engine.
//!
//! This crate turns raw bytes plus a name into an immutable tree of
//! section/simple nodes — the on-disk shape of a `.weft` script. It knows
//! nothing about triggers, commands, or functions; the engine interprets
//! the tree.

pub mod error;
pub mod node;

// Re-export main types for convenience
pub use error::ConfigError;
pub use node::{Node, ScriptSource, SectionNode, SimpleNode};
