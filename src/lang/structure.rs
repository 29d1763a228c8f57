//! The `Structure` trait, activation phase context, and structure catalog.

use std::sync::Arc;

use weft_config::{ScriptSource, SectionNode};

use crate::diag::Reporter;
use crate::host::{Host, StagedBatch};

/// Load priority of function structures. Lower numbers activate earlier,
/// so functions exist before the triggers that call them.
pub const FUNCTION_PRIORITY: u32 = 400;

/// Load priority of command structures.
pub const COMMAND_PRIORITY: u32 = 500;

/// Load priority of event trigger structures.
pub const TRIGGER_PRIORITY: u32 = 600;

/// What a structure counts as in load statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    /// Counted as a trigger (event triggers and command triggers alike).
    Trigger,
    /// Counted as a trigger; also owns a command registration.
    Command,
    /// Counted as a function.
    Function,
    /// Not counted.
    Other,
}

/// Shared state handed to every activation phase callback.
///
/// Phases run on a single thread; the staged batch collects host
/// registrations until the batch is atomically swapped live.
pub struct PhaseCtx<'a> {
    /// Host registries (functions register here during preload).
    pub host: &'a Host,
    /// Diagnostics sink.
    pub reporter: &'a Reporter,
    /// Per-batch staging area for triggers and commands.
    pub staged: &'a mut StagedBatch,
    /// The script that owns the structure being activated.
    pub script: &'a Arc<ScriptSource>,
}

/// One declarative unit extracted from a script.
///
/// Activation happens in three global passes over every structure of a
/// batch, ordered by [`priority`](Structure::priority) across files:
/// `preload` must not depend on any other structure, `load` may rely on
/// every structure's preload, and `after_load` may rely on every
/// structure's load. A phase returning `Err` is reported and skips the
/// structure's remaining phases; the rest of the batch continues.
pub trait Structure: Send {
    /// Cross-file activation order; lower runs earlier in every phase.
    fn priority(&self) -> u32;

    /// Statistics classification.
    fn kind(&self) -> StructureKind;

    /// First pass; must be independent of other structures.
    fn preload(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        let _ = cx;
        Ok(())
    }

    /// Second pass; every structure in the batch has been preloaded.
    fn load(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String>;

    /// Third pass; every structure in the batch has been loaded.
    fn after_load(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        let _ = cx;
        Ok(())
    }
}

/// Context available to catalog builders while a file is being parsed.
pub struct BuildCtx<'a> {
    /// Diagnostics sink.
    pub reporter: &'a Reporter,
    /// The script the section belongs to.
    pub script: &'a Arc<ScriptSource>,
}

/// Outcome of offering a section header to one catalog entry.
pub enum BuildOutcome {
    /// The entry does not recognize this header.
    NotMine,
    /// Recognized and built.
    Built(Box<dyn Structure>),
    /// Recognized but malformed; a diagnostic was already reported.
    Failed,
}

type StructureBuilder =
    dyn Fn(&str, &SectionNode, &BuildCtx<'_>) -> BuildOutcome + Send + Sync + 'static;

/// Ordered list of structure kinds a loader understands.
///
/// Entries are tried in registration order; the first one that recognizes
/// a header wins. An unrecognized header yields a diagnostic at the call
/// site and the block is skipped.
pub struct StructureCatalog {
    entries: Vec<Box<StructureBuilder>>,
}

impl StructureCatalog {
    /// A catalog with no kinds registered.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The built-in catalog: functions, commands, and event triggers.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(crate::lang::kinds::build_function);
        catalog.register(crate::lang::kinds::build_command);
        catalog.register(crate::lang::kinds::build_trigger);
        catalog
    }

    /// Append a structure kind. Custom kinds are tried after the ones
    /// already registered.
    pub fn register<F>(&mut self, builder: F)
    where
        F: Fn(&str, &SectionNode, &BuildCtx<'_>) -> BuildOutcome + Send + Sync + 'static,
    {
        self.entries.push(Box::new(builder));
    }

    /// Offer a section header to every registered kind.
    ///
    /// Returns the built structure, or `None` after reporting a
    /// diagnostic (either the kind's own, or "can't understand this
    /// event" when nothing recognized the header).
    pub fn parse_one(
        &self,
        header: &str,
        node: &SectionNode,
        cx: &BuildCtx<'_>,
    ) -> Option<Box<dyn Structure>> {
        for entry in &self.entries {
            match entry(header, node, cx) {
                BuildOutcome::NotMine => continue,
                BuildOutcome::Built(structure) => return Some(structure),
                BuildOutcome::Failed => return None,
            }
        }
        cx.reporter.error(format!(
            "{}:{}: can't understand this event: '{}'",
            cx.script.name(),
            node.line,
            header
        ));
        None
    }
}
