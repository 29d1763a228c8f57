//! The declarative language surface: structures and trigger items.
//!
//! A *structure* is one top-level declarative unit of a script (an event
//! trigger, a command, a function) with a load priority and three
//! lifecycle callbacks. The [`StructureCatalog`] maps section headers to
//! structure kinds and is the seam where hosts and tests plug in their
//! own kinds. Trigger bodies expand into next-linked [`TriggerItem`]s the
//! execution engine walks at runtime.

pub mod kinds;
pub mod statement;
pub mod structure;

pub use statement::{LoopCount, SectionHeader, Statement, TriggerItem, TriggerItemKind, TriggerSection};
pub use structure::{
    BuildCtx, BuildOutcome, COMMAND_PRIORITY, FUNCTION_PRIORITY, PhaseCtx, Structure,
    StructureCatalog, StructureKind, TRIGGER_PRIORITY,
};
