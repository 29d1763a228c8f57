//! Host-visible program state: trigger, command, and function registries.
//!
//! Loading a batch never mutates the live registries piecemeal. Triggers
//! and commands are collected into a [`StagedBatch`] during the load pass
//! and swapped in under a single write section once the whole batch has
//! activated — removing the old versions of reloaded files in the same
//! critical section, so a concurrent reader observes either the old
//! program or the new one, never a gap. Function signatures register
//! during preload (keyed by name, replaced when the same script
//! re-registers) so cross-file calls can be validated after the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use weft_config::ScriptSource;

use crate::diag::Reporter;
use crate::lang::statement::TriggerItem;
use crate::stats::ScriptInfo;

/// A registered event trigger.
#[derive(Debug)]
pub struct TriggerDef {
    /// Event name from the trigger header.
    pub event: String,
    /// Owning script.
    pub script: PathBuf,
    /// 1-based header line.
    pub line: usize,
    /// Expanded, next-linked body.
    pub items: Vec<TriggerItem>,
}

/// A registered command.
#[derive(Debug)]
pub struct CommandDef {
    /// Command name without the leading slash.
    pub name: String,
    /// Optional `description:` entry.
    pub description: Option<String>,
    /// Owning script.
    pub script: PathBuf,
    /// 1-based header line.
    pub line: usize,
    /// Expanded command trigger body.
    pub items: Vec<TriggerItem>,
}

/// A registered function.
#[derive(Debug)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,
    /// Declared parameter names.
    pub params: Vec<String>,
    /// Owning script.
    pub script: PathBuf,
    /// 1-based header line.
    pub line: usize,
    /// Batch that registered this signature; used to tell a reloaded
    /// file's fresh registration from its stale one during the swap.
    pub(crate) batch: u64,
    /// Expanded body, filled during the load pass.
    pub(crate) items: Vec<TriggerItem>,
}

/// A recorded function call site awaiting validation.
#[derive(Debug)]
struct CallSite {
    name: String,
    script: PathBuf,
    line: usize,
    batch: u64,
}

/// Triggers and commands collected during a batch's load pass, applied
/// atomically by [`Host::swap_in`].
pub struct StagedBatch {
    id: u64,
    triggers: HashMap<PathBuf, Vec<TriggerDef>>,
    commands: Vec<CommandDef>,
}

impl StagedBatch {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            triggers: HashMap::new(),
            commands: Vec::new(),
        }
    }

    /// Identifier of the batch this staging area belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stage an event trigger for its owning script.
    pub fn stage_trigger(&mut self, def: TriggerDef) {
        self.triggers.entry(def.script.clone()).or_default().push(def);
    }

    /// Stage a command registration.
    pub fn stage_command(&mut self, def: CommandDef) {
        self.commands.push(def);
    }

    /// True if a command of this name was already staged in this batch.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c.name == name)
    }
}

/// Notified with a batch's sources before any of its tasks run.
pub trait BatchListener: Send + Sync {
    fn before_load(&self, sources: &[Arc<ScriptSource>]);
}

/// The host's registries, safe to query from any thread.
#[derive(Default)]
pub struct Host {
    triggers: RwLock<HashMap<PathBuf, Vec<TriggerDef>>>,
    commands: RwLock<HashMap<String, CommandDef>>,
    functions: RwLock<HashMap<String, FunctionDef>>,
    calls: Mutex<Vec<CallSite>>,
    listeners: Mutex<Vec<Arc<dyn BatchListener>>>,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for pre-batch notifications.
    pub fn add_batch_listener(&self, listener: Arc<dyn BatchListener>) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn notify_before_load(&self, sources: &[Arc<ScriptSource>]) {
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener.before_load(sources);
        }
    }

    /// Register a function signature during preload.
    ///
    /// The same script re-registering a name replaces its previous
    /// signature (the reload case); a different script owning the name is
    /// a conflict.
    pub(crate) fn register_function(&self, def: FunctionDef) -> Result<(), String> {
        let mut functions = self.functions.write();
        if let Some(existing) = functions.get(&def.name) {
            if existing.script != def.script {
                return Err(format!(
                    "function '{}' is already defined in '{}'",
                    def.name,
                    existing.script.display()
                ));
            }
        }
        functions.insert(def.name.clone(), def);
        Ok(())
    }

    /// Attach the expanded body to a function registered earlier in the
    /// same batch.
    pub(crate) fn set_function_body(&self, name: &str, script: &Path, items: Vec<TriggerItem>) {
        let mut functions = self.functions.write();
        if let Some(def) = functions.get_mut(name) {
            if def.script == script {
                def.items = items;
            }
        }
    }

    /// Record a function call site for later validation.
    pub(crate) fn record_call(&self, name: &str, script: &Path, line: usize, batch: u64) {
        self.calls.lock().push(CallSite {
            name: name.to_string(),
            script: script.to_path_buf(),
            line,
            batch,
        });
    }

    /// Resolve recorded call sites against the function registry,
    /// reporting every call to a function that does not exist.
    pub(crate) fn validate_functions(&self, reporter: &Reporter) {
        let functions = self.functions.read();
        for call in self.calls.lock().iter() {
            if !functions.contains_key(&call.name) {
                reporter.error(format!(
                    "{}:{}: function '{}' does not exist",
                    call.script.display(),
                    call.line,
                    call.name
                ));
            }
        }
    }

    /// True if a live command of this name belongs to a different script.
    pub(crate) fn command_conflict(&self, name: &str, script: &Path) -> bool {
        self.commands
            .read()
            .get(name)
            .is_some_and(|def| def.script != script)
    }

    /// Atomically activate a staged batch.
    ///
    /// Under one write section: every `replaced` file's old triggers,
    /// commands, stale function signatures, and stale call sites are
    /// removed, then the staged registrations go live. Returns the
    /// combined counters of everything removed.
    pub(crate) fn swap_in(&self, staged: StagedBatch, replaced: &[PathBuf]) -> ScriptInfo {
        let mut triggers = self.triggers.write();
        let mut commands = self.commands.write();
        let mut functions = self.functions.write();
        let mut calls = self.calls.lock();

        let mut removed = ScriptInfo::new();
        for path in replaced {
            removed.files += 1;
            if let Some(old) = triggers.remove(path) {
                removed.triggers += old.len() as u32;
            }
            commands.retain(|_, def| {
                if def.script == *path {
                    removed.triggers += 1;
                    false
                } else {
                    true
                }
            });
            functions.retain(|_, def| {
                if def.script == *path && def.batch != staged.id {
                    removed.functions += 1;
                    false
                } else {
                    true
                }
            });
            calls.retain(|call| call.script != *path || call.batch == staged.id);
        }

        for (path, defs) in staged.triggers {
            triggers.insert(path, defs);
        }
        for def in staged.commands {
            commands.insert(def.name.clone(), def);
        }

        removed
    }

    /// Remove everything a script registered. Returns what was removed,
    /// with `files` set to 1.
    pub(crate) fn unload_script(&self, path: &Path) -> ScriptInfo {
        let mut removed = ScriptInfo {
            files: 1,
            ..ScriptInfo::new()
        };
        if let Some(old) = self.triggers.write().remove(path) {
            removed.triggers += old.len() as u32;
        }
        self.commands.write().retain(|_, def| {
            if def.script == path {
                removed.triggers += 1;
                false
            } else {
                true
            }
        });
        self.functions.write().retain(|_, def| {
            if def.script == path {
                removed.functions += 1;
                false
            } else {
                true
            }
        });
        self.calls.lock().retain(|call| call.script != path);
        removed
    }

    /// Remove every registration from every script.
    pub(crate) fn remove_all(&self) {
        self.triggers.write().clear();
        self.commands.write().clear();
        self.functions.write().clear();
        self.calls.lock().clear();
    }

    /// Total number of live event triggers.
    pub fn trigger_count(&self) -> usize {
        self.triggers.read().values().map(Vec::len).sum()
    }

    /// Event names of a script's live triggers, in registration order.
    pub fn triggers_for(&self, path: &Path) -> Vec<String> {
        self.triggers
            .read()
            .get(path)
            .map(|defs| defs.iter().map(|d| d.event.clone()).collect())
            .unwrap_or_default()
    }

    /// True if a command of this name is live.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// True if a function of this name is live.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Names of all live functions, unordered.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.read().keys().cloned().collect()
    }
}
