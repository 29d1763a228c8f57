//! Built-in structure kinds: event triggers, commands, and functions.

use weft_config::SectionNode;

use crate::host::{CommandDef, FunctionDef, TriggerDef};
use crate::lang::structure::{
    BuildCtx, BuildOutcome, COMMAND_PRIORITY, FUNCTION_PRIORITY, PhaseCtx, Structure,
    StructureKind, TRIGGER_PRIORITY,
};
use crate::parse::load_items;

/// `on <event>:` — an event trigger.
pub(crate) fn build_trigger(header: &str, node: &SectionNode, _cx: &BuildCtx<'_>) -> BuildOutcome {
    let Some(event) = header.strip_prefix("on ") else {
        return BuildOutcome::NotMine;
    };
    let event = event.trim();
    if event.is_empty() {
        return BuildOutcome::NotMine;
    }
    BuildOutcome::Built(Box::new(EventTrigger {
        event: event.to_string(),
        node: node.clone(),
    }))
}

struct EventTrigger {
    event: String,
    node: SectionNode,
}

impl Structure for EventTrigger {
    fn priority(&self) -> u32 {
        TRIGGER_PRIORITY
    }

    fn kind(&self) -> StructureKind {
        StructureKind::Trigger
    }

    fn load(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        let items = load_items(&self.node, cx);
        cx.staged.stage_trigger(TriggerDef {
            event: self.event.clone(),
            script: cx.script.path().to_path_buf(),
            line: self.node.line,
            items,
        });
        Ok(())
    }
}

/// `command /<name> ...:` — a command with a `trigger:` body.
pub(crate) fn build_command(header: &str, node: &SectionNode, cx: &BuildCtx<'_>) -> BuildOutcome {
    let Some(rest) = header.strip_prefix("command ") else {
        return BuildOutcome::NotMine;
    };
    let Some(name) = rest.trim().split_whitespace().next() else {
        cx.reporter.error(format!(
            "{}:{}: command is missing a name",
            cx.script.name(),
            node.line
        ));
        return BuildOutcome::Failed;
    };
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.is_empty() {
        cx.reporter.error(format!(
            "{}:{}: command is missing a name",
            cx.script.name(),
            node.line
        ));
        return BuildOutcome::Failed;
    }
    BuildOutcome::Built(Box::new(CommandStructure {
        name: name.to_string(),
        node: node.clone(),
    }))
}

struct CommandStructure {
    name: String,
    node: SectionNode,
}

impl Structure for CommandStructure {
    fn priority(&self) -> u32 {
        COMMAND_PRIORITY
    }

    fn kind(&self) -> StructureKind {
        StructureKind::Command
    }

    fn load(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        if cx.host.command_conflict(&self.name, cx.script.path()) || cx.staged.has_command(&self.name)
        {
            return Err(format!(
                "command '/{}' is already registered by another script",
                self.name
            ));
        }
        let Some(trigger) = self.node.section("trigger") else {
            return Err(format!("command '/{}' has no trigger section", self.name));
        };
        let items = load_items(trigger, cx);
        cx.staged.stage_command(CommandDef {
            name: self.name.clone(),
            description: self.node.entry_value("description").map(str::to_string),
            script: cx.script.path().to_path_buf(),
            line: self.node.line,
            items,
        });
        Ok(())
    }
}

/// `function <name>(<params>):`.
pub(crate) fn build_function(header: &str, node: &SectionNode, cx: &BuildCtx<'_>) -> BuildOutcome {
    let Some(rest) = header.strip_prefix("function ") else {
        return BuildOutcome::NotMine;
    };
    let rest = rest.trim();
    let signature = rest
        .split_once('(')
        .and_then(|(name, tail)| tail.strip_suffix(')').map(|params| (name.trim(), params)));
    let Some((name, params)) = signature else {
        cx.reporter.error(format!(
            "{}:{}: can't understand this function signature: '{}'",
            cx.script.name(),
            node.line,
            rest
        ));
        return BuildOutcome::Failed;
    };
    let valid_name = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        cx.reporter.error(format!(
            "{}:{}: invalid function name '{}'",
            cx.script.name(),
            node.line,
            name
        ));
        return BuildOutcome::Failed;
    }
    let params: Vec<String> = if params.trim().is_empty() {
        Vec::new()
    } else {
        params.split(',').map(|p| p.trim().to_string()).collect()
    };
    BuildOutcome::Built(Box::new(FunctionStructure {
        name: name.to_string(),
        params,
        node: node.clone(),
    }))
}

struct FunctionStructure {
    name: String,
    params: Vec<String>,
    node: SectionNode,
}

impl Structure for FunctionStructure {
    fn priority(&self) -> u32 {
        FUNCTION_PRIORITY
    }

    fn kind(&self) -> StructureKind {
        StructureKind::Function
    }

    fn preload(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        cx.host.register_function(FunctionDef {
            name: self.name.clone(),
            params: self.params.clone(),
            script: cx.script.path().to_path_buf(),
            line: self.node.line,
            batch: cx.staged.id(),
            items: Vec::new(),
        })
    }

    fn load(&mut self, cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        let items = load_items(&self.node, cx);
        cx.host
            .set_function_body(&self.name, cx.script.path(), items);
        Ok(())
    }
}
