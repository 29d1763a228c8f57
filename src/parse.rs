//! Per-file script parsing: structure extraction and body expansion.
//!
//! One parse turns a [`ScriptSource`] tree into an ordered list of
//! structures plus the file's option table and statistics. Parsing is
//! tolerant: a block or line the engine does not understand is reported
//! at its location and skipped, and the rest of the file continues — one
//! bad trigger never aborts a file, one bad file never aborts a batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use weft_config::{Node, ScriptSource, SectionNode};

use crate::context;
use crate::diag::Reporter;
use crate::lang::statement::{self, SectionHeader, Statement, TriggerItem, TriggerItemKind, TriggerSection};
use crate::lang::structure::{BuildCtx, PhaseCtx, Structure, StructureCatalog, StructureKind};
use crate::stats::ScriptInfo;

/// Regex pattern for matching `{@name}` option placeholders.
/// Compiled once at startup using LazyLock to avoid recompiling on every
/// substitution call.
static OPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{@([^{}]+?)\}")
        .expect("option substitution regex is a compile-time constant and must be valid")
});

/// One extracted structure with its activation bookkeeping.
pub(crate) struct StructureSlot {
    pub structure: Box<dyn Structure>,
    /// Header line, for activation failure reports.
    pub line: usize,
    /// Substituted header text, for activation failure reports.
    pub header: String,
    /// Set when a phase fails; later phases are skipped for this
    /// structure only.
    pub failed: bool,
}

/// Everything one file contributes to a batch.
pub(crate) struct ScriptUnit {
    pub source: Arc<ScriptSource>,
    /// Option table snapshot, restored when activation re-enters the
    /// script on the finisher thread.
    pub options: HashMap<String, String>,
    /// Structures in per-file priority order.
    pub slots: Vec<StructureSlot>,
    pub info: ScriptInfo,
}

/// Clears the thread's parser context when a parse ends, even if a
/// structure builder panics out of it.
struct ContextClearGuard;

impl Drop for ContextClearGuard {
    fn drop(&mut self) {
        context::with(|ctx| ctx.clear());
    }
}

/// Parse one script into its structures.
///
/// Enters the current-script context for the duration of the parse and
/// clears it before returning, so the unit is safe to run on any worker.
pub(crate) fn parse_script(
    source: Arc<ScriptSource>,
    catalog: &StructureCatalog,
    reporter: &Reporter,
) -> ScriptUnit {
    context::with(|ctx| ctx.enter_script(source.clone(), HashMap::new()));
    let _clear = ContextClearGuard;

    let mut info = ScriptInfo {
        files: 1,
        ..ScriptInfo::new()
    };
    let mut slots = Vec::new();

    for node in source.main() {
        match node {
            Node::Simple(simple) => {
                reporter.error(format!(
                    "{}:{}: invalid line - all code has to be put into triggers",
                    source.name(),
                    simple.line
                ));
            }
            Node::Section(section) if section.key.eq_ignore_ascii_case("options") => {
                parse_options(section, &source, reporter);
            }
            Node::Section(section) => {
                let header = replace_options(&section.key, reporter);
                if !validate_line(&header, source.name(), section.line, reporter) {
                    continue;
                }
                log::trace!("loading trigger '{header}'");

                let build_cx = BuildCtx {
                    reporter,
                    script: &source,
                };
                if let Some(structure) = catalog.parse_one(&header, section, &build_cx) {
                    match structure.kind() {
                        StructureKind::Trigger | StructureKind::Command => info.triggers += 1,
                        StructureKind::Function => info.functions += 1,
                        StructureKind::Other => {}
                    }
                    slots.push(StructureSlot {
                        structure,
                        line: section.line,
                        header,
                        failed: false,
                    });
                }
            }
        }
    }

    // Per-file priority order; the batch orchestrator builds its global
    // sequence on top of these (stable, so discovery order breaks ties).
    slots.sort_by_key(|slot| slot.structure.priority());

    let options = context::with(|ctx| ctx.options());

    log::debug!(
        "loaded {} trigger(s) from '{}'",
        info.triggers,
        source.name()
    );

    ScriptUnit {
        source,
        options,
        slots,
        info,
    }
}

/// Read an `options:` section into the current script's option table.
fn parse_options(section: &SectionNode, source: &ScriptSource, reporter: &Reporter) {
    for child in section {
        match child {
            Node::Simple(simple) => match simple.entry() {
                Some((name, value)) => {
                    context::with(|ctx| ctx.set_option(name.to_string(), value.to_string()));
                }
                None => reporter.error(format!(
                    "{}:{}: invalid option line '{}'",
                    source.name(),
                    simple.line,
                    simple.text
                )),
            },
            Node::Section(nested) => reporter.error(format!(
                "{}:{}: options cannot contain sections",
                source.name(),
                nested.line
            )),
        }
    }
}

/// Replace `{@name}` placeholders with option values from the current
/// script.
///
/// An undefined option is a diagnostic and the placeholder is left
/// verbatim, so the line still fails predictably downstream instead of
/// silently losing text.
pub(crate) fn replace_options(text: &str, reporter: &Reporter) -> String {
    OPTION_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            match context::with(|ctx| ctx.option(name).map(str::to_string)) {
                Some(value) => value,
                None => {
                    let script = context::with(|ctx| ctx.script_name().to_string());
                    reporter.error(format!("{}: undefined option {}", script, &caps[0]));
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Line-syntax pre-check: balanced quotes and balanced brackets outside
/// quotes. Reports a diagnostic and returns `false` on failure.
pub(crate) fn validate_line(line: &str, script: &str, line_no: usize, reporter: &Reporter) -> bool {
    let mut in_quotes = false;
    let mut depth: [i32; 3] = [0; 3]; // ( ), [ ], { }
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            '(' if !in_quotes => depth[0] += 1,
            ')' if !in_quotes => depth[0] -= 1,
            '[' if !in_quotes => depth[1] += 1,
            ']' if !in_quotes => depth[1] -= 1,
            '{' if !in_quotes => depth[2] += 1,
            '}' if !in_quotes => depth[2] -= 1,
            _ => {}
        }
        if depth.iter().any(|&d| d < 0) {
            break;
        }
    }

    if in_quotes {
        reporter.error(format!(
            "{script}:{line_no}: unbalanced quotes in '{line}'"
        ));
        return false;
    }
    if depth.iter().any(|&d| d != 0) {
        reporter.error(format!(
            "{script}:{line_no}: unbalanced brackets in '{line}'"
        ));
        return false;
    }
    true
}

/// Expand a section's body into next-linked trigger items.
///
/// Leaf lines become statements; nested sections open a conditional
/// type-hint scope, expand recursively, and close the scope on exit, so
/// narrowing inside a branch never leaks to siblings.
pub(crate) fn load_items(node: &SectionNode, cx: &mut PhaseCtx<'_>) -> Vec<TriggerItem> {
    context::with(|ctx| ctx.indent());
    let mut items = Vec::new();

    for child in node {
        match child {
            Node::Simple(simple) => {
                let expr = replace_options(&simple.text, cx.reporter);
                if !validate_line(&expr, cx.script.name(), simple.line, cx.reporter) {
                    continue;
                }
                if let Some(stmt) = Statement::parse(&expr, cx, simple.line) {
                    log::trace!("{}{}", context::with(|ctx| ctx.indentation().to_string()), expr);
                    items.push(TriggerItem {
                        kind: TriggerItemKind::Statement(stmt),
                        line: simple.line,
                        next: None,
                    });
                }
            }
            Node::Section(section) => {
                let expr = replace_options(&section.key, cx.reporter);
                if !validate_line(&expr, cx.script.name(), section.line, cx.reporter) {
                    continue;
                }
                context::with(|ctx| ctx.enter_hint_scope());
                if let Some(header) = SectionHeader::parse(&expr, cx, section.line) {
                    log::trace!("{}{}:", context::with(|ctx| ctx.indentation().to_string()), expr);
                    let body = load_items(section, cx);
                    items.push(TriggerItem {
                        kind: TriggerItemKind::Section(TriggerSection {
                            header,
                            items: body,
                        }),
                        line: section.line,
                        next: None,
                    });
                }
                context::with(|ctx| ctx.exit_hint_scope());
            }
        }
    }

    statement::link_items(&mut items);
    context::with(|ctx| ctx.dedent());
    items
}
