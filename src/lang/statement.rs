//! Trigger body items: statements, sections, and their linked order.
//!
//! A trigger body expands into a list of [`TriggerItem`]s. Leaf lines
//! become [`Statement`]s; nested blocks become [`TriggerSection`]s with
//! their own recursively expanded bodies. Sibling items are linked in
//! sequence — each item's `next` is the index of the following sibling —
//! which is the order the execution engine walks at runtime.

use crate::context::{self, TypeHint};
use crate::lang::structure::PhaseCtx;

/// Statement verbs the engine recognizes as plain effects.
const EFFECT_VERBS: &[&str] = &[
    "broadcast", "send", "message", "log", "cancel", "stop", "wait",
];

/// One item of an expanded trigger body.
#[derive(Debug)]
pub struct TriggerItem {
    pub kind: TriggerItemKind,
    /// 1-based source line.
    pub line: usize,
    /// Index of the following sibling in the same block; absent for the
    /// last item.
    pub next: Option<usize>,
}

/// Leaf statement or nested section.
#[derive(Debug)]
pub enum TriggerItemKind {
    Statement(Statement),
    Section(TriggerSection),
}

/// A nested block inside a trigger body.
#[derive(Debug)]
pub struct TriggerSection {
    pub header: SectionHeader,
    pub items: Vec<TriggerItem>,
}

/// Recognized section headers inside trigger bodies.
#[derive(Debug, PartialEq, Eq)]
pub enum SectionHeader {
    If { condition: String },
    Else,
    Loop { count: LoopCount },
}

/// Loop bound: a literal repetition count or a variable reference.
#[derive(Debug, PartialEq, Eq)]
pub enum LoopCount {
    Times(u64),
    Variable(String),
}

/// A parsed leaf statement.
#[derive(Debug, PartialEq, Eq)]
pub enum Statement {
    /// A plain effect line (`broadcast "hi"`).
    Effect { verb: String, text: String },
    /// `set {var} to <value>`.
    SetVariable { variable: String, value: String },
    /// `name(arg, ...)` — resolution is deferred to batch validation.
    FunctionCall { name: String, args: Vec<String> },
}

impl Statement {
    /// Parse one leaf line, already option-substituted and
    /// syntax-prechecked.
    ///
    /// Returns `None` after reporting a diagnostic for lines the grammar
    /// does not understand; the surrounding block keeps parsing.
    pub fn parse(expr: &str, cx: &mut PhaseCtx<'_>, line: usize) -> Option<Statement> {
        let expr = expr.trim();

        if let Some(rest) = expr.strip_prefix("set ") {
            return parse_set(rest, cx, line);
        }

        let verb = expr.split_whitespace().next().unwrap_or_default();
        if EFFECT_VERBS.contains(&verb) {
            return Some(Statement::Effect {
                verb: verb.to_string(),
                text: expr.to_string(),
            });
        }

        if let Some(call) = parse_call(expr) {
            let (name, args) = call;
            cx.host
                .record_call(&name, cx.script.path(), line, cx.staged.id());
            return Some(Statement::FunctionCall { name, args });
        }

        cx.reporter.error(format!(
            "{}:{}: can't understand this condition/effect: '{}'",
            cx.script.name(),
            line,
            expr
        ));
        None
    }
}

impl SectionHeader {
    /// Parse one section header inside a trigger body.
    pub fn parse(expr: &str, cx: &mut PhaseCtx<'_>, line: usize) -> Option<SectionHeader> {
        let expr = expr.trim();

        if let Some(condition) = expr.strip_prefix("if ") {
            let condition = condition.trim();
            if !condition.is_empty() {
                return Some(SectionHeader::If {
                    condition: condition.to_string(),
                });
            }
        } else if expr == "else" {
            return Some(SectionHeader::Else);
        } else if let Some(count) = parse_loop(expr, cx, line) {
            return count.map(|count| SectionHeader::Loop { count });
        }

        cx.reporter.error(format!(
            "{}:{}: can't understand this section: '{}'",
            cx.script.name(),
            line,
            expr
        ));
        None
    }
}

/// `set {var} to <value>`; records a type hint for the variable.
fn parse_set(rest: &str, cx: &mut PhaseCtx<'_>, line: usize) -> Option<Statement> {
    let rest = rest.trim_start();
    let inner = rest
        .strip_prefix('{')
        .and_then(|r| r.split_once('}'))
        .and_then(|(variable, tail)| {
            tail.trim_start()
                .strip_prefix("to ")
                .map(|value| (variable, value.trim()))
        });

    match inner {
        Some((variable, value)) if !variable.is_empty() && !value.is_empty() => {
            context::with(|ctx| ctx.set_hint(variable, classify(value)));
            Some(Statement::SetVariable {
                variable: variable.to_string(),
                value: value.to_string(),
            })
        }
        _ => {
            cx.reporter.error(format!(
                "{}:{}: can't understand this condition/effect: 'set {}'",
                cx.script.name(),
                line,
                rest
            ));
            None
        }
    }
}

/// `loop <n> times` or `loop {var} times`.
///
/// Returns `None` when the header is not a loop at all, `Some(None)` when
/// it is a loop with a bad count (diagnostic reported).
fn parse_loop(expr: &str, cx: &mut PhaseCtx<'_>, line: usize) -> Option<Option<LoopCount>> {
    let bound = expr.strip_prefix("loop ")?.strip_suffix(" times")?.trim();

    if let Ok(times) = bound.parse::<u64>() {
        return Some(Some(LoopCount::Times(times)));
    }
    if let Some(variable) = bound.strip_prefix('{').and_then(|b| b.strip_suffix('}')) {
        if context::with(|ctx| ctx.hint(variable)) == Some(TypeHint::Text) {
            cx.reporter.error(format!(
                "{}:{}: loop count must be a number, but {{{}}} holds text",
                cx.script.name(),
                line,
                variable
            ));
            return Some(None);
        }
        return Some(Some(LoopCount::Variable(variable.to_string())));
    }

    cx.reporter.error(format!(
        "{}:{}: can't understand loop count '{}'",
        cx.script.name(),
        line,
        bound
    ));
    Some(None)
}

/// `name(arg, ...)` — a plausible function call.
fn parse_call(expr: &str) -> Option<(String, Vec<String>)> {
    let open = expr.find('(')?;
    if !expr.ends_with(')') {
        return None;
    }
    let name = &expr[..open];
    let valid = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return None;
    }
    let inner = &expr[open + 1..expr.len() - 1];
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|a| a.trim().to_string()).collect()
    };
    Some((name.to_string(), args))
}

/// Classify an assignment value for type hinting.
fn classify(value: &str) -> TypeHint {
    if value.parse::<f64>().is_ok() {
        TypeHint::Number
    } else if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        TypeHint::Text
    } else {
        TypeHint::Unknown
    }
}

/// Link sibling items in sequence: each item points at the following one.
pub(crate) fn link_items(items: &mut [TriggerItem]) {
    let len = items.len();
    for (i, item) in items.iter_mut().enumerate() {
        item.next = (i + 1 < len).then_some(i + 1);
    }
}
