//! The current-script parser context.
//!
//! Parsing and activation callbacks need to know which script they belong
//! to without threading it through every call: option lookup, diagnostic
//! locations, and type hints all resolve against "the script being
//! processed". The context is a thread-local binding scoped exactly to the
//! lifetime of one unit of work — each loading task enters it before
//! parsing and clears it after, and the single-threaded activation phases
//! switch it per owning file.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use weft_config::ScriptSource;

thread_local! {
    static CONTEXT: RefCell<ParserContext> = RefCell::new(ParserContext::default());
}

/// Rough type attached to a script variable by assignment, used for
/// cheap consistency checks while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    Number,
    Text,
    Unknown,
}

/// Ambient state for the script currently being parsed or activated.
#[derive(Default)]
pub struct ParserContext {
    current_script: Option<Arc<ScriptSource>>,
    options: HashMap<String, String>,
    indentation: String,
    // One map per open conditional scope; lookups walk outward so hints
    // set in an inner branch never leak to siblings.
    hint_scopes: Vec<HashMap<String, TypeHint>>,
}

impl ParserContext {
    /// The script currently being processed, if any.
    pub fn current_script(&self) -> Option<&Arc<ScriptSource>> {
        self.current_script.as_ref()
    }

    /// Display name of the current script, or `"<no script>"`.
    pub fn script_name(&self) -> &str {
        self.current_script
            .as_ref()
            .map(|s| s.name())
            .unwrap_or("<no script>")
    }

    /// Enter a script, replacing any previous binding. The option table is
    /// reset to `options` (empty at parse start, the parsed table when the
    /// activation phases re-enter the script).
    pub fn enter_script(&mut self, script: Arc<ScriptSource>, options: HashMap<String, String>) {
        self.current_script = Some(script);
        self.options = options;
        self.indentation.clear();
        self.hint_scopes.clear();
        self.hint_scopes.push(HashMap::new());
    }

    /// Clear the binding. Must be called after every unit of work that
    /// entered a script.
    pub fn clear(&mut self) {
        self.current_script = None;
        self.options.clear();
        self.indentation.clear();
        self.hint_scopes.clear();
    }

    /// Look up an option value defined by the current script.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Define an option for the current script.
    pub fn set_option(&mut self, name: String, value: String) {
        self.options.insert(name, value);
    }

    /// Snapshot the option table (taken at the end of a parse so the
    /// activation phases can restore it on another thread).
    pub fn options(&self) -> HashMap<String, String> {
        self.options.clone()
    }

    /// Current debug indentation prefix.
    pub fn indentation(&self) -> &str {
        &self.indentation
    }

    /// Push one level of debug indentation.
    pub fn indent(&mut self) {
        self.indentation.push_str("    ");
    }

    /// Pop one level of debug indentation.
    pub fn dedent(&mut self) {
        let len = self.indentation.len().saturating_sub(4);
        self.indentation.truncate(len);
    }

    /// Open a conditional type-hint scope.
    pub fn enter_hint_scope(&mut self) {
        self.hint_scopes.push(HashMap::new());
    }

    /// Close the innermost type-hint scope, discarding its hints.
    pub fn exit_hint_scope(&mut self) {
        if self.hint_scopes.len() > 1 {
            self.hint_scopes.pop();
        }
    }

    /// Record a type hint for a variable in the innermost scope.
    pub fn set_hint(&mut self, variable: &str, hint: TypeHint) {
        if let Some(scope) = self.hint_scopes.last_mut() {
            scope.insert(variable.to_string(), hint);
        }
    }

    /// Look up a variable's hint, innermost scope first.
    pub fn hint(&self, variable: &str) -> Option<TypeHint> {
        self.hint_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(variable).copied())
    }
}

/// Run `f` with mutable access to this thread's parser context.
pub fn with<R>(f: impl FnOnce(&mut ParserContext) -> R) -> R {
    CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn dummy_script() -> Arc<ScriptSource> {
        Arc::new(
            ScriptSource::parse(b"on load:\n    log \"x\"\n", "t.weft", Path::new("t.weft"))
                .expect("fixture parses"),
        )
    }

    #[test]
    fn test_hints_do_not_leak_from_inner_scopes() {
        let mut ctx = ParserContext::default();
        ctx.enter_script(dummy_script(), HashMap::new());
        ctx.set_hint("outer", TypeHint::Number);
        ctx.enter_hint_scope();
        ctx.set_hint("inner", TypeHint::Text);
        assert_eq!(ctx.hint("outer"), Some(TypeHint::Number));
        assert_eq!(ctx.hint("inner"), Some(TypeHint::Text));
        ctx.exit_hint_scope();
        assert_eq!(ctx.hint("inner"), None);
        assert_eq!(ctx.hint("outer"), Some(TypeHint::Number));
    }

    #[test]
    fn test_enter_resets_options() {
        let mut ctx = ParserContext::default();
        ctx.enter_script(dummy_script(), HashMap::new());
        ctx.set_option("greeting".into(), "hello".into());
        assert_eq!(ctx.option("greeting"), Some("hello"));
        ctx.enter_script(dummy_script(), HashMap::new());
        assert_eq!(ctx.option("greeting"), None);
    }

    #[test]
    fn test_clear_removes_binding() {
        let mut ctx = ParserContext::default();
        ctx.enter_script(dummy_script(), HashMap::new());
        assert!(ctx.current_script().is_some());
        ctx.clear();
        assert!(ctx.current_script().is_none());
        assert_eq!(ctx.script_name(), "<no script>");
    }
}
