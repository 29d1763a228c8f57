//! Scoped resources acquired around units of loading work.
//!
//! A [`Scope`] is an open/close pair the loader wraps around every task it
//! dispatches and around the batch activation phases: callers use it to
//! bind diagnostics windows, progress indicators, or their own ambient
//! state to the lifetime of a load. Scopes may be opened and closed more
//! than once (each per-file task opens the same scope), so implementations
//! must tolerate nested open/close cycles.

use std::sync::Arc;

/// An acquire/release pair bound to a unit of loading work.
///
/// `open` is called before the work, `close` after it — including when the
/// work fails. Both default to no-ops.
pub trait Scope: Send + Sync {
    /// Acquire the resource. May be called again before `close`; nested
    /// opens must be safe.
    fn open(&self) {}

    /// Release the resource. Called exactly once per `open`, in reverse
    /// acquisition order when combined.
    fn close(&self) {}
}

/// The empty scope: both hooks are no-ops.
pub struct NoScope;

impl Scope for NoScope {}

/// The empty scope as a shareable handle.
pub fn no_scope() -> Arc<dyn Scope> {
    Arc::new(NoScope)
}

/// Combine any number of scopes into one.
///
/// Opens first-to-last and closes last-to-first, so inner resources are
/// released before the outer ones that enclose them.
pub fn combine(scopes: Vec<Arc<dyn Scope>>) -> Arc<dyn Scope> {
    Arc::new(CombinedScope { scopes })
}

struct CombinedScope {
    scopes: Vec<Arc<dyn Scope>>,
}

impl Scope for CombinedScope {
    fn open(&self) {
        for scope in &self.scopes {
            scope.open();
        }
    }

    fn close(&self) {
        for scope in self.scopes.iter().rev() {
            scope.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Scope for Recording {
        fn open(&self) {
            self.log.lock().push(format!("open {}", self.label));
        }
        fn close(&self) {
            self.log.lock().push(format!("close {}", self.label));
        }
    }

    #[test]
    fn test_combined_closes_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let combined = combine(vec![
            Arc::new(Recording {
                label: "outer",
                log: log.clone(),
            }),
            Arc::new(Recording {
                label: "inner",
                log: log.clone(),
            }),
        ]);
        combined.open();
        combined.close();
        assert_eq!(
            *log.lock(),
            vec!["open outer", "open inner", "close inner", "close outer"]
        );
    }
}
