//! Diagnostics reporting for script loading.
//!
//! Script problems are *reported*, not returned: a bad trigger produces a
//! leveled message at its location and loading continues. The [`Reporter`]
//! fans every message out to the `log` facade and to any attached
//! handlers; [`CountingWindow`] is the handler variant that counts severe
//! messages during a scoped window, which is how "loaded with zero errors"
//! reporting is decided.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::scope::Scope;

/// Severity of a diagnostic message, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// Receives every message the [`Reporter`] emits while attached.
pub trait DiagnosticHandler: Send + Sync {
    /// Called for each reported message.
    fn handle(&self, severity: Severity, message: &str);
}

/// Fans diagnostics out to the `log` facade and to attached handlers.
///
/// Cloning is cheap; clones share the handler list. One reporter instance
/// belongs to each loader and is threaded through parsing and activation.
#[derive(Clone, Default)]
pub struct Reporter {
    handlers: Arc<RwLock<Vec<Arc<dyn DiagnosticHandler>>>>,
}

impl Reporter {
    /// Create a reporter with no attached handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler. No-op if this exact handler is already attached.
    pub fn attach(&self, handler: Arc<dyn DiagnosticHandler>) {
        let mut handlers = self.handlers.write();
        let ptr = Arc::as_ptr(&handler) as *const ();
        if !handlers
            .iter()
            .any(|h| std::ptr::eq(Arc::as_ptr(h) as *const (), ptr))
        {
            handlers.push(handler);
        }
    }

    /// Detach a previously attached handler.
    pub fn detach(&self, handler: &Arc<dyn DiagnosticHandler>) {
        let ptr = Arc::as_ptr(handler) as *const ();
        self.handlers
            .write()
            .retain(|h| !std::ptr::eq(Arc::as_ptr(h) as *const (), ptr));
    }

    /// Report a message at the given severity.
    pub fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Trace => log::trace!("{message}"),
            Severity::Debug => log::debug!("{message}"),
            Severity::Info => log::info!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
        for handler in self.handlers.read().iter() {
            handler.handle(severity, message);
        }
    }

    /// Report an error-level diagnostic.
    pub fn error(&self, message: impl AsRef<str>) {
        self.report(Severity::Error, message.as_ref());
    }

    /// Report a warning-level diagnostic.
    pub fn warning(&self, message: impl AsRef<str>) {
        self.report(Severity::Warning, message.as_ref());
    }

    /// Report an info-level diagnostic.
    pub fn info(&self, message: impl AsRef<str>) {
        self.report(Severity::Info, message.as_ref());
    }

    /// Report a debug-level diagnostic.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.report(Severity::Debug, message.as_ref());
    }

    /// Report something that should never happen.
    ///
    /// This is the fatal sink for caught panics and broken invariants: the
    /// error is reported with enough context for an operator to act on,
    /// and the enclosing unit of work resolves exceptionally. It never
    /// aborts the process.
    pub fn fatal(&self, context: &str, error: &dyn std::fmt::Display) {
        self.report(Severity::Error, &format!("{context}: {error}"));
        self.report(
            Severity::Error,
            "this is likely a bug in the script loader; please report it with the log above",
        );
    }
}

/// Counts messages at or above a severity while attached to a reporter.
///
/// Implements [`Scope`] so a window can be combined with a caller-supplied
/// scope and opened around every task of a batch: attach depth is tracked,
/// so overlapping opens from parallel tasks attach the underlying handler
/// once and each message is counted once.
#[derive(Clone)]
pub struct CountingWindow {
    reporter: Reporter,
    inner: Arc<CountingInner>,
}

struct CountingInner {
    threshold: Severity,
    count: AtomicUsize,
    depth: AtomicUsize,
}

impl DiagnosticHandler for CountingInner {
    fn handle(&self, severity: Severity, _message: &str) {
        if severity >= self.threshold {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl CountingWindow {
    /// Create a window counting messages at or above `threshold` on
    /// `reporter`. The window is inert until opened.
    pub fn new(reporter: &Reporter, threshold: Severity) -> Self {
        Self {
            reporter: reporter.clone(),
            inner: Arc::new(CountingInner {
                threshold,
                count: AtomicUsize::new(0),
                depth: AtomicUsize::new(0),
            }),
        }
    }

    /// Messages counted so far across every open window.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Relaxed)
    }
}

impl Scope for CountingWindow {
    fn open(&self) {
        if self.inner.depth.fetch_add(1, Ordering::SeqCst) == 0 {
            self.reporter
                .attach(self.inner.clone() as Arc<dyn DiagnosticHandler>);
        }
    }

    fn close(&self) {
        if self.inner.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            let handler = self.inner.clone() as Arc<dyn DiagnosticHandler>;
            self.reporter.detach(&handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_window_counts_only_while_open() {
        let reporter = Reporter::new();
        let window = CountingWindow::new(&reporter, Severity::Error);

        reporter.error("before");
        window.open();
        reporter.error("inside");
        reporter.warning("not severe enough");
        window.close();
        reporter.error("after");

        assert_eq!(window.count(), 1);
    }

    #[test]
    fn test_overlapping_opens_count_once() {
        let reporter = Reporter::new();
        let window = CountingWindow::new(&reporter, Severity::Error);

        window.open();
        window.open();
        reporter.error("overlap");
        window.close();
        reporter.error("still open");
        window.close();

        assert_eq!(window.count(), 2);
    }
}
