//! Deferred, exception-safe units of loading work.
//!
//! [`run_task`] wraps a supplier with a [`Scope`] (opened before, always
//! closed after, even on failure), dispatches it through the pool, and
//! hands back a [`Completion`] the caller can wait on. Panics anywhere in
//! the unit are caught at this boundary, reported to the fatal sink, and
//! turned into an exceptional completion — a worker thread never dies to
//! a bad script.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::diag::Reporter;
use crate::error::LoadError;
use crate::pool::LoaderPool;
use crate::scope::Scope;

/// Result of a completed task. Errors are shared so every waiter can
/// observe the same failure.
pub type TaskResult<T> = Result<T, Arc<LoadError>>;

/// A waitable handle for the result of one unit of work.
///
/// Resolved exactly once; later resolutions are ignored. `wait` may be
/// called from any number of threads.
pub struct Completion<T> {
    state: Arc<State<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

enum Slot<T> {
    Pending,
    Done(TaskResult<T>),
    Taken,
}

struct State<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

impl<T> Completion<T> {
    /// An unresolved completion.
    pub fn pending() -> Self {
        Self {
            state: Arc::new(State {
                slot: Mutex::new(Slot::Pending),
                done: Condvar::new(),
            }),
        }
    }

    /// A completion already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let completion = Self::pending();
        completion.complete(Ok(value));
        completion
    }

    /// A completion already resolved exceptionally.
    pub fn failed(error: LoadError) -> Self {
        let completion = Self::pending();
        completion.complete(Err(Arc::new(error)));
        completion
    }

    /// Resolve with `result`. The first resolution wins.
    pub(crate) fn complete(&self, result: TaskResult<T>) {
        let mut slot = self.state.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Done(result);
            self.state.done.notify_all();
        }
    }

    /// True once resolved (even if the result was since taken).
    pub fn is_done(&self) -> bool {
        !matches!(*self.state.slot.lock(), Slot::Pending)
    }

    /// Block until resolved, then move the result out. Used by the batch
    /// joiner, which is the single consumer of per-file results.
    pub(crate) fn take(&self) -> TaskResult<T> {
        let mut slot = self.state.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.state.done.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Done(result) => result,
            Slot::Pending => unreachable!("waited for resolution above"),
            Slot::Taken => Err(Arc::new(LoadError::Internal(
                "task result consumed twice".into(),
            ))),
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Block until resolved and return a copy of the result.
    pub fn wait(&self) -> TaskResult<T> {
        let mut slot = self.state.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.state.done.wait(&mut slot);
        }
        match &*slot {
            Slot::Done(result) => result.clone(),
            Slot::Pending => unreachable!("waited for resolution above"),
            Slot::Taken => Err(Arc::new(LoadError::Internal(
                "task result consumed twice".into(),
            ))),
        }
    }

    /// Return a copy of the result if already resolved.
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        match &*self.state.slot.lock() {
            Slot::Done(result) => Some(result.clone()),
            _ => None,
        }
    }
}

/// Dispatch `supplier` through the pool wrapped in `scope`.
///
/// The scope is opened before the supplier runs and closed afterwards even
/// if the supplier panics. Any panic — from open, the supplier, or close —
/// is reported via `reporter` and resolves the returned completion
/// exceptionally. When the pool is synchronous (or the caller is not the
/// pool's primary thread) the unit runs inline and the returned completion
/// is already resolved.
pub fn run_task<T, F>(
    pool: &LoaderPool,
    reporter: &Reporter,
    scope: Arc<dyn Scope>,
    supplier: F,
) -> Completion<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let completion = Completion::pending();
    let resolver = completion.clone();
    let reporter = reporter.clone();

    pool.submit(Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.open();
            let result = panic::catch_unwind(AssertUnwindSafe(supplier));
            scope.close();
            result
        }));

        // Flatten: the outer catch covers open/close, the inner one the
        // supplier (so close still ran if the supplier panicked).
        let flattened = match outcome {
            Ok(inner) => inner,
            Err(payload) => Err(payload),
        };

        match flattened {
            Ok(value) => resolver.complete(Ok(value)),
            Err(payload) => {
                let error = LoadError::Panic(panic_message(payload));
                reporter.fatal("script loading task failed", &error);
                resolver.complete(Err(Arc::new(error)));
            }
        }
    }));

    completion
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_task_resolves_immediately() {
        let pool = LoaderPool::new();
        let reporter = Reporter::new();
        let completion = run_task(&pool, &reporter, scope::no_scope(), || 41 + 1);
        assert!(completion.is_done());
        assert_eq!(completion.wait().expect("task succeeded"), 42);
    }

    #[test]
    fn test_scope_closes_after_panic() {
        struct Tracking(Arc<AtomicUsize>);
        impl Scope for Tracking {
            fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let pool = LoaderPool::new();
        let reporter = Reporter::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let tracking: Arc<dyn Scope> = Arc::new(Tracking(closes.clone()));

        let completion: Completion<()> = run_task(&pool, &reporter, tracking, || {
            panic!("scripted disaster");
        });

        let err = completion.wait().expect_err("panic surfaces as error");
        assert!(matches!(*err, LoadError::Panic(ref msg) if msg.contains("scripted disaster")));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_task_resolves_on_wait() {
        let pool = LoaderPool::new();
        pool.set_size(1);
        let reporter = Reporter::new();
        let completion = run_task(&pool, &reporter, scope::no_scope(), || "done");
        assert_eq!(completion.wait().expect("task succeeded"), "done");
    }

    #[test]
    fn test_scope_order_around_supplier() {
        struct Recording(Arc<PlMutex<Vec<&'static str>>>);
        impl Scope for Recording {
            fn open(&self) {
                self.0.lock().push("open");
            }
            fn close(&self) {
                self.0.lock().push("close");
            }
        }

        let pool = LoaderPool::new();
        let reporter = Reporter::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        let log2 = log.clone();
        let recording: Arc<dyn Scope> = Arc::new(Recording(log.clone()));

        run_task(&pool, &reporter, recording, move || {
            log2.lock().push("work");
        })
        .wait()
        .expect("task succeeded");

        assert_eq!(*log.lock(), vec!["open", "work", "close"]);
    }
}
