//! The resizable background worker pool for script loading.
//!
//! Workers pull queued jobs from a single shared FIFO queue. The pool size
//! controls the loading mode: `0` disables async loading entirely (every
//! submission runs inline on the caller), `1` loads off the primary thread
//! in submission order, `2+` additionally loads in parallel with no
//! ordering guarantee between jobs. Excess workers are soft-stopped when
//! the pool shrinks: they finish their current job and observe the stop
//! signal within one poll interval.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How long an idle worker blocks on the queue before rechecking its stop
/// signal. Bounds how quickly a shrink takes effect without busy-spinning.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A queued unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A resizable pool of background loader threads with a shared job queue.
///
/// The thread that creates the pool is its *primary* thread: only jobs
/// submitted from it are deferred to workers. Submissions from any other
/// thread (including the workers themselves) run inline, which keeps a
/// worker that spawns follow-up work from deadlocking on its own queue.
pub struct LoaderPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<Worker>>,
    size: AtomicUsize,
    next_worker_id: AtomicUsize,
    primary: ThreadId,
}

struct PoolShared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
}

struct Worker {
    stop: Arc<AtomicBool>,
    // Handle retained so the thread is observable; workers are never
    // force-joined because an in-flight script parse must not be cut short.
    _handle: thread::JoinHandle<()>,
}

impl LoaderPool {
    /// Create an empty (fully synchronous) pool owned by the calling
    /// thread.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            size: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(1),
            primary: thread::current().id(),
        }
    }

    /// True if jobs are executed off the primary thread.
    pub fn is_async(&self) -> bool {
        self.size.load(Ordering::SeqCst) > 0
    }

    /// True if jobs may execute concurrently with each other.
    pub fn is_parallel(&self) -> bool {
        self.size.load(Ordering::SeqCst) > 1
    }

    /// Current desired worker count.
    pub fn worker_count(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Set the desired worker count.
    ///
    /// Growing spawns new workers immediately. Shrinking signals the
    /// excess workers to stop after their current job; they exit within
    /// one poll interval when idle.
    pub fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::SeqCst);
        let mut workers = self.workers.lock();

        while workers.len() > size {
            let worker = workers.pop().expect("len checked above");
            worker.stop.store(true, Ordering::SeqCst);
        }
        // Wake idle workers so stop signals are observed promptly.
        self.shared.available.notify_all();

        while workers.len() < size {
            workers.push(self.spawn_worker());
        }
    }

    /// Submit a job.
    ///
    /// Deferred to the worker queue only when async mode is on *and* the
    /// caller is the primary thread; otherwise the job runs inline before
    /// this method returns.
    pub fn submit(&self, job: Job) {
        if self.is_async() && thread::current().id() == self.primary {
            self.shared.queue.lock().push_back(job);
            self.shared.available.notify_one();
        } else {
            job();
        }
    }

    fn spawn_worker(&self) -> Worker {
        let stop = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let stop_flag = stop.clone();
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("weft loader {id}"))
            .spawn(move || worker_loop(shared, stop_flag))
            .expect("failed to spawn loader worker thread");
        Worker {
            stop,
            _handle: handle,
        }
    }
}

impl Default for LoaderPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        for worker in self.workers.lock().iter() {
            worker.stop.store(true, Ordering::SeqCst);
        }
        self.shared.available.notify_all();
    }
}

fn worker_loop(shared: Arc<PoolShared>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let job = {
            let mut queue = shared.queue.lock();
            match queue.pop_front() {
                Some(job) => Some(job),
                None => {
                    shared.available.wait_for(&mut queue, POLL_INTERVAL);
                    queue.pop_front()
                }
            }
        };
        if let Some(job) = job {
            job();
        }
    }
}
