//! The script loader: discovery, batch orchestration, and the reload
//! state machine.
//!
//! [`ScriptLoader`] is the public lifecycle surface. A batch load submits
//! one parsing task per file through the worker pool, joins them, and
//! then runs three global activation passes — preload, load, after-load —
//! over every structure of the batch in cross-file priority order on a
//! single thread. Because every structure exists before any `load` runs,
//! a trigger in one file may reference a function declared in another
//! regardless of file order, without a dependency graph.
//!
//! Host registrations are staged during the load pass and swapped live in
//! one atomic step at the end of the batch, so reloading never exposes a
//! window where a file's old triggers are gone and its new ones are not
//! yet present.

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use weft_config::ScriptSource;

use crate::context;
use crate::diag::{CountingWindow, Reporter, Severity};
use crate::error::LoadError;
use crate::host::{Host, StagedBatch};
use crate::lang::structure::{PhaseCtx, Structure, StructureCatalog};
use crate::parse::{self, ScriptUnit, StructureSlot};
use crate::pool::LoaderPool;
use crate::scope::{self, Scope};
use crate::settings::LoaderSettings;
use crate::stats::ScriptInfo;
use crate::task::{Completion, run_task};

/// File extension of script files.
pub const SCRIPT_EXTENSION: &str = ".weft";

/// Leading marker that administratively disables a script file.
pub const DISABLED_PREFIX: char = '-';

/// Runs after a batch's phases complete, before its completion resolves.
type PostBatch = Box<dyn FnOnce(&ScriptInfo) + Send>;

/// The loading engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ScriptLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    settings: LoaderSettings,
    host: Arc<Host>,
    catalog: StructureCatalog,
    reporter: Reporter,
    pool: LoaderPool,
    loaded: RwLock<HashSet<PathBuf>>,
    disabled: RwLock<HashSet<PathBuf>>,
    totals: Mutex<ScriptInfo>,
    retained: Mutex<Vec<Arc<ScriptSource>>>,
    batch_counter: AtomicU64,
}

impl ScriptLoader {
    /// Create a loader. The calling thread becomes the pool's primary
    /// thread; `settings.loader_threads` workers are started immediately.
    pub fn new(settings: LoaderSettings, host: Arc<Host>, catalog: StructureCatalog) -> Self {
        let threads = settings.loader_threads;
        let loader = Self {
            inner: Arc::new(LoaderInner {
                settings,
                host,
                catalog,
                reporter: Reporter::new(),
                pool: LoaderPool::new(),
                loaded: RwLock::new(HashSet::new()),
                disabled: RwLock::new(HashSet::new()),
                totals: Mutex::new(ScriptInfo::new()),
                retained: Mutex::new(Vec::new()),
                batch_counter: AtomicU64::new(0),
            }),
        };
        loader.set_worker_count(threads);
        loader
    }

    /// The loader's diagnostics reporter.
    pub fn reporter(&self) -> Reporter {
        self.inner.reporter.clone()
    }

    /// The host registries this loader feeds.
    pub fn host(&self) -> Arc<Host> {
        self.inner.host.clone()
    }

    /// The settings this loader was built with.
    pub fn settings(&self) -> &LoaderSettings {
        &self.inner.settings
    }

    /// Set the background worker count. `0` disables async loading, `1`
    /// loads off-caller in order, `2+` loads in parallel.
    pub fn set_worker_count(&self, count: usize) {
        self.inner.pool.set_size(count);
    }

    /// True if scripts load off the primary thread.
    pub fn is_async(&self) -> bool {
        self.inner.pool.is_async()
    }

    /// True if scripts may load on several workers concurrently.
    pub fn is_parallel(&self) -> bool {
        self.inner.pool.is_parallel()
    }

    // -----------------------------------------------------------------------
    // Lifecycle surface
    // -----------------------------------------------------------------------

    /// Load every active script under the configured scripts directory.
    ///
    /// Recomputes the disabled set from disk, parses and activates every
    /// discovered file, and reports a summary ("no errors", "no scripts
    /// found", or counts with elapsed time). In async mode, previously
    /// loaded files that vanished from disk are unloaded after the batch
    /// completes.
    pub fn load_all(&self, caller_scope: Arc<dyn Scope>) -> Completion<ScriptInfo> {
        let dir = self.inner.settings.scripts_dir.clone();
        if let Err(source) = fs::create_dir_all(&dir) {
            let error = LoadError::Io { path: dir, source };
            self.inner.reporter.error(error.to_string());
            return Completion::failed(error);
        }

        let start = Instant::now();
        self.inner.update_disabled(&dir);
        let old_loaded: HashSet<PathBuf> = self.inner.loaded.read().clone();

        // The counting window spans discovery and the whole batch; zero
        // severe messages means a clean load.
        let counting = CountingWindow::new(&self.inner.reporter, Severity::Error);
        counting.open();
        let sources = self.inner.discover_and_read(&dir);
        counting.close();

        let batch_scope = scope::combine(vec![caller_scope, Arc::new(counting.clone())]);

        let inner = self.inner.clone();
        let post: PostBatch = Box::new(move |info| {
            if inner.pool.is_async() {
                let current = inner.loaded.read().clone();
                for stale in old_loaded.difference(&current) {
                    inner.unload_script_inner(stale);
                }
            }
            if counting.count() == 0 {
                inner.reporter.info("all scripts loaded without errors");
            }
            if info.files == 0 {
                inner.reporter.warning("no scripts were found in the scripts directory");
            } else {
                inner.reporter.info(format!(
                    "loaded {} script(s) with {} trigger(s) in {:.2?}",
                    info.files,
                    info.triggers,
                    start.elapsed()
                ));
            }
        });

        self.load_scripts_inner(sources, batch_scope, Some(post))
    }

    /// Load a given set of script files.
    pub fn load_files(&self, paths: &[PathBuf], scope: Arc<dyn Scope>) -> Completion<ScriptInfo> {
        let mut paths: Vec<&PathBuf> = paths.iter().collect();
        paths.sort();
        let sources = paths
            .into_iter()
            .filter_map(|p| self.inner.read_source(p))
            .collect();
        self.load_scripts(sources, scope)
    }

    /// Load already-parsed sources as one batch.
    pub fn load_scripts(
        &self,
        sources: Vec<Arc<ScriptSource>>,
        scope: Arc<dyn Scope>,
    ) -> Completion<ScriptInfo> {
        self.load_scripts_inner(sources, scope, None)
    }

    /// Unload one script: deregister its triggers, commands, and
    /// functions, subtract its counters, and mark it disabled.
    ///
    /// Unloading a file that is not loaded is a no-op returning zeroed
    /// counters.
    pub fn unload_script(&self, path: &Path) -> ScriptInfo {
        let info = self.inner.unload_script_inner(path);
        self.inner.host.validate_functions(&self.inner.reporter);
        info
    }

    /// Unload every loaded script under a directory, combining counters.
    pub fn unload_dir(&self, dir: &Path) -> ScriptInfo {
        let info = self.inner.unload_dir_inner(dir);
        self.inner.host.validate_functions(&self.inner.reporter);
        info
    }

    /// Unload everything: clears every registration, the loaded set, and
    /// the persistent counters.
    pub fn unload_all(&self) {
        self.inner.loaded.write().clear();
        self.inner.host.remove_all();
        *self.inner.totals.lock() = ScriptInfo::new();
    }

    /// Reload one script.
    ///
    /// Synchronous mode unloads the old version first. Async mode parses
    /// the new version and swaps the old registrations out only when the
    /// new ones take effect, so the file's triggers never disappear in
    /// between.
    pub fn reload_script(&self, path: &Path, scope: Arc<dyn Scope>) -> Completion<ScriptInfo> {
        if !self.is_async() {
            self.inner.unload_script_inner(path);
        }
        match self.inner.read_source(path) {
            None => Completion::resolved(ScriptInfo::new()),
            Some(source) => self.load_scripts(vec![source], scope),
        }
    }

    /// Reload every script under a directory.
    ///
    /// In async mode, files that disappeared from disk are unloaded only
    /// after the whole batch completes, so a mid-batch disappearance
    /// cannot race with loading the same batch.
    pub fn reload_dir(&self, dir: &Path, scope: Arc<dyn Scope>) -> Completion<ScriptInfo> {
        if !self.is_async() {
            self.inner.unload_dir_inner(dir);
            let sources = self.inner.discover_and_read(dir);
            return self.load_scripts(sources, scope);
        }

        let previously: HashSet<PathBuf> = self
            .inner
            .loaded
            .read()
            .iter()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        let sources = self.inner.discover_and_read(dir);
        let batch_paths: HashSet<PathBuf> =
            sources.iter().map(|s| s.path().to_path_buf()).collect();

        let inner = self.inner.clone();
        let post: PostBatch = Box::new(move |_info| {
            for stale in previously.difference(&batch_paths) {
                inner.unload_script_inner(stale);
            }
        });
        self.load_scripts_inner(sources, scope, Some(post))
    }

    // -----------------------------------------------------------------------
    // Query surface (safe from any thread)
    // -----------------------------------------------------------------------

    /// Paths of currently loaded scripts, sorted.
    pub fn loaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner.loaded.read().iter().cloned().collect();
        files.sort();
        files
    }

    /// Paths of currently disabled scripts, sorted.
    pub fn disabled_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner.disabled.read().iter().cloned().collect();
        files.sort();
        files
    }

    /// Persistent count of loaded script files.
    pub fn loaded_script_count(&self) -> u32 {
        self.inner.totals.lock().files
    }

    /// Persistent count of loaded triggers.
    pub fn loaded_trigger_count(&self) -> u32 {
        self.inner.totals.lock().triggers
    }

    /// Persistent count of loaded functions.
    pub fn loaded_function_count(&self) -> u32 {
        self.inner.totals.lock().functions
    }

    /// Sources retained after loading, when `keep_sources_loaded` is set.
    pub fn retained_sources(&self) -> Vec<Arc<ScriptSource>> {
        self.inner.retained.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Batch orchestration
    // -----------------------------------------------------------------------

    fn load_scripts_inner(
        &self,
        sources: Vec<Arc<ScriptSource>>,
        scope: Arc<dyn Scope>,
        post: Option<PostBatch>,
    ) -> Completion<ScriptInfo> {
        let inner = &self.inner;
        inner.host.notify_before_load(&sources);
        let batch_id = inner.batch_counter.fetch_add(1, Ordering::Relaxed) + 1;

        // One parsing task per file, in input order. Completion order is
        // unconstrained when the pool is parallel; the global sort below
        // makes that irrelevant for correctness.
        let mut parses: Vec<Completion<ScriptUnit>> = Vec::with_capacity(sources.len());
        for source in sources {
            if inner.settings.keep_sources_loaded {
                inner.retained.lock().push(source.clone());
            }
            let task_inner = inner.clone();
            parses.push(run_task(
                &inner.pool,
                &inner.reporter,
                scope.clone(),
                move || parse::parse_script(source, &task_inner.catalog, &task_inner.reporter),
            ));
        }

        let completion = Completion::pending();
        let resolver = completion.clone();
        let finish_inner = inner.clone();
        let finish_scope = scope.clone();
        let all_done = parses.iter().all(Completion::is_done);

        let finisher = move || {
            // Join barrier: a failed parse task was already reported and
            // contributes nothing; the batch continues.
            let units: Vec<ScriptUnit> = parses
                .into_iter()
                .filter_map(|parse| parse.take().ok())
                .collect();

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                finish_inner.finish_batch(units, finish_scope.as_ref(), batch_id, post)
            }));
            match outcome {
                Ok(info) => resolver.complete(Ok(info)),
                Err(payload) => {
                    let error = LoadError::Panic(crate::task::panic_message(payload));
                    finish_inner
                        .reporter
                        .fatal("script batch activation failed", &error);
                    resolver.complete(Err(Arc::new(error)));
                }
            }
        };

        if all_done {
            // Synchronous path (or called off the primary thread): every
            // parse already ran inline, so finish on the caller.
            finisher();
        } else {
            thread::Builder::new()
                .name("weft batch finisher".into())
                .spawn(finisher)
                .expect("failed to spawn batch finisher thread");
        }

        completion
    }
}

/// The three activation passes, in order.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preload,
    Load,
    AfterLoad,
}

/// Restores ambient state when the activation phases end, normally or by
/// panic: the scope is closed and the thread's parser context cleared.
struct FinishGuard<'a>(&'a dyn Scope);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        context::with(|ctx| ctx.clear());
        self.0.close();
    }
}

impl LoaderInner {
    fn finish_batch(
        &self,
        mut units: Vec<ScriptUnit>,
        scope: &dyn Scope,
        batch_id: u64,
        post: Option<PostBatch>,
    ) -> ScriptInfo {
        let info = {
            scope.open();
            let _guard = FinishGuard(scope);
            self.run_phases(&mut units, batch_id)
        };
        if let Some(post) = post {
            post(&info);
        }
        info
    }

    /// The three global activation passes plus validation and the live
    /// swap. Runs on a single thread.
    fn run_phases(&self, units: &mut [ScriptUnit], batch_id: u64) -> ScriptInfo {
        let mut run_info = ScriptInfo::new();
        for unit in units.iter() {
            run_info.add(&unit.info);
        }

        // Global sequence: every (file, structure) pair, stable-sorted by
        // priority so ties keep file-then-discovery order.
        let mut order: Vec<(usize, usize)> = Vec::new();
        for (ui, unit) in units.iter().enumerate() {
            for si in 0..unit.slots.len() {
                order.push((ui, si));
            }
        }
        order.sort_by_key(|&(ui, si)| units[ui].slots[si].structure.priority());

        let mut staged = StagedBatch::new(batch_id);

        // Three passes over the same global sequence; each pass completes
        // for the whole batch before the next begins. Context is switched
        // only when the owning file changes — equal priorities keep a
        // file's structures consecutive (stable sort), so switches are
        // per-file, not per-structure.
        for phase in [Phase::Preload, Phase::Load, Phase::AfterLoad] {
            let mut current_file: Option<usize> = None;
            for &(ui, si) in &order {
                let unit = &mut units[ui];
                if current_file != Some(ui) {
                    context::with(|ctx| {
                        ctx.enter_script(unit.source.clone(), unit.options.clone());
                    });
                    current_file = Some(ui);
                }
                let source = unit.source.clone();
                let mut cx = PhaseCtx {
                    host: &self.host,
                    reporter: &self.reporter,
                    staged: &mut staged,
                    script: &source,
                };
                let slot = &mut unit.slots[si];
                match phase {
                    Phase::Preload => {
                        run_structure_phase(slot, "preload", &mut cx, |s, cx| s.preload(cx));
                    }
                    Phase::Load => {
                        run_structure_phase(slot, "load", &mut cx, |s, cx| s.load(cx));
                    }
                    Phase::AfterLoad => {
                        run_structure_phase(slot, "after-load", &mut cx, |s, cx| {
                            s.after_load(cx)
                        });
                    }
                }
            }
        }

        // Cross-cutting validation: forward references recorded during
        // the load pass resolve against the now-complete registry.
        self.host.validate_functions(&self.reporter);

        // Atomic activation: old versions of reloaded files out, staged
        // registrations in, under one write section.
        let replaced: Vec<PathBuf> = {
            let loaded = self.loaded.read();
            units
                .iter()
                .filter(|unit| loaded.contains(unit.source.path()))
                .map(|unit| unit.source.path().to_path_buf())
                .collect()
        };
        let removed = self.host.swap_in(staged, &replaced);

        {
            let mut loaded = self.loaded.write();
            let mut disabled = self.disabled.write();
            for unit in units.iter() {
                let path = unit.source.path();
                loaded.insert(path.to_path_buf());
                disabled.remove(&disabled_twin(path));
            }
        }

        // Persistent totals merge only now that the run fully completed;
        // a failed run can never half-update them.
        {
            let mut totals = self.totals.lock();
            totals.add(&run_info);
            totals.subtract(&removed);
        }

        run_info
    }

    fn unload_script_inner(&self, path: &Path) -> ScriptInfo {
        if !self.loaded.write().remove(path) {
            return ScriptInfo::new();
        }
        let info = self.host.unload_script(path);
        self.totals.lock().subtract(&info);
        self.disabled.write().insert(disabled_twin(path));
        log::debug!("unloaded '{}' ({info})", path.display());
        info
    }

    fn unload_dir_inner(&self, dir: &Path) -> ScriptInfo {
        let mut under: Vec<PathBuf> = self
            .loaded
            .read()
            .iter()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        under.sort();

        let mut info = ScriptInfo::new();
        for path in under {
            info.add(&self.unload_script_inner(&path));
        }
        info
    }

    /// Read and parse one script file. A missing file is unloaded (its
    /// content is gone); a read or tree failure is reported and skipped.
    fn read_source(&self, path: &Path) -> Option<Arc<ScriptSource>> {
        if !path.exists() {
            self.unload_script_inner(path);
            return None;
        }
        match ScriptSource::load(path, &self.settings.scripts_dir) {
            Ok(source) => Some(Arc::new(source)),
            Err(error) => {
                self.reporter
                    .error(format!("could not load '{}': {}", path.display(), error));
                None
            }
        }
    }

    fn discover_and_read(&self, dir: &Path) -> Vec<Arc<ScriptSource>> {
        self.discover_active(dir)
            .iter()
            .filter_map(|path| self.read_source(path))
            .collect()
    }

    /// Active script files under `dir`, depth-first with sorted entries.
    fn discover_active(&self, dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                self.reporter
                    .error(format!("could not scan '{}': {}", dir.display(), error));
                return out;
            }
        };
        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() {
                if !name.starts_with('.') && !name.starts_with(DISABLED_PREFIX) {
                    out.extend(self.discover_active(&path));
                }
            } else if is_active_script_name(name) {
                out.push(path);
            }
        }
        out
    }

    /// Recompute the disabled set from disk.
    fn update_disabled(&self, dir: &Path) {
        let mut found = HashSet::new();
        self.collect_disabled(dir, &mut found);
        *self.disabled.write() = found;
    }

    fn collect_disabled(&self, dir: &Path, out: &mut HashSet<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() {
                if !name.starts_with('.') {
                    self.collect_disabled(&path, out);
                }
            } else if is_disabled_script_name(name) {
                out.insert(path);
            }
        }
    }
}

/// Run one activation phase of one structure, catching failures.
///
/// A returned error or a panic is reported at the structure's location
/// and marks the slot failed, skipping its later phases; the rest of the
/// batch's phase continues.
fn run_structure_phase<F>(slot: &mut StructureSlot, phase: &str, cx: &mut PhaseCtx<'_>, run: F)
where
    F: FnOnce(&mut dyn Structure, &mut PhaseCtx<'_>) -> Result<(), String>,
{
    if slot.failed {
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(slot.structure.as_mut(), &mut *cx)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(message)) => Some(message),
        Err(payload) => Some(format!(
            "panicked: {}",
            crate::task::panic_message(payload)
        )),
    };
    if let Some(message) = failure {
        slot.failed = true;
        cx.reporter.error(format!(
            "{}:{}: {} of '{}' failed: {}",
            cx.script.name(),
            slot.line,
            phase,
            slot.header,
            message
        ));
    }
}

/// True for a plain (active) script file name.
fn is_active_script_name(name: &str) -> bool {
    has_script_extension(name) && !name.starts_with(DISABLED_PREFIX) && !name.starts_with('.')
}

/// True for a script file name carrying the disable marker.
fn is_disabled_script_name(name: &str) -> bool {
    has_script_extension(name) && name.starts_with(DISABLED_PREFIX)
}

fn has_script_extension(name: &str) -> bool {
    let Some(split) = name.len().checked_sub(SCRIPT_EXTENSION.len()) else {
        return false;
    };
    name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(SCRIPT_EXTENSION)
}

/// The disabled-marker twin of a script path: `dir/-name.weft`.
fn disabled_twin(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.parent() {
        Some(parent) => parent.join(format!("{DISABLED_PREFIX}{name}")),
        None => PathBuf::from(format!("{DISABLED_PREFIX}{name}")),
    }
}
