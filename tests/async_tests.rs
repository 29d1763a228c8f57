//! Tests for asynchronous and parallel loading: off-thread batches,
//! reload windows, vanished-file cleanup, and worker survival.

mod common;
use common::{loader_for, loader_with_catalog, scripts_dir, write_script};

use std::fs;
use std::sync::Arc;

use weft::lang::{BuildOutcome, StructureCatalog};
use weft::scope::no_scope;
use weft::{CountingWindow, Severity};

#[test]
fn test_async_load_matches_sync_results() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "on join:\n    broadcast \"a\"\n");
    write_script(&dir, "b.weft", "function f():\n    broadcast \"b\"\n");

    let loader = loader_for(&dir, 1);
    assert!(loader.is_async());
    assert!(!loader.is_parallel());

    let info = loader.load_all(no_scope()).wait().expect("load_all succeeds");
    assert_eq!(info.files, 2);
    assert_eq!(info.triggers, 1);
    assert_eq!(info.functions, 1);
    assert_eq!(loader.loaded_files().len(), 2);
}

#[test]
fn test_parallel_load_of_many_files() {
    let dir = scripts_dir();
    for i in 0..12 {
        write_script(
            &dir,
            &format!("script{i:02}.weft"),
            &format!("on event{i}:\n    broadcast \"s{i}\"\n"),
        );
    }

    let loader = loader_for(&dir, 4);
    assert!(loader.is_parallel());

    let counting = CountingWindow::new(&loader.reporter(), Severity::Error);
    let info = loader
        .load_all(Arc::new(counting.clone()))
        .wait()
        .expect("load_all succeeds");

    assert_eq!(counting.count(), 0);
    assert_eq!(info.files, 12);
    assert_eq!(info.triggers, 12);
    assert_eq!(loader.host().trigger_count(), 12);
}

#[test]
fn test_async_load_all_unloads_vanished_files() {
    let dir = scripts_dir();
    let a = write_script(&dir, "a.weft", "on join:\n    broadcast \"a\"\n");
    let b = write_script(&dir, "b.weft", "on quit:\n    broadcast \"b\"\n");

    let loader = loader_for(&dir, 1);
    loader.load_all(no_scope()).wait().expect("first load succeeds");
    assert_eq!(loader.loaded_files().len(), 2);

    fs::remove_file(&b).expect("remove script");
    loader.load_all(no_scope()).wait().expect("second load succeeds");

    assert_eq!(loader.loaded_files(), vec![a]);
    assert_eq!(loader.loaded_script_count(), 1);
    assert_eq!(loader.host().trigger_count(), 1);
}

#[test]
fn test_async_reload_dir_unloads_vanished_files_after_batch() {
    let dir = scripts_dir();
    let a = write_script(&dir, "a.weft", "on join:\n    broadcast \"a\"\n");
    let b = write_script(&dir, "b.weft", "on quit:\n    broadcast \"b\"\n");

    let loader = loader_for(&dir, 1);
    loader.load_all(no_scope()).wait().expect("load succeeds");

    fs::remove_file(&b).expect("remove script");
    let info = loader
        .reload_dir(dir.path(), no_scope())
        .wait()
        .expect("reload succeeds");

    assert_eq!(info.files, 1, "only the surviving file reloads");
    assert_eq!(loader.loaded_files(), vec![a]);
    assert_eq!(loader.loaded_trigger_count(), 1);
}

#[test]
fn test_async_reload_replaces_old_version_without_losing_counts() {
    let dir = scripts_dir();
    let path = write_script(&dir, "a.weft", "on join:\n    broadcast \"v1\"\n");

    let loader = loader_for(&dir, 1);
    loader.load_all(no_scope()).wait().expect("load succeeds");
    assert_eq!(loader.loaded_trigger_count(), 1);

    fs::write(
        &path,
        "on join:\n    broadcast \"v2\"\non quit:\n    broadcast \"v2\"\n",
    )
    .expect("rewrite script");
    let info = loader
        .reload_script(&path, no_scope())
        .wait()
        .expect("reload succeeds");

    assert_eq!(info.triggers, 2);
    assert_eq!(
        loader.loaded_trigger_count(),
        2,
        "old version's counters were swapped out, not leaked"
    );
    assert_eq!(loader.loaded_script_count(), 1);
    assert_eq!(loader.host().trigger_count(), 2);
}

#[test]
fn test_panicking_parse_does_not_kill_the_batch_or_the_worker() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "explosive payload:\n    broadcast \"boom\"\n");
    write_script(&dir, "b.weft", "on join:\n    broadcast \"fine\"\n");

    let mut catalog = StructureCatalog::builtin();
    catalog.register(|header, _node, _cx| {
        if header.starts_with("explosive ") {
            panic!("structure builder exploded");
        }
        BuildOutcome::NotMine
    });

    let loader = loader_with_catalog(&dir, 1, catalog);
    let info = loader.load_all(no_scope()).wait().expect("batch still completes");

    assert_eq!(info.files, 1, "the panicked file contributes nothing");
    assert_eq!(loader.loaded_files().len(), 1);

    // The worker survived the panic: a follow-up load still works.
    let again = loader.load_all(no_scope()).wait().expect("reload works");
    assert_eq!(again.files, 1);
}

#[test]
fn test_resize_between_batches() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "on join:\n    broadcast \"a\"\n");

    let loader = loader_for(&dir, 0);
    loader.load_all(no_scope()).wait().expect("sync load succeeds");

    loader.set_worker_count(2);
    assert!(loader.is_parallel());
    loader.load_all(no_scope()).wait().expect("parallel load succeeds");
    assert_eq!(loader.loaded_script_count(), 1);

    loader.set_worker_count(0);
    assert!(!loader.is_async());
    loader.load_all(no_scope()).wait().expect("sync load succeeds again");
    assert_eq!(loader.loaded_script_count(), 1);
}
