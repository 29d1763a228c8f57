//! Tests for the cross-file, priority-ordered activation protocol and
//! pool mode equivalence.

mod common;
use common::{loader_with_catalog, scripts_dir, write_script};

use std::sync::Arc;

use parking_lot::Mutex;

use weft::lang::{BuildOutcome, PhaseCtx, Structure, StructureCatalog, StructureKind};
use weft::scope::no_scope;

/// A structure kind for tests: `part <label> <priority>:` records every
/// phase invocation into a shared log.
fn recording_catalog(log: Arc<Mutex<Vec<String>>>) -> StructureCatalog {
    let mut catalog = StructureCatalog::builtin();
    catalog.register(move |header, _node, _cx| {
        let Some(rest) = header.strip_prefix("part ") else {
            return BuildOutcome::NotMine;
        };
        let mut tokens = rest.split_whitespace();
        let (Some(label), Some(priority)) = (tokens.next(), tokens.next()) else {
            return BuildOutcome::NotMine;
        };
        let Ok(priority) = priority.parse::<u32>() else {
            return BuildOutcome::NotMine;
        };
        BuildOutcome::Built(Box::new(RecordingPart {
            label: label.to_string(),
            priority,
            log: log.clone(),
        }))
    });
    catalog
}

struct RecordingPart {
    label: String,
    priority: u32,
    log: Arc<Mutex<Vec<String>>>,
}

impl Structure for RecordingPart {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn kind(&self) -> StructureKind {
        StructureKind::Other
    }

    fn preload(&mut self, _cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        self.log.lock().push(format!("preload {}", self.label));
        Ok(())
    }

    fn load(&mut self, _cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        self.log.lock().push(format!("load {}", self.label));
        Ok(())
    }

    fn after_load(&mut self, _cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        self.log.lock().push(format!("after {}", self.label));
        Ok(())
    }
}

#[test]
fn test_priority_orders_every_phase_across_files() {
    let dir = scripts_dir();
    // Priorities deliberately interleave across the two files.
    write_script(&dir, "a.weft", "part alpha 30:\npart beta 10:\n");
    write_script(&dir, "b.weft", "part gamma 20:\n");

    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = loader_with_catalog(&dir, 0, recording_catalog(log.clone()));
    loader.load_all(no_scope()).wait().expect("load_all succeeds");

    assert_eq!(
        *log.lock(),
        vec![
            "preload beta",
            "preload gamma",
            "preload alpha",
            "load beta",
            "load gamma",
            "load alpha",
            "after beta",
            "after gamma",
            "after alpha",
        ]
    );
}

#[test]
fn test_no_after_load_before_every_load_completes() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "part one 50:\n");
    write_script(&dir, "b.weft", "part two 40:\npart three 60:\n");

    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = loader_with_catalog(&dir, 0, recording_catalog(log.clone()));
    loader.load_all(no_scope()).wait().expect("load_all succeeds");

    let entries = log.lock();
    let last_load = entries
        .iter()
        .rposition(|e| e.starts_with("load "))
        .expect("load entries exist");
    let first_after = entries
        .iter()
        .position(|e| e.starts_with("after "))
        .expect("after entries exist");
    assert!(
        last_load < first_after,
        "every load completes before any after-load begins: {entries:?}"
    );
}

#[test]
fn test_ordering_holds_under_parallel_workers() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "part a1 300:\npart a2 100:\n");
    write_script(&dir, "b.weft", "part b1 200:\n");
    write_script(&dir, "c.weft", "part c1 150:\npart c2 250:\n");

    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = loader_with_catalog(&dir, 4, recording_catalog(log.clone()));
    loader.load_all(no_scope()).wait().expect("load_all succeeds");

    // Workers parse in any order; activation order is still the global
    // priority order.
    assert_eq!(
        *log.lock(),
        vec![
            "preload a2",
            "preload c1",
            "preload b1",
            "preload c2",
            "preload a1",
            "load a2",
            "load c1",
            "load b1",
            "load c2",
            "load a1",
            "after a2",
            "after c1",
            "after b1",
            "after c2",
            "after a1",
        ]
    );
}

#[test]
fn test_failed_phase_skips_later_phases_for_that_structure_only() {
    let dir = scripts_dir();
    write_script(&dir, "a.weft", "part good 10:\nbrittle 20:\n");

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut catalog = recording_catalog(log.clone());
    let brittle_log = log.clone();
    catalog.register(move |header, _node, _cx| {
        if header.strip_prefix("brittle ").is_none() {
            return BuildOutcome::NotMine;
        }
        BuildOutcome::Built(Box::new(Brittle {
            log: brittle_log.clone(),
        }))
    });

    let loader = loader_with_catalog(&dir, 0, catalog);
    loader.load_all(no_scope()).wait().expect("load_all succeeds");

    let entries = log.lock();
    assert!(entries.contains(&"load brittle".to_string()));
    assert!(
        !entries.iter().any(|e| e == "after brittle"),
        "a failed load skips the structure's after-load"
    );
    // The healthy structure still ran every phase.
    assert!(entries.contains(&"after good".to_string()));
}

struct Brittle {
    log: Arc<Mutex<Vec<String>>>,
}

impl Structure for Brittle {
    fn priority(&self) -> u32 {
        20
    }

    fn kind(&self) -> StructureKind {
        StructureKind::Other
    }

    fn load(&mut self, _cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        self.log.lock().push("load brittle".to_string());
        Err("deliberately broken".to_string())
    }

    fn after_load(&mut self, _cx: &mut PhaseCtx<'_>) -> Result<(), String> {
        self.log.lock().push("after brittle".to_string());
        Ok(())
    }
}

#[test]
fn test_pool_modes_produce_identical_final_state() {
    let dir = scripts_dir();
    write_script(
        &dir,
        "a.weft",
        "function helper(x):\n    broadcast \"h\"\non join:\n    helper(\"v\")\n",
    );
    write_script(&dir, "b.weft", "on quit:\n    broadcast \"bye\"\n");
    write_script(
        &dir,
        "c.weft",
        "command /greet:\n    trigger:\n        broadcast \"hi\"\n",
    );

    let mut outcomes = Vec::new();
    for workers in [0usize, 1, 4] {
        let loader = common::loader_for(&dir, workers);
        let info = loader.load_all(no_scope()).wait().expect("load_all succeeds");
        outcomes.push((
            workers,
            info,
            loader.loaded_files(),
            loader.loaded_script_count(),
            loader.loaded_trigger_count(),
            loader.loaded_function_count(),
            loader.host().trigger_count(),
            loader.host().has_command("greet"),
            loader.host().has_function("helper"),
        ));
    }

    let (_, info0, files0, s0, t0, f0, ht0, c0, hf0) = outcomes[0].clone();
    for (workers, info, files, s, t, f, ht, c, hf) in outcomes.iter().skip(1).cloned() {
        assert_eq!(info, info0, "run statistics differ with {workers} workers");
        assert_eq!(files, files0, "loaded set differs with {workers} workers");
        assert_eq!((s, t, f), (s0, t0, f0));
        assert_eq!(ht, ht0);
        assert_eq!(c, c0);
        assert_eq!(hf, hf0);
    }
}
