//! Garbage collector - stop-the-world mark and sweep
//!
//! Design: collection only ever runs at points the runtime controls:
//! 1. Explicit `State::collect`
//! 2. `State::maybe_collect` after a top-level call returns, once the
//!    allocation count since the previous cycle passes `gc_threshold`
//!
//! Unreachable userdata whose metatable carries a `__gc` function are
//! finalized exactly once. Objects are re-marked after finalizers run so a
//! finalizer that stores its argument somewhere keeps it alive.

mod roots;


use crate::error::Error;
use crate::heap::{Heap, Object};
use crate::logging::{debug, log_finalizer_error, log_gc_complete, log_gc_start};
use crate::state::State;
use crate::value::{Handle, UserdataRef, Value};
use std::rc::Rc;
use std::time::Instant;

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects reachable after finalization
    pub reachable: usize,
    /// Finalizers invoked during the cycle
    pub finalized: usize,
    /// Objects released
    pub freed: usize,
    /// Live objects left in the heap
    pub live: usize,
    /// Cycles run by this family so far, including this one
    pub collections_run: usize,
}

impl State {
    /// Run a full collection cycle now.
    ///
    /// Returns `None` when a collection is already in progress (a finalizer
    /// asked for another one).
    pub fn collect(&mut self) -> Option<GcStats> {
        let global = Rc::clone(self.global_state());
        if global.collecting.replace(true) {
            return None;
        }
        let stats = run_cycle(self);
        global.collecting.set(false);
        Some(stats)
    }

    /// Collect if enough has been allocated and no native call is active
    pub fn maybe_collect(&mut self) -> Option<GcStats> {
        let global = self.global_state();
        let threshold = global.config.gc_threshold;
        if threshold == 0 || global.active_calls.get() > 0 || global.collecting.get() {
            return None;
        }
        let allocated = global.heap.borrow().stats().allocated_since_collect;
        if allocated < threshold {
            return None;
        }
        debug!(
            allocated = allocated,
            threshold = threshold,
            "GC threshold exceeded, starting collection"
        );
        self.collect()
    }

    /// Current heap occupancy
    pub fn heap_stats(&self) -> crate::heap::HeapStats {
        self.global_state().heap.borrow().stats()
    }
}

fn run_cycle(state: &mut State) -> GcStats {
    let start = Instant::now();
    let global = Rc::clone(state.global_state());

    let root_set = roots::gather(&global);
    log_gc_start(root_set.len());

    // Phase 1: find unreachable userdata that still need finalizing
    let pending = {
        let mut heap = global.heap.borrow_mut();
        heap.clear_marks();
        mark_from(&mut heap, root_set);
        let pending = finalizable(&heap);
        for (u, _) in &pending {
            if let Ok(ud) = heap.userdata_mut(*u) {
                ud.finalized = true;
            }
        }
        pending
    };

    // Phase 2: run finalizers with the heap released
    let mut finalized = 0;
    for (u, finalizer) in pending {
        finalized += 1;
        if let Err(e) = state.call_function(finalizer, &[Value::Userdata(u)], Some(0)) {
            log_finalizer_error(&Error::Finalizer(e.to_string()));
        }
    }

    // Phase 3: re-mark (finalizers may resurrect) and sweep
    let root_set = roots::gather(&global);
    let (reachable, garbage) = {
        let mut heap = global.heap.borrow_mut();
        heap.clear_marks();
        let reachable = mark_from(&mut heap, root_set);
        let garbage: Vec<Object> = heap
            .unmarked()
            .into_iter()
            .filter_map(|h| heap.free(h))
            .collect();
        heap.reset_allocation_counter();
        (reachable, garbage)
    };

    // Payload destructors run outside the heap borrow
    let freed = garbage.len();
    drop(garbage);

    global.collections.set(global.collections.get() + 1);
    let stats = GcStats {
        reachable,
        finalized,
        freed,
        live: global.heap.borrow().stats().live_objects,
        collections_run: global.collections.get(),
    };

    debug!(
        threads = roots::live_threads(&global),
        finalized = finalized,
        "GC sweep complete"
    );
    log_gc_complete(start.elapsed().as_micros() as u64, freed, stats.live);
    stats
}

/// Mark everything reachable from `work`; returns the number of objects marked
fn mark_from(heap: &mut Heap, mut work: Vec<Handle>) -> usize {
    let mut marked = 0;
    while let Some(handle) = work.pop() {
        if heap.mark(handle) {
            marked += 1;
            if let Some(object) = heap.get(handle) {
                work.extend(object.children());
            }
        }
    }
    marked
}

/// Unmarked, not yet finalized userdata whose metatable has a `__gc` function
fn finalizable(heap: &Heap) -> Vec<(UserdataRef, Value)> {
    heap.unmarked()
        .into_iter()
        .filter_map(|h| match heap.get(h) {
            Some(Object::Userdata(ud)) if !ud.finalized => {
                let finalizer = ud
                    .metatable
                    .and_then(|mt| heap.table(mt).ok())
                    .map(|mt| mt.get_str("__gc"))?;
                matches!(finalizer, Value::Function(_)).then_some((UserdataRef(h), finalizer))
            }
            _ => None,
        })
        .collect()
}
