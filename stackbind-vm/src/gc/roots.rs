//! GC root gathering
//!
//! Roots are:
//! - every live thread stack of the family
//! - the registry table
//! - the globals table

use crate::state::Global;
use crate::value::{Handle, Value};
use std::rc::Weak;

/// Collect the root handles, pruning stacks whose thread is gone
pub(super) fn gather(global: &Global) -> Vec<Handle> {
    let mut roots = vec![global.registry.handle(), global.globals.handle()];

    let mut stacks = global.stacks.borrow_mut();
    stacks.retain(|stack| stack.strong_count() > 0);

    for stack in stacks.iter().filter_map(Weak::upgrade) {
        roots.extend(stack.borrow().iter().filter_map(Value::heap_handle));
    }

    roots
}

/// Number of threads currently rooting values
pub(super) fn live_threads(global: &Global) -> usize {
    global
        .stacks
        .borrow()
        .iter()
        .filter(|stack| stack.strong_count() > 0)
        .count()
}
