//! Type registry - one descriptor per (runtime family, native type, variant)
//!
//! Descriptors live in the runtime's registry table; this module only keeps
//! the process-wide index from `(family root, TypeId, Variant)` to their
//! registry keys. A runtime and every sub-runtime spawned from it form one
//! family and share one set of descriptors.
//!
//! The index is only touched from the thread that owns the runtime, and no
//! map guard is held while a descriptor is being populated.

use crate::error::Result;
use crate::hooks::{self, UserData};
use crate::object::{self, Variant};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use stackbind_vm::{RegistryKey, RuntimeId, State, TableRef, Value};
use std::any::TypeId;
use tracing::debug;

type DescriptorKey = (RuntimeId, TypeId, Variant);

static DESCRIPTORS: Lazy<DashMap<DescriptorKey, RegistryKey>> = Lazy::new(DashMap::new);

/// Spawned sub-runtime -> family root
static FAMILIES: Lazy<DashMap<RuntimeId, RuntimeId>> = Lazy::new(DashMap::new);

/// Lives in the root runtime's extension slot; closing the runtime drops the
/// family's index entries
struct FamilyGuard {
    root: RuntimeId,
}

impl Drop for FamilyGuard {
    fn drop(&mut self) {
        let root = self.root;
        DESCRIPTORS.retain(|key, _| key.0 != root);
        FAMILIES.retain(|_, parent| *parent != root);
        debug!(runtime = %root, "type registry entries released");
    }
}

/// Runtime whose descriptors `state` uses
pub fn family_root(state: &State) -> RuntimeId {
    FAMILIES
        .get(&state.id())
        .map(|entry| *entry.value())
        .unwrap_or_else(|| state.main_id())
}

/// Spawn a sub-runtime that shares `state`'s descriptors
pub fn spawn(state: &State) -> State {
    let child = state.spawn_thread();
    let root = family_root(state);
    FAMILIES.insert(child.id(), root);
    debug!(parent = %state.id(), child = %child.id(), root = %root, "sub-runtime spawned");
    child
}

/// Descriptor for `T` in `variant`, creating it on first use.
///
/// A new descriptor gets the finalizer and the type name, is anchored in the
/// registry table and is then handed to `T`'s extension hook exactly once. If
/// the hook fails, the descriptor stays registered and the error is returned.
pub fn descriptor_for<T: UserData>(state: &mut State, variant: Variant) -> Result<TableRef> {
    if let Some(descriptor) = lookup::<T>(state, variant) {
        return Ok(descriptor);
    }

    let root = family_root(state);
    let descriptor = state.new_table();
    let finalizer = state.new_function(object::finalize::<T>, Value::Nil);
    state.raw_set(descriptor, "__gc", finalizer)?;
    state.raw_set(descriptor, "__name", T::type_name())?;
    let key = state.registry_ref(descriptor)?;

    DESCRIPTORS.insert((root, TypeId::of::<T>(), variant), key);
    if !state.has_extension::<FamilyGuard>() {
        state.set_extension(FamilyGuard { root });
    }
    debug!(
        runtime = %root,
        type_name = T::type_name(),
        variant = %variant,
        "descriptor created"
    );

    hooks::install::<T>(state, descriptor, variant)?;
    Ok(descriptor)
}

/// Existing descriptor for `T` in `variant`; never creates one
pub fn lookup<T: 'static>(state: &State, variant: Variant) -> Option<TableRef> {
    let key = *DESCRIPTORS
        .get(&(family_root(state), TypeId::of::<T>(), variant))?
        .value();
    state.registry_get(key).ok()?.as_table()
}

/// Number of descriptors registered for `state`'s family
pub fn descriptor_count(state: &State) -> usize {
    let root = family_root(state);
    DESCRIPTORS.iter().filter(|entry| entry.key().0 == root).count()
}
