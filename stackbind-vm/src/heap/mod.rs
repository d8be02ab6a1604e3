//! Object heap - generational slab of collectable objects
//!
//! Design: every table, closure and userdata lives in one slot of a slab.
//! Handles carry the slot generation; freeing a slot bumps the generation so
//! any handle that outlived its object resolves to `StaleHandle` instead of
//! whatever object reuses the slot.

mod table;


pub(crate) use table::Table;

use crate::error::{Error, Result};
use crate::state::NativeFn;
use crate::value::{FunctionRef, Handle, TableRef, UserdataRef, Value};
use std::any::Any;

/// Opaque native payload plus the metadata the collector needs
pub(crate) struct Userdata {
    pub(crate) payload: Option<Box<dyn Any>>,
    pub(crate) metatable: Option<TableRef>,
    /// Set once the `__gc` finalizer has been invoked
    pub(crate) finalized: bool,
}

/// Native routine plus one captured value
pub(crate) struct Closure {
    pub(crate) func: NativeFn,
    pub(crate) upvalue: Value,
}

pub(crate) enum Object {
    Table(Table),
    Userdata(Userdata),
    Function(Closure),
}

impl Object {
    /// Handles reachable from this object (for marking)
    pub(crate) fn children(&self) -> Vec<Handle> {
        match self {
            Self::Table(t) => t.referenced_handles().collect(),
            Self::Userdata(u) => u.metatable.map(TableRef::handle).into_iter().collect(),
            Self::Function(c) => c.upvalue.heap_handle().into_iter().collect(),
        }
    }
}

struct Slot {
    generation: u32,
    marked: bool,
    object: Option<Object>,
}

/// Slab allocator for heap objects
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    allocated_since_collect: usize,
    total_allocated: usize,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::with_capacity(64),
            free: Vec::new(),
            live: 0,
            allocated_since_collect: 0,
            total_allocated: 0,
        }
    }

    fn alloc(&mut self, object: Object) -> Handle {
        self.live += 1;
        self.allocated_since_collect += 1;
        self.total_allocated += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            object: Some(object),
        });
        Handle::new(index, 0)
    }

    pub(crate) fn alloc_table(&mut self) -> TableRef {
        TableRef(self.alloc(Object::Table(Table::new())))
    }

    pub(crate) fn alloc_userdata(
        &mut self,
        payload: Box<dyn Any>,
        metatable: Option<TableRef>,
    ) -> UserdataRef {
        UserdataRef(self.alloc(Object::Userdata(Userdata {
            payload: Some(payload),
            metatable,
            finalized: false,
        })))
    }

    pub(crate) fn alloc_function(&mut self, func: NativeFn, upvalue: Value) -> FunctionRef {
        FunctionRef(self.alloc(Object::Function(Closure { func, upvalue })))
    }

    fn slot(&self, handle: Handle) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.object.is_some())
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.object.is_some())
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Object> {
        self.slot(handle).and_then(|s| s.object.as_ref())
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    pub(crate) fn table(&self, t: TableRef) -> Result<&Table> {
        match self.get(t.0) {
            Some(Object::Table(table)) => Ok(table),
            _ => Err(Error::StaleHandle),
        }
    }

    pub(crate) fn table_mut(&mut self, t: TableRef) -> Result<&mut Table> {
        match self.slot_mut(t.0).and_then(|s| s.object.as_mut()) {
            Some(Object::Table(table)) => Ok(table),
            _ => Err(Error::StaleHandle),
        }
    }

    pub(crate) fn userdata(&self, u: UserdataRef) -> Result<&Userdata> {
        match self.get(u.0) {
            Some(Object::Userdata(ud)) => Ok(ud),
            _ => Err(Error::StaleHandle),
        }
    }

    pub(crate) fn userdata_mut(&mut self, u: UserdataRef) -> Result<&mut Userdata> {
        match self.slot_mut(u.0).and_then(|s| s.object.as_mut()) {
            Some(Object::Userdata(ud)) => Ok(ud),
            _ => Err(Error::StaleHandle),
        }
    }

    pub(crate) fn closure(&self, f: FunctionRef) -> Result<&Closure> {
        match self.get(f.0) {
            Some(Object::Function(c)) => Ok(c),
            _ => Err(Error::StaleHandle),
        }
    }

    /// Release a slot, returning its object so the caller decides when to drop it
    pub(crate) fn free(&mut self, handle: Handle) -> Option<Object> {
        let slot = self.slot_mut(handle)?;
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.marked = false;
        self.free.push(handle.index);
        self.live -= 1;
        object
    }

    // ===== Collector support =====

    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    /// Mark a handle; returns `true` only the first time
    pub(crate) fn mark(&mut self, handle: Handle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) if !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_marked(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.marked)
    }

    /// Handles of every live, unmarked object
    pub(crate) fn unmarked(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some() && !s.marked)
            .map(|(i, s)| Handle::new(i as u32, s.generation))
            .collect()
    }

    /// Take every remaining object (runtime shutdown)
    pub(crate) fn drain(&mut self) -> Vec<Object> {
        let mut objects = Vec::with_capacity(self.live);
        for slot in &mut self.slots {
            if let Some(object) = slot.object.take() {
                slot.generation = slot.generation.wrapping_add(1);
                objects.push(object);
            }
        }
        self.free.clear();
        self.live = 0;
        objects
    }

    pub(crate) fn reset_allocation_counter(&mut self) {
        self.allocated_since_collect = 0;
    }

    pub(crate) fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.live,
            allocated_since_collect: self.allocated_since_collect,
            total_allocated: self.total_allocated,
            capacity: self.slots.len(),
        }
    }
}

/// Heap statistics for monitoring and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub allocated_since_collect: usize,
    pub total_allocated: usize,
    pub capacity: usize,
}
