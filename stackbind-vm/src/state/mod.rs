//! Runtime state - one execution context over a shared global state
//!
//! Design: a `State` owns its value stack and a call-frame list; everything
//! else (heap, registry, globals, config, extension slots) lives in `Global`
//! and is shared by every thread spawned from the same main state. The family
//! is single-threaded: `State` is neither `Send` nor `Sync`.

mod call;


use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::logging::{debug, info};
use crate::value::{FunctionRef, TableRef, UserdataRef, Value, ValueKind};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Native routine callable from the runtime.
///
/// Arguments are the slots of the current frame (`1..=top()`); the routine
/// pushes its results and returns how many it pushed.
pub type NativeFn = fn(&mut State) -> Result<usize>;

/// Shared value stack of one thread
pub(crate) type Stack = Rc<RefCell<Vec<Value>>>;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a runtime instance; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(u64);

impl RuntimeId {
    fn next() -> Self {
        Self(NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime#{}", self.0)
    }
}

/// Integer key of a value stored in the registry table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey(i64);

impl RegistryKey {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

/// State shared by every thread of one family
pub(crate) struct Global {
    pub(crate) heap: RefCell<Heap>,
    pub(crate) registry: TableRef,
    pub(crate) globals: TableRef,
    /// Stacks of every thread ever spawned; dead entries are pruned by the collector
    pub(crate) stacks: RefCell<Vec<Weak<RefCell<Vec<Value>>>>>,
    pub(crate) config: VmConfig,
    /// Number of native calls currently executing anywhere in the family
    pub(crate) active_calls: Cell<usize>,
    pub(crate) collecting: Cell<bool>,
    pub(crate) collections: Cell<usize>,
    free_refs: RefCell<Vec<i64>>,
    next_ref: Cell<i64>,
    extensions: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    main_id: RuntimeId,
}

impl Drop for Global {
    fn drop(&mut self) {
        let extensions = std::mem::take(self.extensions.get_mut());
        drop(extensions);

        let objects = self.heap.get_mut().drain();
        debug!(
            runtime = %self.main_id,
            objects = objects.len(),
            "releasing remaining objects"
        );
        drop(objects);
        info!(runtime = %self.main_id, "runtime closed");
    }
}

/// Record of one active native call
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Absolute stack position of the first argument
    base: usize,
    function: Option<FunctionRef>,
}

/// One runtime instance: a stack plus a handle to the family's global state
pub struct State {
    id: RuntimeId,
    parent: Option<RuntimeId>,
    global: Rc<Global>,
    stack: Stack,
    frames: Vec<Frame>,
}

impl State {
    /// Create a main runtime with default configuration
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a main runtime
    pub fn with_config(config: VmConfig) -> Self {
        let id = RuntimeId::next();
        let mut heap = Heap::new();
        let registry = heap.alloc_table();
        let globals = heap.alloc_table();
        let stack: Stack = Rc::new(RefCell::new(Vec::with_capacity(32)));

        let global = Rc::new(Global {
            heap: RefCell::new(heap),
            registry,
            globals,
            stacks: RefCell::new(vec![Rc::downgrade(&stack)]),
            config,
            active_calls: Cell::new(0),
            collecting: Cell::new(false),
            collections: Cell::new(0),
            free_refs: RefCell::new(Vec::new()),
            next_ref: Cell::new(1),
            extensions: RefCell::new(HashMap::new()),
            main_id: id,
        });

        info!(runtime = %id, "runtime created");

        Self {
            id,
            parent: None,
            global,
            stack,
            frames: vec![Frame { base: 0, function: None }],
        }
    }

    /// Spawn a thread sharing this runtime's global state with a fresh stack
    pub fn spawn_thread(&self) -> State {
        let id = RuntimeId::next();
        let stack: Stack = Rc::new(RefCell::new(Vec::with_capacity(16)));
        self.global.stacks.borrow_mut().push(Rc::downgrade(&stack));
        debug!(runtime = %id, parent = %self.id, "thread spawned");

        Self {
            id,
            parent: Some(self.id),
            global: Rc::clone(&self.global),
            stack,
            frames: vec![Frame { base: 0, function: None }],
        }
    }

    #[inline]
    pub fn id(&self) -> RuntimeId {
        self.id
    }

    /// Id of the state this thread was spawned from (non-owning)
    #[inline]
    pub fn parent(&self) -> Option<RuntimeId> {
        self.parent
    }

    /// Id of the main state of this family
    #[inline]
    pub fn main_id(&self) -> RuntimeId {
        self.global.main_id
    }

    pub fn config(&self) -> &VmConfig {
        &self.global.config
    }

    /// Whether `other` shares this state's global state
    pub fn same_family(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.global, &other.global)
    }

    // ===== Stack =====

    #[inline]
    fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    /// Number of slots in the current frame
    pub fn top(&self) -> usize {
        self.stack.borrow().len() - self.base()
    }

    /// Resolve a frame-relative index to an absolute position
    pub fn abs_index(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack.borrow().len();
        let pos = if idx > 0 {
            base + idx as usize - 1
        } else if idx < 0 {
            len.checked_sub(idx.unsigned_abs() as usize)?
        } else {
            return None;
        };
        (pos >= base && pos < len).then_some(pos)
    }

    fn position(&self, idx: i32) -> Result<usize> {
        self.abs_index(idx).ok_or(Error::InvalidIndex(idx))
    }

    /// Grow with nils or shrink the current frame to `n` slots
    pub fn set_top(&mut self, n: usize) -> Result<()> {
        let target = self.base() + n;
        self.check_capacity(target)?;
        self.stack.borrow_mut().resize(target, Value::Nil);
        Ok(())
    }

    fn check_capacity(&self, len: usize) -> Result<()> {
        let limit = self.global.config.max_stack;
        if len > limit {
            return Err(Error::StackOverflow { limit });
        }
        Ok(())
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let mut stack = self.stack.borrow_mut();
        self.check_capacity(stack.len() + 1)?;
        stack.push(value.into());
        Ok(())
    }

    /// Push a copy of the value at `idx`
    pub fn push_index(&mut self, idx: i32) -> Result<()> {
        let value = self.value_at(idx)?;
        self.push(value)
    }

    /// Pop `n` values (fewer if the frame is shorter)
    pub fn pop(&mut self, n: usize) {
        let base = self.base();
        let mut stack = self.stack.borrow_mut();
        let keep = stack.len().saturating_sub(n).max(base);
        stack.truncate(keep);
    }

    /// Pop the top value
    pub fn pop_value(&mut self) -> Result<Value> {
        let pos = self.position(-1)?;
        Ok(self.stack.borrow_mut().remove(pos))
    }

    /// Value at `idx`, or nil when `idx` is outside the frame
    pub fn value(&self, idx: i32) -> Value {
        self.abs_index(idx)
            .and_then(|pos| self.stack.borrow().get(pos).cloned())
            .unwrap_or_default()
    }

    /// Value at `idx`, failing when `idx` is outside the frame
    pub fn value_at(&self, idx: i32) -> Result<Value> {
        let pos = self.position(idx)?;
        Ok(self.stack.borrow()[pos].clone())
    }

    /// Kind of the value at `idx`; out-of-frame slots read as nil
    pub fn kind(&self, idx: i32) -> ValueKind {
        self.value(idx).kind()
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.value(idx).is_nil()
    }

    /// Integer at `idx`; floats qualify only when integral
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value(idx).as_integer()
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).as_number()
    }

    /// Boolean at `idx` (exact boolean slots only)
    pub fn to_boolean(&self, idx: i32) -> Option<bool> {
        match self.value(idx) {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    /// String at `idx`; numbers are rendered to text
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx) {
            Value::Str(s) => Some(s),
            v @ (Value::Integer(_) | Value::Number(_)) => Some(Rc::from(v.to_string())),
            _ => None,
        }
    }

    pub fn to_userdata(&self, idx: i32) -> Option<UserdataRef> {
        self.value(idx).as_userdata()
    }

    pub fn to_table(&self, idx: i32) -> Option<TableRef> {
        self.value(idx).as_table()
    }

    /// Move the top value into position `idx`, shifting the rest up
    pub fn insert(&mut self, idx: i32) -> Result<()> {
        let pos = self.position(idx)?;
        let mut stack = self.stack.borrow_mut();
        if let Some(value) = stack.pop() {
            stack.insert(pos, value);
        }
        Ok(())
    }

    /// Remove the value at `idx`, shifting the rest down
    pub fn remove(&mut self, idx: i32) -> Result<Value> {
        let pos = self.position(idx)?;
        Ok(self.stack.borrow_mut().remove(pos))
    }

    // ===== Tables =====

    pub fn new_table(&mut self) -> TableRef {
        self.global.heap.borrow_mut().alloc_table()
    }

    pub fn raw_get(&self, table: TableRef, key: &Value) -> Result<Value> {
        Ok(self.global.heap.borrow().table(table)?.get(key))
    }

    pub fn raw_get_str(&self, table: TableRef, key: &str) -> Result<Value> {
        Ok(self.global.heap.borrow().table(table)?.get_str(key))
    }

    pub fn raw_set(
        &mut self,
        table: TableRef,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.global
            .heap
            .borrow_mut()
            .table_mut(table)?
            .set(&key.into(), value.into())
    }

    /// Border length of a table (no metamethods)
    pub fn raw_len(&self, table: TableRef) -> Result<i64> {
        Ok(self.global.heap.borrow().table(table)?.border())
    }

    // ===== Userdata =====

    /// Allocate an opaque object, optionally tagged with a metatable
    pub fn new_userdata(
        &mut self,
        payload: Box<dyn Any>,
        metatable: Option<TableRef>,
    ) -> UserdataRef {
        self.global
            .heap
            .borrow_mut()
            .alloc_userdata(payload, metatable)
    }

    pub fn userdata_metatable(&self, u: UserdataRef) -> Result<Option<TableRef>> {
        Ok(self.global.heap.borrow().userdata(u)?.metatable)
    }

    pub fn set_userdata_metatable(
        &mut self,
        u: UserdataRef,
        metatable: Option<TableRef>,
    ) -> Result<()> {
        self.global.heap.borrow_mut().userdata_mut(u)?.metatable = metatable;
        Ok(())
    }

    /// Whether the collector has selected `u` for finalization
    pub fn is_finalized(&self, u: UserdataRef) -> Result<bool> {
        Ok(self.global.heap.borrow().userdata(u)?.finalized)
    }

    /// Metatable of the userdata at `idx`, if any
    pub fn metatable(&self, idx: i32) -> Option<TableRef> {
        let u = self.to_userdata(idx)?;
        self.userdata_metatable(u).ok().flatten()
    }

    /// Inspect a userdata payload.
    ///
    /// The heap stays borrowed while `f` runs, so `f` only sees the payload.
    pub fn with_payload<R>(&self, u: UserdataRef, f: impl FnOnce(&dyn Any) -> R) -> Result<R> {
        let heap = self.global.heap.borrow();
        let payload = heap
            .userdata(u)?
            .payload
            .as_deref()
            .ok_or(Error::StaleHandle)?;
        Ok(f(payload))
    }

    /// Remove a userdata payload, leaving the object as an empty shell
    pub fn take_payload(&mut self, u: UserdataRef) -> Result<Box<dyn Any>> {
        self.global
            .heap
            .borrow_mut()
            .userdata_mut(u)?
            .payload
            .take()
            .ok_or(Error::StaleHandle)
    }

    // ===== Registry =====

    /// Table for host-side bookkeeping, reachable from no script value
    pub fn registry(&self) -> TableRef {
        self.global.registry
    }

    /// Store `value` in the registry under a fresh integer key
    pub fn registry_ref(&mut self, value: impl Into<Value>) -> Result<RegistryKey> {
        let value = value.into();
        if value.is_nil() {
            return Err(Error::InvalidKey("nil registry value"));
        }
        let key = match self.global.free_refs.borrow_mut().pop() {
            Some(key) => key,
            None => {
                let key = self.global.next_ref.get();
                self.global.next_ref.set(key + 1);
                key
            }
        };
        self.raw_set(self.global.registry, key, value)?;
        Ok(RegistryKey(key))
    }

    pub fn registry_get(&self, key: RegistryKey) -> Result<Value> {
        self.raw_get(self.global.registry, &Value::Integer(key.0))
    }

    /// Release a registry key; the key may be handed out again
    pub fn registry_unref(&mut self, key: RegistryKey) -> Result<()> {
        release_ref(&self.global, key)
    }

    /// Non-owning handle for releasing registry keys after this state is gone
    pub fn registry_handle(&self) -> RegistryHandle {
        RegistryHandle {
            global: Rc::downgrade(&self.global),
        }
    }

    // ===== Globals =====

    pub fn set_global(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.raw_set(self.global.globals, name, value)
    }

    pub fn global(&self, name: &str) -> Result<Value> {
        self.raw_get_str(self.global.globals, name)
    }

    pub fn globals(&self) -> TableRef {
        self.global.globals
    }

    // ===== Functions =====

    /// Create a closure from a native routine and one captured value
    pub fn new_function(&mut self, func: NativeFn, upvalue: impl Into<Value>) -> FunctionRef {
        self.global
            .heap
            .borrow_mut()
            .alloc_function(func, upvalue.into())
    }

    /// Captured value of the running native function (nil outside a call)
    pub fn upvalue(&self) -> Result<Value> {
        match self.frames.last().and_then(|f| f.function) {
            Some(f) => Ok(self.global.heap.borrow().closure(f)?.upvalue.clone()),
            None => Ok(Value::Nil),
        }
    }

    /// Captured value of any closure
    pub fn function_upvalue(&self, f: FunctionRef) -> Result<Value> {
        Ok(self.global.heap.borrow().closure(f)?.upvalue.clone())
    }

    /// Number of native calls active on this thread
    pub fn call_depth(&self) -> usize {
        self.frames.len() - 1
    }

    // ===== Extension slots =====

    /// Attach a family-wide extension value, replacing any previous one of the same type
    pub fn set_extension<T: Any>(&self, value: T) {
        self.global
            .extensions
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn has_extension<T: Any>(&self) -> bool {
        self.global
            .extensions
            .borrow()
            .contains_key(&TypeId::of::<T>())
    }

    /// Run `f` against an extension value, if present
    pub fn with_extension<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let extensions = self.global.extensions.borrow();
        extensions
            .get(&TypeId::of::<T>())
            .and_then(|ext| ext.downcast_ref::<T>())
            .map(f)
    }

    pub(crate) fn global_state(&self) -> &Rc<Global> {
        &self.global
    }

    pub(crate) fn stack_ref(&self) -> &Stack {
        &self.stack
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("top", &self.top())
            .field("depth", &self.call_depth())
            .finish()
    }
}

fn release_ref(global: &Global, key: RegistryKey) -> Result<()> {
    let mut heap = global
        .heap
        .try_borrow_mut()
        .map_err(|_| Error::runtime("registry is busy"))?;
    let registry = heap.table_mut(global.registry)?;
    let slot = Value::Integer(key.0);
    if registry.get(&slot).is_nil() {
        return Ok(());
    }
    registry.set(&slot, Value::Nil)?;
    drop(heap);
    global.free_refs.borrow_mut().push(key.0);
    Ok(())
}

/// Weak handle to a family's registry
#[derive(Clone)]
pub struct RegistryHandle {
    global: Weak<Global>,
}

impl RegistryHandle {
    /// Whether the runtime family is still open
    pub fn is_alive(&self) -> bool {
        self.global.strong_count() > 0
    }

    /// Whether `state` uses the registry this handle points at
    pub fn belongs_to(&self, state: &State) -> bool {
        std::ptr::eq(self.global.as_ptr(), Rc::as_ptr(&state.global))
    }

    /// Release `key`; returns `false` when the runtime is already closed
    pub fn unref(&self, key: RegistryKey) -> bool {
        self.global
            .upgrade()
            .is_some_and(|global| release_ref(&global, key).is_ok())
    }
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
