//! Opaque object model - native values living in runtime-managed storage
//!
//! Design: every object is a userdata whose metatable is the descriptor of
//! exactly one (type, variant) pair, so identity checks are a single handle
//! comparison. All variants of `T` share one payload type:
//! - `Value` and `Shared` objects hold an `Rc<RefCell<T>>` (the runtime owns
//!   the only strong count for `Value`)
//! - `Pointer` objects hold a raw pointer into native storage plus a borrow
//!   flag owned by the userdata
//!
//! Finalization drops the payload: that runs the destructor for `Value`,
//! releases one count for `Shared` and is a no-op for `Pointer`. Only the
//! collector may finalize; scripts never see `__gc` as a method.

use crate::codec::{describe, FromStack, IntoStack};
use crate::error::{BindError, Result};
use crate::hooks::UserData;
use crate::registry;
use stackbind_vm::{State, UserdataRef};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::rc::Rc;

/// Reference-counted storage shared between native code and the runtime
pub type Shared<T> = Rc<RefCell<T>>;

/// How an object's storage is owned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ownership {
    /// Stored inside the runtime; destroyed by the collector
    Value,
    /// Natively owned; the runtime only holds an address
    Pointer,
    /// Reference counted; the runtime holds one count
    Shared,
}

/// Ownership plus constness: one descriptor exists per variant of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variant {
    pub ownership: Ownership,
    pub constness: bool,
}

impl Variant {
    pub const VALUE: Self = Self::new(Ownership::Value, false);
    pub const CONST_VALUE: Self = Self::new(Ownership::Value, true);
    pub const POINTER: Self = Self::new(Ownership::Pointer, false);
    pub const CONST_POINTER: Self = Self::new(Ownership::Pointer, true);
    pub const SHARED: Self = Self::new(Ownership::Shared, false);
    pub const CONST_SHARED: Self = Self::new(Ownership::Shared, true);

    pub const ALL: [Self; 6] = [
        Self::VALUE,
        Self::CONST_VALUE,
        Self::POINTER,
        Self::CONST_POINTER,
        Self::SHARED,
        Self::CONST_SHARED,
    ];

    pub const fn new(ownership: Ownership, constness: bool) -> Self {
        Self {
            ownership,
            constness,
        }
    }

    #[inline]
    pub const fn is_const(self) -> bool {
        self.constness
    }

    /// Stored variants that satisfy a request for `self`, in lookup order.
    ///
    /// A const request also accepts every non-const variant; a non-const
    /// request never accepts a const one.
    pub const fn resolution_order(self) -> &'static [Variant] {
        use Ownership::*;
        match (self.ownership, self.constness) {
            (Value, false) => &[Self::VALUE, Self::POINTER, Self::SHARED],
            (Pointer, false) => &[Self::POINTER, Self::VALUE, Self::SHARED],
            (Shared, false) => &[Self::SHARED],
            (Value, true) => &[
                Self::CONST_VALUE,
                Self::CONST_POINTER,
                Self::CONST_SHARED,
                Self::VALUE,
                Self::POINTER,
                Self::SHARED,
            ],
            (Pointer, true) => &[
                Self::CONST_POINTER,
                Self::CONST_VALUE,
                Self::CONST_SHARED,
                Self::POINTER,
                Self::VALUE,
                Self::SHARED,
            ],
            (Shared, true) => &[Self::CONST_SHARED, Self::SHARED],
        }
    }

    pub const fn name(self) -> &'static str {
        match (self.ownership, self.constness) {
            (Ownership::Value, false) => "value",
            (Ownership::Value, true) => "const value",
            (Ownership::Pointer, false) => "pointer",
            (Ownership::Pointer, true) => "const pointer",
            (Ownership::Shared, false) => "shared",
            (Ownership::Shared, true) => "const shared",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ===== Storage =====

enum Target<T> {
    Cell(Rc<RefCell<T>>),
    /// Native address; the flag tracks borrows handed out through this object
    Raw(NonNull<T>, Rc<RefCell<()>>),
}

impl<T> Target<T> {
    fn raw(ptr: NonNull<T>) -> Self {
        Self::Raw(ptr, Rc::new(RefCell::new(())))
    }
}

impl<T> Clone for Target<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Cell(rc) => Self::Cell(Rc::clone(rc)),
            Self::Raw(ptr, flag) => Self::Raw(*ptr, Rc::clone(flag)),
        }
    }
}

/// Userdata payload for every variant of `T`
struct Stored<T>(Target<T>);

/// `__gc` for `T`'s descriptors: drop the payload of an object the collector
/// has selected. Foreign objects and live objects are refused untouched.
pub(crate) fn finalize<T: UserData>(state: &mut State) -> stackbind_vm::Result<usize> {
    let u = state
        .to_userdata(1)
        .filter(|&u| {
            state
                .with_payload(u, |p| p.is::<Stored<T>>())
                .unwrap_or(false)
        })
        .ok_or_else(|| BindError::mismatch(T::type_name(), describe(state, 1)))?;
    if !state.is_finalized(u)? {
        return Err(BindError::StillReachable {
            type_name: T::type_name(),
        }
        .into());
    }
    drop(state.take_payload(u)?);
    Ok(0)
}

fn allocate<T: UserData>(
    state: &mut State,
    target: Target<T>,
    variant: Variant,
) -> Result<UserdataRef> {
    let descriptor = registry::descriptor_for::<T>(state, variant)?;
    let u = state.new_userdata(Box::new(Stored(target)), Some(descriptor));
    state.push(u)?;
    Ok(u)
}

/// Exact variant check: the slot's metatable is `T`'s descriptor for `variant`
pub fn type_check<T: UserData>(state: &State, idx: i32, variant: Variant) -> bool {
    match (state.metatable(idx), registry::lookup::<T>(state, variant)) {
        (Some(mt), Some(descriptor)) => mt == descriptor,
        _ => false,
    }
}

/// Stored variant of the object at `idx` among those satisfying `request`
fn matching_variant<T: UserData>(state: &State, idx: i32, request: Variant) -> Option<Variant> {
    let mt = state.metatable(idx)?;
    request
        .resolution_order()
        .iter()
        .copied()
        .find(|&v| registry::lookup::<T>(state, v) == Some(mt))
}

/// Resolve the object at `idx` for a `request`-variant access
pub fn resolve<T: UserData>(state: &State, idx: i32, request: Variant) -> Result<Obj<T>> {
    let variant = matching_variant::<T>(state, idx, request)
        .ok_or_else(|| BindError::mismatch(T::type_name(), describe(state, idx)))?;
    let userdata = state
        .to_userdata(idx)
        .ok_or_else(|| BindError::mismatch(T::type_name(), describe(state, idx)))?;

    let target = state
        .with_payload(userdata, |p| p.downcast_ref::<Stored<T>>().map(|s| s.0.clone()))
        .map_err(|_| BindError::StaleObject {
            type_name: T::type_name(),
        })?
        .ok_or_else(|| BindError::mismatch(T::type_name(), describe(state, idx)))?;

    Ok(Obj {
        target,
        variant,
        userdata,
    })
}

// ===== Push operations =====

/// Move `value` into runtime storage and push it (Value variant)
pub fn emplace<T: UserData>(state: &mut State, value: T) -> Result<Obj<T>> {
    let cell = Rc::new(RefCell::new(value));
    let userdata = allocate(state, Target::Cell(Rc::clone(&cell)), Variant::VALUE)?;
    Ok(Obj {
        target: Target::Cell(cell),
        variant: Variant::VALUE,
        userdata,
    })
}

/// Push an owned value (Value variant)
pub fn push_value<T: UserData>(state: &mut State, value: T) -> Result<()> {
    allocate(state, Target::Cell(Rc::new(RefCell::new(value))), Variant::VALUE)?;
    Ok(())
}

/// Push an owned value scripts may only read (const Value variant)
pub fn push_const_value<T: UserData>(state: &mut State, value: T) -> Result<()> {
    allocate(state, Target::Cell(Rc::new(RefCell::new(value))), Variant::CONST_VALUE)?;
    Ok(())
}

/// Push shared storage; the runtime holds one count until finalization
pub fn push_shared<T: UserData>(state: &mut State, shared: Shared<T>) -> Result<()> {
    allocate(state, Target::Cell(shared), Variant::SHARED)?;
    Ok(())
}

pub fn push_const_shared<T: UserData>(state: &mut State, shared: Shared<T>) -> Result<()> {
    allocate(state, Target::Cell(shared), Variant::CONST_SHARED)?;
    Ok(())
}

/// Push the address of natively owned storage; null pushes nil.
///
/// Borrows taken through the pushed object are tracked, so a script passing
/// it as both receiver and argument gets `BorrowConflict`.
///
/// # Safety
///
/// `ptr` must stay valid for as long as the runtime can reach the object. It
/// must not be accessed through other references, including objects from
/// another push of the same address, while the object is borrowed.
pub unsafe fn push_ptr<T: UserData>(state: &mut State, ptr: *mut T) -> Result<()> {
    match NonNull::new(ptr) {
        Some(ptr) => allocate(state, Target::raw(ptr), Variant::POINTER).map(drop),
        None => Ok(state.push(stackbind_vm::Value::Nil)?),
    }
}

/// Read-only counterpart of `push_ptr`.
///
/// # Safety
///
/// Same contract as `push_ptr`; the pointee is never written through.
pub unsafe fn push_const_ptr<T: UserData>(state: &mut State, ptr: *const T) -> Result<()> {
    match NonNull::new(ptr as *mut T) {
        Some(ptr) => allocate(state, Target::raw(ptr), Variant::CONST_POINTER).map(drop),
        None => Ok(state.push(stackbind_vm::Value::Nil)?),
    }
}

// ===== Handles =====

/// Mutable handle to an object of any non-const variant.
///
/// Re-pushing an `Obj` pushes the same object, not a copy.
pub struct Obj<T> {
    target: Target<T>,
    variant: Variant,
    userdata: UserdataRef,
}

impl<T: UserData> Obj<T> {
    /// Variant the object was stored as
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn userdata(&self) -> UserdataRef {
        self.userdata
    }

    pub fn borrow(&self) -> Result<ObjRef<'_, T>> {
        borrow_target(&self.target)
    }

    pub fn borrow_mut(&self) -> Result<ObjMut<'_, T>> {
        match &self.target {
            Target::Cell(cell) => cell
                .try_borrow_mut()
                .map(|r| ObjMut { inner: MutInner::Cell(r) })
                .map_err(|_| conflict::<T>()),
            Target::Raw(ptr, flag) => {
                let guard = flag.try_borrow_mut().map_err(|_| conflict::<T>())?;
                // SAFETY: `push_ptr`'s contract; `guard` excludes every other borrow of this object
                let value = unsafe { &mut *ptr.as_ptr() };
                Ok(ObjMut { inner: MutInner::Raw(value, guard) })
            }
        }
    }

    /// Shared storage, when the object is not a raw pointer
    pub fn shared(&self) -> Option<Shared<T>> {
        match &self.target {
            Target::Cell(cell) => Some(Rc::clone(cell)),
            Target::Raw(..) => None,
        }
    }

    /// Read-only view of the same object
    pub fn into_const(self) -> ConstObj<T> {
        ConstObj(self)
    }
}

fn conflict<T: UserData>() -> BindError {
    BindError::BorrowConflict {
        type_name: T::type_name(),
    }
}

fn borrow_target<T: UserData>(target: &Target<T>) -> Result<ObjRef<'_, T>> {
    match target {
        Target::Cell(cell) => cell
            .try_borrow()
            .map(|r| ObjRef { inner: RefInner::Cell(r) })
            .map_err(|_| conflict::<T>()),
        Target::Raw(ptr, flag) => {
            let guard = flag.try_borrow().map_err(|_| conflict::<T>())?;
            // SAFETY: see `push_ptr`; no exclusive borrow is live while `guard` is held
            let value = unsafe { ptr.as_ref() };
            Ok(ObjRef { inner: RefInner::Raw(value, guard) })
        }
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            variant: self.variant,
            userdata: self.userdata,
        }
    }
}

impl<T: UserData> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("type", &T::type_name())
            .field("variant", &self.variant)
            .field("userdata", &self.userdata)
            .finish()
    }
}

/// Read-only handle; resolves const variants first, then non-const ones
pub struct ConstObj<T>(Obj<T>);

impl<T: UserData> ConstObj<T> {
    pub fn variant(&self) -> Variant {
        self.0.variant
    }

    pub fn userdata(&self) -> UserdataRef {
        self.0.userdata
    }

    pub fn borrow(&self) -> Result<ObjRef<'_, T>> {
        borrow_target(&self.0.target)
    }
}

impl<T> Clone for ConstObj<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: UserData> fmt::Debug for ConstObj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConstObj").field(&self.0).finish()
    }
}

enum RefInner<'a, T> {
    Cell(Ref<'a, T>),
    Raw(&'a T, Ref<'a, ()>),
}

/// Shared borrow of an object
pub struct ObjRef<'a, T> {
    inner: RefInner<'a, T>,
}

impl<T> Deref for ObjRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.inner {
            RefInner::Cell(r) => r,
            RefInner::Raw(r, _) => r,
        }
    }
}

enum MutInner<'a, T> {
    Cell(RefMut<'a, T>),
    Raw(&'a mut T, RefMut<'a, ()>),
}

/// Exclusive borrow of an object
pub struct ObjMut<'a, T> {
    inner: MutInner<'a, T>,
}

impl<T> Deref for ObjMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.inner {
            MutInner::Cell(r) => r,
            MutInner::Raw(r, _) => r,
        }
    }
}

impl<T> DerefMut for ObjMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.inner {
            MutInner::Cell(r) => r,
            MutInner::Raw(r, _) => r,
        }
    }
}

/// Nullable pointer request: nil reads as null
pub struct Ptr<T>(Option<Obj<T>>);

impl<T: UserData> Ptr<T> {
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_obj(&self) -> Option<&Obj<T>> {
        self.0.as_ref()
    }

    pub fn into_obj(self) -> Option<Obj<T>> {
        self.0
    }
}

/// Nullable read-only pointer request
pub struct ConstPtr<T>(Option<ConstObj<T>>);

impl<T: UserData> ConstPtr<T> {
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_obj(&self) -> Option<&ConstObj<T>> {
        self.0.as_ref()
    }

    pub fn into_obj(self) -> Option<ConstObj<T>> {
        self.0
    }
}

// ===== Codec integration =====

impl<T: UserData> FromStack for Obj<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        type_check::<T>(state, idx, Variant::VALUE)
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        matching_variant::<T>(state, idx, Variant::VALUE).is_some()
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        resolve(state, idx, Variant::VALUE)
    }
}

impl<T: UserData> FromStack for ConstObj<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        type_check::<T>(state, idx, Variant::CONST_VALUE)
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        matching_variant::<T>(state, idx, Variant::CONST_VALUE).is_some()
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        resolve(state, idx, Variant::CONST_VALUE).map(ConstObj)
    }
}

impl<T: UserData> FromStack for Ptr<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || type_check::<T>(state, idx, Variant::POINTER)
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || matching_variant::<T>(state, idx, Variant::POINTER).is_some()
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        if state.is_nil(idx) {
            return Ok(Self(None));
        }
        resolve(state, idx, Variant::POINTER).map(|obj| Self(Some(obj)))
    }
}

impl<T: UserData> FromStack for ConstPtr<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || type_check::<T>(state, idx, Variant::CONST_POINTER)
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || matching_variant::<T>(state, idx, Variant::CONST_POINTER).is_some()
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        if state.is_nil(idx) {
            return Ok(Self(None));
        }
        resolve(state, idx, Variant::CONST_POINTER).map(|obj| Self(Some(ConstObj(obj))))
    }
}

/// Shared requests only accept shared objects
impl<T: UserData> FromStack for Shared<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        type_check::<T>(state, idx, Variant::SHARED)
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        resolve::<T>(state, idx, Variant::SHARED)?
            .shared()
            .ok_or_else(|| BindError::mismatch(T::type_name(), describe(state, idx)))
    }
}

fn repush(state: &mut State, userdata: UserdataRef, type_name: &'static str) -> Result<()> {
    state
        .with_payload(userdata, |_| ())
        .map_err(|_| BindError::StaleObject { type_name })?;
    state.push(userdata)?;
    Ok(())
}

impl<T: UserData> IntoStack for Obj<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        repush(state, self.userdata, T::type_name())
    }
}

impl<T: UserData> IntoStack for ConstObj<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        repush(state, self.0.userdata, T::type_name())
    }
}

impl<T: UserData> IntoStack for Ptr<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        match self.0 {
            Some(obj) => obj.push(state),
            None => Ok(state.push(stackbind_vm::Value::Nil)?),
        }
    }
}

impl<T: UserData> IntoStack for Shared<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        push_shared(state, self)
    }
}

/// Push wrapper: move a value into the runtime (Value variant)
pub struct Owned<T>(pub T);

impl<T: UserData> IntoStack for Owned<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        push_value(state, self.0)
    }
}

/// Push wrapper: move a read-only value into the runtime
pub struct ConstOwned<T>(pub T);

impl<T: UserData> IntoStack for ConstOwned<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        push_const_value(state, self.0)
    }
}

/// Push wrapper: share storage read-only
pub struct ConstShared<T>(pub Shared<T>);

impl<T: UserData> IntoStack for ConstShared<T> {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        push_const_shared(state, self.0)
    }
}
