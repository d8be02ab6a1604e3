//! Extension hooks - the per-type point where exposed operations are added
//!
//! A native type becomes bindable by implementing `UserData`. When a
//! descriptor for one of its variants is created, the registry runs the
//! type's hooks once against it:
//! - const variants run `add_const_methods` only
//! - mutable variants run `add_const_methods`, then `add_methods`
//!
//! `ConstMethods` has no way to register a mutating receiver, so a const
//! descriptor can never expose mutation.
//!
//! Named methods live in a methods table of their own, reached through the
//! descriptor's `__index`. Reserved entries such as `__gc` and `__name` stay
//! on the descriptor and are never visible as methods.

use crate::dispatch::{self, ConstMethodFn, MethodFn, NativeFunction};
use crate::error::{BindError, Result};
use crate::object::Variant;
use stackbind_vm::{FunctionRef, State, TableRef};
use std::marker::PhantomData;

/// A native type that can live in runtime storage
pub trait UserData: Sized + 'static {
    /// Name used in diagnostics and as the descriptor's `__name`
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Operations for mutable variants
    fn add_methods(_methods: &mut Methods<'_, Self>) {}

    /// Read-only operations, exposed on every variant
    fn add_const_methods(_methods: &mut ConstMethods<'_, Self>) {}
}

/// Metamethods a hook may install; `__gc` stays reserved for the finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaMethod {
    Index,
    NewIndex,
    Len,
    Call,
    ToString,
    Eq,
}

impl MetaMethod {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Index => "__index",
            Self::NewIndex => "__newindex",
            Self::Len => "__len",
            Self::Call => "__call",
            Self::ToString => "__tostring",
            Self::Eq => "__eq",
        }
    }
}

/// Descriptor under construction
struct Builder<'s> {
    state: &'s mut State,
    descriptor: TableRef,
    variant: Variant,
    type_name: &'static str,
    error: Option<BindError>,
    /// Created on the first named method
    methods: Option<TableRef>,
    custom_index: bool,
}

impl<'s> Builder<'s> {
    fn set(
        &mut self,
        table: TableRef,
        key: &str,
        bind: impl FnOnce(&mut State, String) -> FunctionRef,
    ) {
        if self.error.is_some() {
            return;
        }
        let func = bind(&mut *self.state, format!("{}.{}", self.type_name, key));
        if let Err(e) = self.state.raw_set(table, key, func) {
            self.error = Some(e.into());
        }
    }

    fn named(&mut self, name: &str, bind: impl FnOnce(&mut State, String) -> FunctionRef) {
        let table = match self.methods {
            Some(table) => table,
            None => *self.methods.insert(self.state.new_table()),
        };
        self.set(table, name, bind);
    }

    fn meta(&mut self, meta: MetaMethod, bind: impl FnOnce(&mut State, String) -> FunctionRef) {
        if meta == MetaMethod::Index {
            self.custom_index = true;
        }
        self.set(self.descriptor, meta.name(), bind);
    }

    /// Named methods are found through `__index = methods` unless the hook
    /// installed its own `__index`
    fn finish(mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if let (Some(methods), false) = (self.methods, self.custom_index) {
            self.state.raw_set(self.descriptor, "__index", methods)?;
        }
        Ok(())
    }
}

/// Registration surface for mutable variants
pub struct Methods<'s, T> {
    builder: Builder<'s>,
    _type: PhantomData<fn(T)>,
}

impl<'s, T: UserData> Methods<'s, T> {
    /// Variant whose descriptor is being populated
    pub fn variant(&self) -> Variant {
        self.builder.variant
    }

    pub fn add_method<M, F: MethodFn<T, M>>(&mut self, name: &str, f: F) {
        self.builder
            .named(name, |state, full| dispatch::bind_method(state, full, f));
    }

    pub fn add_method_const<M, F: ConstMethodFn<T, M>>(&mut self, name: &str, f: F) {
        self.builder
            .named(name, |state, full| dispatch::bind_const_method(state, full, f));
    }

    /// A free function stored under `name`; receives no implicit receiver
    pub fn add_function<M, F: NativeFunction<M>>(&mut self, name: &str, f: F) {
        self.builder
            .named(name, |state, full| dispatch::create_named_callable(state, full, f));
    }

    pub fn add_meta_method<M, F: MethodFn<T, M>>(&mut self, meta: MetaMethod, f: F) {
        self.builder
            .meta(meta, |state, full| dispatch::bind_method(state, full, f));
    }

    pub fn add_meta_method_const<M, F: ConstMethodFn<T, M>>(&mut self, meta: MetaMethod, f: F) {
        self.builder
            .meta(meta, |state, full| dispatch::bind_const_method(state, full, f));
    }

    pub fn add_meta_function<M, F: NativeFunction<M>>(&mut self, meta: MetaMethod, f: F) {
        self.builder
            .meta(meta, |state, full| dispatch::create_named_callable(state, full, f));
    }
}

/// Registration surface shared by every variant; receivers are read-only
pub struct ConstMethods<'s, T> {
    builder: Builder<'s>,
    _type: PhantomData<fn(T)>,
}

impl<'s, T: UserData> ConstMethods<'s, T> {
    pub fn variant(&self) -> Variant {
        self.builder.variant
    }

    pub fn add_method_const<M, F: ConstMethodFn<T, M>>(&mut self, name: &str, f: F) {
        self.builder
            .named(name, |state, full| dispatch::bind_const_method(state, full, f));
    }

    pub fn add_function<M, F: NativeFunction<M>>(&mut self, name: &str, f: F) {
        self.builder
            .named(name, |state, full| dispatch::create_named_callable(state, full, f));
    }

    pub fn add_meta_method_const<M, F: ConstMethodFn<T, M>>(&mut self, meta: MetaMethod, f: F) {
        self.builder
            .meta(meta, |state, full| dispatch::bind_const_method(state, full, f));
    }

    pub fn add_meta_function<M, F: NativeFunction<M>>(&mut self, meta: MetaMethod, f: F) {
        self.builder
            .meta(meta, |state, full| dispatch::create_named_callable(state, full, f));
    }
}

/// Run `T`'s hooks against a freshly created descriptor
pub(crate) fn install<T: UserData>(
    state: &mut State,
    descriptor: TableRef,
    variant: Variant,
) -> Result<()> {
    let builder = Builder {
        state,
        descriptor,
        variant,
        type_name: T::type_name(),
        error: None,
        methods: None,
        custom_index: false,
    };

    let mut consts = ConstMethods::<T> {
        builder,
        _type: PhantomData,
    };
    T::add_const_methods(&mut consts);
    let mut builder = consts.builder;

    if !variant.is_const() {
        let mut methods = Methods::<T> {
            builder,
            _type: PhantomData,
        };
        T::add_methods(&mut methods);
        builder = methods.builder;
    }
    builder.finish()
}
