//! stackbind - typed bindings between native Rust and an embedded stack runtime
//!
//! ```
//! use stackbind::{emplace, push_callable, State, UserData, Methods, ConstMethods};
//!
//! struct Counter(i64);
//!
//! impl UserData for Counter {
//!     fn add_const_methods(methods: &mut ConstMethods<'_, Self>) {
//!         methods.add_method_const("get", |c: &Counter| c.0);
//!     }
//!
//!     fn add_methods(methods: &mut Methods<'_, Self>) {
//!         methods.add_method("add", |c: &mut Counter, n: i64| c.0 += n);
//!     }
//! }
//!
//! let mut state = State::new();
//! let counter = emplace(&mut state, Counter(1)).unwrap();
//! state.push(41i64).unwrap();
//! state.call_method(1, "add", 1).unwrap();
//! assert_eq!(counter.borrow().unwrap().0, 42);
//!
//! push_callable(&mut state, |a: i64, b: i64| a * b).unwrap();
//! state.push(6i64).unwrap();
//! state.push(7i64).unwrap();
//! state.call(2, Some(1)).unwrap();
//! assert_eq!(state.to_integer(-1), Some(42));
//! ```

// Core modules
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod object;
pub mod reference;
pub mod registry;

// Re-export commonly used items
pub use codec::{get, get_exact, get_unchecked, is, is_convertible, push, FromStack, IntoStack};
pub use dispatch::{
    create_callable, create_named_callable, method, method_const, push_callable, with_state,
    CallWrapper, IntoReturn, NativeFunction, ReturnKind, Returns, Signature,
};
pub use error::{BindError, Result};
pub use hooks::{ConstMethods, MetaMethod, Methods, UserData};
pub use object::{
    emplace, push_const_ptr, push_const_shared, push_const_value, push_ptr, push_shared,
    push_value, resolve, type_check, ConstObj, ConstOwned, ConstPtr, ConstShared, Obj, ObjMut,
    ObjRef, Owned, Ownership, Ptr, Shared, Variant,
};
pub use reference::Reference;
pub use registry::{descriptor_for, family_root, lookup, spawn};

pub use stackbind_vm::{self as vm, logging, RuntimeId, State, Value, VmConfig};
