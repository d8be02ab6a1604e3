//! stackbind-vm - embedded stack-based runtime substrate
//!
//! A host runtime with no source language: native code drives it through a
//! positional value stack, a registry table, opaque userdata tagged with
//! metatables, native closures with one upvalue and a mark-and-sweep
//! collector that invokes `__gc` finalizers.
//!
//! ```
//! use stackbind_vm::{Result, State, Value};
//!
//! fn double(state: &mut State) -> Result<usize> {
//!     let n = state.to_integer(1).unwrap_or(0);
//!     state.push(n * 2)?;
//!     Ok(1)
//! }
//!
//! let mut state = State::new();
//! let f = state.new_function(double, Value::Nil);
//! let results = state.call_function(f, &[21i64.into()], Some(1)).unwrap();
//! assert_eq!(results[0].as_integer(), Some(42));
//! ```

pub mod config;
pub mod error;
pub mod gc;
mod heap;
pub mod logging;
pub mod state;
pub mod value;

pub use config::{ConfigError, LogSettings, VmConfig};
pub use error::{CallbackError, Error, Result};
pub use gc::GcStats;
pub use heap::HeapStats;
pub use state::{NativeFn, RegistryHandle, RegistryKey, RuntimeId, State};
pub use value::{FunctionRef, Handle, TableRef, UserdataRef, Value, ValueKind};
