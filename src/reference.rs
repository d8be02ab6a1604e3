//! Cross-runtime references - native-held handles to runtime values
//!
//! A `Reference` anchors a value in the registry table under a fresh key so
//! it survives collection while native code holds it. The handle remembers
//! its runtime family through a non-owning registry handle: dropping it after
//! the runtime closed is a no-op, and using it with an unrelated runtime is a
//! programming error.

use crate::codec::{self, FromStack};
use crate::error::{BindError, Result};
use stackbind_vm::{RegistryHandle, RegistryKey, RuntimeId, State, Value};
use std::fmt;

pub struct Reference {
    key: Option<RegistryKey>,
    owner: RuntimeId,
    registry: RegistryHandle,
}

impl Reference {
    /// Anchor the value at `idx`; nil yields an empty reference
    pub fn new(state: &mut State, idx: i32) -> Result<Self> {
        let value = state.value_at(idx)?;
        let key = if value.is_nil() {
            None
        } else {
            Some(state.registry_ref(value)?)
        };
        Ok(Self {
            key,
            owner: state.id(),
            registry: state.registry_handle(),
        })
    }

    /// Anchor the value on top of the stack and pop it
    pub fn pop(state: &mut State) -> Result<Self> {
        let reference = Self::new(state, -1)?;
        state.pop(1);
        Ok(reference)
    }

    /// Runtime that created the reference
    pub fn runtime(&self) -> RuntimeId {
        self.owner
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// Whether `state` belongs to the family this reference was created in
    pub fn usable_with(&self, state: &State) -> bool {
        self.registry.belongs_to(state)
    }

    /// Referenced value; nil for an empty reference
    ///
    /// # Panics
    ///
    /// Panics with `CrossInstanceMisuse` when `state` is from another family.
    pub fn value(&self, state: &State) -> Result<Value> {
        self.check(state);
        match self.key {
            Some(key) => Ok(state.registry_get(key)?),
            None => Ok(Value::Nil),
        }
    }

    /// Push the referenced value
    ///
    /// # Panics
    ///
    /// Panics with `CrossInstanceMisuse` when `state` is from another family.
    pub fn push(&self, state: &mut State) -> Result<()> {
        let value = self.value(state)?;
        state.push(value)?;
        Ok(())
    }

    /// Decode the referenced value
    ///
    /// # Panics
    ///
    /// Panics with `CrossInstanceMisuse` when `state` is from another family.
    pub fn get<T: FromStack>(&self, state: &mut State) -> Result<T> {
        self.push(state)?;
        let value = codec::get::<T>(state, -1);
        state.pop(1);
        value
    }

    fn check(&self, state: &State) {
        if !self.registry.belongs_to(state) {
            let err = BindError::CrossInstanceMisuse {
                owner: self.owner,
                used_with: state.id(),
            };
            panic!("{err}");
        }
    }
}

impl Drop for Reference {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.registry.unref(key);
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("runtime", &self.owner)
            .field("key", &self.key)
            .field("alive", &self.registry.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    #[test]
    fn test_reference_keeps_value_alive() {
        let mut state = State::new();
        let table = state.new_table();
        state.raw_set(table, "k", 7i64).unwrap();
        state.push(table).unwrap();
        let reference = Reference::pop(&mut state).unwrap();
        assert_eq!(state.top(), 0);

        state.collect();
        reference.push(&mut state).unwrap();
        let back = state.to_table(-1).unwrap();
        assert_eq!(state.raw_get_str(back, "k").unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_drop_releases_anchor() {
        let mut state = State::new();
        let table = state.new_table();
        state.push(table).unwrap();
        let reference = Reference::pop(&mut state).unwrap();
        drop(reference);

        let stats = state.collect().unwrap();
        assert!(stats.freed >= 1);
    }

    #[test]
    fn test_typed_get_and_empty() {
        let mut state = State::new();
        state.push("text").unwrap();
        state.push(Value::Nil).unwrap();
        let text = Reference::new(&mut state, 1).unwrap();
        let empty = Reference::new(&mut state, 2).unwrap();

        assert_eq!(text.get::<String>(&mut state).unwrap(), "text");
        assert!(text.get::<bool>(&mut state).is_err());
        assert!(empty.is_empty());
        assert_eq!(empty.get::<Option<i64>>(&mut state).unwrap(), None);
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_usable_within_family() {
        let mut state = State::new();
        state.push(5i64).unwrap();
        let reference = Reference::new(&mut state, 1).unwrap();
        let mut child = registry::spawn(&state);
        assert!(reference.usable_with(&child));
        assert_eq!(reference.get::<i64>(&mut child).unwrap(), 5);
        assert_eq!(reference.runtime(), state.id());
    }

    #[test]
    #[should_panic(expected = "used with unrelated")]
    fn test_foreign_runtime_panics() {
        let mut a = State::new();
        let mut b = State::new();
        a.push(1i64).unwrap();
        let reference = Reference::new(&mut a, 1).unwrap();
        let _ = reference.push(&mut b);
    }

    #[test]
    fn test_drop_after_close_is_noop() {
        let mut state = State::new();
        state.push(1i64).unwrap();
        let reference = Reference::new(&mut state, 1).unwrap();
        drop(state);
        assert!(!reference.usable_with(&State::new()));
        drop(reference);
    }
}
