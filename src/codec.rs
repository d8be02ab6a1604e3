//! Value codec - stack slots to native values and back
//!
//! `FromStack` reads one slot; `IntoStack` pushes a value and declares how
//! many slots it occupies, so tuples contribute one slot per element to a
//! call's result count.
//!
//! Conversion rules:
//! - integers accept integer slots and integral floats, range-checked
//! - floats accept any numeric slot
//! - `bool` requires an exact boolean slot
//! - `String` copies text; numbers convert to their text form
//! - `Option<T>` maps nil to `None`

use crate::error::{BindError, Result};
use num_traits::NumCast;
use stackbind_vm::{FunctionRef, State, TableRef, UserdataRef, Value, ValueKind};

/// Read a native value from a stack slot
pub trait FromStack: Sized {
    /// Name used in type mismatch messages
    fn type_name() -> &'static str;

    /// Exact type match, no widening
    fn is(state: &State, idx: i32) -> bool;

    /// Whether `get` would succeed
    fn is_convertible(state: &State, idx: i32) -> bool {
        Self::is(state, idx)
    }

    fn get(state: &State, idx: i32) -> Result<Self>;

    /// Like `get`, but only for an exact match
    fn get_exact(state: &State, idx: i32) -> Result<Self> {
        if Self::is(state, idx) {
            Self::get(state, idx)
        } else {
            Err(mismatch::<Self>(state, idx))
        }
    }

    /// Read a slot the caller has already checked.
    ///
    /// Primitive impls read their own slot kind directly, with no range
    /// check. Every other read, including a primitive read of some other
    /// slot kind, is the checked `get`.
    ///
    /// # Panics
    ///
    /// Panics when the checked read fails.
    fn get_unchecked(state: &State, idx: i32) -> Self {
        checked_or_panic(state, idx)
    }
}

fn checked_or_panic<T: FromStack>(state: &State, idx: i32) -> T {
    match T::get(state, idx) {
        Ok(value) => value,
        Err(e) => panic!("unchecked read of slot {idx}: {e}"),
    }
}

/// Push a native value onto the stack
pub trait IntoStack {
    /// Number of slots `push` produces
    const SLOTS: usize;

    fn push(self, state: &mut State) -> Result<()>;
}

/// Type mismatch for the slot at `idx`
pub(crate) fn mismatch<T: FromStack>(state: &State, idx: i32) -> BindError {
    BindError::mismatch(T::type_name(), describe(state, idx))
}

/// Kind name of a slot for diagnostics; out-of-frame slots read as "no value"
pub(crate) fn describe(state: &State, idx: i32) -> &'static str {
    match state.abs_index(idx) {
        Some(_) => state.kind(idx).name(),
        None => "no value",
    }
}

// ===== Free functions =====

/// Push `value`, returning the number of slots pushed
pub fn push<T: IntoStack>(state: &mut State, value: T) -> Result<usize> {
    value.push(state)?;
    Ok(T::SLOTS)
}

pub fn is<T: FromStack>(state: &State, idx: i32) -> bool {
    T::is(state, idx)
}

pub fn is_convertible<T: FromStack>(state: &State, idx: i32) -> bool {
    T::is_convertible(state, idx)
}

pub fn get<T: FromStack>(state: &State, idx: i32) -> Result<T> {
    T::get(state, idx)
}

pub fn get_exact<T: FromStack>(state: &State, idx: i32) -> Result<T> {
    T::get_exact(state, idx)
}

pub fn get_unchecked<T: FromStack>(state: &State, idx: i32) -> T {
    T::get_unchecked(state, idx)
}

// ===== Integers =====

fn integer_from<T: NumCast>(value: &Value) -> Option<T> {
    match *value {
        Value::Integer(i) => <T as NumCast>::from(i),
        Value::Number(n) if n.fract() == 0.0 => <T as NumCast>::from(n),
        _ => None,
    }
}

macro_rules! impl_integer {
    ($($t:ty),* $(,)?) => {$(
        impl FromStack for $t {
            fn type_name() -> &'static str {
                stringify!($t)
            }

            fn is(state: &State, idx: i32) -> bool {
                matches!(state.value(idx), Value::Integer(i) if <$t as NumCast>::from(i).is_some())
            }

            fn is_convertible(state: &State, idx: i32) -> bool {
                integer_from::<$t>(&state.value(idx)).is_some()
            }

            fn get(state: &State, idx: i32) -> Result<Self> {
                integer_from(&state.value(idx)).ok_or_else(|| mismatch::<Self>(state, idx))
            }

            fn get_unchecked(state: &State, idx: i32) -> Self {
                match state.value(idx) {
                    Value::Integer(i) => i as $t,
                    _ => checked_or_panic(state, idx),
                }
            }
        }

        impl IntoStack for $t {
            const SLOTS: usize = 1;

            fn push(self, state: &mut State) -> Result<()> {
                state.push(Value::Integer(self as i64))?;
                Ok(())
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32);

/// 64-bit unsigned values use every bit of the integer slot. Values past
/// `i64::MAX` are stored as their two's-complement `i64`, so a negative
/// integer slot reads back as the unsigned value that produced it.
fn wide_unsigned_from<T: NumCast>(value: &Value) -> Option<T> {
    match *value {
        Value::Integer(i) => <T as NumCast>::from(i as u64),
        Value::Number(n) if n.fract() == 0.0 => <T as NumCast>::from(n),
        _ => None,
    }
}

macro_rules! impl_wide_unsigned {
    ($($t:ty),* $(,)?) => {$(
        impl FromStack for $t {
            fn type_name() -> &'static str {
                stringify!($t)
            }

            fn is(state: &State, idx: i32) -> bool {
                matches!(
                    state.value(idx),
                    Value::Integer(i) if <$t as NumCast>::from(i as u64).is_some()
                )
            }

            fn is_convertible(state: &State, idx: i32) -> bool {
                wide_unsigned_from::<$t>(&state.value(idx)).is_some()
            }

            fn get(state: &State, idx: i32) -> Result<Self> {
                wide_unsigned_from(&state.value(idx)).ok_or_else(|| mismatch::<Self>(state, idx))
            }

            fn get_unchecked(state: &State, idx: i32) -> Self {
                match state.value(idx) {
                    Value::Integer(i) => i as u64 as $t,
                    _ => checked_or_panic(state, idx),
                }
            }
        }

        impl IntoStack for $t {
            const SLOTS: usize = 1;

            fn push(self, state: &mut State) -> Result<()> {
                state.push(Value::Integer(self as u64 as i64))?;
                Ok(())
            }
        }
    )*};
}

impl_wide_unsigned!(u64, usize);

// ===== Floats =====

macro_rules! impl_float {
    ($($t:ty),* $(,)?) => {$(
        impl FromStack for $t {
            fn type_name() -> &'static str {
                stringify!($t)
            }

            fn is(state: &State, idx: i32) -> bool {
                state.kind(idx) == ValueKind::Number
            }

            fn is_convertible(state: &State, idx: i32) -> bool {
                state.kind(idx).is_numeric()
            }

            fn get(state: &State, idx: i32) -> Result<Self> {
                state
                    .to_number(idx)
                    .map(|n| n as $t)
                    .ok_or_else(|| mismatch::<Self>(state, idx))
            }

            fn get_unchecked(state: &State, idx: i32) -> Self {
                match state.value(idx) {
                    Value::Number(n) => n as $t,
                    Value::Integer(i) => i as $t,
                    _ => checked_or_panic(state, idx),
                }
            }
        }

        impl IntoStack for $t {
            const SLOTS: usize = 1;

            fn push(self, state: &mut State) -> Result<()> {
                state.push(Value::Number(self as f64))?;
                Ok(())
            }
        }
    )*};
}

impl_float!(f32, f64);

// ===== Booleans and text =====

impl FromStack for bool {
    fn type_name() -> &'static str {
        "bool"
    }

    fn is(state: &State, idx: i32) -> bool {
        state.kind(idx) == ValueKind::Boolean
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        state
            .to_boolean(idx)
            .ok_or_else(|| mismatch::<Self>(state, idx))
    }

    fn get_unchecked(state: &State, idx: i32) -> Self {
        match state.value(idx) {
            Value::Boolean(b) => b,
            _ => checked_or_panic(state, idx),
        }
    }
}

impl IntoStack for bool {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        state.push(self)?;
        Ok(())
    }
}

impl FromStack for String {
    fn type_name() -> &'static str {
        "string"
    }

    fn is(state: &State, idx: i32) -> bool {
        state.kind(idx) == ValueKind::String
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        let kind = state.kind(idx);
        kind == ValueKind::String || kind.is_numeric()
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        state
            .to_str(idx)
            .map(|s| s.to_string())
            .ok_or_else(|| mismatch::<Self>(state, idx))
    }
}

impl IntoStack for String {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        state.push(self)?;
        Ok(())
    }
}

impl IntoStack for &str {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        state.push(self)?;
        Ok(())
    }
}

// ===== Runtime values =====

impl FromStack for Value {
    fn type_name() -> &'static str {
        "value"
    }

    fn is(_: &State, _: i32) -> bool {
        true
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        Ok(state.value(idx))
    }
}

impl IntoStack for Value {
    const SLOTS: usize = 1;

    fn push(self, state: &mut State) -> Result<()> {
        state.push(self)?;
        Ok(())
    }
}

macro_rules! impl_handle {
    ($t:ty, $kind:expr, $view:ident) => {
        impl FromStack for $t {
            fn type_name() -> &'static str {
                $kind.name()
            }

            fn is(state: &State, idx: i32) -> bool {
                state.kind(idx) == $kind
            }

            fn get(state: &State, idx: i32) -> Result<Self> {
                state
                    .value(idx)
                    .$view()
                    .ok_or_else(|| mismatch::<Self>(state, idx))
            }
        }

        impl IntoStack for $t {
            const SLOTS: usize = 1;

            fn push(self, state: &mut State) -> Result<()> {
                state.push(self)?;
                Ok(())
            }
        }
    };
}

impl_handle!(TableRef, ValueKind::Table, as_table);
impl_handle!(FunctionRef, ValueKind::Function, as_function);
impl_handle!(UserdataRef, ValueKind::Userdata, as_userdata);

// ===== Option =====

impl<T: FromStack> FromStack for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn is(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || T::is(state, idx)
    }

    fn is_convertible(state: &State, idx: i32) -> bool {
        state.is_nil(idx) || T::is_convertible(state, idx)
    }

    fn get(state: &State, idx: i32) -> Result<Self> {
        if state.is_nil(idx) {
            Ok(None)
        } else {
            T::get(state, idx).map(Some)
        }
    }

    fn get_exact(state: &State, idx: i32) -> Result<Self> {
        if state.is_nil(idx) {
            Ok(None)
        } else {
            T::get_exact(state, idx).map(Some)
        }
    }
}

/// `None` pushes one nil per slot the inner type would occupy
impl<T: IntoStack> IntoStack for Option<T> {
    const SLOTS: usize = T::SLOTS;

    fn push(self, state: &mut State) -> Result<()> {
        match self {
            Some(value) => value.push(state),
            None => {
                for _ in 0..T::SLOTS {
                    state.push(Value::Nil)?;
                }
                Ok(())
            }
        }
    }
}

// ===== Aggregates =====

impl IntoStack for () {
    const SLOTS: usize = 0;

    fn push(self, _: &mut State) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoStack),+> IntoStack for ($($name,)+) {
            const SLOTS: usize = 0 $(+ <$name as IntoStack>::SLOTS)+;

            #[allow(non_snake_case)]
            fn push(self, state: &mut State) -> Result<()> {
                let ($($name,)+) = self;
                $($name.push(state)?;)+
                Ok(())
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
impl_tuple!(A, B, C, D, E, F, G);
impl_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range_checks() {
        let mut state = State::new();
        push(&mut state, 300i64).unwrap();
        assert!(is::<i32>(&state, 1));
        assert!(!is::<u8>(&state, 1));
        assert!(get::<u8>(&state, 1).is_err());
        assert_eq!(get::<u16>(&state, 1).unwrap(), 300);

        push(&mut state, -1i32).unwrap();
        assert!(get::<u32>(&state, 2).is_err());
        assert_eq!(get::<i8>(&state, 2).unwrap(), -1);
    }

    #[test]
    fn test_integral_floats_convert() {
        let mut state = State::new();
        push(&mut state, 4.0f64).unwrap();
        push(&mut state, 4.5f64).unwrap();

        assert!(!is::<i64>(&state, 1));
        assert!(is_convertible::<i64>(&state, 1));
        assert_eq!(get::<i64>(&state, 1).unwrap(), 4);
        assert!(get_exact::<i64>(&state, 1).is_err());
        assert!(get::<i64>(&state, 2).is_err());
    }

    #[test]
    fn test_wide_unsigned_uses_integer_slot() {
        let mut state = State::new();
        push(&mut state, u64::MAX).unwrap();
        push(&mut state, (1u64 << 63) + 1).unwrap();
        push(&mut state, usize::MAX).unwrap();

        assert_eq!(state.kind(1), ValueKind::Integer);
        assert_eq!(state.to_integer(1), Some(-1));
        assert!(is::<u64>(&state, 1));
        assert_eq!(get::<u64>(&state, 1).unwrap(), u64::MAX);
        assert_eq!(get::<u64>(&state, 2).unwrap(), (1 << 63) + 1);
        assert_eq!(get::<usize>(&state, 3).unwrap(), usize::MAX);

        // Narrower unsigned types still reject negative slots
        assert!(get::<u32>(&state, 1).is_err());
    }

    #[test]
    fn test_unchecked_reads_skip_range_checks() {
        let mut state = State::new();
        push(&mut state, 300i64).unwrap();
        push(&mut state, 2.5f64).unwrap();
        push(&mut state, true).unwrap();

        assert_eq!(get_unchecked::<u8>(&state, 1), 44);
        assert_eq!(get_unchecked::<f32>(&state, 1), 300.0);
        assert_eq!(get_unchecked::<f64>(&state, 2), 2.5);
        assert!(get_unchecked::<bool>(&state, 3));
        // Other slot kinds fall back to the checked conversion
        assert_eq!(get_unchecked::<String>(&state, 1), "300");
    }

    #[test]
    fn test_floats_accept_integers() {
        let mut state = State::new();
        push(&mut state, 3i64).unwrap();
        assert!(!is::<f64>(&state, 1));
        assert!(is_convertible::<f64>(&state, 1));
        assert_eq!(get::<f32>(&state, 1).unwrap(), 3.0);
    }

    #[test]
    fn test_bool_requires_boolean_slot() {
        let mut state = State::new();
        push(&mut state, 1i64).unwrap();
        push(&mut state, false).unwrap();
        assert!(get::<bool>(&state, 1).is_err());
        assert!(!get::<bool>(&state, 2).unwrap());
    }

    #[test]
    fn test_string_copies_and_converts_numbers() {
        let mut state = State::new();
        push(&mut state, "hello").unwrap();
        push(&mut state, 12i64).unwrap();
        push(&mut state, true).unwrap();

        assert_eq!(get::<String>(&state, 1).unwrap(), "hello");
        assert!(!is::<String>(&state, 2));
        assert_eq!(get::<String>(&state, 2).unwrap(), "12");
        let err = get::<String>(&state, 3).unwrap_err();
        assert_eq!(err.to_string(), "expected string, got boolean");
    }

    #[test]
    fn test_option_maps_nil() {
        let mut state = State::new();
        push(&mut state, None::<i64>).unwrap();
        push(&mut state, Some(5i64)).unwrap();
        assert_eq!(get::<Option<i64>>(&state, 1).unwrap(), None);
        assert_eq!(get::<Option<i64>>(&state, 2).unwrap(), Some(5));
        assert_eq!(get::<Option<i64>>(&state, 3).unwrap(), None);
    }

    #[test]
    fn test_tuples_push_one_slot_per_element() {
        let mut state = State::new();
        assert_eq!(<(i64, String, bool) as IntoStack>::SLOTS, 3);
        assert_eq!(push(&mut state, (1i64, "two".to_string(), true)).unwrap(), 3);
        assert_eq!(get::<i64>(&state, 1).unwrap(), 1);
        assert_eq!(get::<String>(&state, 2).unwrap(), "two");
        assert!(get::<bool>(&state, 3).unwrap());

        assert_eq!(push(&mut state, ()).unwrap(), 0);
        assert_eq!(<Option<(i64, i64)> as IntoStack>::SLOTS, 2);
        push(&mut state, None::<(i64, i64)>).unwrap();
        assert_eq!(state.top(), 5);
    }

    #[test]
    fn test_missing_slot_reports_no_value() {
        let state = State::new();
        let err = get::<i64>(&state, 1).unwrap_err();
        assert_eq!(err.to_string(), "expected i64, got no value");
    }

    #[test]
    #[should_panic(expected = "unchecked read of slot 1")]
    fn test_unchecked_read_panics_on_violation() {
        let mut state = State::new();
        push(&mut state, "text").unwrap();
        let _ = get_unchecked::<i64>(&state, 1);
    }

    #[test]
    fn test_handles_round_trip() {
        let mut state = State::new();
        let t = state.new_table();
        push(&mut state, t).unwrap();
        assert_eq!(get::<TableRef>(&state, 1).unwrap(), t);
        assert!(get::<FunctionRef>(&state, 1).is_err());
        assert!(is::<Value>(&state, 1));
    }
}
