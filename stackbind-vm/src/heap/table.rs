//! Tables - hash maps keyed by the hashable subset of values
//!
//! Integral floats normalize to integer keys so `t[1]` and `t[1.0]` address
//! the same entry. `nil` and NaN are not valid keys.

use crate::error::{Error, Result};
use crate::value::{FunctionRef, Handle, TableRef, UserdataRef, Value};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    Str(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    Userdata(UserdataRef),
}

impl Key {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Nil => return Err(Error::InvalidKey("nil")),
            Value::Boolean(b) => Self::Boolean(*b),
            Value::Integer(i) => Self::Integer(*i),
            Value::Number(n) if n.is_nan() => return Err(Error::InvalidKey("NaN")),
            Value::Number(n) => match crate::value::float_to_integer(*n) {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.to_bits()),
            },
            Value::Str(s) => Self::Str(Rc::clone(s)),
            Value::Table(t) => Self::Table(*t),
            Value::Function(f) => Self::Function(*f),
            Value::Userdata(u) => Self::Userdata(*u),
        })
    }

    pub(crate) fn heap_handle(&self) -> Option<Handle> {
        match self {
            Self::Table(t) => Some(t.handle()),
            Self::Function(f) => Some(f.handle()),
            Self::Userdata(u) => Some(u.handle()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Table {
    entries: HashMap<Key, Value>,
}

impl Table {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &Value) -> Value {
        match Key::from_value(key) {
            Ok(k) => self.entries.get(&k).cloned().unwrap_or_default(),
            Err(_) => Value::Nil,
        }
    }

    pub(crate) fn get_str(&self, key: &str) -> Value {
        self.entries
            .get(&Key::Str(Rc::from(key)))
            .cloned()
            .unwrap_or_default()
    }

    /// Assigning `nil` removes the entry
    pub(crate) fn set(&mut self, key: &Value, value: Value) -> Result<()> {
        let key = Key::from_value(key)?;
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
        Ok(())
    }

    /// Border length: largest `n` such that keys `1..=n` are all present
    pub(crate) fn border(&self) -> i64 {
        let mut n = 0i64;
        while self.entries.contains_key(&Key::Integer(n + 1)) {
            n += 1;
        }
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Heap handles referenced from keys or values (for marking)
    pub(crate) fn referenced_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries
            .iter()
            .flat_map(|(k, v)| k.heap_handle().into_iter().chain(v.heap_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_keys_normalize() {
        let mut t = Table::new();
        t.set(&Value::Number(1.0), Value::str("one")).unwrap();
        assert_eq!(t.get(&Value::Integer(1)).as_str(), Some("one"));
        t.set(&Value::Number(1.5), Value::Integer(2)).unwrap();
        assert_eq!(t.get(&Value::Number(1.5)).as_integer(), Some(2));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let mut t = Table::new();
        assert!(matches!(t.set(&Value::Nil, Value::Integer(1)), Err(Error::InvalidKey("nil"))));
        assert!(t.set(&Value::Number(f64::NAN), Value::Integer(1)).is_err());
        assert!(t.get(&Value::Nil).is_nil());
    }

    #[test]
    fn test_nil_assignment_removes() {
        let mut t = Table::new();
        t.set(&Value::str("k"), Value::Integer(1)).unwrap();
        assert_eq!(t.len(), 1);
        t.set(&Value::str("k"), Value::Nil).unwrap();
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn test_border_stops_at_first_gap() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.set(&Value::Integer(i), Value::Boolean(true)).unwrap();
        }
        t.set(&Value::Integer(5), Value::Boolean(true)).unwrap();
        assert_eq!(t.border(), 3);
    }
}
