//! Value model - what a stack slot can hold
//!
//! Design: scalars are stored inline; tables, functions and userdata live in
//! the heap and are referenced through generational handles so that a handle
//! outliving its object is detected rather than aliasing a recycled slot.

use std::fmt;
use std::rc::Rc;

/// Generational index into the heap slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Handle {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slab index (stable for the lifetime of the object)
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

macro_rules! heap_ref {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) Handle);

        impl $name {
            /// Underlying heap handle
            #[inline]
            pub fn handle(self) -> Handle {
                self.0
            }
        }
    };
}

heap_ref!(
    /// Reference to a heap table
    TableRef
);
heap_ref!(
    /// Reference to a native closure
    FunctionRef
);
heap_ref!(
    /// Reference to an opaque userdata object
    UserdataRef
);

/// A runtime value (one stack slot)
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Str(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    Userdata(UserdataRef),
}

/// Dynamic type tag of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Nil,
    Boolean,
    Integer,
    Number,
    String,
    Table,
    Function,
    Userdata,
}

impl ValueKind {
    /// Name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Userdata => "userdata",
        }
    }

    /// Integer or float slot
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Nil => ValueKind::Nil,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) => ValueKind::Integer,
            Self::Number(_) => ValueKind::Number,
            Self::Str(_) => ValueKind::String,
            Self::Table(_) => ValueKind::Table,
            Self::Function(_) => ValueKind::Function,
            Self::Userdata(_) => ValueKind::Userdata,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Everything except `nil` and `false` is truthy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// Integer view; floats qualify only when they hold an exact integer
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Self::Integer(i) => Some(i),
            Self::Number(n) => float_to_integer(n),
            _ => None,
        }
    }

    /// Float view of either numeric slot
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Self::Integer(i) => Some(i as f64),
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<UserdataRef> {
        match *self {
            Self::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<TableRef> {
        match *self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionRef> {
        match *self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Heap handle if this value references a collectable object
    pub(crate) fn heap_handle(&self) -> Option<Handle> {
        match *self {
            Self::Table(t) => Some(t.0),
            Self::Function(f) => Some(f.0),
            Self::Userdata(u) => Some(u.0),
            _ => None,
        }
    }

    /// Identity comparison: scalars by value, heap objects by reference
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::Userdata(a), Self::Userdata(b)) => a == b,
            (a, b) if a.kind().is_numeric() && b.kind().is_numeric() => {
                match (a, b) {
                    (Self::Integer(x), Self::Integer(y)) => x == y,
                    _ => a.as_number() == b.as_number(),
                }
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

/// Exact float → integer conversion (no rounding)
pub(crate) fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Self::Table(t)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Self::Function(f)
    }
}

impl From<UserdataRef> for Value {
    fn from(u: UserdataRef) -> Self {
        Self::Userdata(u)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
            Self::Table(t) => write!(f, "table: #{}", t.0.index),
            Self::Function(func) => write!(f, "function: #{}", func.0.index),
            Self::Userdata(u) => write!(f, "userdata: #{}", u.0.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Nil.kind().name(), "nil");
        assert_eq!(Value::from(1i64).kind(), ValueKind::Integer);
        assert_eq!(Value::from(1.5).kind(), ValueKind::Number);
        assert_eq!(Value::from("x").kind().name(), "string");
    }

    #[test]
    fn test_integer_view_is_exact() {
        assert_eq!(Value::Number(4.0).as_integer(), Some(4));
        assert_eq!(Value::Number(4.5).as_integer(), None);
        assert_eq!(Value::Number(f64::NAN).as_integer(), None);
        assert_eq!(Value::Integer(7).as_number(), Some(7.0));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }

    #[test]
    fn test_raw_equal_mixed_numbers() {
        assert!(Value::Integer(3).raw_equal(&Value::Number(3.0)));
        assert!(!Value::Integer(3).raw_equal(&Value::str("3")));
        assert!(Value::str("a").raw_equal(&Value::str("a")));
    }
}
