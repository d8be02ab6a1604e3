//! Binding errors
//!
//! Every failure detected at the call boundary is a `BindError`. When it
//! leaves a bound function it is converted into a runtime error so it unwinds
//! through the runtime's own error channel; hosts recover it with
//! `stackbind_vm::Error::downcast_ref::<BindError>()`.

use stackbind_vm::RuntimeId;
use thiserror::Error;

pub type Result<T, E = BindError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum BindError {
    /// Wrong number of arguments, raised before any argument is read
    #[error("{}", arity_message(*expected, *got, *at_least))]
    ArityMismatch {
        expected: usize,
        got: usize,
        /// The callable takes the runtime context and accepts extra slots
        at_least: bool,
    },

    /// A stack slot did not convert to the requested native type
    #[error("{}", type_message(expected, found, *position))]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        /// 1-based argument position, when raised while reading arguments
        position: Option<usize>,
    },

    /// The object is already borrowed in a conflicting way
    #[error("{type_name} is already borrowed")]
    BorrowConflict { type_name: &'static str },

    /// The object's storage was released by the collector
    #[error("{type_name} object has been finalized")]
    StaleObject { type_name: &'static str },

    /// A finalizer was invoked on an object the collector has not released
    #[error("{type_name} object is still reachable")]
    StillReachable { type_name: &'static str },

    /// A reference was used with a runtime outside the family that created it
    #[error("reference created by {owner} used with unrelated {used_with}")]
    CrossInstanceMisuse { owner: RuntimeId, used_with: RuntimeId },

    #[error(transparent)]
    Vm(#[from] stackbind_vm::Error),
}

fn arity_message(expected: usize, got: usize, at_least: bool) -> String {
    let plural = if expected == 1 { "" } else { "s" };
    if at_least {
        format!("expected at least {expected} argument{plural} but got {got}")
    } else {
        format!("expected {expected} argument{plural} but got {got}")
    }
}

fn type_message(expected: &str, found: &str, position: Option<usize>) -> String {
    match position {
        Some(pos) => format!("expected {expected} in argument {pos}, got {found}"),
        None => format!("expected {expected}, got {found}"),
    }
}

impl BindError {
    pub(crate) fn mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            expected,
            found,
            position: None,
        }
    }

    /// Attach the argument position to a type mismatch
    pub(crate) fn at_position(self, pos: usize) -> Self {
        match self {
            Self::TypeMismatch {
                expected, found, ..
            } => Self::TypeMismatch {
                expected,
                found,
                position: Some(pos),
            },
            other => other,
        }
    }
}

impl From<BindError> for stackbind_vm::Error {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Vm(inner) => inner,
            other => stackbind_vm::Error::callback(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_messages() {
        let exact = BindError::ArityMismatch {
            expected: 2,
            got: 1,
            at_least: false,
        };
        assert_eq!(exact.to_string(), "expected 2 arguments but got 1");

        let min = BindError::ArityMismatch {
            expected: 1,
            got: 0,
            at_least: true,
        };
        assert_eq!(min.to_string(), "expected at least 1 argument but got 0");
    }

    #[test]
    fn test_type_mismatch_position() {
        let err = BindError::mismatch("i32", "string");
        assert_eq!(err.to_string(), "expected i32, got string");
        assert_eq!(
            err.at_position(2).to_string(),
            "expected i32 in argument 2, got string"
        );
    }

    #[test]
    fn test_position_ignored_for_other_errors() {
        let err = BindError::BorrowConflict { type_name: "Counter" }.at_position(1);
        assert!(matches!(err, BindError::BorrowConflict { .. }));
    }

    #[test]
    fn test_conversion_into_runtime_error() {
        let vm: stackbind_vm::Error = BindError::mismatch("bool", "nil").into();
        let inner = vm.downcast_ref::<BindError>().expect("bind error preserved");
        assert!(matches!(inner, BindError::TypeMismatch { expected: "bool", .. }));

        let vm: stackbind_vm::Error = BindError::Vm(stackbind_vm::Error::StaleHandle).into();
        assert!(matches!(vm, stackbind_vm::Error::StaleHandle));
    }
}
