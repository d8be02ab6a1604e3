//! Runtime errors - the single failure channel of the VM
//!
//! Every failure raised by a native function travels back through
//! `State::call` as an `Error`; the VM never swallows one except inside a
//! finalizer, where it is logged instead.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Result alias used throughout the VM
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Script-level error with a formatted message
    #[error("{0}")]
    Runtime(String),

    /// Failure raised by a native callback, kept intact so hosts can downcast it
    #[error("{0}")]
    Callback(CallbackError),

    #[error("stack overflow (limit {limit} slots)")]
    StackOverflow { limit: usize },

    #[error("invalid stack index {0}")]
    InvalidIndex(i32),

    #[error("stale handle: object was already collected")]
    StaleHandle,

    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    #[error("invalid table key ({0})")]
    InvalidKey(&'static str),

    #[error("attempt to index a {0} value")]
    NotIndexable(&'static str),

    #[error("attempt to get length of a {0} value")]
    NoLength(&'static str),

    #[error("error in finalizer: {0}")]
    Finalizer(String),
}

impl Error {
    /// Build a runtime error from anything printable
    pub fn runtime(message: impl fmt::Display) -> Self {
        Self::Runtime(message.to_string())
    }

    /// Wrap a native error so it propagates through the VM unchanged
    pub fn callback<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::Callback(CallbackError(Rc::new(error)))
    }

    /// Downcast a wrapped native error
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Callback(inner) => inner.0.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Shared, clonable native error
#[derive(Clone)]
pub struct CallbackError(pub Rc<dyn std::error::Error>);

impl fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom at {0}")]
    struct Boom(u32);

    #[test]
    fn test_callback_roundtrip() {
        let err = Error::callback(Boom(3));
        assert_eq!(err.to_string(), "boom at 3");
        assert_eq!(err.downcast_ref::<Boom>().map(|b| b.0), Some(3));
    }

    #[test]
    fn test_runtime_message() {
        let err = Error::runtime(format_args!("bad {}", 1));
        assert_eq!(err.to_string(), "bad 1");
        assert!(err.downcast_ref::<Boom>().is_none());
    }
}
