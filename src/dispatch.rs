//! Call dispatch - binding native callables as runtime closures
//!
//! Binding captures the callable and its `Signature` once. The resulting
//! closure's only upvalue is a userdata holding the `CallWrapper`; one
//! trampoline serves every bound function:
//! 1. check arity (before any argument is read)
//! 2. read arguments left to right with the checked `get`
//! 3. invoke the callable
//! 4. push the result and report its slot count
//!
//! Failures are converted into runtime errors and unwind through `State::call`.

use crate::codec::{self, FromStack, IntoStack};
use crate::error::{BindError, Result};
use crate::hooks::UserData;
use crate::object::{ConstObj, Obj};
use smallvec::SmallVec;
use stackbind_vm::logging::log_native_call;
use stackbind_vm::{FunctionRef, State, Value};
use std::fmt;
use std::rc::Rc;

/// How a bound callable reports its results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// No values
    Void,
    /// A fixed number of slots, known at bind time
    Fixed(usize),
    /// The callable pushes its results itself and returns the count
    SelfDescribed,
}

impl ReturnKind {
    const fn from_slots(slots: usize) -> Self {
        if slots == 0 {
            Self::Void
        } else {
            Self::Fixed(slots)
        }
    }
}

/// Shape of a bound callable, computed once at bind time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Positional argument types as read from the stack
    pub args: SmallVec<[&'static str; 8]>,
    /// The callable also receives the runtime context (as its last argument)
    pub takes_state: bool,
    pub returns: ReturnKind,
}

impl Signature {
    /// Number of stack arguments the callable declares
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Arity rule: exact without context, a lower bound with context
    pub fn check_arity(&self, got: usize) -> Result<()> {
        let expected = self.arity();
        let ok = if self.takes_state {
            got >= expected
        } else {
            got == expected
        };
        if ok {
            Ok(())
        } else {
            Err(BindError::ArityMismatch {
                expected,
                got,
                at_least: self.takes_state,
            })
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}", self.args.join(", "))?;
        if self.takes_state {
            f.write_str(if self.args.is_empty() { "state" } else { ", state" })?;
        }
        match self.returns {
            ReturnKind::Void => f.write_str(")"),
            ReturnKind::Fixed(n) => write!(f, ") -> {n}"),
            ReturnKind::SelfDescribed => f.write_str(") -> n"),
        }
    }
}

// ===== Results =====

/// Result count of a callable that pushed its own results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Returns(pub usize);

/// Values a bound callable may return
pub trait IntoReturn {
    fn kind() -> ReturnKind;

    /// Push the result, returning the number of slots produced
    fn push_return(self, state: &mut State) -> Result<usize>;
}

impl<T: IntoStack> IntoReturn for T {
    fn kind() -> ReturnKind {
        ReturnKind::from_slots(T::SLOTS)
    }

    fn push_return(self, state: &mut State) -> Result<usize> {
        codec::push(state, self)
    }
}

impl IntoReturn for Returns {
    fn kind() -> ReturnKind {
        ReturnKind::SelfDescribed
    }

    fn push_return(self, _state: &mut State) -> Result<usize> {
        Ok(self.0)
    }
}

/// `Err` aborts the call through the runtime error channel
impl<R, E> IntoReturn for std::result::Result<R, E>
where
    R: IntoReturn,
    E: std::error::Error + 'static,
{
    fn kind() -> ReturnKind {
        R::kind()
    }

    fn push_return(self, state: &mut State) -> Result<usize> {
        match self {
            Ok(value) => value.push_return(state),
            Err(e) => Err(BindError::Vm(stackbind_vm::Error::callback(e))),
        }
    }
}

// ===== Callables =====

/// A native callable that can be bound; `Marker` disambiguates arities
pub trait NativeFunction<Marker>: 'static {
    fn signature() -> Signature;

    /// Run against the current call frame, returning the result count
    fn invoke(&self, state: &mut State) -> Result<usize>;
}

/// Callable that receives the runtime context after its stack arguments
pub struct WithState<F>(pub F);

/// Bind `f` as a context-taking callable: `|a: i64, state: &mut State| ...`
pub fn with_state<F>(f: F) -> WithState<F> {
    WithState(f)
}

/// Read argument `pos` (1-based), tagging mismatches with the position
#[inline]
fn arg<A: FromStack>(state: &State, pos: usize) -> Result<A> {
    codec::get::<A>(state, pos as i32).map_err(|e| e.at_position(pos))
}

fn args_of(names: &[&'static str]) -> SmallVec<[&'static str; 8]> {
    names.iter().copied().collect()
}

macro_rules! impl_native_function {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> NativeFunction<fn($($arg,)*) -> Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromStack,)*
        {
            fn signature() -> Signature {
                Signature {
                    args: args_of(&[$($arg::type_name()),*]),
                    takes_state: false,
                    returns: Ret::kind(),
                }
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, state: &mut State) -> Result<usize> {
                Self::signature().check_arity(state.top())?;
                let mut pos = 0usize;
                $(
                    pos += 1;
                    let $arg = arg::<$arg>(state, pos)?;
                )*
                (self)($($arg),*).push_return(state)
            }
        }

        impl<Func, Ret, $($arg,)*> NativeFunction<(State, fn($($arg,)*) -> Ret)> for WithState<Func>
        where
            Func: Fn($($arg,)* &mut State) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromStack,)*
        {
            fn signature() -> Signature {
                Signature {
                    args: args_of(&[$($arg::type_name()),*]),
                    takes_state: true,
                    returns: Ret::kind(),
                }
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, state: &mut State) -> Result<usize> {
                Self::signature().check_arity(state.top())?;
                let mut pos = 0usize;
                $(
                    pos += 1;
                    let $arg = arg::<$arg>(state, pos)?;
                )*
                (self.0)($($arg,)* state).push_return(state)
            }
        }
    };
}

impl_native_function!();
impl_native_function!(A1);
impl_native_function!(A1, A2);
impl_native_function!(A1, A2, A3);
impl_native_function!(A1, A2, A3, A4);
impl_native_function!(A1, A2, A3, A4, A5);
impl_native_function!(A1, A2, A3, A4, A5, A6);
impl_native_function!(A1, A2, A3, A4, A5, A6, A7);
impl_native_function!(A1, A2, A3, A4, A5, A6, A7, A8);

// ===== Member functions =====

/// Member function with a mutable receiver, bound as `fn(self, args...)`
pub trait MethodFn<T, Marker>: 'static {
    fn signature() -> Signature;
    fn invoke(&self, state: &mut State) -> Result<usize>;
}

/// Member function with a read-only receiver
pub trait ConstMethodFn<T, Marker>: 'static {
    fn signature() -> Signature;
    fn invoke(&self, state: &mut State) -> Result<usize>;
}

macro_rules! impl_method_fn {
    ($($arg:ident),*) => {
        impl<T, Func, Ret, $($arg,)*> MethodFn<T, fn($($arg,)*) -> Ret> for Func
        where
            T: UserData,
            Func: Fn(&mut T, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromStack,)*
        {
            fn signature() -> Signature {
                Signature {
                    args: args_of(&[T::type_name(), $($arg::type_name()),*]),
                    takes_state: false,
                    returns: Ret::kind(),
                }
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, state: &mut State) -> Result<usize> {
                Self::signature().check_arity(state.top())?;
                let receiver = arg::<Obj<T>>(state, 1)?;
                let mut pos = 1usize;
                $(
                    pos += 1;
                    let $arg = arg::<$arg>(state, pos)?;
                )*
                let ret = {
                    let mut guard = receiver.borrow_mut()?;
                    (self)(&mut *guard, $($arg),*)
                };
                ret.push_return(state)
            }
        }

        impl<T, Func, Ret, $($arg,)*> ConstMethodFn<T, fn($($arg,)*) -> Ret> for Func
        where
            T: UserData,
            Func: Fn(&T, $($arg),*) -> Ret + 'static,
            Ret: IntoReturn,
            $($arg: FromStack,)*
        {
            fn signature() -> Signature {
                Signature {
                    args: args_of(&[T::type_name(), $($arg::type_name()),*]),
                    takes_state: false,
                    returns: Ret::kind(),
                }
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, state: &mut State) -> Result<usize> {
                Self::signature().check_arity(state.top())?;
                let receiver = arg::<ConstObj<T>>(state, 1)?;
                let mut pos = 1usize;
                $(
                    pos += 1;
                    let $arg = arg::<$arg>(state, pos)?;
                )*
                let ret = {
                    let guard = receiver.borrow()?;
                    (self)(&*guard, $($arg),*)
                };
                ret.push_return(state)
            }
        }
    };
}

impl_method_fn!();
impl_method_fn!(A1);
impl_method_fn!(A1, A2);
impl_method_fn!(A1, A2, A3);
impl_method_fn!(A1, A2, A3, A4);
impl_method_fn!(A1, A2, A3, A4, A5);
impl_method_fn!(A1, A2, A3, A4, A5, A6);
impl_method_fn!(A1, A2, A3, A4, A5, A6, A7);

/// Member function adapted into a free callable taking the receiver first
pub struct Method<F, M>(F, std::marker::PhantomData<fn() -> M>);

/// Adapt a mutable-receiver member function: `method(Counter::add)`
pub fn method<T, M, F: MethodFn<T, M>>(f: F) -> Method<F, (T, M)> {
    Method(f, std::marker::PhantomData)
}

impl<T: 'static, M: 'static, F: MethodFn<T, M>> NativeFunction<(T, M)> for Method<F, (T, M)> {
    fn signature() -> Signature {
        F::signature()
    }

    fn invoke(&self, state: &mut State) -> Result<usize> {
        self.0.invoke(state)
    }
}

/// Read-only member function adapted into a free callable
pub struct ConstMethod<F, M>(F, std::marker::PhantomData<fn() -> M>);

/// Adapt a read-only member function: `method_const(Counter::get)`
pub fn method_const<T, M, F: ConstMethodFn<T, M>>(f: F) -> ConstMethod<F, (T, M)> {
    ConstMethod(f, std::marker::PhantomData)
}

impl<T: 'static, M: 'static, F: ConstMethodFn<T, M>> NativeFunction<(T, M)>
    for ConstMethod<F, (T, M)>
{
    fn signature() -> Signature {
        F::signature()
    }

    fn invoke(&self, state: &mut State) -> Result<usize> {
        self.0.invoke(state)
    }
}

// ===== Binding =====

type Invoke = Box<dyn Fn(&mut State) -> Result<usize>>;

/// Bound callable: the closure upvalue of every function created here
pub struct CallWrapper {
    name: String,
    signature: Signature,
    invoke: Invoke,
}

impl CallWrapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for CallWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallWrapper")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

fn trampoline(state: &mut State) -> stackbind_vm::Result<usize> {
    let wrapper = call_wrapper(state, &state.upvalue()?)
        .ok_or_else(|| stackbind_vm::Error::runtime("bound function lost its call wrapper"))?;
    log_native_call(&wrapper.name, state.top());
    (wrapper.invoke)(state).map_err(Into::into)
}

/// Call wrapper behind a closure upvalue
fn call_wrapper(state: &State, upvalue: &Value) -> Option<Rc<CallWrapper>> {
    let u = upvalue.as_userdata()?;
    state
        .with_payload(u, |payload| payload.downcast_ref::<Rc<CallWrapper>>().cloned())
        .ok()
        .flatten()
}

pub(crate) fn bind(
    state: &mut State,
    name: impl Into<String>,
    signature: Signature,
    invoke: Invoke,
) -> FunctionRef {
    let wrapper = Rc::new(CallWrapper {
        name: name.into(),
        signature,
        invoke,
    });
    let upvalue = state.new_userdata(Box::new(wrapper), None);
    state.new_function(trampoline, upvalue)
}

pub(crate) fn bind_method<T, M, F: MethodFn<T, M>>(
    state: &mut State,
    name: String,
    f: F,
) -> FunctionRef {
    bind(state, name, F::signature(), Box::new(move |s: &mut State| f.invoke(s)))
}

pub(crate) fn bind_const_method<T, M, F: ConstMethodFn<T, M>>(
    state: &mut State,
    name: String,
    f: F,
) -> FunctionRef {
    bind(state, name, F::signature(), Box::new(move |s: &mut State| f.invoke(s)))
}

/// Bind `f` under `name` without pushing it
pub fn create_named_callable<M, F: NativeFunction<M>>(
    state: &mut State,
    name: impl Into<String>,
    f: F,
) -> FunctionRef {
    bind(state, name, F::signature(), Box::new(move |s: &mut State| f.invoke(s)))
}

/// Bind `f` without pushing it.
///
/// The returned function is not anchored: keep it reachable from the stack,
/// the registry or the globals while it may be collected.
pub fn create_callable<M, F: NativeFunction<M>>(state: &mut State, f: F) -> FunctionRef {
    create_named_callable(state, std::any::type_name::<F>(), f)
}

/// Bind `f` and push the resulting closure
pub fn push_callable<M, F: NativeFunction<M>>(state: &mut State, f: F) -> Result<FunctionRef> {
    let func = create_callable(state, f);
    state.push(func)?;
    Ok(func)
}

/// Bound wrapper behind a runtime function, if it was created by this module
pub fn wrapper_of(state: &State, func: FunctionRef) -> Option<Rc<CallWrapper>> {
    call_wrapper(state, &state.function_upvalue(func).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::emplace;

    fn call(state: &mut State, f: FunctionRef, args: &[Value]) -> stackbind_vm::Result<Vec<Value>> {
        state.call_function(f, args, None)
    }

    fn bind_error(err: &stackbind_vm::Error) -> &BindError {
        err.downcast_ref::<BindError>().expect("binding error")
    }

    #[test]
    fn test_signature_deduction() {
        let mut state = State::new();
        let f = create_callable(&mut state, |a: i64, b: String| -> (i64, bool) {
            (a, b.is_empty())
        });
        let sig = wrapper_of(&state, f).unwrap().signature().clone();
        assert_eq!(sig.args.as_slice(), &["i64", "String"]);
        assert!(!sig.takes_state);
        assert_eq!(sig.returns, ReturnKind::Fixed(2));
        assert_eq!(sig.to_string(), "fn(i64, String) -> 2");
    }

    #[test]
    fn test_void_and_self_described_returns() {
        let mut state = State::new();
        let void = create_callable(&mut state, |_: i64| {});
        assert_eq!(wrapper_of(&state, void).unwrap().signature().returns, ReturnKind::Void);
        assert!(call(&mut state, void, &[1i64.into()]).unwrap().is_empty());

        let pushes = create_callable(
            &mut state,
            with_state(|n: i64, state: &mut State| -> Result<Returns> {
                for i in 0..n {
                    state.push(i)?;
                }
                Ok(Returns(n as usize))
            }),
        );
        let sig = wrapper_of(&state, pushes).unwrap().signature().clone();
        assert_eq!(sig.returns, ReturnKind::SelfDescribed);
        assert!(sig.takes_state);
        let out = call(&mut state, pushes, &[3i64.into()]).unwrap();
        assert_eq!(out, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_exact_arity() {
        let mut state = State::new();
        let add = create_callable(&mut state, |a: i64, b: i64| a + b);
        assert_eq!(
            call(&mut state, add, &[2i64.into(), 3i64.into()]).unwrap(),
            vec![Value::Integer(5)]
        );

        for args in [vec![Value::Integer(1)], vec![1i64.into(), 2i64.into(), 3i64.into()]] {
            let err = call(&mut state, add, &args).unwrap_err();
            assert!(matches!(
                bind_error(&err),
                BindError::ArityMismatch { expected: 2, at_least: false, .. }
            ));
        }
    }

    #[test]
    fn test_context_arity_is_a_lower_bound() {
        let mut state = State::new();
        let f = create_callable(
            &mut state,
            with_state(|a: i64, b: i64, state: &mut State| a + b + state.top() as i64),
        );
        assert_eq!(
            call(&mut state, f, &[1i64.into(), 2i64.into()]).unwrap(),
            vec![Value::Integer(5)]
        );
        let err = call(&mut state, f, &[1i64.into()]).unwrap_err();
        assert!(matches!(
            bind_error(&err),
            BindError::ArityMismatch { expected: 2, got: 1, at_least: true }
        ));
    }

    #[test]
    fn test_argument_mismatch_names_position() {
        thread_local! {
            static CALLED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
        }
        let mut state = State::new();
        let f = create_callable(&mut state, |_: i64, _: bool| CALLED.with(|c| c.set(true)));
        let err = call(&mut state, f, &[1i64.into(), Value::str("yes")]).unwrap_err();
        assert_eq!(err.to_string(), "expected bool in argument 2, got string");
        assert!(!CALLED.with(|c| c.get()));
    }

    #[test]
    fn test_error_return_unwinds() {
        #[derive(Debug, thiserror::Error)]
        #[error("division by zero")]
        struct DivByZero;

        let mut state = State::new();
        let div = create_callable(&mut state, |a: i64, b: i64| {
            if b == 0 {
                Err(DivByZero)
            } else {
                Ok(a / b)
            }
        });
        assert_eq!(
            call(&mut state, div, &[9i64.into(), 3i64.into()]).unwrap(),
            vec![Value::Integer(3)]
        );
        let err = call(&mut state, div, &[1i64.into(), 0i64.into()]).unwrap_err();
        assert!(err.downcast_ref::<DivByZero>().is_some());
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_push_callable_from_script_side() {
        let mut state = State::new();
        push_callable(&mut state, |s: String| s.len() as i64).unwrap();
        state.push("four").unwrap();
        assert_eq!(state.call(1, Some(1)).unwrap(), 1);
        assert_eq!(state.to_integer(-1), Some(4));
    }

    struct Counter(i64);

    impl Counter {
        fn add(&mut self, n: i64) -> i64 {
            self.0 += n;
            self.0
        }

        fn get(&self) -> i64 {
            self.0
        }
    }

    impl UserData for Counter {}

    #[test]
    fn test_member_adapters() {
        let mut state = State::new();
        let add = create_callable(&mut state, method(Counter::add));
        let get = create_callable(&mut state, method_const(Counter::get));
        let sig = wrapper_of(&state, add).unwrap().signature().clone();
        assert_eq!(sig.arity(), 2);

        let obj = emplace(&mut state, Counter(1)).unwrap();
        let receiver = Value::Userdata(obj.userdata());
        assert_eq!(
            call(&mut state, add, &[receiver.clone(), 4i64.into()]).unwrap(),
            vec![Value::Integer(5)]
        );
        assert_eq!(call(&mut state, get, &[receiver]).unwrap(), vec![Value::Integer(5)]);

        let err = call(&mut state, get, &[Value::Integer(1)]).unwrap_err();
        assert!(matches!(
            bind_error(&err),
            BindError::TypeMismatch { position: Some(1), .. }
        ));
    }
}
