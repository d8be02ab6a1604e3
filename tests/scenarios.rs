//! End-to-end binding scenarios driven through the runtime's own call paths

use stackbind::{
    descriptor_for, emplace, get, is, is_convertible, push_callable, push_ptr, push_value, spawn,
    with_state, BindError, ConstMethods, ConstObj, MetaMethod, Methods, Obj, Ptr, Returns, State,
    UserData, Value, Variant,
};
use std::cell::Cell;

thread_local! {
    static SEQ_DROPS: Cell<usize> = const { Cell::new(0) };
    static SEQ_HOOKS: Cell<usize> = const { Cell::new(0) };
}

struct IntSeq(Vec<i64>);

impl Drop for IntSeq {
    fn drop(&mut self) {
        SEQ_DROPS.with(|d| d.set(d.get() + 1));
    }
}

impl UserData for IntSeq {
    fn type_name() -> &'static str {
        "IntSeq"
    }

    fn add_const_methods(methods: &mut ConstMethods<'_, Self>) {
        SEQ_HOOKS.with(|h| h.set(h.get() + 1));
        methods.add_meta_method_const(MetaMethod::Len, |s: &IntSeq| s.0.len() as i64);
        methods.add_meta_method_const(MetaMethod::Index, |s: &IntSeq, i: i64| {
            usize::try_from(i - 1).ok().and_then(|i| s.0.get(i).copied())
        });
    }

    fn add_methods(methods: &mut Methods<'_, Self>) {
        methods.add_meta_method(MetaMethod::NewIndex, |s: &mut IntSeq, i: i64, v: i64| {
            if let Some(slot) = usize::try_from(i - 1).ok().and_then(|i| s.0.get_mut(i)) {
                *slot = v;
            }
        });
    }
}

fn seq_drops() -> usize {
    SEQ_DROPS.with(Cell::get)
}

fn seq_hooks() -> usize {
    SEQ_HOOKS.with(Cell::get)
}

#[test]
fn int_seq_lifecycle() {
    let mut state = State::new();
    let before = seq_drops();
    let seq = emplace(&mut state, IntSeq(vec![10, 20, 30])).unwrap();

    assert_eq!(state.length(1).unwrap(), Value::Integer(3));
    assert_eq!(state.index(1, 1i64).unwrap(), Value::Integer(10));

    state.set_index(1, 1i64, 99i64).unwrap();
    assert_eq!(seq.borrow().unwrap().0, vec![99, 20, 30]);

    // Native handle released first, then the script's
    drop(seq);
    state.pop(1);
    state.collect();
    assert_eq!(seq_drops(), before + 1);
    state.collect();
    assert_eq!(seq_drops(), before + 1);
}

#[test]
fn value_and_pointer_checks() {
    let mut state = State::new();
    let mut native = IntSeq(vec![1]);

    push_value(&mut state, IntSeq(vec![1])).unwrap();
    unsafe { push_ptr(&mut state, &mut native as *mut IntSeq).unwrap() };

    assert!(is::<Obj<IntSeq>>(&state, 1));
    assert!(!is::<Obj<IntSeq>>(&state, 2));
    assert!(is::<Ptr<IntSeq>>(&state, 2));
    assert!(!is::<Ptr<IntSeq>>(&state, 1));
    assert!(is_convertible::<Obj<IntSeq>>(&state, 1));
    assert!(is_convertible::<Obj<IntSeq>>(&state, 2));

    state.set_top(0).unwrap();
    state.collect();
}

#[test]
fn descriptor_identity_across_family() {
    let mut state = State::new();
    let first = descriptor_for::<IntSeq>(&mut state, Variant::VALUE).unwrap();
    let again = descriptor_for::<IntSeq>(&mut state, Variant::VALUE).unwrap();
    assert_eq!(first, again);

    let mut child = spawn(&state);
    assert_eq!(descriptor_for::<IntSeq>(&mut child, Variant::VALUE).unwrap(), first);
}

#[test]
fn extension_hook_runs_once_per_family() {
    let mut state = State::new();
    let before = seq_hooks();
    descriptor_for::<IntSeq>(&mut state, Variant::VALUE).unwrap();
    descriptor_for::<IntSeq>(&mut state, Variant::VALUE).unwrap();
    let mut child = spawn(&state);
    descriptor_for::<IntSeq>(&mut child, Variant::VALUE).unwrap();
    assert_eq!(seq_hooks(), before + 1);

    // A separate runtime is a separate family
    let mut other = State::new();
    descriptor_for::<IntSeq>(&mut other, Variant::VALUE).unwrap();
    assert_eq!(seq_hooks(), before + 2);
}

#[test]
fn const_monotonicity() {
    let mut state = State::new();
    push_value(&mut state, IntSeq(vec![])).unwrap();
    stackbind::push_const_value(&mut state, IntSeq(vec![])).unwrap();
    state.push(3i64).unwrap();
    state.push("seq").unwrap();

    for idx in 1..=4 {
        if !is_convertible::<ConstObj<IntSeq>>(&state, idx) {
            assert!(!is_convertible::<Obj<IntSeq>>(&state, idx));
        }
    }
    assert!(is_convertible::<ConstObj<IntSeq>>(&state, 2));
    assert!(!is_convertible::<Obj<IntSeq>>(&state, 2));
}

#[test]
fn arity_enforcement() {
    let mut state = State::new();
    let pair = push_callable(&mut state, |a: i64, b: i64| a - b).unwrap();
    let (one, two, three) = (Value::Integer(1), Value::Integer(2), Value::Integer(3));
    for args in [vec![one.clone()], vec![one, two, three]] {
        let err = state.call_function(pair, &args, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BindError>(),
            Some(BindError::ArityMismatch { expected: 2, .. })
        ));
    }

    let ctx = push_callable(
        &mut state,
        with_state(|a: i64, b: i64, state: &mut State| a + b + state.call_depth() as i64),
    )
    .unwrap();
    let out = state
        .call_function(ctx, &[Value::Integer(2), Value::Integer(3)], None)
        .unwrap();
    assert_eq!(out, vec![Value::Integer(6)]);
}

#[test]
fn multi_return_keeps_order() {
    let mut state = State::new();
    push_callable(&mut state, |a: i64, b: i64| (b, a)).unwrap();
    state.push(1i64).unwrap();
    state.push(2i64).unwrap();

    assert_eq!(state.call(2, None).unwrap(), 2);
    assert_eq!(state.top(), 2);
    assert_eq!(get::<i64>(&state, 1).unwrap(), 2);
    assert_eq!(get::<i64>(&state, 2).unwrap(), 1);
}

#[test]
fn self_described_results() {
    let mut state = State::new();
    let f = push_callable(
        &mut state,
        with_state(|state: &mut State| -> stackbind::Result<Returns> {
            assert_eq!(state.top(), 1);
            state.push("done")?;
            Ok(Returns(1))
        }),
    )
    .unwrap();
    let out = state.call_function(f, &[Value::Integer(1)], None).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_str(), Some("done"));
}
