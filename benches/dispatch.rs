//! Dispatch benchmarks
//!
//! Measures the overhead of calling bound native functions through the runtime.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stackbind::{
    create_callable, emplace, with_state, ConstMethods, Methods, State, UserData, Value,
};

struct Accumulator(i64);

impl UserData for Accumulator {
    fn add_const_methods(methods: &mut ConstMethods<'_, Self>) {
        methods.add_method_const("total", |a: &Accumulator| a.0);
    }

    fn add_methods(methods: &mut Methods<'_, Self>) {
        methods.add_method("add", |a: &mut Accumulator, n: i64| a.0 += n);
    }
}

fn bench_free_functions(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_function");
    let mut state = State::new();

    let nullary = create_callable(&mut state, || 1i64);
    let binary = create_callable(&mut state, |a: i64, b: i64| a + b);
    let strings = create_callable(&mut state, |s: String, n: i64| s.len() as i64 + n);
    let contextual = create_callable(
        &mut state,
        with_state(|a: i64, state: &mut State| a + state.top() as i64),
    );

    let cases = [
        ("nullary", nullary, vec![]),
        ("binary", binary, vec![Value::Integer(1), Value::Integer(2)]),
        ("string_arg", strings, vec![Value::str("payload"), Value::Integer(3)]),
        ("with_state", contextual, vec![Value::Integer(4)]),
    ];

    for (name, func, args) in cases {
        state.set_global(name, func).unwrap();
        group.bench_with_input(BenchmarkId::new("call", name), &args, |b, args| {
            b.iter(|| black_box(state.call_function(func, args, Some(1)).unwrap()))
        });
    }

    group.finish();
}

fn bench_methods(c: &mut Criterion) {
    let mut state = State::new();
    emplace(&mut state, Accumulator(0)).unwrap();

    c.bench_function("method/add", |b| {
        b.iter(|| {
            state.push(black_box(1i64)).unwrap();
            state.call_method(1, "add", 1).unwrap();
        })
    });

    c.bench_function("method/total", |b| {
        b.iter(|| {
            state.call_method(1, "total", 0).unwrap();
            state.pop(1);
        })
    });
}

fn bench_arity_rejection(c: &mut Criterion) {
    let mut state = State::new();
    let binary = create_callable(&mut state, |a: i64, b: i64| a * b);
    state.set_global("binary", binary).unwrap();
    let args = [Value::Integer(1)];

    c.bench_function("arity_mismatch", |b| {
        b.iter(|| black_box(state.call_function(binary, &args, None).is_err()))
    });
}

criterion_group!(benches, bench_free_functions, bench_methods, bench_arity_rejection);
criterion_main!(benches);
