use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use stackbind_vm::{Result, State, Value, VmConfig};

fn noop_gc(_: &mut State) -> Result<usize> {
    Ok(0)
}

fn manual_state() -> State {
    State::with_config(VmConfig {
        gc_threshold: 0,
        ..VmConfig::default()
    })
}

fn bench_collect(c: &mut Criterion) {
    c.bench_function("collect_1000_garbage_tables", |b| {
        b.iter_batched(
            || {
                let mut state = manual_state();
                for _ in 0..1000 {
                    state.new_table();
                }
                state
            },
            |mut state| black_box(state.collect()),
            BatchSize::SmallInput,
        );
    });

    c.bench_function("collect_1000_finalized_userdata", |b| {
        b.iter_batched(
            || {
                let mut state = manual_state();
                let mt = state.new_table();
                let gc = state.new_function(noop_gc, Value::Nil);
                state.raw_set(mt, "__gc", gc).unwrap();
                state.registry_ref(mt).unwrap();
                for i in 0..1000u32 {
                    state.new_userdata(Box::new(i), Some(mt));
                }
                state
            },
            |mut state| black_box(state.collect()),
            BatchSize::SmallInput,
        );
    });
}

fn bench_stack(c: &mut Criterion) {
    let mut state = manual_state();
    c.bench_function("push_pop_integer", |b| {
        b.iter(|| {
            state.push(black_box(7i64)).unwrap();
            black_box(state.pop_value().unwrap());
        });
    });
}

criterion_group!(benches, bench_collect, bench_stack);
criterion_main!(benches);
