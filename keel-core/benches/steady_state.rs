use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};

use keel_core::{deps, Engine, EngineConfig, TaskQueue};

fn make_engine(skip: bool) -> Engine<u64, u64> {
    Engine::builder()
        .config(EngineConfig::default().with_skip_unchanged_args(skip))
        .scheduler(Rc::new(TaskQueue::new()))
        .build(|scope, n: &u64| {
            let (offset, _) = scope.use_state(1_u64)?;
            let squared = scope.use_memo(|| n * n, deps![*n])?;
            scope.use_layout_effect(|| Ok(None), Some(deps![squared]))?;
            Ok(squared + offset)
        })
}

fn bench_cached_invoke(c: &mut Criterion) {
    let engine = make_engine(true);
    engine.invoke(7).unwrap();

    c.bench_function("steady_state/cached_invoke", |b| {
        b.iter(|| black_box(engine.invoke(black_box(7)).unwrap().value))
    });
}

fn bench_single_pass(c: &mut Criterion) {
    // Alternate arguments so every invocation recomputes the memo and
    // re-runs the effect.
    let engine = make_engine(false);
    let mut n = 0_u64;

    c.bench_function("steady_state/single_pass", |b| {
        b.iter(|| {
            n = (n + 1) % 2;
            black_box(engine.invoke(n).unwrap().value)
        })
    });
}

fn bench_continuation(c: &mut Criterion) {
    let queue = TaskQueue::new();
    let engine = Engine::builder()
        .scheduler(Rc::new(queue.clone()))
        .build(|scope, _: &()| {
            let (count, set_count) = scope.use_state(0_u64)?;
            Ok((count, set_count))
        });
    let (_, set_count) = engine.invoke(()).unwrap().value;

    c.bench_function("steady_state/continuation", |b| {
        b.iter(|| {
            set_count.update(|n| n + 1);
            black_box(queue.run_until_idle())
        })
    });
}

criterion_group!(benches, bench_cached_invoke, bench_single_pass, bench_continuation);
criterion_main!(benches);
