//! Benchmarks for spark-context
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use spark_context::{batch, inject, Context, Descriptor, Injectable, Key, Requirement, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A root with a value and a chain of `depth` children below it.
fn chain(depth: usize) -> (Context, Context) {
    let root = Context::create();
    root.set("theme", "dark").unwrap();
    let mut leaf = root;
    for _ in 0..depth {
        leaf = leaf.create_child().unwrap();
    }
    (root, leaf)
}

// =============================================================================
// CONTEXT BENCHMARKS
// =============================================================================

fn bench_context_create_dispose(c: &mut Criterion) {
    let root = Context::create();
    c.bench_function("context_create_dispose", |b| {
        b.iter(|| {
            let child = root.create_child().unwrap();
            child.dispose();
        })
    });
}

fn bench_local_get(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.set("k", 42i32).unwrap();
    c.bench_function("local_get", |b| b.iter(|| black_box(ctx.get("k"))));
}

fn bench_lookup_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for depth in [1, 5, 10, 20] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let (root, leaf) = chain(depth);
            b.iter(|| black_box(leaf.get("theme")));
            root.dispose();
        });
    }

    group.finish();
}

fn bench_set_untracked(c: &mut Criterion) {
    let ctx = Context::create();
    c.bench_function("set_untracked", |b| {
        b.iter(|| ctx.set("k", black_box(42i32)).unwrap())
    });
}

// =============================================================================
// TRACKING BENCHMARKS
// =============================================================================

fn bench_session_trigger(c: &mut Criterion) {
    let ctx = Context::create();
    let runs = Rc::new(Cell::new(0u64));
    let counter = runs.clone();
    ctx.run_and_track(move |c| {
        c.get("k");
        counter.set(counter.get() + 1);
        true
    })
    .unwrap();

    c.bench_function("session_trigger", |b| {
        b.iter(|| ctx.set("k", black_box(1i32)).unwrap())
    });
    black_box(runs.get());
}

fn bench_session_through_ancestors(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_through_ancestors");

    for depth in [1, 5, 10] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let (root, leaf) = chain(depth);
            leaf.run_and_track(|c| {
                black_box(c.get("theme"));
                true
            })
            .unwrap();
            b.iter(|| root.set("theme", black_box("light")).unwrap());
            root.dispose();
        });
    }

    group.finish();
}

fn bench_batched_writes(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.run_and_track(|c| {
        for key in ["a", "b", "c", "d"] {
            black_box(c.get(key));
        }
        true
    })
    .unwrap();

    c.bench_function("batched_writes", |b| {
        b.iter(|| {
            batch(|| {
                for key in ["a", "b", "c", "d"] {
                    ctx.set(key, black_box(1i32)).unwrap();
                }
            })
        })
    });
}

fn bench_grouped_process_waiting(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.run_and_track_grouped(|c| {
        black_box(c.get("k"));
        true
    })
    .unwrap();

    c.bench_function("grouped_process_waiting", |b| {
        b.iter(|| {
            for i in 0..8i32 {
                ctx.set("k", black_box(i)).unwrap();
            }
            ctx.process_waiting();
        })
    });
}

// =============================================================================
// COMPUTED BENCHMARKS
// =============================================================================

fn sum(ctx: &Context, _key: &Key) -> Option<Value> {
    let a = ctx.get_as::<i32>("a")?;
    let b = ctx.get_as::<i32>("b")?;
    Some(Rc::new(*a + *b) as Value)
}

fn bench_computed_cached(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.set("a", 1i32).unwrap();
    ctx.set("b", 2i32).unwrap();
    ctx.set_computed("sum", sum).unwrap();
    let _ = ctx.get("sum");

    c.bench_function("computed_get_cached", |b| {
        b.iter(|| black_box(ctx.get("sum")))
    });
}

fn bench_computed_dirty(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.set("a", 1i32).unwrap();
    ctx.set("b", 2i32).unwrap();
    ctx.set_computed("sum", sum).unwrap();

    c.bench_function("computed_get_dirty", |b| {
        b.iter(|| {
            ctx.set("a", black_box(5i32)).unwrap();
            black_box(ctx.get("sum"))
        })
    });
}

// =============================================================================
// INJECTION BENCHMARKS
// =============================================================================

#[derive(Default)]
struct Widget {
    title: Option<Rc<&'static str>>,
    width: Option<Rc<u32>>,
}

impl Injectable for Widget {
    fn descriptor() -> Descriptor<Self> {
        Descriptor::<Self>::new()
            .field::<&'static str>(Requirement::named("title"), |w, v| w.title = v)
            .field::<u32>(Requirement::named("width").optional(), |w, v| w.width = v)
    }
}

fn bench_inject(c: &mut Criterion) {
    let root = Context::create();
    root.set("title", "bench").unwrap();

    c.bench_function("inject_dispose", |b| {
        b.iter(|| {
            let ctx = root.create_child().unwrap();
            let widget = Rc::new(RefCell::new(Widget::default()));
            inject(&widget, &ctx, None).unwrap();
            ctx.dispose();
            black_box(widget)
        })
    });
}

fn bench_binding_update(c: &mut Criterion) {
    let ctx = Context::create();
    ctx.set("title", "bench").unwrap();
    let widget = Rc::new(RefCell::new(Widget::default()));
    inject(&widget, &ctx, None).unwrap();

    c.bench_function("binding_update", |b| {
        b.iter(|| ctx.set("width", black_box(640u32)).unwrap())
    });
}

// =============================================================================

criterion_group!(
    context_benches,
    bench_context_create_dispose,
    bench_local_get,
    bench_lookup_depth,
    bench_set_untracked,
);

criterion_group!(
    tracking_benches,
    bench_session_trigger,
    bench_session_through_ancestors,
    bench_batched_writes,
    bench_grouped_process_waiting,
);

criterion_group!(computed_benches, bench_computed_cached, bench_computed_dirty);

criterion_group!(injection_benches, bench_inject, bench_binding_update);

criterion_main!(context_benches, tracking_benches, computed_benches, injection_benches);
