// Exception trap benchmarks
//
// Compares the cost of a trap that completes cleanly with one that
// raises and catches.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use oxibridge::runtime::exception::{self, throw_exception_named};

fn bench_clean_trap(c: &mut Criterion) {
    c.bench_function("trap_clean", |b| {
        b.iter(|| {
            exception::try_catch_finally(
                || {
                    black_box(1 + 1);
                },
                |_| {},
                || {},
            )
        })
    });
}

fn bench_caught_trap(c: &mut Criterion) {
    c.bench_function("trap_raise_and_catch", |b| {
        b.iter(|| {
            exception::try_catch_finally(
                || throw_exception_named("Bench"),
                |ex| {
                    black_box(ex.name());
                },
                || {},
            )
        })
    });
}

fn bench_capture(c: &mut Criterion) {
    c.bench_function("capture_raise", |b| {
        b.iter(|| black_box(exception::capture::<(), _>(|| throw_exception_named("Bench"))))
    });
}

criterion_group!(benches, bench_clean_trap, bench_caught_trap, bench_capture);
criterion_main!(benches);
