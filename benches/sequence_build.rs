//! Criterion benchmarks for building the traversal sequence.
//!
//! Run with: cargo bench --bench sequence_build

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mag_sweep::sequence::{build, RangeSpec};

fn sequence_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_build");

    let fine_steps = [("coarse_only", 0.5), ("default", 0.05), ("dense", 0.001)];
    for (name, fine_step) in fine_steps {
        group.bench_with_input(BenchmarkId::from_parameter(name), &fine_step, |b, &step| {
            b.iter(|| {
                build(
                    black_box(RangeSpec::new(-10.0, 10.0, 0.5)),
                    black_box(RangeSpec::new(-1.0, 1.0, step)),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, sequence_build);
criterion_main!(benches);
