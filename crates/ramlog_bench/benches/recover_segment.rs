//! Segment replay benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ramlog_bench::{bench_replayer, recovery_buffer, BENCH_SEGMENT_CAPACITY};

/// Benchmark replaying one segment's worth of fresh objects.
fn bench_recover_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover_segment");
    group.sample_size(20);

    for object_size in [64, 128, 256, 512, 1024, 2048, 4096, 8192].iter() {
        let (buffer, objects) = recovery_buffer(BENCH_SEGMENT_CAPACITY as usize, *object_size);
        group.throughput(Throughput::Elements(objects));
        group.bench_with_input(
            BenchmarkId::from_parameter(object_size),
            &buffer,
            |b, buffer| {
                b.iter_batched(
                    || bench_replayer(8),
                    |replayer| {
                        replayer
                            .recover_segment(Some(1), buffer)
                            .expect("Failed to replay segment")
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

/// Benchmark replaying a segment whose objects are all already present.
fn bench_replay_duplicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_duplicates");
    group.sample_size(20);

    let (buffer, objects) = recovery_buffer(BENCH_SEGMENT_CAPACITY as usize / 4, 256);
    group.throughput(Throughput::Elements(objects));
    group.bench_function("256", |b| {
        let replayer = bench_replayer(8);
        replayer
            .recover_segment(Some(1), &buffer)
            .expect("Failed to replay segment");
        b.iter(|| {
            replayer
                .recover_segment(Some(1), &buffer)
                .expect("Failed to replay segment")
        });
    });
    group.finish();
}

criterion_group!(benches, bench_recover_segment, bench_replay_duplicates);
criterion_main!(benches);
