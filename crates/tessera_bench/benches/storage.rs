//! Raw record write and read benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::random_data;
use tessera_storage::{open_backend, BufferMode, StoreOptions, MIB};

/// Benchmark appending records to each backend kind.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_write");

    for mode in [BufferMode::Transient, BufferMode::DiskWorm, BufferMode::DiskRw] {
        for size in [64usize, 1024, 16 * 1024] {
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(mode.to_string(), size),
                &size,
                |b, &size| {
                    let dir = tempfile::tempdir().unwrap();
                    let mut options = StoreOptions::new(mode).initial_extent(64 * MIB);
                    if mode != BufferMode::Transient {
                        options = options.file(dir.path().join("bench.jnl"));
                    }
                    let store = open_backend(&options).unwrap();
                    let data = random_data(size);

                    b.iter(|| {
                        let addr = store.write(black_box(&data)).unwrap();
                        black_box(addr);
                    });
                },
            );
        }
    }
    group.finish();
}

/// Benchmark reading back a record, with and without checksums.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_read");

    for checksums in [false, true] {
        let label = if checksums { "crc32" } else { "plain" };
        group.bench_function(label, |b| {
            let options = StoreOptions::new(BufferMode::Transient).use_checksums(checksums);
            let store = open_backend(&options).unwrap();
            let addr = store.write(&random_data(4096)).unwrap();

            b.iter(|| {
                let bytes = store.read(black_box(addr)).unwrap();
                black_box(bytes);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
