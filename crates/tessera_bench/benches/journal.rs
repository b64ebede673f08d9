//! Commit and group commit benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tessera_bench::{keys, random_data};
use tessera_core::{
    Config, IndexMetadata, IndexView, IsolationLevel, Journal, Task, TxId,
};

fn journal() -> Journal {
    let config = Config::transient().group_commit_timeout(Duration::from_millis(5));
    let journal = Journal::open(config).unwrap();
    journal.register_index(IndexMetadata::new("bench")).unwrap();
    journal.commit().unwrap();
    journal
}

/// Benchmark unisolated commits of a batch of writes.
fn bench_unisolated_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("unisolated_commit");

    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let journal = journal();
            let index = journal.index("bench").unwrap();
            let keys = keys(batch);
            let value = random_data(128);

            b.iter(|| {
                for key in &keys {
                    index.insert(key, &value).unwrap();
                }
                black_box(journal.commit().unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark write tasks funnelled through the group committer.
fn bench_group_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_commit");

    for tasks in [1usize, 16, 64] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            let journal = journal();
            let value = random_data(128);

            b.iter(|| {
                let handles: Vec<_> = (0..tasks as u64)
                    .map(|i| {
                        let value = value.clone();
                        journal.submit(Task::new(TxId::UNISOLATED, ["bench"], move |ctx| {
                            ctx.index("bench")?.insert(&i.to_be_bytes(), &value)?;
                            Ok(())
                        }))
                    })
                    .collect();
                for handle in handles {
                    handle.get().unwrap();
                }
            });
        });
    }
    group.finish();
}

/// Benchmark read-write transactions that validate and merge one key.
fn bench_read_write_tx(c: &mut Criterion) {
    c.bench_function("read_write_tx", |b| {
        let journal = journal();
        let value = random_data(64);
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            let tx = journal.new_tx(IsolationLevel::ReadWrite).unwrap();
            journal
                .index_for("bench", tx)
                .unwrap()
                .insert(&n.to_be_bytes(), &value)
                .unwrap();
            black_box(journal.commit_tx(tx).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_unisolated_commit,
    bench_group_commit,
    bench_read_write_tx
);
criterion_main!(benches);
