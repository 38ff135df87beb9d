//! Microbenchmarks for the hot value-layer and commit paths

use accrete::{EntityId, IncrementId, MemoryTransactionEngine, TransactionEngine};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_id_mint(c: &mut Criterion) {
    c.bench_function("increment_id_mint", |b| b.iter(IncrementId::generate));
}

fn bench_id_compare(c: &mut Criterion) {
    let older = IncrementId::generate();
    let newer = IncrementId::generate();
    c.bench_function("increment_id_compare", |b| {
        b.iter(|| newer.is_newer_than(&older))
    });
}

fn bench_reference_commit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = MemoryTransactionEngine::new();
    let entity = EntityId::parse("bench/slot").unwrap();

    c.bench_function("reference_commit_single_conclusion", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let id = IncrementId::generate();
                engine
                    .try_commit(&[], std::slice::from_ref(&entity), &id)
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(benches, bench_id_mint, bench_id_compare, bench_reference_commit);
criterion_main!(benches);
