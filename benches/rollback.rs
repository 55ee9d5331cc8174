use bayou_core::conflict::ConflictEngine;
use bayou_core::log::LogState;
use bayou_core::rollback::RollbackEngine;
use bayou_core::store::{InMemoryStateStore, FALSE_SENTINEL, TRUE_SENTINEL};
use bayou_core::ReplicaId;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

/// Builds a tentative log `depth` entries deep, every one a no-op merge so
/// none of them conflict with each other.
async fn seeded_state(depth: usize) -> (LogState, InMemoryStateStore) {
    let store = InMemoryStateStore::new();
    let mut state = LogState::new(1);
    for i in 0..depth {
        ConflictEngine::accept(
            &mut state,
            ReplicaId(0),
            &store,
            format!("INSERT|rooms|n={i}"),
            format!("DELETE|rooms|n={i}"),
            TRUE_SENTINEL.into(),
            FALSE_SENTINEL.into(),
        )
        .await
        .unwrap();
    }
    (state, store)
}

fn rollback_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("rollback_and_reapply");

    for depth in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || rt.block_on(seeded_state(depth)),
                |(mut state, store)| {
                    rt.block_on(async {
                        let pending = state.tentative.as_slice().to_vec();
                        RollbackEngine::undo_all(&mut state, &store).await.unwrap();
                        RollbackEngine::reapply(&mut state, &store, pending)
                            .await
                            .unwrap();
                    });
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, rollback_benchmark);
criterion_main!(benches);
