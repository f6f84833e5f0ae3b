use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use markdown_blocksync_engine::{EngineOptions, ManualClock, SyncEngine};
mod common;

fn bench_identity_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    group.sample_size(10);

    for blocks in [100, 1000] {
        let original = common::generate_document(blocks);
        let edited = common::generate_edited_document(blocks);

        group.bench_with_input(
            BenchmarkId::new("mutation", blocks),
            &(original, edited),
            |b, (original, edited)| {
                let mut engine = SyncEngine::with_clock(
                    EngineOptions::default(),
                    Arc::new(ManualClock::new()),
                );
                engine.reset_and_snapshot(original);
                let mut flip = false;
                b.iter(|| {
                    let tree = if flip { original } else { edited };
                    flip = !flip;
                    engine.on_mutation(std::hint::black_box(tree));
                });
                std::hint::black_box(engine.drain_changes());
            },
        );
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");
    group.sample_size(10);

    let original = common::generate_document(1000);
    let edited = common::generate_edited_document(1000);

    group.bench_function("burst_diff", |b| {
        let mut engine =
            SyncEngine::with_clock(EngineOptions::default(), Arc::new(ManualClock::new()));
        engine.reset_and_snapshot(&original);
        let mut flip = false;
        b.iter(|| {
            engine.on_mutation(if flip { &original } else { &edited });
            flip = !flip;
            std::hint::black_box(engine.drain_changes());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_identity_assignment, bench_drain);
criterion_main!(benches);
