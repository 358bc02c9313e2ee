//! # Reactor Benchmarks
//!
//! Hot paths that run on every notification:
//!
//! | Path | Runs when |
//! |------|-----------|
//! | Reconciliation | every projection and every replayed mutation |
//! | Evaluation | every projection of a live query |
//! | Compilation | every `transact` |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use sync_reactor::domain::{attr_map, rewrite_sorted, Attr, AttrMap, EditStep, EventId, MutationQueue, Triple};
use sync_reactor::ports::{CompileContext, MutationCompiler, QueryEvaluator};
use sync_reactor::{BasicCompiler, BasicEvaluator, TxChunk};

const LABELS: [&str; 4] = ["title", "body", "rating", "author"];

fn server_attrs() -> AttrMap {
    let mut attrs: Vec<Attr> = LABELS.iter().map(|label| Attr::blob("posts", label)).collect();
    attrs.push(Attr::id_attr("posts"));
    attr_map(attrs)
}

/// A queue of offline writes, each declaring its own unsynced attributes.
fn offline_queue(len: usize) -> MutationQueue {
    let mut queue = MutationQueue::new();
    for n in 0..len {
        let mut steps = Vec::new();
        for label in LABELS {
            let local = Attr::blob("posts", label).unsynced();
            steps.push(EditStep::AddTriple {
                entity: format!("p{n}"),
                attr_id: local.id,
                value: json!(format!("{label} {n}")),
            });
            steps.insert(0, EditStep::AddAttr { attr: local });
        }
        queue.push_with_id(EventId::new(), steps, None, n as u64);
    }
    queue
}

fn snapshot_with_posts(attrs: &AttrMap, count: usize) -> sync_reactor::domain::Snapshot {
    let find = |label: &str| {
        attrs
            .values()
            .find(|a| a.label() == label)
            .map(|a| a.id)
            .unwrap_or_default()
    };
    let (id_attr, title) = (find("id"), find("title"));
    let triples = (0..count)
        .flat_map(|n| {
            let entity = format!("p{n}");
            [
                Triple {
                    entity: entity.clone(),
                    attr_id: id_attr,
                    value: json!(entity),
                    created_at: None,
                },
                Triple {
                    entity,
                    attr_id: title,
                    value: json!(format!("post {n}")),
                    created_at: None,
                },
            ]
        })
        .collect();
    BasicEvaluator.build_snapshot(attrs, triples, false)
}

fn bench_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconciliation");
    let attrs = server_attrs();
    for len in [10, 100, 500] {
        let queue = offline_queue(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("rewrite_sorted", len), &queue, |b, queue| {
            b.iter(|| black_box(rewrite_sorted(Some(&attrs), queue)))
        });
    }
    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluation");
    let attrs = server_attrs();
    let query = json!({"posts": {}});
    for count in [100, 1_000] {
        let snapshot = snapshot_with_posts(&attrs, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("evaluate", count), &snapshot, |b, snapshot| {
            b.iter(|| black_box(BasicEvaluator.evaluate(snapshot, &query)))
        });
    }

    let snapshot = snapshot_with_posts(&attrs, 1_000);
    let steps = offline_queue(1)
        .sorted()
        .into_iter()
        .flat_map(|(_, m)| m.tx_steps.clone())
        .collect::<Vec<_>>();
    group.bench_function("transact_one_write", |b| {
        b.iter(|| black_box(BasicEvaluator.transact(&snapshot, &steps)))
    });
    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let attrs = server_attrs();
    let chunks: Vec<TxChunk> = (0..50)
        .map(|n| TxChunk::new("posts", format!("p{n}")).update(json!({"title": "t", "rating": n})))
        .collect();
    c.bench_function("compile_50_chunks", |b| {
        b.iter(|| {
            let ctx = CompileContext {
                attrs: &attrs,
                schema: None,
                snapshots: &[],
            };
            black_box(BasicCompiler.compile(ctx, &chunks))
        })
    });
}

criterion_group!(benches, bench_reconciliation, bench_evaluation, bench_compilation);
criterion_main!(benches);
