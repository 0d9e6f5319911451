//! Performance benchmarks for quality analysis and commits.
//!
//! Run with: `cargo bench --bench quality`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Evaluate 10k-node chain | <10ms | Iterative DFS, no recursion |
//! | Evaluate dense random graph | Linear in edges | One visit per edge |
//! | Engine apply | Dominated by snapshot copy | Full snapshot per version |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use graph_collab_kernel::{
    canonical::snapshot_fingerprint, CollaborationEngine, Edge, GraphId, GraphOperation, Node,
    OperationKind, QualityAnalyzer,
};

fn chain(n: usize) -> (Vec<Node>, Vec<Edge>) {
    let nodes = (0..n).map(|i| Node::new(format!("n{:06}", i), "chain")).collect();
    let edges = (1..n)
        .map(|i| Edge::new(format!("e{:06}", i), format!("n{:06}", i - 1), format!("n{:06}", i)))
        .collect();
    (nodes, edges)
}

/// Deterministic pseudo-random graph with `fanout` out-edges per node.
fn scattered(n: usize, fanout: usize) -> (Vec<Node>, Vec<Edge>) {
    let nodes = (0..n)
        .map(|i| Node::new(format!("n{:06}", i), "x").with_trust((i % 100) as f64 / 100.0))
        .collect();
    let mut edges = Vec::with_capacity(n * fanout);
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    for i in 0..n {
        for k in 0..fanout {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let target = (state % n as u64) as usize;
            edges.push(Edge::new(
                format!("e{:06}-{}", i, k),
                format!("n{:06}", i),
                format!("n{:06}", target),
            ));
        }
    }
    (nodes, edges)
}

fn bench_evaluate_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_chain");
    let analyzer = QualityAnalyzer::new();

    for n in [1_000usize, 10_000, 100_000] {
        let (nodes, edges) = chain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| analyzer.evaluate(black_box(&nodes), black_box(&edges)))
        });
    }

    group.finish();
}

fn bench_evaluate_scattered(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_scattered");
    let analyzer = QualityAnalyzer::new();

    for fanout in [1usize, 4, 16] {
        let (nodes, edges) = scattered(5_000, fanout);
        group.throughput(Throughput::Elements(edges.len() as u64));
        group.bench_with_input(BenchmarkId::new("fanout", fanout), &fanout, |b, _| {
            b.iter(|| analyzer.evaluate(black_box(&nodes), black_box(&edges)))
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let (nodes, edges) = scattered(5_000, 2);
    c.bench_function("snapshot_fingerprint_5k", |b| {
        b.iter(|| snapshot_fingerprint(black_box(&nodes), black_box(&edges)))
    });
}

fn bench_engine_apply(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    let mut group = c.benchmark_group("engine_apply");
    for base_size in [100usize, 1_000] {
        let engine = CollaborationEngine::in_memory();
        let g = GraphId::from("bench");
        let (nodes, edges) = chain(base_size);
        let mut version = rt.block_on(async {
            let base = engine.current_graph(&g).await.unwrap();
            let mut ops: Vec<GraphOperation> = Vec::new();
            for (i, node) in nodes.into_iter().enumerate() {
                ops.push(GraphOperation::new(OperationKind::AddNode(node), "bench", base.version + i as u64));
            }
            for edge in edges {
                let v = base.version + ops.len() as u64;
                ops.push(GraphOperation::new(OperationKind::AddEdge(edge), "bench", v));
            }
            engine.bulk_apply(&g, &ops).await.unwrap().version
        });

        let mut counter = 0u64;
        group.bench_with_input(BenchmarkId::new("base_nodes", base_size), &base_size, |b, _| {
            b.iter(|| {
                counter += 1;
                let op = GraphOperation::new(
                    OperationKind::AddNode(Node::new(format!("extra{}", counter), "x")),
                    "bench",
                    version,
                );
                version = rt.block_on(engine.apply(&g, &op)).unwrap().version;
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate_chain,
    bench_evaluate_scattered,
    bench_fingerprint,
    bench_engine_apply,
);
criterion_main!(benches);
