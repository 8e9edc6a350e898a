use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rust_vlzero::core::GameRng;
use rust_vlzero::mcts::{Child, Node};

/// Expanded node with `width` children carrying mixed priors and visit
/// statistics.
fn make_node(width: usize) -> Node {
    let node = Node::new(0);
    assert!(node.acquire_expand());
    let children = (0..width)
        .map(|a| {
            let child = Node::new(a as u64 + 1);
            let visits = (a as u32 % 17) + 1;
            child.add_visits(visits);
            child.add_values((a as f32).sin() * visits as f32, 0.0);
            Child::new(a, 1.0 / width as f32, child)
        })
        .collect();
    node.expand(children);
    node.add_visits(10_000);
    node.add_values(0.0, 1_000.0);
    node
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_select");
    for width in [9, 81, 362] {
        let node = make_node(width);
        let mut rng = GameRng::new(0);
        group.bench_with_input(BenchmarkId::from_parameter(width), &node, |b, node| {
            b.iter(|| black_box(node.select(black_box(1.25), 1e-3, &mut rng)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_select);
criterion_main!(benches);
