//! Benchmarks for keyframe evaluation and graph traversal.
//!
//! Run with: cargo bench -p cinegraph-node

use cinegraph_core::{RationalTime, TimeRange};
use cinegraph_node::nodes::{MathNode, ValueNode};
use cinegraph_node::{
    Keyframe, KeyframeTrack, KeyframeType, NodeInput, NodeTraverser, NodeValueData,
    NodeValueType, NullProcessor, Project,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn track(ty: KeyframeType) -> KeyframeTrack {
    let mut t = KeyframeTrack::new();
    for i in 0..64 {
        t.insert(Keyframe::new(
            RationalTime::from_integer(i),
            NodeValueData::Float((i * i) as f64),
            ty,
        ));
    }
    t
}

fn bench_keyframe_evaluate(c: &mut Criterion) {
    let linear = track(KeyframeType::Linear);
    let mut bezier = track(KeyframeType::Linear);
    for i in 0..bezier.len() {
        bezier.set_type(i, KeyframeType::Bezier);
    }
    let at = RationalTime::new(6301, 200);

    c.bench_function("keyframe_linear_64", |b| {
        b.iter(|| linear.evaluate(black_box(at), true));
    });

    c.bench_function("keyframe_bezier_64", |b| {
        b.iter(|| bezier.evaluate(black_box(at), true));
    });
}

fn bench_traverse_math_chain(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let mut p = Project::new(dir.path());
    let mut prev = p.add_node(Box::new(ValueNode::new(NodeValueType::Float)));
    p.set_standard_value(&NodeInput::whole(prev, "value_in"), &NodeValueData::Float(1.0));
    for _ in 0..32 {
        let m = p.add_node(Box::new(MathNode));
        p.connect_edge(prev, NodeInput::whole(m, "a_in")).unwrap();
        prev = m;
    }

    c.bench_function("traverse_math_chain_32", |b| {
        b.iter(|| {
            let mut proc = NullProcessor;
            let mut t = NodeTraverser::new(&p, &mut proc);
            black_box(t.generate_table(prev, TimeRange::seconds(0, 1)))
        });
    });
}

criterion_group!(benches, bench_keyframe_evaluate, bench_traverse_math_chain);
criterion_main!(benches);
