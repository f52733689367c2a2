//! Integration tests for the node graph: keyframes, arrays, invalidation and jobs.

use cinegraph_core::{RationalTime, TimeRange};
use cinegraph_node::nodes::math::{A_INPUT, B_INPUT};
use cinegraph_node::nodes::value_node::VALUE_INPUT;
use cinegraph_node::nodes::viewer::{LENGTH_INPUT, TEXTURE_INPUT};
use cinegraph_node::nodes::{MathNode, SolidGenerator, ValueNode, ViewerOutput};
use cinegraph_node::shader::inputs::COLOR;
use cinegraph_node::{
    GraphEvent, InputDefinition, Job, Keyframe, KeyframeType, Node, NodeGlobals, NodeId, NodeInput,
    NodeKind, NodeValue, NodeValueData, NodeValueRow, NodeValueTable, NodeValueType, Project,
    ShaderJob,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn project() -> (TempDir, Project) {
    let dir = TempDir::new().unwrap();
    let p = Project::new(dir.path());
    (dir, p)
}

fn keyframed_float(p: &mut Project, keys: &[(i64, f64, KeyframeType)]) -> NodeId {
    let node = p.add_node(Box::new(ValueNode::new(NodeValueType::Float)));
    let input = NodeInput::whole(node, VALUE_INPUT);
    p.set_input_is_keyframing(&input, true);
    for &(t, v, ty) in keys {
        p.insert_keyframe(
            &input,
            0,
            Keyframe::new(RationalTime::from_integer(t), NodeValueData::Float(v), ty),
        );
    }
    node
}

fn value_at(p: &Project, node: NodeId, time: RationalTime) -> f64 {
    p.node(node)
        .unwrap()
        .get_split_value_at_time_on_track(VALUE_INPUT, time, 0, -1)
        .to_f64()
}

#[test]
fn linear_keyframes_interpolate_and_clamp() {
    let (_d, mut p) = project();
    let node = keyframed_float(
        &mut p,
        &[(0, 0.0, KeyframeType::Linear), (10, 100.0, KeyframeType::Linear)],
    );
    assert!((value_at(&p, node, RationalTime::from_integer(5)) - 50.0).abs() < 1e-9);
    assert_eq!(value_at(&p, node, RationalTime::from_integer(-5)), 0.0);
    assert_eq!(value_at(&p, node, RationalTime::from_integer(15)), 100.0);
}

#[test]
fn hold_keyframe_keeps_value_until_next() {
    let (_d, mut p) = project();
    let node = keyframed_float(
        &mut p,
        &[(0, 3.0, KeyframeType::Hold), (4, 9.0, KeyframeType::Linear)],
    );
    for quarter in 0..16 {
        assert_eq!(value_at(&p, node, RationalTime::new(quarter, 4)), 3.0);
    }
    assert_eq!(value_at(&p, node, RationalTime::from_integer(4)), 9.0);
}

proptest! {
    #[test]
    fn linear_midpoint_is_lerp(
        v0 in -1000.0f64..1000.0,
        v1 in -1000.0f64..1000.0,
        start in -50i64..50,
        span in 1i64..40,
    ) {
        let (_d, mut p) = project();
        let end = start + span;
        let node = keyframed_float(
            &mut p,
            &[(start, v0, KeyframeType::Linear), (end, v1, KeyframeType::Linear)],
        );
        let mid = RationalTime::new(start * 2 + span, 2);
        let got = value_at(&p, node, mid);
        prop_assert!((got - (v0 + v1) * 0.5).abs() < 1e-6, "got {} for {} {}", got, v0, v1);
    }
}

// ── Arrays ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Mixer;

impl NodeKind for Mixer {
    fn id(&self) -> &'static str {
        "test.mixer"
    }

    fn name(&self) -> &str {
        "Mixer"
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![InputDefinition::of_type("levels_in", "Levels", NodeValueType::Float).array(0)]
    }

    fn value(&self, _: &Node, _: &NodeValueRow, _: &NodeGlobals, _: &mut NodeValueTable) {}

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}

fn levels(p: &Project, node: NodeId) -> Vec<NodeValueData> {
    let n = p.node(node).unwrap();
    (0..n.input_array_size("levels_in"))
        .map(|i| n.get_standard_value("levels_in", i as i32))
        .collect()
}

proptest! {
    #[test]
    fn array_insert_then_remove_restores_values(
        values in proptest::collection::vec(-10.0f64..10.0, 0..8),
        pick in 0usize..9,
    ) {
        let (_d, mut p) = project();
        let node = p.add_node(Box::new(Mixer));
        p.input_array_resize(node, "levels_in", values.len()).unwrap();
        for (i, v) in values.iter().enumerate() {
            p.set_standard_value(&NodeInput::new(node, "levels_in", i as i32), &NodeValueData::Float(*v));
        }
        let before = levels(&p, node);
        let index = pick % (values.len() + 1);

        p.input_array_insert(node, "levels_in", index).unwrap();
        prop_assert_eq!(levels(&p, node).len(), values.len() + 1);
        p.input_array_remove(node, "levels_in", index).unwrap();
        prop_assert_eq!(levels(&p, node), before);
    }
}

// ── Invalidation ────────────────────────────────────────────────

#[test]
fn invalidation_reaches_every_downstream_node_only() {
    let (_d, mut p) = project();
    let a = p.add_node(Box::new(ValueNode::new(NodeValueType::Float)));
    let b = p.add_node(Box::new(MathNode::default()));
    let c = p.add_node(Box::new(MathNode::default()));
    let d = p.add_node(Box::new(MathNode::default()));
    let e = p.add_node(Box::new(MathNode::default()));
    p.connect_edge(a, NodeInput::whole(b, A_INPUT)).unwrap();
    p.connect_edge(a, NodeInput::whole(c, B_INPUT)).unwrap();
    p.connect_edge(b, NodeInput::whole(d, A_INPUT)).unwrap();

    let rx = p.subscribe();
    let range = TimeRange::seconds(2, 7);
    p.invalidate_cache(a, range, VALUE_INPUT, -1);

    let mut hit = BTreeSet::new();
    for event in rx.try_iter() {
        if let GraphEvent::NodeInvalidated { node, range: r } = event {
            assert_eq!(r, range);
            hit.insert(node);
        }
    }
    assert_eq!(hit, BTreeSet::from([a, b, c, d]));
    assert!(!hit.contains(&e));
}

#[test]
fn invalidation_marks_downstream_viewer_cache() {
    let (_d, mut p) = project();
    let solid = p.add_node(Box::new(SolidGenerator));
    let viewer = p.add_node(Box::new(ViewerOutput));
    p.connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT)).unwrap();
    p.set_standard_value(
        &NodeInput::whole(viewer, LENGTH_INPUT),
        &NodeValueData::Rational(RationalTime::from_integer(10)),
    );

    let caches = std::sync::Arc::clone(p.node(viewer).unwrap().caches());
    caches.video.playback().validate(TimeRange::seconds(0, 10));
    p.invalidate_cache(solid, TimeRange::seconds(2, 3), COLOR, -1);

    assert!(caches.video.playback().has_invalidated_ranges(TimeRange::seconds(2, 3)));
    assert!(!caches.video.playback().has_invalidated_ranges(TimeRange::seconds(5, 10)));

    // Beyond the viewer's length nothing is cached, so nothing is invalidated.
    p.invalidate_cache(solid, TimeRange::seconds(20, 30), COLOR, -1);
    assert!(!caches.video.playback().has_invalidated_ranges(TimeRange::seconds(5, 10)));
}

// ── Jobs ────────────────────────────────────────────────────────

#[test]
fn shader_job_returns_row_values_unchanged() {
    let mut row = NodeValueRow::new();
    row.insert(
        "amount_in".into(),
        NodeValue::new(NodeValueType::Float, NodeValueData::Float(0.25), None).with_tag("x"),
    );
    row.insert(
        "label_in".into(),
        NodeValue::new(NodeValueType::Text, NodeValueData::Text("title".into()), Some(NodeId(4))),
    );
    row.insert(
        "when_in".into(),
        NodeValue::new(
            NodeValueType::Rational,
            NodeValueData::Rational(RationalTime::new(7, 3)),
            None,
        ),
    );

    let job = ShaderJob::from_row("org.cinegraph.test", &row);
    for (id, original) in &row {
        let got = job.get(id);
        assert_eq!(&got, original);
        assert_eq!(got.ty(), original.ty());
        assert_eq!(got.tag(), original.tag());
        assert_eq!(got.source(), original.source());
    }
}
