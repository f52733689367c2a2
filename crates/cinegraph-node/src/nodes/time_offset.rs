//! Shift the time seen by upstream nodes.

use cinegraph_core::{RationalTime, TimeRange};

use crate::input::InputDefinition;
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::value::{NodeValueRow, NodeValueTable, NodeValueType};

pub const INPUT: &str = "input_in";
pub const OFFSET_INPUT: &str = "offset_in";

/// Upstream is evaluated `offset` later than this node's own time.
#[derive(Debug, Clone, Default)]
pub struct TimeOffsetNode;

impl TimeOffsetNode {
    fn offset(node: &Node, at: RationalTime) -> RationalTime {
        node.get_value_at_time(OFFSET_INPUT, at, -1).to_rational()
    }
}

impl NodeKind for TimeOffsetNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.time_offset"
    }

    fn name(&self) -> &str {
        "Time Offset"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Time
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![
            InputDefinition::of_type(INPUT, "Input", NodeValueType::None),
            InputDefinition::of_type(OFFSET_INPUT, "Offset", NodeValueType::Rational),
        ]
    }

    fn value(&self, _: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        super::pass_through(row, INPUT, table);
    }

    fn input_time_adjustment(&self, node: &Node, input: &str, _: i32, range: TimeRange) -> TimeRange {
        if input == INPUT {
            range + Self::offset(node, range.in_point())
        } else {
            range
        }
    }

    fn output_time_adjustment(&self, node: &Node, input: &str, _: i32, range: TimeRange) -> TimeRange {
        if input == INPUT {
            range - Self::offset(node, range.in_point())
        } else {
            range
        }
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
