//! Arithmetic on two numbers.

use serde::{Deserialize, Serialize};

use crate::input::{InputDefinition, InputFlags};
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

pub const METHOD_INPUT: &str = "method_in";
pub const A_INPUT: &str = "a_in";
pub const B_INPUT: &str = "b_in";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MathOperation {
    #[default]
    Add,
    Subtract,
    Multiply,
}

impl MathOperation {
    /// Combo index stored in `method_in`.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => Self::Subtract,
            2 => Self::Multiply,
            _ => Self::Add,
        }
    }

    pub fn index(self) -> i64 {
        match self {
            Self::Add => 0,
            Self::Subtract => 1,
            Self::Multiply => 2,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MathNode;

impl NodeKind for MathNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.math"
    }

    fn name(&self) -> &str {
        "Math"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Math
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![
            InputDefinition::of_type(METHOD_INPUT, "Method", NodeValueType::Combo)
                .combo(&["Add", "Subtract", "Multiply"])
                .with_flags(InputFlags::NOT_CONNECTABLE),
            InputDefinition::of_type(A_INPUT, "Value", NodeValueType::Float),
            InputDefinition::of_type(B_INPUT, "Value", NodeValueType::Float),
        ]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        let get = |id: &str| row.get(id).map_or(0.0, |v| v.to_f64());
        let op = MathOperation::from_index(row.get(METHOD_INPUT).map_or(0, |v| v.to_i64()));
        table.push_value(
            NodeValueType::Float,
            NodeValueData::Float(op.apply(get(A_INPUT), get(B_INPUT))),
            Some(node.id()),
        );
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trips_combo_index() {
        for op in [MathOperation::Add, MathOperation::Subtract, MathOperation::Multiply] {
            assert_eq!(MathOperation::from_index(op.index()), op);
        }
        assert_eq!(MathOperation::from_index(99), MathOperation::Add);
        assert_eq!(MathOperation::Subtract.apply(5.0, 2.0), 3.0);
    }
}
