//! Typed constant.

use crate::input::InputDefinition;
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::value::{NodeValueRow, NodeValueTable, NodeValueType};

pub const VALUE_INPUT: &str = "value_in";

/// Outputs the (possibly keyframed) value of its single input.
#[derive(Debug, Clone)]
pub struct ValueNode {
    ty: NodeValueType,
}

impl ValueNode {
    pub fn new(ty: NodeValueType) -> Self {
        Self { ty }
    }

    pub fn value_type(&self) -> NodeValueType {
        self.ty
    }
}

impl Default for ValueNode {
    fn default() -> Self {
        Self::new(NodeValueType::Float)
    }
}

impl NodeKind for ValueNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.value"
    }

    fn name(&self) -> &str {
        "Value"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Input
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![InputDefinition::of_type(VALUE_INPUT, "Value", self.ty)]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        let data = row
            .get(VALUE_INPUT)
            .map(|v| v.data().clone())
            .unwrap_or_else(|| self.ty.default_data());
        table.push_value(self.ty, data, Some(node.id()));
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
