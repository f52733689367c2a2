//! Alpha-over compositing of two textures.

use crate::input::InputDefinition;
use crate::job::ShaderJob;
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::shader::inputs::{BASE, BLEND};
use crate::shader::{BuiltinShader, ShaderCode, ShaderRequest};
use crate::texture::Texture;
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

/// Places `blend_in` over `base_in`.
///
/// With only one side connected the other passes through untouched.
#[derive(Debug, Clone, Default)]
pub struct MergeNode;

impl NodeKind for MergeNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.merge"
    }

    fn name(&self) -> &str {
        "Merge"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Composite
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![
            InputDefinition::of_type(BASE, "Base", NodeValueType::Texture),
            InputDefinition::of_type(BLEND, "Blend", NodeValueType::Texture),
        ]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        let base = row.get(BASE).and_then(|v| v.to_texture());
        let blend = row.get(BLEND).and_then(|v| v.to_texture());

        let out = match (base, blend) {
            (Some(base), Some(_)) => {
                let job = ShaderJob::builtin(BuiltinShader::AlphaOver, row);
                Texture::job(base.params().clone(), job)
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return,
        };
        table.push_value(NodeValueType::Texture, NodeValueData::Texture(out), Some(node.id()));
    }

    fn shader_code(&self, _: &ShaderRequest) -> ShaderCode {
        ShaderCode::builtin(BuiltinShader::AlphaOver)
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
