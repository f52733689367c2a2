//! Color space conversion of a texture.

use cinegraph_core::{ColorProcessor, ColorSpace};

use crate::input::{InputDefinition, InputFlags};
use crate::job::ColorTransformJob;
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::shader::inputs::TEXTURE;
use crate::texture::Texture;
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

pub const SOURCE_INPUT: &str = "source_in";
pub const DEST_INPUT: &str = "dest_in";

/// Converts `tex_in` from `source_in` to `dest_in`.
///
/// Unknown space names yield a null processor and the texture
/// passes through.
#[derive(Debug, Clone, Default)]
pub struct ColorTransformNode;

impl NodeKind for ColorTransformNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.color_transform"
    }

    fn name(&self) -> &str {
        "Color Transform"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Color
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        let space = |id: &str, name: &str, cs: ColorSpace| {
            InputDefinition::new(id, name, NodeValueType::Text, NodeValueData::Text(cs.name().into()))
                .with_flags(InputFlags::NOT_KEYFRAMABLE)
        };
        vec![
            InputDefinition::of_type(TEXTURE, "Input", NodeValueType::Texture),
            space(SOURCE_INPUT, "Source", ColorSpace::Srgb),
            space(DEST_INPUT, "Destination", ColorSpace::LinearSrgb),
        ]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        let Some(input) = row.get(TEXTURE).filter(|v| v.to_texture().is_some()) else {
            return;
        };
        let text = |id: &str| row.get(id).map(|v| v.to_text()).unwrap_or_default();
        let processor = ColorProcessor::create(&text(SOURCE_INPUT), &text(DEST_INPUT));
        if processor.is_null() {
            table.push(input.clone());
            return;
        }

        let params = input
            .to_texture()
            .map(|t| t.params().clone())
            .unwrap_or_default();
        let job = ColorTransformJob::new(input.clone(), processor);
        table.push_value(
            NodeValueType::Texture,
            NodeValueData::Texture(Texture::job(params, job)),
            Some(node.id()),
        );
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
