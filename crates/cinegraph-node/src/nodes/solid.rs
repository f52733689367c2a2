//! Solid color generator.

use cinegraph_core::{Color, Frame};

use crate::input::InputDefinition;
use crate::job::{GenerateJob, Job};
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::shader::inputs::COLOR;
use crate::texture::Texture;
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

#[derive(Debug, Clone, Default)]
pub struct SolidGenerator;

impl NodeKind for SolidGenerator {
    fn id(&self) -> &'static str {
        "org.cinegraph.solid"
    }

    fn name(&self) -> &str {
        "Solid"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Generator
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![InputDefinition::new(
            COLOR,
            "Color",
            NodeValueType::Color,
            NodeValueData::Color(Color::BLACK),
        )]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, globals: &NodeGlobals, table: &mut NodeValueTable) {
        let job = GenerateJob::from_row(row);
        table.push_value(
            NodeValueType::Texture,
            NodeValueData::Texture(Texture::job(globals.video_params, job)),
            Some(node.id()),
        );
    }

    fn generate_frame(&self, _: &Node, job: &GenerateJob, frame: &mut Frame) {
        frame.fill(job.get(COLOR).to_color());
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
