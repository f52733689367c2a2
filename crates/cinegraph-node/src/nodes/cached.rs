//! Disk-cached intermediate result.

use cinegraph_core::TimeRange;
use tracing::trace;

use crate::input::InputDefinition;
use crate::job::CacheJob;
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::shader::inputs::TEXTURE;
use crate::texture::Texture;
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

/// Serves frames from this node's own video cache when they are valid,
/// falling back to rendering `tex_in`.
#[derive(Debug, Clone, Default)]
pub struct CachedNode;

impl NodeKind for CachedNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.cached"
    }

    fn name(&self) -> &str {
        "Cache"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Composite
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![InputDefinition::of_type(TEXTURE, "Input", NodeValueType::Texture)]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, globals: &NodeGlobals, table: &mut NodeValueTable) {
        let Some(input) = row.get(TEXTURE) else {
            return;
        };
        let time = globals.time.in_point();
        let cached = node
            .are_caches_enabled()
            .then(|| node.caches().video.valid_cache_filename(time))
            .flatten();

        match cached {
            Some(path) => {
                trace!(node = %node.id(), path = %path.display(), "Using cached frame");
                let params = input
                    .to_texture()
                    .map(|t| t.params().clone())
                    .unwrap_or_else(|| globals.video_params.clone());
                let job = CacheJob::new(path, input.clone());
                table.push_value(
                    NodeValueType::Texture,
                    NodeValueData::Texture(Texture::job(params, job)),
                    Some(node.id()),
                );
            }
            None => {
                super::pass_through(row, TEXTURE, table);
            }
        }
    }

    fn video_cache_range(&self, _: &Node) -> TimeRange {
        TimeRange::ALL
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
