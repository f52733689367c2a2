//! Built-in node kinds.

pub mod cached;
pub mod color_transform;
pub mod math;
pub mod media_input;
pub mod merge;
pub mod solid;
pub mod time_offset;
pub mod value_node;
pub mod viewer;
pub mod volume;

pub use cached::CachedNode;
pub use color_transform::ColorTransformNode;
pub use math::{MathNode, MathOperation};
pub use media_input::MediaInput;
pub use merge::MergeNode;
pub use solid::SolidGenerator;
pub use time_offset::TimeOffsetNode;
pub use value_node::ValueNode;
pub use viewer::ViewerOutput;
pub use volume::VolumeNode;

use crate::value::{NodeValue, NodeValueRow, NodeValueTable};

/// Push `input`'s row value back onto `table` if it holds anything.
pub(crate) fn pass_through(row: &NodeValueRow, input: &str, table: &mut NodeValueTable) -> bool {
    match row.get(input).filter(|v| !v.data().is_none()) {
        Some(v) => {
            table.push(NodeValue::clone(v));
            true
        }
        None => false,
    }
}
