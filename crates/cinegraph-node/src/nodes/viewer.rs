//! Sequence output: the node renders and caches are requested from.

use cinegraph_core::{AudioParams, RationalTime, TimeRange, VideoParams};
use tracing::debug;

use crate::input::{InputDefinition, InputFlags};
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::value::{NodeValueRow, NodeValueTable, NodeValueType};

pub const TEXTURE_INPUT: &str = "texture_in";
pub const SAMPLES_INPUT: &str = "samples_in";
pub const VIDEO_PARAMS_INPUT: &str = "video_params_in";
pub const AUDIO_PARAMS_INPUT: &str = "audio_params_in";
pub const LENGTH_INPUT: &str = "length_in";

/// Passes its texture and samples through and owns the playback caches
/// for the range `[0, length)`.
#[derive(Debug, Clone, Default)]
pub struct ViewerOutput;

impl ViewerOutput {
    pub fn video_params(node: &Node) -> VideoParams {
        node.get_standard_value(VIDEO_PARAMS_INPUT, -1)
            .to_video_params()
            .unwrap_or_default()
    }

    pub fn audio_params(node: &Node) -> AudioParams {
        node.get_standard_value(AUDIO_PARAMS_INPUT, -1)
            .to_audio_params()
            .unwrap_or_default()
    }

    pub fn length(node: &Node) -> RationalTime {
        node.get_standard_value(LENGTH_INPUT, -1).to_rational()
    }

    fn cache_range(node: &Node) -> TimeRange {
        let length = Self::length(node);
        if length > RationalTime::ZERO {
            TimeRange::new(RationalTime::ZERO, length)
        } else {
            TimeRange::EMPTY
        }
    }
}

impl NodeKind for ViewerOutput {
    fn id(&self) -> &'static str {
        "org.cinegraph.viewer"
    }

    fn name(&self) -> &str {
        "Viewer"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Output
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        let settings = InputFlags::NOT_CONNECTABLE | InputFlags::NOT_KEYFRAMABLE;
        vec![
            InputDefinition::of_type(TEXTURE_INPUT, "Texture", NodeValueType::Texture),
            InputDefinition::of_type(SAMPLES_INPUT, "Samples", NodeValueType::Samples),
            InputDefinition::of_type(VIDEO_PARAMS_INPUT, "Video Parameters", NodeValueType::VideoParams)
                .with_flags(settings),
            InputDefinition::of_type(AUDIO_PARAMS_INPUT, "Audio Parameters", NodeValueType::AudioParams)
                .with_flags(settings),
            InputDefinition::of_type(LENGTH_INPUT, "Length", NodeValueType::Rational)
                .with_flags(settings | InputFlags::IGNORE_INVALIDATIONS),
        ]
    }

    fn value(&self, _: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
        super::pass_through(row, SAMPLES_INPUT, table);
        super::pass_through(row, TEXTURE_INPUT, table);
    }

    fn video_cache_range(&self, node: &Node) -> TimeRange {
        Self::cache_range(node)
    }

    fn audio_cache_range(&self, node: &Node) -> TimeRange {
        Self::cache_range(node)
    }

    fn input_value_changed(&self, node: &Node, input: &str, _: i32) {
        match input {
            VIDEO_PARAMS_INPUT => {
                let params = Self::video_params(node);
                debug!(node = %node.id(), timebase = %params.timebase, "Viewer video params changed");
                if params.timebase > RationalTime::ZERO {
                    node.caches().video.set_timebase(params.timebase);
                }
            }
            AUDIO_PARAMS_INPUT => {
                let params = Self::audio_params(node);
                node.caches().audio.set_parameters(params);
                node.caches().waveform.set_parameters(params);
            }
            _ => {}
        }
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::NodeInput;
    use crate::project::Project;
    use crate::value::NodeValueData;
    use tempfile::TempDir;

    #[test]
    fn test_params_update_cache_timebase() {
        let dir = TempDir::new().unwrap();
        let mut p = Project::new(dir.path());
        let v = p.add_node(Box::new(ViewerOutput));
        let mut params = VideoParams::default();
        params.timebase = RationalTime::new(1, 24);
        p.set_standard_value(&NodeInput::whole(v, VIDEO_PARAMS_INPUT), &NodeValueData::VideoParams(params));

        let node = p.node(v).unwrap();
        assert_eq!(node.caches().video.timebase(), RationalTime::new(1, 24));
    }

    #[test]
    fn test_cache_range_follows_length() {
        let dir = TempDir::new().unwrap();
        let mut p = Project::new(dir.path());
        let v = p.add_node(Box::new(ViewerOutput));
        assert!(p.node(v).unwrap().video_cache_range().is_empty());

        p.set_standard_value(
            &NodeInput::whole(v, LENGTH_INPUT),
            &NodeValueData::Rational(RationalTime::from_integer(10)),
        );
        assert_eq!(p.node(v).unwrap().video_cache_range(), TimeRange::seconds(0, 10));
    }
}
