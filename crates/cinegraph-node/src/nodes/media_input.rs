//! Footage read from a file through a decoder.

use cinegraph_core::RationalTime;

use crate::input::{InputDefinition, InputFlags};
use crate::job::{AudioJob, AudioSource, FootageJob, LoopMode};
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::texture::Texture;
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};

pub const FILENAME_INPUT: &str = "filename_in";
pub const DECODER_INPUT: &str = "decoder_in";
pub const STREAM_INPUT: &str = "stream_in";
pub const LENGTH_INPUT: &str = "length_in";
pub const LOOP_INPUT: &str = "loop_in";

/// Decoder id used when `decoder_in` is left empty.
pub const DEFAULT_DECODER: &str = "pattern";

/// Emits a footage job for video and one for audio.
#[derive(Debug, Clone, Default)]
pub struct MediaInput;

impl MediaInput {
    fn loop_mode(index: i64) -> LoopMode {
        match index {
            1 => LoopMode::Loop,
            2 => LoopMode::Clamp,
            _ => LoopMode::Off,
        }
    }

    fn footage(row: &NodeValueRow, globals: &NodeGlobals) -> Option<FootageJob> {
        let text = |id: &str| row.get(id).map(|v| v.to_text()).unwrap_or_default();
        let filename = text(FILENAME_INPUT);
        if filename.is_empty() {
            return None;
        }
        let mut decoder = text(DECODER_INPUT);
        if decoder.is_empty() {
            decoder = DEFAULT_DECODER.to_string();
        }

        let mut job = FootageJob::new(globals.time, decoder, filename);
        job.stream_index = row.get(STREAM_INPUT).map_or(0, |v| v.to_i64() as i32);
        job.length = row
            .get(LENGTH_INPUT)
            .map_or(RationalTime::ZERO, |v| v.to_rational());
        job.loop_mode = match row.get(LOOP_INPUT).map_or(0, |v| v.to_i64()) {
            0 => globals.loop_mode,
            i => Self::loop_mode(i),
        };
        job.video_params = globals.video_params.clone();
        job.audio_params = globals.audio_params;
        Some(job)
    }
}

impl NodeKind for MediaInput {
    fn id(&self) -> &'static str {
        "org.cinegraph.media_input"
    }

    fn name(&self) -> &str {
        "Media"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Input
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        let fixed = InputFlags::NOT_CONNECTABLE | InputFlags::NOT_KEYFRAMABLE;
        vec![
            InputDefinition::of_type(FILENAME_INPUT, "File", NodeValueType::File).with_flags(fixed),
            InputDefinition::of_type(DECODER_INPUT, "Decoder", NodeValueType::Text).with_flags(fixed),
            InputDefinition::of_type(STREAM_INPUT, "Stream", NodeValueType::Int).with_flags(fixed),
            InputDefinition::of_type(LENGTH_INPUT, "Length", NodeValueType::Rational).with_flags(fixed),
            InputDefinition::of_type(LOOP_INPUT, "Loop", NodeValueType::Combo)
                .combo(&["Default", "Loop", "Clamp"])
                .with_flags(fixed),
        ]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, globals: &NodeGlobals, table: &mut NodeValueTable) {
        let Some(job) = Self::footage(row, globals) else {
            return;
        };
        table.push_value(
            NodeValueType::Samples,
            NodeValueData::Samples(AudioSource::job(AudioJob::Footage(job.clone()))),
            Some(node.id()),
        );
        table.push_value(
            NodeValueType::Texture,
            NodeValueData::Texture(Texture::job(globals.video_params.clone(), job)),
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
    use crate::value::NodeValue;
    use cinegraph_core::{AudioParams, TimeRange, VideoParams};

    fn row(filename: &str, loop_index: i64) -> NodeValueRow {
        let mut row = NodeValueRow::new();
        row.insert(
            FILENAME_INPUT.into(),
            NodeValue::new(NodeValueType::File, NodeValueData::Text(filename.into()), None),
        );
        row.insert(
            LOOP_INPUT.into(),
            NodeValue::new(NodeValueType::Combo, NodeValueData::Int(loop_index), None),
        );
        row
    }

    #[test]
    fn test_footage_job_from_row() {
        let globals = NodeGlobals::new(
            VideoParams::default(),
            AudioParams::default(),
            TimeRange::seconds(1, 2),
        );
        assert!(MediaInput::footage(&row("", 0), &globals).is_none());

        let job = MediaInput::footage(&row("clip.mov", 2), &globals).unwrap();
        assert_eq!(job.decoder_id, DEFAULT_DECODER);
        assert_eq!(job.loop_mode, LoopMode::Clamp);
        assert_eq!(job.time, TimeRange::seconds(1, 2));
    }
}
