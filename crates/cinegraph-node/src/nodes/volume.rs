//! Gain applied to samples.

use crate::input::InputDefinition;
use crate::job::{AudioJob, AudioSource, SampleJob};
use crate::node::{Node, NodeCategory, NodeGlobals, NodeKind};
use crate::value::{NodeValueData, NodeValueRow, NodeValueTable, NodeValueType};
use cinegraph_core::SampleBuffer;

pub const SAMPLES_INPUT: &str = "samples_in";
pub const VOLUME_INPUT: &str = "volume_in";

/// Multiplies every sample by `volume_in`.
///
/// A constant volume is applied to the whole buffer at once; a keyframed or
/// connected volume becomes a per-sample job.
#[derive(Debug, Clone, Default)]
pub struct VolumeNode;

impl NodeKind for VolumeNode {
    fn id(&self) -> &'static str {
        "org.cinegraph.volume"
    }

    fn name(&self) -> &str {
        "Volume"
    }

    fn category(&self) -> NodeCategory {
        NodeCategory::Audio
    }

    fn inputs(&self) -> Vec<InputDefinition> {
        vec![
            InputDefinition::of_type(SAMPLES_INPUT, "Samples", NodeValueType::Samples),
            InputDefinition::new(VOLUME_INPUT, "Volume", NodeValueType::Float, NodeValueData::Float(1.0)),
        ]
    }

    fn value(&self, node: &Node, row: &NodeValueRow, globals: &NodeGlobals, table: &mut NodeValueTable) {
        let Some(samples) = row.get(SAMPLES_INPUT).and_then(|v| v.to_samples()) else {
            return;
        };

        let varying = node.is_input_keyframing(VOLUME_INPUT, -1) || node.is_input_connected(VOLUME_INPUT, -1);
        let data = if varying {
            let job = SampleJob::new(globals.time, SAMPLES_INPUT, row);
            AudioSource::job(AudioJob::Sample(job))
        } else {
            let volume = row.get(VOLUME_INPUT).map_or(1.0, |v| v.to_f64()) as f32;
            if (volume - 1.0).abs() < f32::EPSILON {
                AudioSource::Buffer(samples)
            } else {
                let mut out = SampleBuffer::clone(&samples);
                out.transform_volume(volume);
                AudioSource::buffer(out)
            }
        };
        table.push_value(NodeValueType::Samples, NodeValueData::Samples(data), Some(node.id()));
    }

    fn process_samples(
        &self,
        _: &Node,
        values: &NodeValueRow,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        index: usize,
    ) {
        let volume = values.get(VOLUME_INPUT).map_or(1.0, |v| v.to_f64()) as f32;
        for c in 0..input.channel_count() {
            let Some(&s) = input.channel(c).get(index) else {
                continue;
            };
            if let Some(slot) = output.channel_mut(c).and_then(|ch| ch.get_mut(index)) {
                *slot = s * volume;
            }
        }
    }

    fn clone_box(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }
}
