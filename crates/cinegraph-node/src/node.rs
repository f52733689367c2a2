//! Nodes: kind behavior, inputs, connections and time-indexed value queries.
//!
//! A [`Node`] owns its editable state. Anything that must ripple through the
//! graph (connections, invalidation, links) goes through
//! [`Project`](crate::project::Project), which holds every node by id.

use cinegraph_cache::{AudioPlaybackCache, AudioWaveformCache, FrameHashCache, ThumbnailCache};
use cinegraph_core::{
    AudioParams, Color, Frame, RationalTime, SampleBuffer, TimeRange, VideoParams,
};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::input::{Input, InputDefinition, InputFlags, InputImmediate, NodeInput, ValueHint};
use crate::job::{GenerateJob, LoopMode};
use crate::keyframe::{Keyframe, KeyframeTrack, KeyframeType};
use crate::shader::{ShaderCode, ShaderRequest};
use crate::value::{
    combine_track_values_into_normal_value, NodeValueData, NodeValueRow, NodeValueTable,
    NodeValueType, SplitValue,
};

/// Input present on every node; a disabled node passes its inputs through.
pub const ENABLED_INPUT: &str = "enabled_in";

// ── Identity ────────────────────────────────────────────────────

/// Handle of a node inside a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeCategory {
    Generator,
    Input,
    Output,
    Math,
    Color,
    Time,
    Audio,
    Composite,
    Unknown,
}

// ── Evaluation context ──────────────────────────────────────────

/// Render-wide parameters visible to every node during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGlobals {
    pub video_params: VideoParams,
    pub audio_params: AudioParams,
    pub time: TimeRange,
    pub loop_mode: LoopMode,
}

impl NodeGlobals {
    pub fn new(video_params: VideoParams, audio_params: AudioParams, time: TimeRange) -> Self {
        Self {
            video_params,
            audio_params,
            time,
            loop_mode: LoopMode::Off,
        }
    }
}

/// Behavior of a node type.
///
/// Kinds are stateless apart from construction parameters; all editable
/// state lives on the [`Node`] passed to each call.
pub trait NodeKind: Send + Sync + fmt::Debug {
    /// Stable type id used by the factory.
    fn id(&self) -> &'static str;

    fn name(&self) -> &str;

    fn category(&self) -> NodeCategory {
        NodeCategory::Unknown
    }

    /// Inputs created on construction, in evaluation order.
    fn inputs(&self) -> Vec<InputDefinition>;

    /// Push this node's output values for the evaluated `row`.
    fn value(
        &self,
        node: &Node,
        row: &NodeValueRow,
        globals: &NodeGlobals,
        table: &mut NodeValueTable,
    );

    /// Map a range requested of this node onto the range requested of `input`.
    fn input_time_adjustment(
        &self,
        _node: &Node,
        _input: &str,
        _element: i32,
        range: TimeRange,
    ) -> TimeRange {
        range
    }

    /// Map a range on `input` onto this node's output time.
    fn output_time_adjustment(
        &self,
        _node: &Node,
        _input: &str,
        _element: i32,
        range: TimeRange,
    ) -> TimeRange {
        range
    }

    fn shader_code(&self, _request: &ShaderRequest) -> ShaderCode {
        ShaderCode::default()
    }

    /// Write sample `index` of `output` from the same sample of `input`.
    fn process_samples(
        &self,
        _node: &Node,
        _values: &NodeValueRow,
        _input: &SampleBuffer,
        _output: &mut SampleBuffer,
        _index: usize,
    ) {
    }

    fn generate_frame(&self, _node: &Node, _job: &GenerateJob, _frame: &mut Frame) {}

    /// Output time span covered by this node's video cache.
    fn video_cache_range(&self, _node: &Node) -> TimeRange {
        TimeRange::EMPTY
    }

    fn audio_cache_range(&self, _node: &Node) -> TimeRange {
        TimeRange::EMPTY
    }

    /// Called after a stored value or connection of `input` changed.
    fn input_value_changed(&self, _node: &Node, _input: &str, _element: i32) {}

    fn clone_box(&self) -> Box<dyn NodeKind>;
}

// ── Caches ──────────────────────────────────────────────────────

/// The persistent caches attached to a node.
///
/// Shared between a node and its render-side copy.
pub struct NodeCaches {
    pub video: FrameHashCache,
    pub thumbnail: ThumbnailCache,
    pub audio: AudioPlaybackCache,
    pub waveform: AudioWaveformCache,
}

impl NodeCaches {
    pub fn new(dir: &Path, timebase: RationalTime, audio_segment_secs: u64) -> Self {
        Self {
            video: FrameHashCache::new(dir, timebase),
            thumbnail: FrameHashCache::new_thumbnail(dir),
            audio: AudioPlaybackCache::new(dir, audio_segment_secs),
            waveform: AudioWaveformCache::new(dir),
        }
    }
}

impl fmt::Debug for NodeCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCaches")
            .field("video", &self.video.playback().uuid())
            .field("audio", &self.audio.playback().uuid())
            .finish()
    }
}

// ── Node ────────────────────────────────────────────────────────

pub struct Node {
    id: NodeId,
    kind: Box<dyn NodeKind>,
    label: String,
    override_color: Option<Color>,
    pub(crate) links: BTreeSet<NodeId>,
    context_positions: HashMap<NodeId, DVec2>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) input_connections: BTreeMap<(String, i32), NodeId>,
    pub(crate) output_connections: Vec<NodeInput>,
    pub(crate) value_hints: HashMap<(String, i32), ValueHint>,
    caches: Arc<NodeCaches>,
    caches_enabled: bool,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone_box(),
            label: self.label.clone(),
            override_color: self.override_color,
            links: self.links.clone(),
            context_positions: self.context_positions.clone(),
            inputs: self.inputs.clone(),
            input_connections: self.input_connections.clone(),
            output_connections: self.output_connections.clone(),
            value_hints: self.value_hints.clone(),
            caches: Arc::clone(&self.caches),
            caches_enabled: self.caches_enabled,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind.id())
            .field("label", &self.label)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

impl Node {
    pub fn new(id: NodeId, kind: Box<dyn NodeKind>, caches: Arc<NodeCaches>) -> Self {
        let enabled = InputDefinition::new(
            ENABLED_INPUT,
            "Enabled",
            NodeValueType::Boolean,
            NodeValueData::Boolean(true),
        )
        .with_flags(InputFlags::NOT_CONNECTABLE | InputFlags::NOT_KEYFRAMABLE);

        let inputs = std::iter::once(enabled)
            .chain(kind.inputs())
            .map(Input::new)
            .collect();

        Self {
            id,
            kind,
            label: String::new(),
            override_color: None,
            links: BTreeSet::new(),
            context_positions: HashMap::new(),
            inputs,
            input_connections: BTreeMap::new(),
            output_connections: Vec::new(),
            value_hints: HashMap::new(),
            caches,
            caches_enabled: true,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    pub fn kind_id(&self) -> &'static str {
        self.kind.id()
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn category(&self) -> NodeCategory {
        self.kind.category()
    }

    /// The label, or the kind's name when unlabelled.
    pub fn label_or_name(&self) -> &str {
        if self.label.is_empty() {
            self.kind.name()
        } else {
            &self.label
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn override_color(&self) -> Option<Color> {
        self.override_color
    }

    pub fn set_override_color(&mut self, color: Option<Color>) {
        self.override_color = color;
    }

    pub fn links(&self) -> &BTreeSet<NodeId> {
        &self.links
    }

    pub fn is_linked_to(&self, other: NodeId) -> bool {
        self.links.contains(&other)
    }

    /// Position of this node when shown inside `context`.
    pub fn context_position(&self, context: NodeId) -> Option<DVec2> {
        self.context_positions.get(&context).copied()
    }

    pub fn set_context_position(&mut self, context: NodeId, pos: DVec2) {
        self.context_positions.insert(context, pos);
    }

    pub fn remove_context_position(&mut self, context: NodeId) {
        self.context_positions.remove(&context);
    }

    pub fn caches(&self) -> &Arc<NodeCaches> {
        &self.caches
    }

    pub fn are_caches_enabled(&self) -> bool {
        self.caches_enabled
    }

    pub fn set_caches_enabled(&mut self, e: bool) {
        self.caches_enabled = e;
    }

    pub fn is_enabled(&self) -> bool {
        self.get_standard_value(ENABLED_INPUT, -1).to_bool()
    }

    pub fn video_cache_range(&self) -> TimeRange {
        self.kind.video_cache_range(self)
    }

    pub fn audio_cache_range(&self) -> TimeRange {
        self.kind.audio_cache_range(self)
    }

    // ── Input definitions ───────────────────────────────────────

    pub(crate) fn input(&self, id: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.def.id == id)
    }

    pub(crate) fn input_mut(&mut self, id: &str) -> Option<&mut Input> {
        self.inputs.iter_mut().find(|i| i.def.id == id)
    }

    /// Declared inputs in evaluation order.
    pub fn inputs(&self) -> impl Iterator<Item = &InputDefinition> {
        self.inputs.iter().map(|i| &i.def)
    }

    pub fn input_ids(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.def.id.clone()).collect()
    }

    pub fn has_input(&self, id: &str) -> bool {
        self.input(id).is_some()
    }

    pub fn input_definition(&self, id: &str) -> Option<&InputDefinition> {
        self.input(id).map(|i| &i.def)
    }

    pub fn input_type(&self, id: &str) -> NodeValueType {
        match self.input(id) {
            Some(i) => i.def.ty,
            None => {
                self.report_invalid_input("get type of", id, -1);
                NodeValueType::None
            }
        }
    }

    pub fn input_flags(&self, id: &str) -> InputFlags {
        self.input(id).map_or(InputFlags::NORMAL, |i| i.def.flags)
    }

    pub fn input_default_value(&self, id: &str) -> NodeValueData {
        self.input(id)
            .map_or(NodeValueData::None, |i| i.def.default.clone())
    }

    pub fn is_input_connectable(&self, id: &str) -> bool {
        self.input(id)
            .is_some_and(|i| !i.def.flags.contains(InputFlags::NOT_CONNECTABLE))
    }

    pub fn is_input_keyframable(&self, id: &str) -> bool {
        self.input(id)
            .is_some_and(|i| !i.def.flags.contains(InputFlags::NOT_KEYFRAMABLE))
    }

    pub fn input_is_array(&self, id: &str) -> bool {
        self.input(id).is_some_and(Input::is_array)
    }

    pub fn input_array_size(&self, id: &str) -> usize {
        self.input(id).map_or(0, |i| i.array_size)
    }

    pub fn is_valid_element(&self, id: &str, element: i32) -> bool {
        self.input(id).is_some_and(|i| i.is_valid_element(element))
    }

    pub fn is_valid_input(&self, input: &NodeInput) -> bool {
        input.node == self.id && self.is_valid_element(&input.input, input.element)
    }

    /// Log a query against an input or element that does not exist.
    pub fn report_invalid_input(&self, context: &str, id: &str, element: i32) {
        warn!(
            node = %self.id,
            kind = self.kind.id(),
            "Invalid input: tried to {} {} element {}",
            context,
            id,
            element
        );
    }

    // ── Stored values ───────────────────────────────────────────

    /// Immediate of a valid element, or `None` after reporting.
    pub fn input_immediate(&self, id: &str, element: i32) -> Option<&InputImmediate> {
        match self.input(id) {
            Some(input) if input.is_valid_element(element) => input.immediate(element),
            _ => {
                self.report_invalid_input("read", id, element);
                None
            }
        }
    }

    pub fn is_input_keyframing(&self, id: &str, element: i32) -> bool {
        self.input_immediate(id, element)
            .is_some_and(InputImmediate::is_keyframing)
    }

    pub fn get_standard_value(&self, id: &str, element: i32) -> NodeValueData {
        let ty = self.input_type(id);
        self.input_immediate(id, element)
            .map_or(NodeValueData::None, |imm| imm.standard_value(ty))
    }

    pub fn get_split_standard_value(&self, id: &str, element: i32) -> SplitValue {
        self.input_immediate(id, element)
            .map(|imm| imm.split_standard_value().clone())
            .unwrap_or_default()
    }

    pub fn get_split_standard_value_on_track(
        &self,
        id: &str,
        track: usize,
        element: i32,
    ) -> NodeValueData {
        self.input_immediate(id, element)
            .and_then(|imm| imm.split_standard_value().get(track).cloned())
            .unwrap_or_default()
    }

    /// Stored value at `time`: keyframes when keyframing, else the standard value.
    pub fn get_value_at_time(&self, id: &str, time: RationalTime, element: i32) -> NodeValueData {
        let ty = self.input_type(id);
        combine_track_values_into_normal_value(ty, &self.get_split_value_at_time(id, time, element))
    }

    pub fn get_split_value_at_time(&self, id: &str, time: RationalTime, element: i32) -> SplitValue {
        let Some(imm) = self.input_immediate(id, element) else {
            return SplitValue::new();
        };
        (0..imm.split_standard_value().len())
            .map(|track| self.split_value_on_track(imm, self.input_type(id), time, track))
            .collect()
    }

    pub fn get_split_value_at_time_on_track(
        &self,
        id: &str,
        time: RationalTime,
        track: usize,
        element: i32,
    ) -> NodeValueData {
        match self.input_immediate(id, element) {
            Some(imm) => self.split_value_on_track(imm, self.input_type(id), time, track),
            None => NodeValueData::None,
        }
    }

    fn split_value_on_track(
        &self,
        imm: &InputImmediate,
        ty: NodeValueType,
        time: RationalTime,
        track: usize,
    ) -> NodeValueData {
        let standard = || {
            imm.split_standard_value()
                .get(track)
                .cloned()
                .unwrap_or_default()
        };
        if imm.is_using_standard_value(track) {
            return standard();
        }
        imm.track(track)
            .and_then(|t| t.evaluate(time, ty.can_be_interpolated()))
            .unwrap_or_else(standard)
    }

    // ── Keyframes ───────────────────────────────────────────────

    pub fn keyframe_tracks(&self, id: &str, element: i32) -> &[KeyframeTrack] {
        self.input_immediate(id, element)
            .map(InputImmediate::tracks)
            .unwrap_or(&[])
    }

    pub fn get_keyframe_at_time_on_track(
        &self,
        id: &str,
        time: RationalTime,
        track: usize,
        element: i32,
    ) -> Option<&Keyframe> {
        let t = self.keyframe_tracks(id, element).get(track)?;
        t.index_at_time(time).and_then(|i| t.get(i))
    }

    /// Latest key before `time` across every track of the element.
    pub fn get_closest_keyframe_before_time(
        &self,
        id: &str,
        time: RationalTime,
        element: i32,
    ) -> Option<&Keyframe> {
        self.keyframe_tracks(id, element)
            .iter()
            .filter_map(|t| t.closest_before(time))
            .max_by_key(|k| k.time)
    }

    /// Earliest key after `time` across every track of the element.
    pub fn get_closest_keyframe_after_time(
        &self,
        id: &str,
        time: RationalTime,
        element: i32,
    ) -> Option<&Keyframe> {
        self.keyframe_tracks(id, element)
            .iter()
            .filter_map(|t| t.closest_after(time))
            .min_by_key(|k| k.time)
    }

    pub fn has_keyframe_at_time(&self, id: &str, time: RationalTime, element: i32) -> bool {
        self.keyframe_tracks(id, element)
            .iter()
            .any(|t| t.index_at_time(time).is_some())
    }

    /// Sorted, deduplicated key times over every track.
    pub fn get_keyframe_times(&self, id: &str, element: i32) -> Vec<RationalTime> {
        let mut times: Vec<_> = self
            .keyframe_tracks(id, element)
            .iter()
            .flat_map(|t| t.keys().iter().map(|k| k.time))
            .collect();
        times.sort();
        times.dedup();
        times
    }

    /// Type for a new key: the nearest earlier key's, else the nearest later key's.
    pub fn get_best_keyframe_type_for_time_on_track(
        &self,
        id: &str,
        time: RationalTime,
        track: usize,
        element: i32,
    ) -> KeyframeType {
        let Some(t) = self.keyframe_tracks(id, element).get(track) else {
            return KeyframeType::Linear;
        };
        t.closest_before(time)
            .or_else(|| t.closest_after(time))
            .map_or(KeyframeType::Linear, |k| k.ty)
    }

    // ── Connections ─────────────────────────────────────────────

    pub fn is_input_connected(&self, id: &str, element: i32) -> bool {
        self.connected_output(id, element).is_some()
    }

    /// Upstream node feeding an input element.
    pub fn connected_output(&self, id: &str, element: i32) -> Option<NodeId> {
        self.input_connections
            .get(&(id.to_string(), element))
            .copied()
    }

    /// Every connected input element with its upstream node.
    pub fn input_connections(&self) -> impl Iterator<Item = (NodeInput, NodeId)> + '_ {
        self.input_connections
            .iter()
            .map(|((input, element), out)| (NodeInput::new(self.id, input.clone(), *element), *out))
    }

    /// Downstream input elements this node feeds.
    pub fn output_connections(&self) -> &[NodeInput] {
        &self.output_connections
    }

    pub fn has_output_connections(&self) -> bool {
        !self.output_connections.is_empty()
    }

    /// Whether any element of `id` is connected, including the whole input.
    pub fn is_input_connected_any_element(&self, id: &str) -> bool {
        self.input_connections.keys().any(|(i, _)| i == id)
    }

    pub fn value_hint(&self, id: &str, element: i32) -> ValueHint {
        self.value_hints
            .get(&(id.to_string(), element))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::NodeFactory;
    use crate::nodes::value_node::ValueNode;
    use tempfile::TempDir;

    fn caches(dir: &TempDir) -> Arc<NodeCaches> {
        Arc::new(NodeCaches::new(dir.path(), RationalTime::new(1, 30), 10))
    }

    #[test]
    fn test_every_node_has_enabled_input() {
        let dir = TempDir::new().unwrap();
        let factory = NodeFactory::with_builtins();
        for id in factory.ids() {
            let kind = factory.create(id).unwrap();
            let node = Node::new(NodeId(1), kind, caches(&dir));
            assert!(node.has_input(ENABLED_INPUT), "{id}");
            assert!(node.is_enabled());
            assert!(!node.is_input_connectable(ENABLED_INPUT));
        }
    }

    #[test]
    fn test_invalid_queries_return_neutral_values() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(
            NodeId(1),
            Box::new(ValueNode::new(NodeValueType::Float)),
            caches(&dir),
        );
        assert_eq!(node.input_type("missing"), NodeValueType::None);
        assert!(node.get_value_at_time("missing", RationalTime::ZERO, -1).is_none());
        assert!(node.get_value_at_time("value_in", RationalTime::ZERO, 4).is_none());
        assert!(!node.is_input_keyframing("value_in", 7));
        assert!(node.keyframe_tracks("missing", -1).is_empty());
    }

    #[test]
    fn test_clone_shares_caches() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(
            NodeId(3),
            Box::new(ValueNode::new(NodeValueType::Float)),
            caches(&dir),
        );
        let copy = node.clone();
        assert!(Arc::ptr_eq(node.caches(), copy.caches()));
        assert_eq!(copy.kind_id(), node.kind_id());
    }
}
