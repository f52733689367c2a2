//! The node graph arena and every edit that ripples between nodes.
//!
//! Nodes reference each other by [`NodeId`] only. Connections are stored on
//! both ends and only [`Project::connect_edge`] / [`Project::disconnect_edge`]
//! touch them. Every edit that can change rendered output ends in
//! [`Project::invalidate_cache`], which walks downstream through output
//! connections.

use cinegraph_core::{ColorManager, EngineConfig, RationalTime, TimeRange};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::DVec2;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{GraphError, Result};
use crate::input::{InputFlags, InputImmediate, NodeInput, ValueHint};
use crate::keyframe::{Keyframe, KeyframeTrack, KeyframeType};
use crate::node::{Node, NodeCaches, NodeId, NodeKind};
use crate::value::{split_normal_value_into_track_values, NodeValueData};

/// Frame duration for caches of nodes that have no video params yet.
const DEFAULT_CACHE_TIMEBASE: (i64, i64) = (1, 30);

/// Notifications of graph edits, in the order they were applied.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
    EdgeAdded { output: NodeId, input: NodeInput },
    EdgeRemoved { output: NodeId, input: NodeInput },
    ValueChanged { input: NodeInput, range: TimeRange },
    ValueHintChanged { input: NodeInput },
    KeyframeEnableChanged { input: NodeInput, enabled: bool },
    InputArraySizeChanged { node: NodeId, input: String, size: usize },
    /// `range` is in the node's own output time.
    NodeInvalidated { node: NodeId, range: TimeRange },
    LinksChanged { a: NodeId, b: NodeId },
    SettingsChanged,
}

/// Direction for [`Project::transform_time_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    /// From a downstream node's time to an upstream node's time.
    TowardsInput,
    TowardsOutput,
}

pub struct Project {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u64,
    cache_dir: PathBuf,
    audio_segment_secs: u64,
    color_manager: ColorManager,
    cache_invalidation: bool,
    listeners: Mutex<Vec<Sender<GraphEvent>>>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("nodes", &self.nodes.len())
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl Project {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 1,
            cache_dir: cache_dir.into(),
            audio_segment_secs: 10,
            color_manager: ColorManager::default(),
            cache_invalidation: true,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let mut project = Self::new(config.disk_cache_dir.clone());
        project.audio_segment_secs = config.audio_segment_secs.max(1) as u64;
        project
    }

    /// Copy of the graph with no listeners.
    ///
    /// Nodes in the copy share caches with the originals.
    pub fn snapshot(&self) -> Project {
        Self {
            nodes: self.nodes.clone(),
            next_id: self.next_id,
            cache_dir: self.cache_dir.clone(),
            audio_segment_secs: self.audio_segment_secs,
            color_manager: self.color_manager.clone(),
            cache_invalidation: self.cache_invalidation,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<GraphEvent> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    fn emit(&self, event: GraphEvent) {
        trace!(?event, "Graph event");
        self.listeners.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn color_manager(&self) -> &ColorManager {
        &self.color_manager
    }

    pub fn set_color_manager(&mut self, manager: ColorManager) {
        self.color_manager = manager;
        self.emit(GraphEvent::SettingsChanged);
    }

    /// Whether invalidation touches node caches. Disabled on render-side copies.
    pub fn set_cache_invalidation(&mut self, e: bool) {
        self.cache_invalidation = e;
    }

    // ── Nodes ───────────────────────────────────────────────────

    pub fn add_node(&mut self, kind: Box<dyn NodeKind>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let caches = Arc::new(NodeCaches::new(
            &self.cache_dir,
            RationalTime::new(DEFAULT_CACHE_TIMEBASE.0, DEFAULT_CACHE_TIMEBASE.1),
            self.audio_segment_secs,
        ));
        debug!(node = %id, kind = kind.id(), "Adding node");
        self.nodes.insert(id, Node::new(id, kind, caches));
        self.emit(GraphEvent::NodeAdded(id));
        id
    }

    /// Insert an existing node under its own id, dropping its connections.
    pub fn insert_node(&mut self, mut node: Node) -> NodeId {
        let id = node.id();
        node.input_connections.clear();
        node.output_connections.clear();
        node.links.clear();
        self.next_id = self.next_id.max(id.0 + 1);
        self.nodes.insert(id, node);
        self.emit(GraphEvent::NodeAdded(id));
        id
    }

    /// Disconnect and unlink a node, then remove it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.disconnect_all(id)?;
        let links: Vec<_> = self.node(id).map(|n| n.links.iter().copied().collect()).unwrap_or_default();
        for other in links {
            self.unlink(id, other);
        }
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        debug!(node = %id, "Removed node");
        self.emit(GraphEvent::NodeRemoved(id));
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable access for edits that do not affect rendering (labels, positions).
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes of a given kind id.
    pub fn nodes_of_kind<'a>(&'a self, kind_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.kind_id() == kind_id)
    }

    fn require(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    fn immediate_mut(&mut self, input: &NodeInput) -> Option<&mut InputImmediate> {
        let node = self.nodes.get_mut(&input.node)?;
        let valid = node.is_valid_element(&input.input, input.element);
        if !valid {
            node.report_invalid_input("modify", &input.input, input.element);
            return None;
        }
        node.input_mut(&input.input)?.immediate_mut(input.element)
    }

    fn immediate(&self, input: &NodeInput) -> Option<&InputImmediate> {
        self.nodes
            .get(&input.node)?
            .input_immediate(&input.input, input.element)
    }

    // ── Connections ─────────────────────────────────────────────

    /// Feed `output`'s value into `input`.
    ///
    /// Rejects missing nodes, unconnectable or occupied inputs, and anything
    /// that would make `input.node` depend on itself.
    pub fn connect_edge(&mut self, output: NodeId, input: NodeInput) -> Result<()> {
        self.require(output)?;
        let target = self.require(input.node)?;
        if !target.is_valid_element(&input.input, input.element) {
            return Err(GraphError::InvalidElement(input.input.clone(), input.element));
        }
        if !target.is_input_connectable(&input.input) {
            return Err(GraphError::NotConnectable(input.input.clone()));
        }
        if target.is_input_connected(&input.input, input.element) {
            return Err(GraphError::AlreadyConnected(input.to_string()));
        }
        if output == input.node || self.get_dependencies(output).contains(&input.node) {
            return Err(GraphError::Cycle(format!("{} -> {}", output, input)));
        }

        if let Some(n) = self.nodes.get_mut(&input.node) {
            n.input_connections
                .insert((input.input.clone(), input.element), output);
        }
        if let Some(n) = self.nodes.get_mut(&output) {
            n.output_connections.push(input.clone());
        }
        debug!(%output, %input, "Connected edge");
        self.emit(GraphEvent::EdgeAdded {
            output,
            input: input.clone(),
        });
        self.input_changed_hook(&input);

        if !self.input_ignores_invalidations(&input) {
            self.invalidate_all(&input);
        }
        Ok(())
    }

    pub fn disconnect_edge(&mut self, output: NodeId, input: NodeInput) -> Result<()> {
        let target = self.require(input.node)?;
        if target.connected_output(&input.input, input.element) != Some(output) {
            return Err(GraphError::NotConnected(input.to_string(), output));
        }

        if let Some(n) = self.nodes.get_mut(&input.node) {
            n.input_connections
                .remove(&(input.input.clone(), input.element));
        }
        if let Some(n) = self.nodes.get_mut(&output) {
            if let Some(pos) = n.output_connections.iter().position(|c| *c == input) {
                n.output_connections.remove(pos);
            }
        }
        debug!(%output, %input, "Disconnected edge");
        self.emit(GraphEvent::EdgeRemoved {
            output,
            input: input.clone(),
        });
        self.input_changed_hook(&input);

        if !self.input_ignores_invalidations(&input) {
            self.invalidate_all(&input);
        }
        Ok(())
    }

    /// Remove every edge touching `id`.
    pub fn disconnect_all(&mut self, id: NodeId) -> Result<()> {
        let node = self.require(id)?;
        let inputs: Vec<_> = node.input_connections().collect();
        let outputs = node.output_connections().to_vec();
        for (input, output) in inputs {
            self.disconnect_edge(output, input)?;
        }
        for input in outputs {
            self.disconnect_edge(id, input)?;
        }
        Ok(())
    }

    fn input_ignores_invalidations(&self, input: &NodeInput) -> bool {
        self.node(input.node).is_some_and(|n| {
            n.input_flags(&input.input)
                .contains(InputFlags::IGNORE_INVALIDATIONS)
        })
    }

    fn input_changed_hook(&self, input: &NodeInput) {
        if let Some(n) = self.node(input.node) {
            n.kind().input_value_changed(n, &input.input, input.element);
        }
    }

    // ── Invalidation ────────────────────────────────────────────

    /// Invalidate `range` of `node`'s own caches, then every node downstream.
    ///
    /// `input`/`element` name where the change entered the node.
    pub fn invalidate_cache(&self, node: NodeId, range: TimeRange, input: &str, element: i32) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        trace!(%node, %range, input, element, "Invalidating cache");

        if self.cache_invalidation && n.are_caches_enabled() && !range.is_empty() {
            let caches = n.caches();
            if let Some(r) = range
                .intersected(&n.video_cache_range())
                .filter(|r| !r.is_empty())
            {
                caches.video.invalidate(r);
                caches.thumbnail.invalidate(r);
            }
            if let Some(r) = range
                .intersected(&n.audio_cache_range())
                .filter(|r| !r.is_empty())
            {
                caches.audio.playback().invalidate(r);
                caches.waveform.invalidate(r);
            }
        }

        self.emit(GraphEvent::NodeInvalidated { node, range });

        for out in n.output_connections() {
            let adjusted = match self.nodes.get(&out.node) {
                Some(down) => {
                    down.kind()
                        .output_time_adjustment(down, &out.input, out.element, range)
                }
                None => continue,
            };
            self.invalidate_cache(out.node, adjusted, &out.input, out.element);
        }
    }

    pub fn invalidate_all(&self, input: &NodeInput) {
        self.invalidate_cache(input.node, TimeRange::ALL, &input.input, input.element);
    }

    /// Announce a stored-value change over `range` and invalidate it.
    pub fn parameter_value_changed(&self, input: &NodeInput, range: TimeRange) {
        self.emit(GraphEvent::ValueChanged {
            input: input.clone(),
            range,
        });
        self.input_changed_hook(input);
        if self.input_ignores_invalidations(input) {
            return;
        }
        self.invalidate_cache(input.node, range, &input.input, input.element);
    }

    // ── Standard values ─────────────────────────────────────────

    pub fn set_standard_value(&mut self, input: &NodeInput, value: &NodeValueData) {
        let Some(ty) = self.node(input.node).map(|n| n.input_type(&input.input)) else {
            return;
        };
        let split = split_normal_value_into_track_values(ty, value);
        self.set_split_standard_value(input, split.to_vec());
    }

    pub fn set_split_standard_value(&mut self, input: &NodeInput, split: Vec<NodeValueData>) {
        let Some(imm) = self.immediate_mut(input) else {
            return;
        };
        let mut in_use = false;
        for (track, value) in split.into_iter().enumerate() {
            imm.set_standard_value_on_track(value, track);
            in_use |= imm.is_using_standard_value(track);
        }
        if in_use {
            self.parameter_value_changed(input, TimeRange::ALL);
        }
    }

    pub fn set_split_standard_value_on_track(
        &mut self,
        input: &NodeInput,
        value: NodeValueData,
        track: usize,
    ) {
        let Some(imm) = self.immediate_mut(input) else {
            return;
        };
        imm.set_standard_value_on_track(value, track);
        if imm.is_using_standard_value(track) {
            self.parameter_value_changed(input, TimeRange::ALL);
        }
    }

    pub fn set_input_is_keyframing(&mut self, input: &NodeInput, keyframing: bool) {
        let keyframable = self
            .node(input.node)
            .is_some_and(|n| n.is_input_keyframable(&input.input));
        if !keyframable {
            if let Some(n) = self.node(input.node) {
                n.report_invalid_input("set keyframing on", &input.input, input.element);
            }
            return;
        }
        let Some(imm) = self.immediate_mut(input) else {
            return;
        };
        if imm.is_keyframing() == keyframing {
            return;
        }
        imm.set_keyframing(keyframing);
        let had_keys = imm.has_keyframes();
        self.emit(GraphEvent::KeyframeEnableChanged {
            input: input.clone(),
            enabled: keyframing,
        });
        if had_keys {
            self.parameter_value_changed(input, TimeRange::ALL);
        }
    }

    /// Set the value of one track at `time`.
    ///
    /// When keyframing, an existing key at `time` is updated or a new key is
    /// created with the best neighboring type. With `insert_on_all_tracks`,
    /// tracks lacking a key at `time` get one holding their current value.
    pub fn set_value_at_time(
        &mut self,
        input: &NodeInput,
        time: RationalTime,
        value: NodeValueData,
        track: usize,
        insert_on_all_tracks: bool,
    ) {
        let Some(node) = self.node(input.node) else {
            return;
        };
        if !node.is_input_keyframing(&input.input, input.element) {
            self.set_split_standard_value_on_track(input, value, track);
            return;
        }

        let track_count = node.keyframe_tracks(&input.input, input.element).len();
        let tracks: Vec<usize> = if insert_on_all_tracks {
            (0..track_count).collect()
        } else {
            vec![track]
        };

        for t in tracks {
            let node = match self.node(input.node) {
                Some(n) => n,
                None => return,
            };
            let existing = node
                .keyframe_tracks(&input.input, input.element)
                .get(t)
                .and_then(|k| k.index_at_time(time));

            if t == track {
                match existing {
                    Some(index) => self.set_keyframe_value(input, t, index, value.clone()),
                    None => {
                        let ty = node.get_best_keyframe_type_for_time_on_track(
                            &input.input,
                            time,
                            t,
                            input.element,
                        );
                        self.insert_keyframe(input, t, Keyframe::new(time, value.clone(), ty));
                    }
                }
            } else if existing.is_none() {
                let current =
                    node.get_split_value_at_time_on_track(&input.input, time, t, input.element);
                let ty =
                    node.get_best_keyframe_type_for_time_on_track(&input.input, time, t, input.element);
                self.insert_keyframe(input, t, Keyframe::new(time, current, ty));
            }
        }
    }

    // ── Keyframes ───────────────────────────────────────────────

    fn track_mut(&mut self, input: &NodeInput, track: usize) -> Option<&mut KeyframeTrack> {
        self.immediate_mut(input)?.track_mut(track)
    }

    fn track(&self, input: &NodeInput, track: usize) -> Option<&KeyframeTrack> {
        self.immediate(input)?.track(track)
    }

    /// Insert a key, replacing one at the same time. Returns its index.
    pub fn insert_keyframe(&mut self, input: &NodeInput, track: usize, key: Keyframe) -> Option<usize> {
        let keyframable = self
            .node(input.node)
            .is_some_and(|n| n.is_input_keyframable(&input.input));
        if !keyframable {
            return None;
        }
        let t = self.track_mut(input, track)?;
        let index = t.insert(key);
        let range = t.range_affected_by(index);
        self.parameter_value_changed(input, range);
        Some(index)
    }

    pub fn remove_keyframe(&mut self, input: &NodeInput, track: usize, index: usize) -> Option<Keyframe> {
        let t = self.track_mut(input, track)?;
        let range = t.range_affected_by(index);
        let key = t.remove(index)?;
        self.parameter_value_changed(input, range);
        Some(key)
    }

    /// Move a key in time. Returns its new index.
    pub fn set_keyframe_time(
        &mut self,
        input: &NodeInput,
        track: usize,
        index: usize,
        time: RationalTime,
    ) -> Option<usize> {
        let t = self.track_mut(input, track)?;
        t.get(index)?;
        let old_range = t.range_affected_by(index);
        let new_index = t.set_time(index, time)?;
        let new_range = t.range_affected_by(new_index);

        self.parameter_value_changed(input, old_range);
        let inside = old_range.in_point() < time && time < old_range.out_point();
        if !inside {
            self.parameter_value_changed(input, new_range);
        }
        Some(new_index)
    }

    pub fn set_keyframe_value(&mut self, input: &NodeInput, track: usize, index: usize, value: NodeValueData) {
        let Some(t) = self.track_mut(input, track) else {
            return;
        };
        let Some(key) = t.get_mut(index) else {
            return;
        };
        key.value = value;
        let range = t.range_affected_by(index);
        self.parameter_value_changed(input, range);
    }

    pub fn set_keyframe_type(&mut self, input: &NodeInput, track: usize, index: usize, ty: KeyframeType) {
        let Some(t) = self.track_mut(input, track) else {
            return;
        };
        if !t.set_type(index, ty) {
            return;
        }
        if t.len() > 1 {
            let range = t.range_affected_by(index);
            self.parameter_value_changed(input, range);
        }
    }

    pub fn set_keyframe_bezier_in(&mut self, input: &NodeInput, track: usize, index: usize, handle: DVec2) {
        self.set_keyframe_handle(input, track, index, handle, true);
    }

    pub fn set_keyframe_bezier_out(&mut self, input: &NodeInput, track: usize, index: usize, handle: DVec2) {
        self.set_keyframe_handle(input, track, index, handle, false);
    }

    fn set_keyframe_handle(
        &mut self,
        input: &NodeInput,
        track: usize,
        index: usize,
        handle: DVec2,
        is_in: bool,
    ) {
        let Some(t) = self.track_mut(input, track) else {
            return;
        };
        let Some(key) = t.get_mut(index) else {
            return;
        };
        if is_in {
            key.bezier_in = handle;
        } else {
            key.bezier_out = handle;
        }
        let range = t.range_affected_by(index);
        self.parameter_value_changed(input, range);
    }

    /// Key count on a track, for callers iterating by index.
    pub fn keyframe_count(&self, input: &NodeInput, track: usize) -> usize {
        self.track(input, track).map_or(0, KeyframeTrack::len)
    }

    // ── Arrays ──────────────────────────────────────────────────

    fn array_resize_internal(&mut self, node: NodeId, id: &str, size: usize) {
        let Some(input) = self.nodes.get_mut(&node).and_then(|n| n.input_mut(id)) else {
            return;
        };
        if input.array_size == size {
            return;
        }
        input.resize(size);
        self.emit(GraphEvent::InputArraySizeChanged {
            node,
            input: id.to_string(),
            size,
        });
        self.parameter_value_changed(&NodeInput::whole(node, id), TimeRange::ALL);
    }

    fn array_connections(&self, node: NodeId, id: &str) -> Vec<(i32, NodeId)> {
        self.node(node)
            .map(|n| {
                n.input_connections
                    .iter()
                    .filter(|((input, element), _)| input == id && *element >= 0)
                    .map(|((_, element), out)| (*element, *out))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open a default element at `index`, shifting later elements up by one.
    pub fn input_array_insert(&mut self, node: NodeId, id: &str, index: usize) -> Result<()> {
        let n = self.require(node)?;
        if !n.input_is_array(id) {
            return Err(GraphError::InputNotFound(id.to_string()));
        }
        let size = n.input_array_size(id);
        if index > size {
            return Err(GraphError::InvalidElement(id.to_string(), index as i32));
        }

        self.array_resize_internal(node, id, size + 1);

        let mut moved = self.array_connections(node, id);
        moved.retain(|(e, _)| *e >= index as i32);
        moved.sort_by(|a, b| b.0.cmp(&a.0));
        for (element, output) in moved {
            self.disconnect_edge(output, NodeInput::new(node, id, element))?;
            self.connect_edge(output, NodeInput::new(node, id, element + 1))?;
        }

        if let Some(input) = self.nodes.get_mut(&node).and_then(|n| n.input_mut(id)) {
            for i in ((index + 1)..=size).rev() {
                input.copy_element(i as i32 - 1, i as i32);
            }
            input.clear_element(index as i32);
        }
        self.parameter_value_changed(&NodeInput::whole(node, id), TimeRange::ALL);
        Ok(())
    }

    /// Delete the element at `index`, shifting later elements down by one.
    pub fn input_array_remove(&mut self, node: NodeId, id: &str, index: usize) -> Result<()> {
        let n = self.require(node)?;
        if !n.input_is_array(id) {
            return Err(GraphError::InputNotFound(id.to_string()));
        }
        let size = n.input_array_size(id);
        if index >= size {
            return Err(GraphError::InvalidElement(id.to_string(), index as i32));
        }
        let new_size = size - 1;

        self.array_resize_internal(node, id, new_size);

        let mut moved = self.array_connections(node, id);
        moved.retain(|(e, _)| *e >= index as i32);
        moved.sort_by_key(|(e, _)| *e);
        for (element, output) in moved {
            self.disconnect_edge(output, NodeInput::new(node, id, element))?;
            if element > index as i32 {
                self.connect_edge(output, NodeInput::new(node, id, element - 1))?;
            }
        }

        if let Some(input) = self.nodes.get_mut(&node).and_then(|n| n.input_mut(id)) {
            for i in index..new_size {
                input.copy_element(i as i32 + 1, i as i32);
            }
            input.clear_element(new_size as i32);
        }
        self.parameter_value_changed(&NodeInput::whole(node, id), TimeRange::ALL);
        Ok(())
    }

    pub fn input_array_append(&mut self, node: NodeId, id: &str) -> Result<()> {
        let size = self.require(node)?.input_array_size(id);
        self.input_array_resize(node, id, size + 1)
    }

    pub fn input_array_remove_last(&mut self, node: NodeId, id: &str) -> Result<()> {
        let size = self.require(node)?.input_array_size(id);
        match size.checked_sub(1) {
            Some(last) => self.input_array_remove(node, id, last),
            None => Ok(()),
        }
    }

    /// Change the element count. Elements dropped by shrinking are
    /// disconnected and reset.
    pub fn input_array_resize(&mut self, node: NodeId, id: &str, size: usize) -> Result<()> {
        let n = self.require(node)?;
        if !n.input_is_array(id) {
            return Err(GraphError::InputNotFound(id.to_string()));
        }
        let old = n.input_array_size(id);
        if size < old {
            for (element, output) in self.array_connections(node, id) {
                if element >= size as i32 {
                    self.disconnect_edge(output, NodeInput::new(node, id, element))?;
                }
            }
            if let Some(input) = self.nodes.get_mut(&node).and_then(|n| n.input_mut(id)) {
                for e in size..old {
                    input.clear_element(e as i32);
                }
            }
        }
        self.array_resize_internal(node, id, size);
        Ok(())
    }

    // ── Hints ───────────────────────────────────────────────────

    pub fn set_value_hint(&mut self, input: &NodeInput, hint: ValueHint) {
        let Some(n) = self.nodes.get_mut(&input.node) else {
            return;
        };
        n.value_hints
            .insert((input.input.clone(), input.element), hint);
        self.emit(GraphEvent::ValueHintChanged {
            input: input.clone(),
        });
        self.invalidate_all(input);
    }

    // ── Links ───────────────────────────────────────────────────

    /// Link two nodes symmetrically. False if identical or already linked.
    pub fn link(&mut self, a: NodeId, b: NodeId) -> bool {
        if a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }
        if self.node(a).is_some_and(|n| n.is_linked_to(b)) {
            return false;
        }
        if let Some(n) = self.nodes.get_mut(&a) {
            n.links.insert(b);
        }
        if let Some(n) = self.nodes.get_mut(&b) {
            n.links.insert(a);
        }
        self.emit(GraphEvent::LinksChanged { a, b });
        true
    }

    pub fn unlink(&mut self, a: NodeId, b: NodeId) -> bool {
        if !self.node(a).is_some_and(|n| n.is_linked_to(b)) {
            return false;
        }
        if let Some(n) = self.nodes.get_mut(&a) {
            n.links.remove(&b);
        }
        if let Some(n) = self.nodes.get_mut(&b) {
            n.links.remove(&a);
        }
        self.emit(GraphEvent::LinksChanged { a, b });
        true
    }

    // ── Structure queries ───────────────────────────────────────

    /// Every node upstream of `id`, nearest first.
    pub fn get_dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.collect_dependencies(id, &mut seen, &mut out);
        out
    }

    fn collect_dependencies(&self, id: NodeId, seen: &mut BTreeSet<NodeId>, out: &mut Vec<NodeId>) {
        let Some(n) = self.node(id) else {
            return;
        };
        for (_, up) in n.input_connections() {
            if seen.insert(up) {
                out.push(up);
                self.collect_dependencies(up, seen, out);
            }
        }
    }

    pub fn get_immediate_dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(n) = self.node(id) {
            for (_, up) in n.input_connections() {
                if !out.contains(&up) {
                    out.push(up);
                }
            }
        }
        out
    }

    /// Inputs of `node` fed by `upstream`, directly or (with `recursive`) through other nodes.
    pub fn inputs_from(&self, node: NodeId, upstream: NodeId, recursive: bool) -> Vec<NodeInput> {
        let Some(n) = self.node(node) else {
            return Vec::new();
        };
        n.input_connections()
            .filter(|(_, up)| {
                *up == upstream || (recursive && self.get_dependencies(*up).contains(&upstream))
            })
            .map(|(input, _)| input)
            .collect()
    }

    /// Whether `output` feeds `input` directly.
    pub fn output_is_connected(&self, output: NodeId, input: &NodeInput) -> bool {
        self.node(output)
            .is_some_and(|n| n.output_connections().contains(input))
    }

    /// Inputs crossed walking downstream from `from` to `to`.
    ///
    /// `path_index` picks among several paths in discovery order.
    pub fn find_path(&self, from: NodeId, to: NodeId, path_index: usize) -> Vec<NodeInput> {
        let mut path = Vec::new();
        let mut remaining = path_index;
        if !self.find_path_internal(&mut path, from, to, &mut remaining) {
            path.clear();
        }
        path
    }

    fn find_path_internal(
        &self,
        path: &mut Vec<NodeInput>,
        from: NodeId,
        to: NodeId,
        remaining: &mut usize,
    ) -> bool {
        let Some(n) = self.node(from) else {
            return false;
        };
        for out in n.output_connections() {
            path.push(out.clone());
            if out.node == to {
                if *remaining == 0 {
                    return true;
                }
                *remaining -= 1;
            }
            if self.find_path_internal(path, out.node, to, remaining) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Convert a range in `from`'s time to `target`'s time along a path.
    pub fn transform_time_to(
        &self,
        time: TimeRange,
        from: NodeId,
        target: NodeId,
        direction: TransformDirection,
        path_index: usize,
    ) -> TimeRange {
        let (start, end) = match direction {
            TransformDirection::TowardsInput => (target, from),
            TransformDirection::TowardsOutput => (from, target),
        };
        let path = self.find_path(start, end, path_index);
        if path.is_empty() {
            if start != end {
                warn!(%start, %end, "No path between nodes");
            }
            return time;
        }

        let adjust = |time: TimeRange, step: &NodeInput, towards_input: bool| match self.node(step.node) {
            Some(n) if towards_input => {
                n.kind()
                    .input_time_adjustment(n, &step.input, step.element, time)
            }
            Some(n) => n
                .kind()
                .output_time_adjustment(n, &step.input, step.element, time),
            None => time,
        };

        match direction {
            TransformDirection::TowardsInput => path
                .iter()
                .rev()
                .fold(time, |t, step| adjust(t, step, true)),
            TransformDirection::TowardsOutput => {
                path.iter().fold(time, |t, step| adjust(t, step, false))
            }
        }
    }

    // ── Mirroring ───────────────────────────────────────────────

    /// Copy the stored state of `input` (values, keys, size, hints) from `source`.
    pub fn copy_input_from(&mut self, source: &Node, input: &str) {
        let Some(dst) = self.nodes.get_mut(&source.id()) else {
            return;
        };
        let Some(src_input) = source.input(input) else {
            return;
        };
        if let Some(dst_input) = dst.input_mut(input) {
            *dst_input = src_input.clone();
        }
        dst.value_hints.retain(|(id, _), _| id != input);
        for ((id, element), hint) in &source.value_hints {
            if id == input {
                dst.value_hints.insert((id.clone(), *element), hint.clone());
            }
        }
    }

    /// Copy label, color, links-free metadata and cache flag from `source`.
    pub fn copy_node_settings_from(&mut self, source: &Node) {
        if let Some(dst) = self.nodes.get_mut(&source.id()) {
            dst.set_label(source.label());
            dst.set_override_color(source.override_color());
            dst.set_caches_enabled(source.are_caches_enabled());
        }
    }
}
