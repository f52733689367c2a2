//! A render-side mirror of the live project.
//!
//! Render threads read the copy while the host keeps editing the original.
//! Edits arrive as [`GraphEvent`]s and are replayed onto the copy only when
//! no render holds it, so a traversal never sees a half-applied change.
//! Nodes keep their ids in the copy and share caches with their originals.

use cinegraph_core::JobTime;
use cinegraph_node::{GraphEvent, NodeId, Project};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::request::SharedProject;

pub struct ProjectCopier {
    copy: SharedProject,
    events: Receiver<GraphEvent>,
    queue: VecDeque<GraphEvent>,
    graph_changed: JobTime,
}

impl std::fmt::Debug for ProjectCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCopier")
            .field("queued", &self.queue.len())
            .field("graph_changed", &self.graph_changed)
            .finish()
    }
}

impl ProjectCopier {
    /// Snapshot `original` and start listening for its edits.
    pub fn new(original: &Project) -> Self {
        let mut copy = original.snapshot();
        copy.set_cache_invalidation(false);
        debug!(nodes = copy.len(), "Created project copy");
        Self {
            copy: Arc::new(RwLock::new(copy)),
            events: original.subscribe(),
            queue: VecDeque::new(),
            graph_changed: JobTime::now(),
        }
    }

    pub fn copy(&self) -> &SharedProject {
        &self.copy
    }

    /// The copy's id for an original node, if the copy has it yet.
    pub fn copy_of(&self, original: NodeId) -> Option<NodeId> {
        self.copy.read().contains(original).then_some(original)
    }

    /// Stamp of the last edit that changed the graph's structure or values.
    pub fn graph_changed_time(&self) -> JobTime {
        self.graph_changed
    }

    /// Move received edits onto the queue. Returns how many were queued.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;
        for event in self.events.try_iter() {
            if matches!(event, GraphEvent::NodeInvalidated { .. }) {
                continue;
            }
            self.queue.push_back(event);
            count += 1;
        }
        if count > 0 {
            self.graph_changed.acquire();
        }
        count
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Replay queued edits onto the copy.
    ///
    /// Returns false, keeping the queue, while a render is reading the copy.
    pub fn process_update_queue(&mut self, original: &Project) -> bool {
        self.poll();
        if self.queue.is_empty() {
            return true;
        }
        let Some(mut copy) = self.copy.try_write() else {
            trace!(queued = self.queue.len(), "Copy busy, deferring updates");
            return false;
        };
        while let Some(event) = self.queue.pop_front() {
            Self::apply(&mut copy, original, event);
        }
        true
    }

    fn apply(copy: &mut Project, original: &Project, event: GraphEvent) {
        trace!(?event, "Mirroring edit");
        match event {
            GraphEvent::NodeAdded(id) => match original.node(id) {
                Some(node) => {
                    copy.insert_node(node.clone());
                }
                None => debug!(node = %id, "Added node already gone from original"),
            },
            GraphEvent::NodeRemoved(id) => {
                if let Err(e) = copy.remove_node(id) {
                    debug!(node = %id, "Copy had no node to remove: {}", e);
                }
            }
            GraphEvent::EdgeAdded { output, input } => {
                if let Err(e) = copy.connect_edge(output, input) {
                    warn!("Failed to mirror connection: {}", e);
                }
            }
            GraphEvent::EdgeRemoved { output, input } => {
                if let Err(e) = copy.disconnect_edge(output, input) {
                    debug!("Failed to mirror disconnection: {}", e);
                }
            }
            GraphEvent::ValueChanged { input, .. }
            | GraphEvent::ValueHintChanged { input }
            | GraphEvent::KeyframeEnableChanged { input, .. } => {
                if let Some(node) = original.node(input.node) {
                    copy.copy_input_from(node, &input.input);
                }
            }
            GraphEvent::InputArraySizeChanged { node, input, size } => {
                if let Err(e) = copy.input_array_resize(node, &input, size) {
                    debug!(%node, input = input.as_str(), "Failed to mirror array size: {}", e);
                }
                if let Some(n) = original.node(node) {
                    copy.copy_input_from(n, &input);
                }
            }
            GraphEvent::LinksChanged { a, b } => {
                let linked = original.node(a).is_some_and(|n| n.is_linked_to(b));
                if linked {
                    copy.link(a, b);
                } else {
                    copy.unlink(a, b);
                }
            }
            GraphEvent::SettingsChanged => {
                copy.set_color_manager(original.color_manager().clone());
                for node in original.nodes() {
                    copy.copy_node_settings_from(node);
                }
            }
            GraphEvent::NodeInvalidated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::{Color, RationalTime};
    use cinegraph_node::nodes::viewer::TEXTURE_INPUT;
    use cinegraph_node::nodes::{SolidGenerator, ViewerOutput};
    use cinegraph_node::shader::inputs::COLOR;
    use cinegraph_node::{NodeInput, NodeValueData};
    use tempfile::TempDir;

    #[test]
    fn test_copy_mirrors_edits() {
        let dir = TempDir::new().unwrap();
        let mut original = Project::new(dir.path());
        let solid = original.add_node(Box::new(SolidGenerator));
        let mut copier = ProjectCopier::new(&original);
        assert!(copier.copy_of(solid).is_some());

        let viewer = original.add_node(Box::new(ViewerOutput));
        original
            .connect_edge(solid, NodeInput::whole(viewer, TEXTURE_INPUT))
            .unwrap();
        original.set_standard_value(
            &NodeInput::whole(solid, COLOR),
            &NodeValueData::Color(Color::GREEN),
        );
        assert!(copier.copy_of(viewer).is_none());

        assert!(copier.process_update_queue(&original));
        let copy = copier.copy().read();
        let v = copy.node(viewer).unwrap();
        assert_eq!(v.connected_output(TEXTURE_INPUT, -1), Some(solid));
        assert_eq!(
            copy.node(solid).unwrap().get_value_at_time(COLOR, RationalTime::ZERO, -1),
            NodeValueData::Color(Color::GREEN)
        );
    }

    #[test]
    fn test_updates_wait_while_copy_is_read() {
        let dir = TempDir::new().unwrap();
        let mut original = Project::new(dir.path());
        let mut copier = ProjectCopier::new(&original);
        let before = copier.graph_changed_time();
        let added = original.add_node(Box::new(SolidGenerator));

        let shared = Arc::clone(copier.copy());
        let reading = shared.read();
        assert!(!copier.process_update_queue(&original));
        assert!(copier.has_pending());
        assert!(copier.graph_changed_time() > before);
        drop(reading);

        assert!(copier.process_update_queue(&original));
        assert!(!copier.has_pending());
        assert!(copier.copy().read().contains(added));
    }

    #[test]
    fn test_removed_node_and_stale_add() {
        let dir = TempDir::new().unwrap();
        let mut original = Project::new(dir.path());
        let keep = original.add_node(Box::new(SolidGenerator));
        let mut copier = ProjectCopier::new(&original);

        let transient = original.add_node(Box::new(SolidGenerator));
        original.remove_node(transient).unwrap();
        original.remove_node(keep).unwrap();

        assert!(copier.process_update_queue(&original));
        let copy = copier.copy().read();
        assert!(!copy.contains(transient));
        assert!(!copy.contains(keep));
    }

    #[test]
    fn test_copy_does_not_invalidate_shared_caches() {
        let dir = TempDir::new().unwrap();
        let mut original = Project::new(dir.path());
        let viewer = original.add_node(Box::new(ViewerOutput));
        original.set_standard_value(
            &NodeInput::whole(viewer, cinegraph_node::nodes::viewer::LENGTH_INPUT),
            &NodeValueData::Rational(RationalTime::from_integer(4)),
        );
        let caches = Arc::clone(original.node(viewer).unwrap().caches());
        caches.video.validate_time(RationalTime::ZERO);

        let copier = ProjectCopier::new(&original);
        copier.copy().read().invalidate_all(&NodeInput::whole(viewer, TEXTURE_INPUT));
        assert!(caches.video.is_frame_cached(RationalTime::ZERO));
    }
}
