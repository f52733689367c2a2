//! Registry creating node kinds by type id.

use std::collections::BTreeMap;
use tracing::warn;

use crate::node::NodeKind;
use crate::nodes::{
    CachedNode, ColorTransformNode, MathNode, MediaInput, MergeNode, SolidGenerator,
    TimeOffsetNode, ValueNode, ViewerOutput, VolumeNode,
};

/// Prototypes keyed by [`NodeKind::id`]; `create` clones one.
#[derive(Debug, Default)]
pub struct NodeFactory {
    prototypes: BTreeMap<&'static str, Box<dyn NodeKind>>,
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory knowing every built-in kind.
    pub fn with_builtins() -> Self {
        let mut f = Self::new();
        f.register(Box::new(SolidGenerator));
        f.register(Box::new(ViewerOutput));
        f.register(Box::new(ValueNode::default()));
        f.register(Box::new(MathNode));
        f.register(Box::new(MergeNode));
        f.register(Box::new(MediaInput));
        f.register(Box::new(TimeOffsetNode));
        f.register(Box::new(VolumeNode));
        f.register(Box::new(ColorTransformNode));
        f.register(Box::new(CachedNode));
        f
    }

    /// Add a kind, replacing any previous one with the same id.
    pub fn register(&mut self, kind: Box<dyn NodeKind>) {
        let id = kind.id();
        if self.prototypes.insert(id, kind).is_some() {
            warn!(id, "Node kind registered twice, keeping the newest");
        }
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn NodeKind>> {
        self.prototypes.get(id).map(|k| k.clone_box())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.prototypes.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.prototypes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}
