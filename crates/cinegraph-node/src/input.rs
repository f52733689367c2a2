//! Node inputs, per-element immediates and addressing types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

use crate::keyframe::KeyframeTrack;
use crate::node::NodeId;
use crate::value::{
    combine_track_values_into_normal_value, split_normal_value_into_track_values, NodeValueData,
    NodeValueType, SplitValue,
};

// ── Flags ───────────────────────────────────────────────────────

/// Behavior flags of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputFlags(u32);

impl InputFlags {
    pub const NORMAL: Self = Self(0);
    pub const ARRAY: Self = Self(1);
    pub const NOT_KEYFRAMABLE: Self = Self(1 << 1);
    pub const NOT_CONNECTABLE: Self = Self(1 << 2);
    pub const HIDDEN: Self = Self(1 << 3);
    /// Value changes never invalidate caches.
    pub const IGNORE_INVALIDATIONS: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for InputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ── Hints ───────────────────────────────────────────────────────

/// Which upstream value a connected input should pick out of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueHint {
    /// Acceptable types; empty means the input's own type.
    pub types: Vec<NodeValueType>,
    /// Position counted from the most recent value, or -1 to search by type.
    pub index: i32,
    pub tag: String,
}

impl Default for ValueHint {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            index: -1,
            tag: String::new(),
        }
    }
}

impl ValueHint {
    pub fn with_types(types: Vec<NodeValueType>) -> Self {
        Self {
            types,
            ..Self::default()
        }
    }

    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }
}

// ── Immediates ──────────────────────────────────────────────────

/// Stored value of one input element: a flat standard value plus keyframes.
#[derive(Debug, Clone, PartialEq)]
pub struct InputImmediate {
    standard: SplitValue,
    tracks: Vec<KeyframeTrack>,
    keyframing: bool,
}

impl InputImmediate {
    pub fn new(ty: NodeValueType, default: &NodeValueData) -> Self {
        Self {
            standard: split_normal_value_into_track_values(ty, default),
            tracks: vec![KeyframeTrack::new(); ty.track_count()],
            keyframing: false,
        }
    }

    pub fn is_keyframing(&self) -> bool {
        self.keyframing
    }

    pub fn set_keyframing(&mut self, e: bool) {
        self.keyframing = e;
    }

    /// Whether `track` reads its standard value instead of keyframes.
    pub fn is_using_standard_value(&self, track: usize) -> bool {
        !self.keyframing || self.tracks.get(track).map_or(true, KeyframeTrack::is_empty)
    }

    pub fn split_standard_value(&self) -> &SplitValue {
        &self.standard
    }

    pub fn standard_value(&self, ty: NodeValueType) -> NodeValueData {
        combine_track_values_into_normal_value(ty, &self.standard)
    }

    pub fn set_split_standard_value(&mut self, value: SplitValue) {
        self.standard = value;
    }

    pub fn set_standard_value_on_track(&mut self, value: NodeValueData, track: usize) {
        if track >= self.standard.len() {
            self.standard.resize(track + 1, NodeValueData::None);
        }
        self.standard[track] = value;
    }

    pub fn tracks(&self) -> &[KeyframeTrack] {
        &self.tracks
    }

    pub fn track(&self, track: usize) -> Option<&KeyframeTrack> {
        self.tracks.get(track)
    }

    pub fn track_mut(&mut self, track: usize) -> Option<&mut KeyframeTrack> {
        self.tracks.get_mut(track)
    }

    pub fn has_keyframes(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_empty())
    }

    pub fn delete_all_keyframes(&mut self) {
        for t in &mut self.tracks {
            t.clear();
        }
    }
}

// ── Definitions ─────────────────────────────────────────────────

/// Static description of an input declared by a node kind.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDefinition {
    pub id: String,
    pub name: String,
    pub ty: NodeValueType,
    pub default: NodeValueData,
    pub flags: InputFlags,
    /// Initial element count for array inputs.
    pub array_size: usize,
    /// Choices for combo inputs.
    pub combo_strings: Vec<String>,
}

impl InputDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        ty: NodeValueType,
        default: NodeValueData,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ty,
            default,
            flags: InputFlags::NORMAL,
            array_size: 0,
            combo_strings: Vec::new(),
        }
    }

    /// Shorthand for an input defaulting to its type's neutral value.
    pub fn of_type(id: impl Into<String>, name: impl Into<String>, ty: NodeValueType) -> Self {
        Self::new(id, name, ty, ty.default_data())
    }

    pub fn with_flags(mut self, flags: InputFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn array(mut self, size: usize) -> Self {
        self.flags = self.flags | InputFlags::ARRAY;
        self.array_size = size;
        self
    }

    pub fn combo(mut self, choices: &[&str]) -> Self {
        self.combo_strings = choices.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Live state of one input on a node.
#[derive(Debug, Clone)]
pub(crate) struct Input {
    pub(crate) def: InputDefinition,
    pub(crate) immediate: InputImmediate,
    /// Never shrinks, so shifting elements can read one past the end.
    pub(crate) array_immediates: Vec<InputImmediate>,
    pub(crate) array_size: usize,
}

impl Input {
    pub(crate) fn new(def: InputDefinition) -> Self {
        let immediate = InputImmediate::new(def.ty, &def.default);
        let mut input = Self {
            def,
            immediate,
            array_immediates: Vec::new(),
            array_size: 0,
        };
        let size = input.def.array_size;
        input.resize(size);
        input
    }

    pub(crate) fn is_array(&self) -> bool {
        self.def.flags.contains(InputFlags::ARRAY)
    }

    pub(crate) fn is_valid_element(&self, element: i32) -> bool {
        element == -1 || (element >= 0 && (element as usize) < self.array_size)
    }

    pub(crate) fn immediate(&self, element: i32) -> Option<&InputImmediate> {
        match element {
            -1 => Some(&self.immediate),
            e if e >= 0 => self.array_immediates.get(e as usize),
            _ => None,
        }
    }

    pub(crate) fn immediate_mut(&mut self, element: i32) -> Option<&mut InputImmediate> {
        match element {
            -1 => Some(&mut self.immediate),
            e if e >= 0 => self.array_immediates.get_mut(e as usize),
            _ => None,
        }
    }

    pub(crate) fn resize(&mut self, size: usize) {
        while self.array_immediates.len() < size {
            self.array_immediates
                .push(InputImmediate::new(self.def.ty, &self.def.default));
        }
        self.array_size = size;
    }

    /// Reset an element to its default: no keys, not keyframing.
    pub(crate) fn clear_element(&mut self, element: i32) {
        let ty = self.def.ty;
        let keyframable = !self.def.flags.contains(InputFlags::NOT_KEYFRAMABLE);
        let default = self.def.default.clone();
        if let Some(imm) = self.immediate_mut(element) {
            imm.delete_all_keyframes();
            if keyframable {
                imm.set_keyframing(false);
            }
            imm.set_split_standard_value(split_normal_value_into_track_values(ty, &default));
        }
    }

    /// Copy `from`'s stored value onto `to`.
    pub(crate) fn copy_element(&mut self, from: i32, to: i32) {
        if let Some(src) = self.immediate(from).cloned() {
            if let Some(dst) = self.immediate_mut(to) {
                *dst = src;
            }
        }
    }
}

// ── Addressing ──────────────────────────────────────────────────

/// One element of one input on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeInput {
    pub node: NodeId,
    pub input: String,
    pub element: i32,
}

impl NodeInput {
    pub fn new(node: NodeId, input: impl Into<String>, element: i32) -> Self {
        Self {
            node,
            input: input.into(),
            element,
        }
    }

    /// The whole input (element -1).
    pub fn whole(node: NodeId, input: impl Into<String>) -> Self {
        Self::new(node, input, -1)
    }
}

impl fmt::Display for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.node, self.input, self.element)
    }
}

/// One keyframe track of an input element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyframeTrackReference {
    pub input: NodeInput,
    pub track: usize,
}

impl KeyframeTrackReference {
    pub fn new(input: NodeInput, track: usize) -> Self {
        Self { input, track }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::Color;

    #[test]
    fn test_flags_combine() {
        let f = InputFlags::NOT_KEYFRAMABLE | InputFlags::HIDDEN;
        assert!(f.contains(InputFlags::HIDDEN));
        assert!(!f.contains(InputFlags::ARRAY));
        assert!(f.contains(InputFlags::NORMAL));
    }

    #[test]
    fn test_color_immediate_splits_into_four_tracks() {
        let imm = InputImmediate::new(
            NodeValueType::Color,
            &NodeValueData::Color(Color::new(1.0, 0.5, 0.25, 1.0)),
        );
        assert_eq!(imm.tracks().len(), 4);
        assert_eq!(imm.split_standard_value().len(), 4);
        assert_eq!(
            imm.standard_value(NodeValueType::Color),
            NodeValueData::Color(Color::new(1.0, 0.5, 0.25, 1.0))
        );
    }

    #[test]
    fn test_array_immediates_never_shrink() {
        let def = InputDefinition::of_type("v", "V", NodeValueType::Float).array(3);
        let mut input = Input::new(def);
        assert_eq!(input.array_immediates.len(), 3);
        input.resize(1);
        assert_eq!(input.array_size, 1);
        assert_eq!(input.array_immediates.len(), 3);
        assert!(!input.is_valid_element(1));
        assert!(input.immediate(2).is_some());
    }
}
