//! Typed values flowing between nodes.
//!
//! A [`NodeValue`] pairs a [`NodeValueType`] with its payload, the node that
//! produced it and an optional tag. Nodes push values into a
//! [`NodeValueTable`]; downstream nodes pull the most recent value matching
//! the types they accept. Tables from several inputs are merged so values a
//! node does not consume pass through to the next one.

use cinegraph_core::{AudioParams, Color, RationalTime, SampleBuffer, TimeRange, VideoParams};
use glam::{DMat4, DVec2, DVec3, DVec4};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::job::{AudioJob, AudioSource};
use crate::node::NodeId;
use crate::texture::TexturePtr;

// ── Types ───────────────────────────────────────────────────────

/// Data type of a value or input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeValueType {
    #[default]
    None,
    Int,
    Float,
    Rational,
    Boolean,
    /// Always in the reference color space when passed between nodes.
    Color,
    Matrix,
    Text,
    Font,
    File,
    Texture,
    Samples,
    Vec2,
    Vec3,
    Vec4,
    Bezier,
    Combo,
    VideoParams,
    AudioParams,
    SubtitleParams,
    Binary,
}

impl NodeValueType {
    pub const ALL: [NodeValueType; 21] = [
        Self::None,
        Self::Int,
        Self::Float,
        Self::Rational,
        Self::Boolean,
        Self::Color,
        Self::Matrix,
        Self::Text,
        Self::Font,
        Self::File,
        Self::Texture,
        Self::Samples,
        Self::Vec2,
        Self::Vec3,
        Self::Vec4,
        Self::Bezier,
        Self::Combo,
        Self::VideoParams,
        Self::AudioParams,
        Self::SubtitleParams,
        Self::Binary,
    ];

    /// Whether keyframes of this type blend between values instead of stepping.
    pub fn can_be_interpolated(self) -> bool {
        matches!(
            self,
            Self::Float
                | Self::Vec2
                | Self::Vec3
                | Self::Vec4
                | Self::Bezier
                | Self::Color
                | Self::Rational
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int | Self::Rational)
    }

    pub fn is_vector(self) -> bool {
        matches!(self, Self::Vec2 | Self::Vec3 | Self::Vec4)
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, Self::Texture | Self::Samples)
    }

    /// Number of keyframe tracks a value of this type is split into.
    pub fn track_count(self) -> usize {
        match self {
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Color => 4,
            Self::Bezier => 6,
            _ => 1,
        }
    }

    /// Neutral payload for this type.
    pub fn default_data(self) -> NodeValueData {
        match self {
            Self::None | Self::Texture | Self::Samples => NodeValueData::None,
            Self::Int => NodeValueData::Int(0),
            Self::Float => NodeValueData::Float(0.0),
            Self::Rational => NodeValueData::Rational(RationalTime::ZERO),
            Self::Boolean => NodeValueData::Boolean(false),
            Self::Color => NodeValueData::Color(Color::TRANSPARENT),
            Self::Matrix => NodeValueData::Matrix(DMat4::IDENTITY),
            Self::Text | Self::Font | Self::File => NodeValueData::Text(String::new()),
            Self::Vec2 => NodeValueData::Vec2(DVec2::ZERO),
            Self::Vec3 => NodeValueData::Vec3(DVec3::ZERO),
            Self::Vec4 => NodeValueData::Vec4(DVec4::ZERO),
            Self::Bezier => NodeValueData::Bezier(Bezier::default()),
            Self::Combo => NodeValueData::Int(0),
            Self::VideoParams => NodeValueData::VideoParams(VideoParams::default()),
            Self::AudioParams => NodeValueData::AudioParams(AudioParams::default()),
            Self::SubtitleParams => NodeValueData::SubtitleParams(SubtitleParams::default()),
            Self::Binary => NodeValueData::Binary(Arc::new(Vec::new())),
        }
    }

    /// Stable lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Int => "int",
            Self::Float => "float",
            Self::Rational => "rational",
            Self::Boolean => "bool",
            Self::Color => "color",
            Self::Matrix => "matrix",
            Self::Text => "text",
            Self::Font => "font",
            Self::File => "file",
            Self::Texture => "texture",
            Self::Samples => "samples",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Bezier => "bezier",
            Self::Combo => "combo",
            Self::VideoParams => "vparam",
            Self::AudioParams => "aparam",
            Self::SubtitleParams => "sparam",
            Self::Binary => "binary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for NodeValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A point on a path with two control handles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bezier {
    pub x: f64,
    pub y: f64,
    pub cp1_x: f64,
    pub cp1_y: f64,
    pub cp2_x: f64,
    pub cp2_y: f64,
}

/// Subtitle lines active in a stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubtitleParams {
    pub stream_index: i32,
    pub entries: Vec<(TimeRange, String)>,
}

// ── Payload ─────────────────────────────────────────────────────

/// Per-element values of an array input.
pub type NodeValueArray = BTreeMap<i32, NodeValue>;
/// Per-element tables of an array input, before hint resolution.
pub type NodeValueTableArray = BTreeMap<i32, NodeValueTable>;

/// The payload of a value.
#[derive(Debug, Clone, Default)]
pub enum NodeValueData {
    #[default]
    None,
    Int(i64),
    Float(f64),
    Rational(RationalTime),
    Boolean(bool),
    Color(Color),
    Matrix(DMat4),
    Text(String),
    Texture(TexturePtr),
    Samples(AudioSource),
    Vec2(DVec2),
    Vec3(DVec3),
    Vec4(DVec4),
    Bezier(Bezier),
    VideoParams(VideoParams),
    AudioParams(AudioParams),
    SubtitleParams(SubtitleParams),
    Binary(Arc<Vec<u8>>),
    Array(NodeValueArray),
    TableArray(NodeValueTableArray),
}

impl PartialEq for NodeValueData {
    fn eq(&self, other: &Self) -> bool {
        use NodeValueData as D;
        match (self, other) {
            (D::None, D::None) => true,
            (D::Int(a), D::Int(b)) => a == b,
            (D::Float(a), D::Float(b)) => a == b,
            (D::Rational(a), D::Rational(b)) => a == b,
            (D::Boolean(a), D::Boolean(b)) => a == b,
            (D::Color(a), D::Color(b)) => a == b,
            (D::Matrix(a), D::Matrix(b)) => a == b,
            (D::Text(a), D::Text(b)) => a == b,
            (D::Texture(a), D::Texture(b)) => Arc::ptr_eq(a, b),
            (D::Samples(a), D::Samples(b)) => a == b,
            (D::Vec2(a), D::Vec2(b)) => a == b,
            (D::Vec3(a), D::Vec3(b)) => a == b,
            (D::Vec4(a), D::Vec4(b)) => a == b,
            (D::Bezier(a), D::Bezier(b)) => a == b,
            (D::VideoParams(a), D::VideoParams(b)) => a == b,
            (D::AudioParams(a), D::AudioParams(b)) => a == b,
            (D::SubtitleParams(a), D::SubtitleParams(b)) => a == b,
            (D::Binary(a), D::Binary(b)) => a == b,
            (D::Array(a), D::Array(b)) => a == b,
            (D::TableArray(a), D::TableArray(b)) => a == b,
            _ => false,
        }
    }
}

impl NodeValueData {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Numeric view used for interpolation. Non-numeric payloads read as 0.
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Rational(v) => v.to_f64(),
            Self::Boolean(v) => f64::from(u8::from(*v)),
            _ => 0.0,
        }
    }

    pub fn to_i64(&self) -> i64 {
        match self {
            Self::Int(v) => *v,
            Self::Float(v) => v.round() as i64,
            Self::Rational(v) => v.to_f64().round() as i64,
            Self::Boolean(v) => i64::from(*v),
            _ => 0,
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Self::Boolean(v) => *v,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            _ => false,
        }
    }

    pub fn to_rational(&self) -> RationalTime {
        match self {
            Self::Rational(v) => *v,
            Self::Int(v) => RationalTime::from_integer(*v),
            Self::Float(v) => RationalTime::from_f64(*v),
            _ => RationalTime::ZERO,
        }
    }

    pub fn to_color(&self) -> Color {
        match self {
            Self::Color(c) => *c,
            Self::Vec4(v) => Color::new(v.x as f32, v.y as f32, v.z as f32, v.w as f32),
            _ => Color::TRANSPARENT,
        }
    }

    pub fn to_vec2(&self) -> DVec2 {
        match self {
            Self::Vec2(v) => *v,
            Self::Vec3(v) => v.truncate(),
            Self::Vec4(v) => v.truncate().truncate(),
            _ => DVec2::ZERO,
        }
    }

    pub fn to_matrix(&self) -> DMat4 {
        match self {
            Self::Matrix(m) => *m,
            _ => DMat4::IDENTITY,
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Rational(v) => v.to_string(),
            Self::Boolean(v) => v.to_string(),
            _ => String::new(),
        }
    }

    pub fn to_texture(&self) -> Option<TexturePtr> {
        match self {
            Self::Texture(t) => Some(Arc::clone(t)),
            _ => None,
        }
    }

    /// Resolved sample data, if this payload carries any.
    pub fn to_samples(&self) -> Option<Arc<SampleBuffer>> {
        match self {
            Self::Samples(AudioSource::Buffer(b)) => Some(Arc::clone(b)),
            _ => None,
        }
    }

    pub fn to_audio_job(&self) -> Option<Arc<AudioJob>> {
        match self {
            Self::Samples(AudioSource::Job(j)) => Some(Arc::clone(j)),
            _ => None,
        }
    }

    pub fn to_video_params(&self) -> Option<VideoParams> {
        match self {
            Self::VideoParams(p) => Some(*p),
            _ => None,
        }
    }

    pub fn to_audio_params(&self) -> Option<AudioParams> {
        match self {
            Self::AudioParams(p) => Some(*p),
            _ => None,
        }
    }

    pub fn to_array(&self) -> Option<&NodeValueArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

// ── Split values ────────────────────────────────────────────────

/// One payload per keyframe track.
pub type SplitValue = SmallVec<[NodeValueData; 4]>;

/// Break a value into one scalar per keyframe track.
pub fn split_normal_value_into_track_values(ty: NodeValueType, value: &NodeValueData) -> SplitValue {
    let f = NodeValueData::Float;
    match ty {
        NodeValueType::Vec2 => {
            let v = value.to_vec2();
            SplitValue::from_iter([f(v.x), f(v.y)])
        }
        NodeValueType::Vec3 => {
            let v = match value {
                NodeValueData::Vec3(v) => *v,
                _ => DVec3::ZERO,
            };
            SplitValue::from_iter([f(v.x), f(v.y), f(v.z)])
        }
        NodeValueType::Vec4 => {
            let v = match value {
                NodeValueData::Vec4(v) => *v,
                _ => DVec4::ZERO,
            };
            SplitValue::from_iter([f(v.x), f(v.y), f(v.z), f(v.w)])
        }
        NodeValueType::Color => {
            let c = value.to_color();
            SplitValue::from_iter([
                f(c.r as f64),
                f(c.g as f64),
                f(c.b as f64),
                f(c.a as f64),
            ])
        }
        NodeValueType::Bezier => {
            let b = match value {
                NodeValueData::Bezier(b) => *b,
                _ => Bezier::default(),
            };
            SplitValue::from_iter([f(b.x), f(b.y), f(b.cp1_x), f(b.cp1_y), f(b.cp2_x), f(b.cp2_y)])
        }
        _ => SplitValue::from_iter([value.clone()]),
    }
}

/// Inverse of [`split_normal_value_into_track_values`].
pub fn combine_track_values_into_normal_value(ty: NodeValueType, split: &[NodeValueData]) -> NodeValueData {
    if split.is_empty() {
        return NodeValueData::None;
    }
    let at = |i: usize| split.get(i).map(NodeValueData::to_f64).unwrap_or(0.0);
    match ty {
        NodeValueType::Vec2 => NodeValueData::Vec2(DVec2::new(at(0), at(1))),
        NodeValueType::Vec3 => NodeValueData::Vec3(DVec3::new(at(0), at(1), at(2))),
        NodeValueType::Vec4 => NodeValueData::Vec4(DVec4::new(at(0), at(1), at(2), at(3))),
        NodeValueType::Color => NodeValueData::Color(Color::new(
            at(0) as f32,
            at(1) as f32,
            at(2) as f32,
            at(3) as f32,
        )),
        NodeValueType::Bezier => NodeValueData::Bezier(Bezier {
            x: at(0),
            y: at(1),
            cp1_x: at(2),
            cp1_y: at(3),
            cp2_x: at(4),
            cp2_y: at(5),
        }),
        _ => split[0].clone(),
    }
}

// ── NodeValue ───────────────────────────────────────────────────

/// A typed, tagged value.
#[derive(Debug, Clone, Default)]
pub struct NodeValue {
    ty: NodeValueType,
    data: NodeValueData,
    source: Option<NodeId>,
    array: bool,
    tag: String,
}

impl PartialEq for NodeValue {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.tag == other.tag && self.data == other.data
    }
}

impl NodeValue {
    pub fn new(ty: NodeValueType, data: NodeValueData, source: Option<NodeId>) -> Self {
        Self {
            ty,
            data,
            source,
            array: false,
            tag: String::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_array(mut self, array: bool) -> Self {
        self.array = array;
        self
    }

    pub fn ty(&self) -> NodeValueType {
        self.ty
    }

    pub fn data(&self) -> &NodeValueData {
        &self.data
    }

    pub fn into_data(self) -> NodeValueData {
        self.data
    }

    pub fn set_data(&mut self, data: NodeValueData) {
        self.data = data;
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn array(&self) -> bool {
        self.array
    }

    /// `false` for the empty value returned by failed lookups.
    pub fn is_valid(&self) -> bool {
        self.ty != NodeValueType::None || !self.data.is_none()
    }

    pub fn to_f64(&self) -> f64 {
        self.data.to_f64()
    }

    pub fn to_i64(&self) -> i64 {
        self.data.to_i64()
    }

    pub fn to_bool(&self) -> bool {
        self.data.to_bool()
    }

    pub fn to_rational(&self) -> RationalTime {
        self.data.to_rational()
    }

    pub fn to_color(&self) -> Color {
        self.data.to_color()
    }

    pub fn to_vec2(&self) -> DVec2 {
        self.data.to_vec2()
    }

    pub fn to_matrix(&self) -> DMat4 {
        self.data.to_matrix()
    }

    pub fn to_text(&self) -> String {
        self.data.to_text()
    }

    pub fn to_texture(&self) -> Option<TexturePtr> {
        self.data.to_texture()
    }

    pub fn to_samples(&self) -> Option<Arc<SampleBuffer>> {
        self.data.to_samples()
    }

    pub fn to_array(&self) -> Option<&NodeValueArray> {
        self.data.to_array()
    }
}

// ── Tables ──────────────────────────────────────────────────────

/// Ordered stack of values; the end is the most recent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeValueTable {
    values: Vec<NodeValue>,
}

impl NodeValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent value of one of `types`, preferring one tagged `tag`.
    ///
    /// Returns the empty value when nothing matches.
    pub fn get(&self, types: &[NodeValueType], tag: &str) -> NodeValue {
        self.get_value_index(types, tag)
            .map(|i| self.values[i].clone())
            .unwrap_or_default()
    }

    pub fn get_one(&self, ty: NodeValueType) -> NodeValue {
        self.get(&[ty], "")
    }

    /// Like [`get`](Self::get) but removes the value from the table.
    pub fn take(&mut self, types: &[NodeValueType], tag: &str) -> NodeValue {
        match self.get_value_index(types, tag) {
            Some(i) => self.values.remove(i),
            None => NodeValue::default(),
        }
    }

    pub fn take_at(&mut self, index: usize) -> NodeValue {
        if index < self.values.len() {
            self.values.remove(index)
        } else {
            NodeValue::default()
        }
    }

    pub fn has(&self, ty: NodeValueType) -> bool {
        self.values.iter().rev().any(|v| v.ty == ty)
    }

    /// Remove the most recent value equal to `v`.
    pub fn remove(&mut self, v: &NodeValue) {
        if let Some(i) = self.values.iter().rposition(|c| c == v) {
            self.values.remove(i);
        }
    }

    pub fn push(&mut self, value: NodeValue) {
        self.values.push(value);
    }

    pub fn push_value(&mut self, ty: NodeValueType, data: NodeValueData, source: Option<NodeId>) {
        self.values.push(NodeValue::new(ty, data, source));
    }

    pub fn prepend(&mut self, value: NodeValue) {
        self.values.insert(0, value);
    }

    pub fn at(&self, index: usize) -> Option<&NodeValue> {
        self.values.get(index)
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn values(&self) -> &[NodeValue] {
        &self.values
    }

    /// Index of the best match scanning from the most recent value.
    ///
    /// The first type match stops the scan when no tag is requested or the
    /// tag matches. When a tag is requested but never found, the oldest
    /// type match is returned.
    pub fn get_value_index(&self, types: &[NodeValueType], tag: &str) -> Option<usize> {
        let mut index = None;
        for (i, v) in self.values.iter().enumerate().rev() {
            if types.contains(&v.ty) {
                index = Some(i);
                if tag.is_empty() || tag == v.tag {
                    break;
                }
            }
        }
        index
    }

    /// Interleave tables row by row from their most recent value.
    pub fn merge(tables: Vec<NodeValueTable>) -> NodeValueTable {
        if tables.len() == 1 {
            return tables.into_iter().next().unwrap_or_default();
        }

        let mut merged = NodeValueTable::new();
        let longest = tables.iter().map(NodeValueTable::count).max().unwrap_or(0);
        for row in 0..longest {
            for t in &tables {
                if row < t.count() {
                    merged.prepend(t.values[t.count() - 1 - row].clone());
                }
            }
        }
        merged
    }
}

impl fmt::Display for NodeValueTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v.ty)?;
            if !v.tag.is_empty() {
                write!(f, ":{}", v.tag)?;
            }
        }
        write!(f, "]")
    }
}

/// Resolved input values keyed by input id.
pub type NodeValueRow = HashMap<String, NodeValue>;

/// One table per input, in input declaration order.
#[derive(Debug, Clone, Default)]
pub struct NodeValueDatabase {
    tables: Vec<(String, NodeValueTable)>,
}

impl NodeValueDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, input: impl Into<String>, table: NodeValueTable) {
        let input = input.into();
        match self.tables.iter_mut().find(|(id, _)| *id == input) {
            Some((_, t)) => *t = table,
            None => self.tables.push((input, table)),
        }
    }

    pub fn get(&self, input: &str) -> Option<&NodeValueTable> {
        self.tables.iter().find(|(id, _)| id == input).map(|(_, t)| t)
    }

    pub fn get_mut(&mut self, input: &str) -> Option<&mut NodeValueTable> {
        self.tables
            .iter_mut()
            .find(|(id, _)| id == input)
            .map(|(_, t)| t)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut NodeValueTable)> {
        self.tables.iter_mut().map(|(id, t)| (id.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Everything left in the input tables, interleaved into one.
    pub fn merge(&self) -> NodeValueTable {
        NodeValueTable::merge(self.tables.iter().map(|(_, t)| t.clone()).collect())
    }
}
