//! CineGraph Node - the node graph and its evaluation
//!
//! Provides:
//! - Typed values, tables and rows passed between nodes
//! - Deferred jobs (shader, generate, color transform, footage, cache, samples)
//! - Keyframe tracks with linear, hold and bezier interpolation
//! - Nodes, their inputs and the `Project` graph that connects them
//! - `NodeTraverser` for evaluating a node over a time range
//! - Built-in node kinds and a factory for creating them by id

pub mod error;
pub mod factory;
pub mod input;
pub mod job;
pub mod keyframe;
pub mod node;
pub mod nodes;
pub mod project;
pub mod shader;
pub mod texture;
pub mod traverser;
pub mod value;

pub use error::{GraphError, Result};
pub use factory::NodeFactory;
pub use input::{
    InputDefinition, InputFlags, InputImmediate, KeyframeTrackReference, NodeInput, ValueHint,
};
pub use job::{
    AcceleratedJob, AlphaChannelSetting, AudioJob, AudioSource, CacheJob, ColorTransformJob,
    FootageJob, GenerateJob, Job, LoopMode, SampleJob, ShaderJob, VideoJob,
};
pub use keyframe::{Keyframe, KeyframeTrack, KeyframeType};
pub use node::{Node, NodeCaches, NodeCategory, NodeGlobals, NodeId, NodeKind, ENABLED_INPUT};
pub use project::{GraphEvent, Project, TransformDirection};
pub use shader::{BuiltinShader, Interpolation, ShaderCode, ShaderRequest, ShaderSource};
pub use texture::{NativeTexture, PixelSource, Texture, TextureHandle, TexturePtr};
pub use traverser::{JobProcessor, NodeTraverser, NullProcessor};
pub use value::{
    NodeValue, NodeValueArray, NodeValueData, NodeValueDatabase, NodeValueRow, NodeValueTable,
    NodeValueTableArray, NodeValueType, SplitValue,
};
