//! Deferred work descriptions.
//!
//! A job captures the evaluated inputs of the node that created it plus
//! whatever extra fields the operation needs. Once built it is never mutated,
//! so it can be resolved on any render thread without touching the graph.

use cinegraph_core::{
    AudioParams, ColorProcessorPtr, RationalTime, SampleBuffer, TimeRange, VideoParams,
};
use glam::DMat4;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::shader::{BuiltinShader, Interpolation};
use crate::value::{NodeValue, NodeValueRow};

// ── Common values ───────────────────────────────────────────────

/// Input values shared by every job kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceleratedJob {
    values: NodeValueRow,
}

impl AcceleratedJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_row(row: &NodeValueRow) -> Self {
        Self { values: row.clone() }
    }

    /// Value for `input`, or the empty value.
    pub fn get(&self, input: &str) -> NodeValue {
        self.values.get(input).cloned().unwrap_or_default()
    }

    pub fn contains(&self, input: &str) -> bool {
        self.values.contains_key(input)
    }

    pub fn insert(&mut self, input: impl Into<String>, value: NodeValue) {
        self.values.insert(input.into(), value);
    }

    /// Copy `input` from a row if present.
    pub fn insert_from(&mut self, input: &str, row: &NodeValueRow) {
        if let Some(v) = row.get(input) {
            self.values.insert(input.to_string(), v.clone());
        }
    }

    pub fn insert_row(&mut self, row: &NodeValueRow) {
        for (k, v) in row {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn values(&self) -> &NodeValueRow {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut NodeValueRow {
        &mut self.values
    }
}

/// Access to the shared input values of a job.
pub trait Job {
    fn accelerated(&self) -> &AcceleratedJob;
    fn accelerated_mut(&mut self) -> &mut AcceleratedJob;

    fn get(&self, input: &str) -> NodeValue {
        self.accelerated().get(input)
    }

    fn insert(&mut self, input: impl Into<String>, value: NodeValue)
    where
        Self: Sized,
    {
        self.accelerated_mut().insert(input, value);
    }

    fn values(&self) -> &NodeValueRow {
        self.accelerated().values()
    }
}

macro_rules! impl_job {
    ($t:ty) => {
        impl Job for $t {
            fn accelerated(&self) -> &AcceleratedJob {
                &self.values
            }

            fn accelerated_mut(&mut self) -> &mut AcceleratedJob {
                &mut self.values
            }
        }
    };
}

// ── Video jobs ──────────────────────────────────────────────────

/// Run a shader over the job's texture inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderJob {
    values: AcceleratedJob,
    shader_id: String,
    iterations: u32,
    iterative_input: Option<String>,
    interpolation: HashMap<String, Interpolation>,
}

impl ShaderJob {
    pub fn new(shader_id: impl Into<String>) -> Self {
        Self {
            values: AcceleratedJob::new(),
            shader_id: shader_id.into(),
            iterations: 1,
            iterative_input: None,
            interpolation: HashMap::new(),
        }
    }

    /// A job carrying every value of `row`.
    pub fn from_row(shader_id: impl Into<String>, row: &NodeValueRow) -> Self {
        let mut job = Self::new(shader_id);
        job.values.insert_row(row);
        job
    }

    pub fn builtin(shader: BuiltinShader, row: &NodeValueRow) -> Self {
        Self::from_row(shader.id(), row)
    }

    pub fn shader_id(&self) -> &str {
        &self.shader_id
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn iterative_input(&self) -> Option<&str> {
        self.iterative_input.as_deref()
    }

    /// Run the shader `iterations` times, feeding each pass back into `input`.
    pub fn set_iterations(&mut self, iterations: u32, input: impl Into<String>) {
        self.iterations = iterations.max(1);
        self.iterative_input = Some(input.into());
    }

    pub fn interpolation(&self, input: &str) -> Interpolation {
        self.interpolation.get(input).copied().unwrap_or_default()
    }

    pub fn set_interpolation(&mut self, input: impl Into<String>, interp: Interpolation) {
        self.interpolation.insert(input.into(), interp);
    }
}

impl_job!(ShaderJob);

/// Alpha channel handling for generated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaChannelSetting {
    #[default]
    Default,
    Required,
    Forbidden,
}

/// Produce pixels on the CPU through the node's `generate_frame`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateJob {
    values: AcceleratedJob,
    alpha_channel: AlphaChannelSetting,
}

impl GenerateJob {
    pub fn from_row(row: &NodeValueRow) -> Self {
        Self {
            values: AcceleratedJob::from_row(row),
            alpha_channel: AlphaChannelSetting::Default,
        }
    }

    pub fn alpha_channel(&self) -> AlphaChannelSetting {
        self.alpha_channel
    }

    pub fn set_alpha_channel(&mut self, setting: AlphaChannelSetting) {
        self.alpha_channel = setting;
    }
}

impl_job!(GenerateJob);

/// Convert a texture between color spaces, optionally through a matrix.
#[derive(Debug, Clone)]
pub struct ColorTransformJob {
    values: AcceleratedJob,
    input: NodeValue,
    processor: ColorProcessorPtr,
    matrix: Option<DMat4>,
    input_premultiplied: bool,
}

impl ColorTransformJob {
    pub fn new(input: NodeValue, processor: ColorProcessorPtr) -> Self {
        Self {
            values: AcceleratedJob::new(),
            input,
            processor,
            matrix: None,
            input_premultiplied: true,
        }
    }

    pub fn input_texture(&self) -> &NodeValue {
        &self.input
    }

    pub fn input_texture_mut(&mut self) -> &mut NodeValue {
        &mut self.input
    }

    pub fn processor(&self) -> &ColorProcessorPtr {
        &self.processor
    }

    /// Cache key of the color conversion.
    pub fn id(&self) -> &str {
        self.processor.id()
    }

    pub fn matrix(&self) -> Option<DMat4> {
        self.matrix
    }

    pub fn set_matrix(&mut self, matrix: DMat4) {
        self.matrix = Some(matrix);
    }

    pub fn input_premultiplied(&self) -> bool {
        self.input_premultiplied
    }

    pub fn set_input_premultiplied(&mut self, e: bool) {
        self.input_premultiplied = e;
    }
}

impl PartialEq for ColorTransformJob {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
            && self.input == other.input
            && self.processor.id() == other.processor.id()
            && self.matrix == other.matrix
    }
}

impl_job!(ColorTransformJob);

/// How footage behaves outside its own length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopMode {
    /// Nothing outside the footage.
    #[default]
    Off,
    Loop,
    /// Hold the first/last frame.
    Clamp,
}

/// Read video or audio from a file through a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct FootageJob {
    pub time: TimeRange,
    pub decoder_id: String,
    pub filename: String,
    pub stream_index: i32,
    pub video_params: VideoParams,
    pub audio_params: AudioParams,
    /// Zero when unknown.
    pub length: RationalTime,
    pub loop_mode: LoopMode,
    pub cache_path: Option<PathBuf>,
}

impl FootageJob {
    pub fn new(time: TimeRange, decoder_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            time,
            decoder_id: decoder_id.into(),
            filename: filename.into(),
            stream_index: 0,
            video_params: VideoParams::default(),
            audio_params: AudioParams::default(),
            length: RationalTime::ZERO,
            loop_mode: LoopMode::Off,
            cache_path: None,
        }
    }

    /// Map a request time into the footage according to the loop mode.
    ///
    /// `None` means there is nothing to show at that time.
    pub fn adjusted_time(&self, time: RationalTime) -> Option<RationalTime> {
        if self.length <= RationalTime::ZERO {
            return Some(time);
        }
        match self.loop_mode {
            LoopMode::Off => {
                if time < RationalTime::ZERO || time >= self.length {
                    None
                } else {
                    Some(time)
                }
            }
            LoopMode::Clamp => {
                let last = self.length - self.video_params.timebase;
                Some(time.max(RationalTime::ZERO).min(last.max(RationalTime::ZERO)))
            }
            LoopMode::Loop => {
                let cycles = (time / self.length).to_timestamp(RationalTime::from_integer(1), cinegraph_core::Rounding::Floor);
                Some(time - self.length * cycles)
            }
        }
    }
}

/// Load a previously rendered frame, falling back to another value.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheJob {
    filename: PathBuf,
    fallback: NodeValue,
}

impl CacheJob {
    pub fn new(filename: impl Into<PathBuf>, fallback: NodeValue) -> Self {
        Self {
            filename: filename.into(),
            fallback,
        }
    }

    pub fn filename(&self) -> &PathBuf {
        &self.filename
    }

    pub fn fallback(&self) -> &NodeValue {
        &self.fallback
    }

    pub fn fallback_mut(&mut self) -> &mut NodeValue {
        &mut self.fallback
    }
}

/// Any job that resolves to a texture.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoJob {
    Shader(ShaderJob),
    Generate(GenerateJob),
    ColorTransform(ColorTransformJob),
    Footage(FootageJob),
    Cache(CacheJob),
}

impl From<ShaderJob> for VideoJob {
    fn from(j: ShaderJob) -> Self {
        Self::Shader(j)
    }
}

impl From<GenerateJob> for VideoJob {
    fn from(j: GenerateJob) -> Self {
        Self::Generate(j)
    }
}

impl From<ColorTransformJob> for VideoJob {
    fn from(j: ColorTransformJob) -> Self {
        Self::ColorTransform(j)
    }
}

impl From<FootageJob> for VideoJob {
    fn from(j: FootageJob) -> Self {
        Self::Footage(j)
    }
}

impl From<CacheJob> for VideoJob {
    fn from(j: CacheJob) -> Self {
        Self::Cache(j)
    }
}

// ── Audio jobs ──────────────────────────────────────────────────

/// Per-sample processing of a buffer through the node's `process_samples`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleJob {
    values: AcceleratedJob,
    samples: Arc<SampleBuffer>,
    time: TimeRange,
}

impl SampleJob {
    /// Build from a row, taking the buffer from `samples_input` and keeping
    /// every other input as a per-sample parameter.
    pub fn new(time: TimeRange, samples_input: &str, row: &NodeValueRow) -> Self {
        let samples = row
            .get(samples_input)
            .and_then(NodeValue::to_samples)
            .unwrap_or_default();
        let mut values = AcceleratedJob::new();
        for (k, v) in row {
            if k != samples_input {
                values.insert(k.clone(), v.clone());
            }
        }
        Self {
            values,
            samples,
            time,
        }
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    pub fn time(&self) -> TimeRange {
        self.time
    }
}

impl_job!(SampleJob);

#[derive(Debug, Clone, PartialEq)]
pub enum AudioJob {
    Sample(SampleJob),
    Footage(FootageJob),
}

/// Payload of a samples value.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Buffer(Arc<SampleBuffer>),
    Job(Arc<AudioJob>),
}

impl AudioSource {
    pub fn buffer(buffer: SampleBuffer) -> Self {
        Self::Buffer(Arc::new(buffer))
    }

    pub fn job(job: AudioJob) -> Self {
        Self::Job(Arc::new(job))
    }

    pub fn is_job(&self) -> bool {
        matches!(self, Self::Job(_))
    }
}

impl PartialEq for AudioSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            (Self::Job(a), Self::Job(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
