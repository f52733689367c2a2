//! Graph evaluation over a time range.
//!
//! [`NodeTraverser`] turns `(node, range)` into a [`NodeValueTable`] by
//! recursively evaluating connected inputs. Values backed by jobs are handed
//! to a [`JobProcessor`]; the default hooks do nothing, so a traverser with
//! [`NullProcessor`] only describes work without running it.

use cinegraph_core::{
    AudioParams, CancelAtomPtr, RationalTime, SampleBuffer, TimeRange, VideoParams,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::job::{
    AudioJob, AudioSource, CacheJob, ColorTransformJob, FootageJob, GenerateJob, Job, LoopMode,
    SampleJob, ShaderJob, VideoJob,
};
use crate::input::ValueHint;
use crate::node::{Node, NodeGlobals, NodeId};
use crate::project::Project;
use crate::texture::{Texture, TexturePtr};
use crate::value::{
    NodeValue, NodeValueArray, NodeValueData, NodeValueDatabase, NodeValueRow, NodeValueTable,
    NodeValueTableArray, NodeValueType,
};

// ── Processor hooks ─────────────────────────────────────────────

/// Executes deferred jobs found while traversing.
///
/// Every hook defaults to doing nothing; `create_texture` hands back a
/// placeholder and `create_sample_buffer` an unallocated buffer.
pub trait JobProcessor {
    fn create_texture(&mut self, params: &VideoParams) -> TexturePtr {
        Texture::dummy(params.clone())
    }

    fn create_sample_buffer(&mut self, _params: &AudioParams, _sample_count: usize) -> SampleBuffer {
        SampleBuffer::default()
    }

    fn process_shader(&mut self, _node: &Node, _job: &ShaderJob, _dest: &TexturePtr) {}

    fn process_color_transform(&mut self, _node: &Node, _job: &ColorTransformJob, _dest: &TexturePtr) {}

    fn process_frame_generation(&mut self, _node: &Node, _job: &GenerateJob, _dest: &TexturePtr) {}

    fn process_video_footage(&mut self, _job: &FootageJob, _time: RationalTime, _dest: &TexturePtr) {}

    fn process_audio_footage(&mut self, _job: &FootageJob, _range: TimeRange, _dest: &mut SampleBuffer) {}

    /// A texture loaded from a cache file, or `None` to use the fallback.
    fn process_video_cache_job(&mut self, _job: &CacheJob) -> Option<TexturePtr> {
        None
    }
}

/// Leaves every job unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProcessor;

impl JobProcessor for NullProcessor {}

// ── Traverser ───────────────────────────────────────────────────

pub struct NodeTraverser<'a, P: JobProcessor + ?Sized> {
    project: &'a Project,
    processor: &'a mut P,
    video_params: VideoParams,
    audio_params: AudioParams,
    loop_mode: LoopMode,
    cancel: Option<CancelAtomPtr>,
    value_cache: HashMap<(NodeId, TimeRange), NodeValueTable>,
    /// Keyed by the job texture's address; the job texture is kept alive
    /// alongside its result so the address cannot be reused.
    resolved: HashMap<usize, (TexturePtr, TexturePtr)>,
}

impl<'a, P: JobProcessor + ?Sized> NodeTraverser<'a, P> {
    pub fn new(project: &'a Project, processor: &'a mut P) -> Self {
        Self {
            project,
            processor,
            video_params: VideoParams::default(),
            audio_params: AudioParams::default(),
            loop_mode: LoopMode::Off,
            cancel: None,
            value_cache: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    pub fn with_video_params(mut self, params: VideoParams) -> Self {
        self.video_params = params;
        self
    }

    pub fn with_audio_params(mut self, params: AudioParams) -> Self {
        self.audio_params = params;
        self
    }

    pub fn with_loop_mode(mut self, mode: LoopMode) -> Self {
        self.loop_mode = mode;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelAtomPtr) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn video_params(&self) -> &VideoParams {
        &self.video_params
    }

    pub fn audio_params(&self) -> &AudioParams {
        &self.audio_params
    }

    pub fn project(&self) -> &'a Project {
        self.project
    }

    pub fn processor(&mut self) -> &mut P {
        self.processor
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn globals(&self, range: TimeRange) -> NodeGlobals {
        NodeGlobals {
            video_params: self.video_params.clone(),
            audio_params: self.audio_params,
            time: range,
            loop_mode: self.loop_mode,
        }
    }

    // ── Tables ──────────────────────────────────────────────────

    /// Evaluate `node` over `range`.
    ///
    /// A disabled node returns its merged inputs unchanged.
    pub fn generate_table(&mut self, node: NodeId, range: TimeRange) -> NodeValueTable {
        if self.is_cancelled() {
            return NodeValueTable::new();
        }
        if let Some(cached) = self.value_cache.get(&(node, range)) {
            return cached.clone();
        }
        let project = self.project;
        let Some(n) = project.node(node) else {
            warn!(%node, "Traversed to a missing node");
            return NodeValueTable::new();
        };
        trace!(%node, kind = n.kind_id(), %range, "Generating table");

        let mut database = self.generate_database(n, range);
        let table = if n.is_enabled() {
            let row = self.generate_row(&mut database, n, range);
            let mut table = database.merge();
            let globals = self.globals(range);
            n.kind().value(n, &row, &globals, &mut table);
            table
        } else {
            database.merge()
        };

        self.value_cache.insert((node, range), table.clone());
        table
    }

    /// One table per input, in declaration order.
    pub fn generate_database(&mut self, node: &Node, range: TimeRange) -> NodeValueDatabase {
        let mut database = NodeValueDatabase::new();
        for id in node.input_ids() {
            let table = self.process_input(node, &id, range);
            database.insert(id, table);
        }
        database
    }

    /// Pick and resolve one value per input out of `database`.
    pub fn generate_row(
        &mut self,
        database: &mut NodeValueDatabase,
        node: &Node,
        range: TimeRange,
    ) -> NodeValueRow {
        let mut row = NodeValueRow::new();
        for id in node.input_ids() {
            let value = match database.get_mut(&id) {
                Some(table) => self.generate_row_value(node, &id, table, range),
                None => NodeValue::default(),
            };
            row.insert(id, value);
        }
        row
    }

    /// Table of candidate values for an input.
    pub fn process_input(&mut self, node: &Node, input: &str, range: TimeRange) -> NodeValueTable {
        let adjusted = node.kind().input_time_adjustment(node, input, -1, range);

        if let Some(up) = node.connected_output(input, -1) {
            return self.generate_table(up, adjusted);
        }

        let ty = node.input_type(input);
        let mut table = NodeValueTable::new();
        if node.input_is_array(input) {
            let mut elements = NodeValueTableArray::new();
            for e in 0..node.input_array_size(input) as i32 {
                elements.insert(e, self.process_input_element(node, input, e, range));
            }
            table.push(
                NodeValue::new(ty, NodeValueData::TableArray(elements), Some(node.id()))
                    .with_array(true),
            );
        } else {
            table.push(NodeValue::new(
                ty,
                node.get_value_at_time(input, adjusted.in_point(), -1),
                Some(node.id()),
            ));
        }
        table
    }

    fn process_input_element(
        &mut self,
        node: &Node,
        input: &str,
        element: i32,
        range: TimeRange,
    ) -> NodeValueTable {
        let adjusted = node.kind().input_time_adjustment(node, input, element, range);
        if let Some(up) = node.connected_output(input, element) {
            return self.generate_table(up, adjusted);
        }
        let mut table = NodeValueTable::new();
        table.push(NodeValue::new(
            node.input_type(input),
            node.get_value_at_time(input, adjusted.in_point(), element),
            Some(node.id()),
        ));
        table
    }

    // ── Row values ──────────────────────────────────────────────

    /// The value an input sees, with array inputs flattened into one value.
    pub fn generate_row_value(
        &mut self,
        node: &Node,
        input: &str,
        table: &mut NodeValueTable,
        range: TimeRange,
    ) -> NodeValue {
        let value = self.generate_row_value_element(node, input, -1, table, range);
        if !value.array() {
            return value;
        }
        let NodeValueData::TableArray(elements) = value.data() else {
            return value;
        };

        let mut flattened = NodeValueArray::new();
        for (e, sub) in elements.clone() {
            let mut sub = sub;
            flattened.insert(
                e,
                self.generate_row_value_element(node, input, e, &mut sub, range),
            );
        }
        NodeValue::new(value.ty(), NodeValueData::Array(flattened), value.source()).with_array(true)
    }

    pub fn generate_row_value_element(
        &mut self,
        node: &Node,
        input: &str,
        element: i32,
        table: &mut NodeValueTable,
        range: TimeRange,
    ) -> NodeValue {
        let hint = node.value_hint(input, element);
        let index = Self::generate_row_value_element_index(&hint, node.input_type(input), table)
            .or_else(|| table.count().checked_sub(1));

        let Some(index) = index else {
            return NodeValue::default();
        };
        let mut value = table.take_at(index);
        self.resolve_jobs(&mut value, range);
        self.resolve_audio_jobs(&mut value, range);
        value
    }

    /// Position in `table` selected by `hint`, or `None`.
    pub fn generate_row_value_element_index(
        hint: &ValueHint,
        preferred: NodeValueType,
        table: &NodeValueTable,
    ) -> Option<usize> {
        let types: Vec<NodeValueType> = if hint.types.is_empty() {
            vec![preferred]
        } else {
            hint.types.clone()
        };

        if hint.index == -1 {
            return table.get_value_index(&types, &hint.tag);
        }

        let index = table.count() as i64 - 1 - i64::from(hint.index);
        if index < 0 {
            return None;
        }
        let index = index as usize;
        table
            .at(index)
            .filter(|v| types.contains(&v.ty()))
            .map(|_| index)
    }

    // ── Job resolution ──────────────────────────────────────────

    /// Replace a job-backed texture value with the processed texture.
    pub fn resolve_jobs(&mut self, value: &mut NodeValue, range: TimeRange) {
        let Some(tex) = value.to_texture() else {
            return;
        };
        if !tex.is_job() {
            return;
        }
        let resolved = self.resolve_texture(&tex, value.source(), range);
        value.set_data(NodeValueData::Texture(resolved));
    }

    fn resolve_job_values(&mut self, values: &mut NodeValueRow, range: TimeRange) {
        for v in values.values_mut() {
            self.resolve_jobs(v, range);
            self.resolve_audio_jobs(v, range);
        }
    }

    fn resolve_texture(&mut self, tex: &TexturePtr, source: Option<NodeId>, range: TimeRange) -> TexturePtr {
        let key = Arc::as_ptr(tex) as usize;
        if let Some((_, done)) = self.resolved.get(&key) {
            return Arc::clone(done);
        }
        let Some(job) = tex.as_job() else {
            return Arc::clone(tex);
        };

        let project = self.project;
        let node = source.and_then(|id| project.node(id));
        let params = tex.params().clone();
        let mut job = job.clone();

        let result = match &mut job {
            VideoJob::Shader(j) => {
                self.resolve_job_values(j.accelerated_mut().values_mut(), range);
                self.run_with_node(node, &params, |p, n, dest| p.process_shader(n, j, dest))
            }
            VideoJob::Generate(j) => {
                self.resolve_job_values(j.accelerated_mut().values_mut(), range);
                self.run_with_node(node, &params, |p, n, dest| p.process_frame_generation(n, j, dest))
            }
            VideoJob::ColorTransform(j) => {
                self.resolve_job_values(j.accelerated_mut().values_mut(), range);
                self.resolve_jobs(j.input_texture_mut(), range);
                self.run_with_node(node, &params, |p, n, dest| p.process_color_transform(n, j, dest))
            }
            VideoJob::Footage(j) => match j.adjusted_time(range.in_point()) {
                Some(time) => {
                    let dest = self.processor.create_texture(&params);
                    self.processor.process_video_footage(j, time, &dest);
                    dest
                }
                None => Texture::dummy(params),
            },
            VideoJob::Cache(j) => match self.processor.process_video_cache_job(j) {
                Some(t) => t,
                None => {
                    let fallback = j.fallback_mut();
                    self.resolve_jobs(fallback, range);
                    fallback
                        .to_texture()
                        .unwrap_or_else(|| Texture::dummy(params))
                }
            },
        };

        self.resolved
            .insert(key, (Arc::clone(tex), Arc::clone(&result)));
        result
    }

    fn run_with_node(
        &mut self,
        node: Option<&Node>,
        params: &VideoParams,
        f: impl FnOnce(&mut P, &Node, &TexturePtr),
    ) -> TexturePtr {
        let Some(node) = node else {
            warn!("Job has no source node, leaving it unresolved");
            return Texture::dummy(params.clone());
        };
        let dest = self.processor.create_texture(params);
        f(&mut *self.processor, node, &dest);
        dest
    }

    /// Replace a job-backed samples value with a processed buffer.
    pub fn resolve_audio_jobs(&mut self, value: &mut NodeValue, range: TimeRange) {
        let NodeValueData::Samples(AudioSource::Job(job)) = value.data() else {
            return;
        };
        let job = Arc::clone(job);
        let project = self.project;

        let buffer = match job.as_ref() {
            AudioJob::Sample(sample_job) => {
                let count = sample_job.samples().sample_count();
                let mut dest = self.processor.create_sample_buffer(&self.audio_params, count);
                match value.source().and_then(|id| project.node(id)) {
                    Some(node) => self.process_samples(node, range, sample_job, &mut dest),
                    None => warn!("Sample job has no source node"),
                }
                dest
            }
            AudioJob::Footage(footage) => {
                let count = self.audio_params.time_to_samples(range.length()).max(0) as usize;
                let mut dest = self.processor.create_sample_buffer(&self.audio_params, count);
                self.processor.process_audio_footage(footage, range, &mut dest);
                dest
            }
        };
        value.set_data(NodeValueData::Samples(AudioSource::buffer(buffer)));
    }

    /// Run the node's per-sample function, re-evaluating its other inputs
    /// at each sample's time.
    pub fn process_samples(
        &mut self,
        node: &Node,
        range: TimeRange,
        job: &SampleJob,
        dest: &mut SampleBuffer,
    ) {
        if !job.samples().is_allocated() || !dest.is_allocated() {
            return;
        }
        let rate = i64::from(self.audio_params.sample_rate.max(1));
        let inputs: Vec<String> = job.values().keys().cloned().collect();

        for i in 0..job.samples().sample_count() {
            if self.is_cancelled() {
                return;
            }
            let t = range.in_point() + RationalTime::new(i as i64, rate);
            let at = TimeRange::new(t, t);
            let mut row = NodeValueRow::new();
            for id in &inputs {
                let mut table = self.process_input(node, id, at);
                let v = self.generate_row_value(node, id, &mut table, at);
                row.insert(id.clone(), v);
            }
            node.kind()
                .process_samples(node, &row, job.samples(), dest, i);
        }
    }

    /// Drop memoized tables and resolved textures.
    pub fn clear_caches(&mut self) {
        self.value_cache.clear();
        self.resolved.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputDefinition, NodeInput};
    use crate::node::NodeKind;
    use crate::nodes::math::MathNode;
    use crate::nodes::merge::MergeNode;
    use crate::nodes::solid::SolidGenerator;
    use crate::nodes::value_node::ValueNode;
    use cinegraph_core::Color;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct SumArray;

    impl NodeKind for SumArray {
        fn id(&self) -> &'static str {
            "test.sum_array"
        }

        fn name(&self) -> &str {
            "Sum"
        }

        fn inputs(&self) -> Vec<InputDefinition> {
            vec![InputDefinition::of_type("values_in", "Values", NodeValueType::Float).array(3)]
        }

        fn value(&self, node: &Node, row: &NodeValueRow, _: &NodeGlobals, table: &mut NodeValueTable) {
            let sum: f64 = row
                .get("values_in")
                .and_then(NodeValue::to_array)
                .map(|a| a.values().map(NodeValue::to_f64).sum())
                .unwrap_or(0.0);
            table.push_value(NodeValueType::Float, NodeValueData::Float(sum), Some(node.id()));
        }

        fn clone_box(&self) -> Box<dyn NodeKind> {
            Box::new(self.clone())
        }
    }

    fn project() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        let p = Project::new(dir.path());
        (dir, p)
    }

    fn float(p: &mut Project, v: f64) -> NodeId {
        let id = p.add_node(Box::new(ValueNode::new(NodeValueType::Float)));
        p.set_standard_value(&NodeInput::whole(id, "value_in"), &NodeValueData::Float(v));
        id
    }

    #[test]
    fn test_connected_math() {
        let (_d, mut p) = project();
        let a = float(&mut p, 2.0);
        let b = float(&mut p, 3.0);
        let m = p.add_node(Box::new(MathNode::default()));
        p.connect_edge(a, NodeInput::whole(m, "a_in")).unwrap();
        p.connect_edge(b, NodeInput::whole(m, "b_in")).unwrap();

        let mut proc = NullProcessor;
        let mut t = NodeTraverser::new(&p, &mut proc);
        let table = t.generate_table(m, TimeRange::seconds(0, 1));
        assert_eq!(table.get_one(NodeValueType::Float).to_f64(), 5.0);
    }

    #[test]
    fn test_array_input_flattens() {
        let (_d, mut p) = project();
        let s = p.add_node(Box::new(SumArray));
        for (i, v) in [1.0, 2.0, 4.0].into_iter().enumerate() {
            p.set_standard_value(&NodeInput::new(s, "values_in", i as i32), &NodeValueData::Float(v));
        }
        let up = float(&mut p, 10.0);
        p.connect_edge(up, NodeInput::new(s, "values_in", 1)).unwrap();

        let mut proc = NullProcessor;
        let mut t = NodeTraverser::new(&p, &mut proc);
        let table = t.generate_table(s, TimeRange::seconds(0, 1));
        assert_eq!(table.get_one(NodeValueType::Float).to_f64(), 15.0);
    }

    #[test]
    fn test_disabled_node_passes_through() {
        let (_d, mut p) = project();
        let a = float(&mut p, 2.0);
        let m = p.add_node(Box::new(MathNode::default()));
        p.connect_edge(a, NodeInput::whole(m, "a_in")).unwrap();
        p.set_standard_value(&NodeInput::whole(m, "enabled_in"), &NodeValueData::Boolean(false));

        let mut proc = NullProcessor;
        let mut t = NodeTraverser::new(&p, &mut proc);
        let table = t.generate_table(m, TimeRange::seconds(0, 1));
        assert_eq!(table.get_one(NodeValueType::Float).to_f64(), 2.0);
    }

    #[test]
    fn test_null_processor_leaves_jobs() {
        let (_d, mut p) = project();
        let s = p.add_node(Box::new(SolidGenerator));
        p.set_standard_value(&NodeInput::whole(s, "color_in"), &NodeValueData::Color(Color::RED));

        let mut proc = NullProcessor;
        let mut t = NodeTraverser::new(&p, &mut proc);
        let table = t.generate_table(s, TimeRange::seconds(0, 1));
        let tex = table.get_one(NodeValueType::Texture).to_texture().unwrap();
        assert!(tex.is_job());
    }

    #[derive(Default)]
    struct CountingProcessor {
        shaders: usize,
        generated: usize,
    }

    impl JobProcessor for CountingProcessor {
        fn process_shader(&mut self, _: &Node, job: &ShaderJob, _: &TexturePtr) {
            // Inputs of a shader job are already resolved.
            for v in job.values().values() {
                if let Some(t) = v.to_texture() {
                    assert!(!t.is_job());
                }
            }
            self.shaders += 1;
        }

        fn process_frame_generation(&mut self, _: &Node, _: &GenerateJob, _: &TexturePtr) {
            self.generated += 1;
        }
    }

    #[test]
    fn test_nested_jobs_resolve_bottom_up() {
        let (_d, mut p) = project();
        let a = p.add_node(Box::new(SolidGenerator));
        let b = p.add_node(Box::new(SolidGenerator));
        let m = p.add_node(Box::new(MergeNode));
        p.connect_edge(a, NodeInput::whole(m, "base_in")).unwrap();
        p.connect_edge(b, NodeInput::whole(m, "blend_in")).unwrap();

        let mut proc = CountingProcessor::default();
        {
            let mut t = NodeTraverser::new(&p, &mut proc);
            let table = t.generate_table(m, TimeRange::seconds(0, 1));
            let mut v = table.get_one(NodeValueType::Texture);
            t.resolve_jobs(&mut v, TimeRange::seconds(0, 1));
            assert!(!v.to_texture().unwrap().is_job());
        }
        assert_eq!(proc.generated, 2);
        assert_eq!(proc.shaders, 1);
    }

    #[test]
    fn test_hint_index_counts_from_most_recent() {
        let mut table = NodeValueTable::new();
        table.push_value(NodeValueType::Float, NodeValueData::Float(1.0), None);
        table.push_value(NodeValueType::Float, NodeValueData::Float(2.0), None);
        table.push_value(NodeValueType::Text, NodeValueData::Text("x".into()), None);

        let by_type = ValueHint::default();
        assert_eq!(
            NodeTraverser::<NullProcessor>::generate_row_value_element_index(
                &by_type,
                NodeValueType::Float,
                &table
            ),
            Some(1)
        );

        let hint = ValueHint {
            types: vec![NodeValueType::Float],
            index: 2,
            tag: String::new(),
        };
        assert_eq!(
            NodeTraverser::<NullProcessor>::generate_row_value_element_index(
                &hint,
                NodeValueType::Float,
                &table
            ),
            Some(0)
        );

        let wrong = ValueHint {
            index: 0,
            ..hint
        };
        assert_eq!(
            NodeTraverser::<NullProcessor>::generate_row_value_element_index(
                &wrong,
                NodeValueType::Float,
                &table
            ),
            None
        );
    }
}
