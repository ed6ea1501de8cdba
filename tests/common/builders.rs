//! Test graph and pipeline builders

use mlpipe_rs::backend::{MemoryEngine, MemoryGraphBuilder};
use mlpipe_rs::config::{DispatchMode, RegistryConfig};
use mlpipe_rs::pipeline::{GraphId, Pipeline};
use mlpipe_rs::types::{ElementRole, TensorInfo, TensorType, TensorsInfo};
use std::sync::Arc;

/// Frame size of the `src` element in [`standard_graph`]
pub const FRAME_BYTES: usize = 8;

/// `src` (app source, 8-byte frames) → `convert` (passive) → `valve` →
/// `switch` (switch output, pads `src_0`/`src_1`) → `sink_a` (sink) /
/// `sink_b` (app sink)
pub fn standard_graph() -> MemoryGraphBuilder {
    MemoryGraphBuilder::new()
        .element("src", ElementRole::AppSrc)
        .tensors("src", frame_info())
        .passive("convert")
        .element("valve", ElementRole::Valve)
        .element("switch", ElementRole::SwitchOutput)
        .switch_pads("switch", &["src_0", "src_1"])
        .element("sink_a", ElementRole::Sink)
        .element("sink_b", ElementRole::AppSink)
        .link("src", "convert")
        .link("convert", "valve")
        .link("valve", "switch")
        .link_pad("switch", "sink_a", "src_0")
        .link_pad("switch", "sink_b", "src_1")
}

pub fn frame_info() -> TensorsInfo {
    TensorsInfo::new(vec![TensorInfo::new(TensorType::UInt8, &[FRAME_BYTES as u32])])
}

/// A pipeline over a `MemoryEngine`, with the engine kept for inspection
pub struct PipelineFixture {
    pub engine: Arc<MemoryEngine>,
    pub graph: GraphId,
    pub pipeline: Pipeline,
}

/// Builder for [`PipelineFixture`]
pub struct PipelineFixtureBuilder {
    graph: MemoryGraphBuilder,
    config: RegistryConfig,
}

impl PipelineFixtureBuilder {
    pub fn new() -> Self {
        Self {
            graph: standard_graph(),
            config: RegistryConfig::default(),
        }
    }

    pub fn graph(mut self, graph: MemoryGraphBuilder) -> Self {
        self.graph = graph;
        self
    }

    pub fn queued(mut self, capacity: usize) -> Self {
        self.config.dispatch.mode = DispatchMode::Queued;
        self.config.dispatch.queue_capacity = capacity;
        self
    }

    pub fn eager(mut self) -> Self {
        self.config.eager_entries = true;
        self
    }

    pub fn build(self) -> PipelineFixture {
        let engine = Arc::new(MemoryEngine::new());
        let graph = engine.instantiate(self.graph);
        let pipeline = Pipeline::with_config(engine.clone(), graph, self.config)
            .expect("wrap memory graph");
        PipelineFixture {
            engine,
            graph,
            pipeline,
        }
    }
}

/// Standard graph with default configuration
pub fn standard_fixture() -> PipelineFixture {
    PipelineFixtureBuilder::new().build()
}

/// Single sink graph: `src` → `sink`
pub fn sink_only_graph() -> MemoryGraphBuilder {
    MemoryGraphBuilder::new()
        .element("src", ElementRole::AppSrc)
        .element("sink", ElementRole::Sink)
        .link("src", "sink")
}
