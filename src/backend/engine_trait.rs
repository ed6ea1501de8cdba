//! DataflowEngine trait for the engine boundary
//!
//! The registry never executes buffers or negotiates formats itself. Every
//! interaction with the running graph goes through this trait, so real
//! engines and the in-process [`MemoryEngine`](super::MemoryEngine) are
//! interchangeable, and unit tests can substitute a mock.

use crate::pipeline::id::{GraphId, NodeId};
use crate::types::{ElementRole, HandleKind, PipelineState, TensorsData, TensorsInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Asynchronous notification raised by an element on an engine thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementEvent {
    /// A sink produced a new frame
    NewData,
    /// An application source wants more input
    NeedData,
    /// An application source has enough queued input
    EnoughData,
}

impl ElementEvent {
    /// The handle kind this event is routed to
    pub fn target(self) -> HandleKind {
        match self {
            ElementEvent::NewData => HandleKind::SinkListener,
            ElementEvent::NeedData | ElementEvent::EnoughData => HandleKind::SourceFeeder,
        }
    }
}

/// Receiver of engine-originated events.
///
/// The engine calls [`EventSink::on_event`] from its own threads; an
/// implementation must return promptly.
pub trait EventSink: Send + Sync {
    fn on_event(&self, node: NodeId, event: ElementEvent, payload: Arc<TensorsData>);
}

/// The upstream/downstream pads an element controls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePads {
    /// Output (source) pad name
    pub src: Option<String>,
    /// Input (sink) pad name
    pub sink: Option<String>,
}

/// Errors reported by an engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unknown graph {0}")]
    UnknownGraph(GraphId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown pad '{pad}' on node {node}")]
    UnknownPad { node: NodeId, pad: String },

    #[error("Operation not supported by node {node}: {operation}")]
    Unsupported { node: NodeId, operation: String },

    #[error("State change failed: {0}")]
    StateChange(String),

    #[error("Engine rejected request: {0}")]
    Rejected(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Unified interface to a dataflow engine
///
/// Implementations must be `Send + Sync`: the registry calls in from any
/// application thread.
///
/// # Example
///
/// ```ignore
/// fn is_sink(engine: &dyn DataflowEngine, graph: GraphId, name: &str) -> bool {
///     engine
///         .lookup_node_by_name(graph, name)
///         .and_then(|node| engine.node_role(graph, node))
///         .map(|role| role == ElementRole::Sink)
///         .unwrap_or(false)
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait DataflowEngine: Send + Sync {
    // --- Read-only queries ---

    /// Find a node by its element name
    fn lookup_node_by_name(&self, graph: GraphId, name: &str) -> Option<NodeId>;

    /// Role of a node, or `None` if the element is not controllable
    fn node_role(&self, graph: GraphId, node: NodeId) -> Option<ElementRole>;

    /// All nodes in the graph with their names
    fn list_nodes(&self, graph: GraphId) -> Vec<(String, NodeId)>;

    /// Pads the node controls
    fn node_pads(&self, graph: GraphId, node: NodeId) -> NodePads;

    /// Negotiated stream format of a node, if any
    fn node_tensors_info(&self, graph: GraphId, node: NodeId) -> Option<TensorsInfo>;

    /// Current state of the graph
    fn current_state(&self, graph: GraphId) -> EngineResult<PipelineState>;

    // --- Event subscription ---

    /// Route all element events of `graph` to `sink`
    fn subscribe(&self, graph: GraphId, sink: Arc<dyn EventSink>) -> EngineResult<()>;

    // --- Structural changes (called under the registry lock) ---

    fn set_state(&self, graph: GraphId, state: PipelineState) -> EngineResult<()>;

    fn remove_node(&self, graph: GraphId, node: NodeId) -> EngineResult<()>;

    /// Release the graph. Called exactly once per wrapped graph.
    fn graph_destroy(&self, graph: GraphId);

    // --- Control and data, forwarded from handles ---

    /// Feed one frame into an application source
    fn push_data(&self, graph: GraphId, node: NodeId, data: TensorsData) -> EngineResult<()>;

    fn set_valve_open(&self, graph: GraphId, node: NodeId, open: bool) -> EngineResult<()>;

    /// Selectable pads of a switch
    fn pad_names(&self, graph: GraphId, node: NodeId) -> EngineResult<Vec<String>>;

    fn select_pad(&self, graph: GraphId, node: NodeId, pad: &str) -> EngineResult<()>;
}
