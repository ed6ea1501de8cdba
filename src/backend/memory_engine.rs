//! In-process dataflow engine
//!
//! This module provides an engine that keeps its graphs in memory. It is
//! used by the test suite, the benches and the demo binary, and doubles as
//! a reference for what the registry expects from a real engine.
//!
//! # Features
//!
//! - **Named nodes**: each node has a name, an optional role and pads
//! - **Links**: `push_data` on an app source follows links while the graph
//!   is playing; closed valves stop the frame, switches only route through
//!   their selected pad, sinks emit [`ElementEvent::NewData`]
//! - **Feeder events**: going to `Playing` emits [`ElementEvent::NeedData`]
//!   on every app source
//! - **Teardown accounting**: `graph_destroy` calls are counted per graph
//!
//! Events are emitted after the engine lock is released, so subscribers may
//! call back into the engine.
//!
//! # Example
//!
//! ```ignore
//! use mlpipe_rs::backend::{MemoryEngine, MemoryGraphBuilder};
//! use mlpipe_rs::types::ElementRole;
//!
//! let engine = MemoryEngine::new();
//! let graph = engine.instantiate(
//!     MemoryGraphBuilder::new()
//!         .element("src", ElementRole::AppSrc)
//!         .element("sink", ElementRole::Sink)
//!         .link("src", "sink"),
//! );
//! ```

use super::engine_trait::{
    DataflowEngine, ElementEvent, EngineError, EngineResult, EventSink, NodePads,
};
use crate::pipeline::id::{GraphId, NodeId};
use crate::types::{ElementRole, PipelineState, TensorsData, TensorsInfo};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A link between two nodes, optionally bound to a switch pad
#[derive(Debug, Clone)]
struct Link {
    from: NodeId,
    to: NodeId,
    pad: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryNode {
    name: String,
    role: Option<ElementRole>,
    pads: NodePads,
    tensors_info: Option<TensorsInfo>,
    removed: bool,
    valve_open: bool,
    switch_pads: Vec<String>,
    selected_pad: Option<String>,
    pushed_frames: u64,
}

impl MemoryNode {
    fn new(name: &str, role: Option<ElementRole>) -> Self {
        let pads = match role {
            Some(ElementRole::Sink) | Some(ElementRole::AppSink) => NodePads {
                src: None,
                sink: Some("sink".to_string()),
            },
            Some(ElementRole::AppSrc) => NodePads {
                src: Some("src".to_string()),
                sink: None,
            },
            Some(ElementRole::SwitchInput) => NodePads {
                src: Some("src".to_string()),
                sink: None,
            },
            Some(ElementRole::SwitchOutput) => NodePads {
                src: None,
                sink: Some("sink".to_string()),
            },
            Some(ElementRole::Valve) | None => NodePads {
                src: Some("src".to_string()),
                sink: Some("sink".to_string()),
            },
        };
        Self {
            name: name.to_string(),
            role,
            pads,
            tensors_info: None,
            removed: false,
            valve_open: true,
            switch_pads: Vec::new(),
            selected_pad: None,
            pushed_frames: 0,
        }
    }
}

struct MemoryGraph {
    nodes: Vec<MemoryNode>,
    by_name: HashMap<String, NodeId>,
    links: Vec<Link>,
    state: PipelineState,
    subscribers: Vec<Arc<dyn EventSink>>,
    destroyed: bool,
    destroy_calls: u32,
}

impl MemoryGraph {
    fn node(&self, node: NodeId) -> Option<&MemoryNode> {
        self.nodes.get(node.index()).filter(|n| !n.removed)
    }

    fn node_mut(&mut self, node: NodeId) -> EngineResult<&mut MemoryNode> {
        self.nodes
            .get_mut(node.index())
            .filter(|n| !n.removed)
            .ok_or(EngineError::UnknownNode(node))
    }

    /// Walk links from `start` and collect every sink the frame reaches.
    fn route(&self, start: NodeId) -> Vec<NodeId> {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(from) = self.node(current) else {
                continue;
            };

            for link in self.links.iter().filter(|l| l.from == current) {
                if from.role == Some(ElementRole::SwitchOutput)
                    && link.pad.is_some()
                    && link.pad != from.selected_pad
                {
                    continue;
                }
                let Some(to) = self.node(link.to) else {
                    continue;
                };
                match to.role {
                    Some(ElementRole::Valve) if !to.valve_open => continue,
                    Some(ElementRole::SwitchInput)
                        if link.pad.is_some() && link.pad != to.selected_pad =>
                    {
                        continue
                    }
                    Some(ElementRole::Sink) | Some(ElementRole::AppSink) => reached.push(link.to),
                    _ => {}
                }
                queue.push_back(link.to);
            }
        }

        reached
    }
}

/// Builder for graphs instantiated by [`MemoryEngine::instantiate`]
#[derive(Debug, Default)]
pub struct MemoryGraphBuilder {
    nodes: Vec<MemoryNode>,
    links: Vec<(String, String, Option<String>)>,
}

impl MemoryGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controllable element
    pub fn element(mut self, name: &str, role: ElementRole) -> Self {
        self.nodes.push(MemoryNode::new(name, Some(role)));
        self
    }

    /// Add an element the registry cannot control (converter, filter, ...)
    pub fn passive(mut self, name: &str) -> Self {
        self.nodes.push(MemoryNode::new(name, None));
        self
    }

    /// Set the negotiated stream format of an element
    pub fn tensors(mut self, name: &str, info: TensorsInfo) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.name == name) {
            node.tensors_info = Some(info);
        }
        self
    }

    /// Set the selectable pads of a switch; the first pad starts selected
    pub fn switch_pads(mut self, name: &str, pads: &[&str]) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.name == name) {
            node.switch_pads = pads.iter().map(|p| p.to_string()).collect();
            node.selected_pad = node.switch_pads.first().cloned();
        }
        self
    }

    /// Link two elements
    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.push((from.to_string(), to.to_string(), None));
        self
    }

    /// Link two elements through a switch pad
    pub fn link_pad(mut self, from: &str, to: &str, pad: &str) -> Self {
        self.links
            .push((from.to_string(), to.to_string(), Some(pad.to_string())));
        self
    }

    fn build(self) -> MemoryGraph {
        let by_name: HashMap<String, NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), NodeId(i as u32)))
            .collect();

        let links = self
            .links
            .into_iter()
            .filter_map(|(from, to, pad)| {
                match (by_name.get(&from), by_name.get(&to)) {
                    (Some(&from), Some(&to)) => Some(Link { from, to, pad }),
                    _ => {
                        tracing::warn!("Ignoring link {} -> {}: unknown element", from, to);
                        None
                    }
                }
            })
            .collect();

        MemoryGraph {
            nodes: self.nodes,
            by_name,
            links,
            state: PipelineState::Null,
            subscribers: Vec::new(),
            destroyed: false,
            destroy_calls: 0,
        }
    }
}

/// In-process engine holding any number of graphs
pub struct MemoryEngine {
    graphs: Mutex<HashMap<GraphId, MemoryGraph>>,
    next_graph: AtomicU32,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            graphs: Mutex::new(HashMap::new()),
            next_graph: AtomicU32::new(1),
        }
    }

    /// Instantiate a graph and return its id
    pub fn instantiate(&self, builder: MemoryGraphBuilder) -> GraphId {
        let id = GraphId(self.next_graph.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, builder.build());
        tracing::debug!("Instantiated graph {}", id);
        id
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GraphId, MemoryGraph>> {
        self.graphs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_graph<T>(
        &self,
        graph: GraphId,
        f: impl FnOnce(&mut MemoryGraph) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut graphs = self.lock();
        match graphs.get_mut(&graph) {
            Some(g) if !g.destroyed => f(g),
            _ => Err(EngineError::UnknownGraph(graph)),
        }
    }

    fn read_graph<T>(&self, graph: GraphId, f: impl FnOnce(&MemoryGraph) -> Option<T>) -> Option<T> {
        let graphs = self.lock();
        graphs.get(&graph).filter(|g| !g.destroyed).and_then(f)
    }

    fn publish(
        subscribers: &[Arc<dyn EventSink>],
        node: NodeId,
        event: ElementEvent,
        payload: &Arc<TensorsData>,
    ) {
        for sink in subscribers {
            sink.on_event(node, event, Arc::clone(payload));
        }
    }

    /// Raise an element event as if it came from the engine's streaming thread
    pub fn emit(
        &self,
        graph: GraphId,
        node: NodeId,
        event: ElementEvent,
        payload: TensorsData,
    ) -> EngineResult<()> {
        let subscribers = self.with_graph(graph, |g| {
            g.node_mut(node)?;
            Ok(g.subscribers.clone())
        })?;
        Self::publish(&subscribers, node, event, &Arc::new(payload));
        Ok(())
    }

    /// [`emit`](Self::emit) by element name
    pub fn emit_by_name(
        &self,
        graph: GraphId,
        name: &str,
        event: ElementEvent,
        payload: TensorsData,
    ) -> EngineResult<()> {
        let node = self
            .lookup_node_by_name(graph, name)
            .ok_or_else(|| EngineError::Rejected(format!("no element named '{}'", name)))?;
        self.emit(graph, node, event, payload)
    }

    /// Renegotiate the stream format of an element
    pub fn set_tensors_info(&self, graph: GraphId, name: &str, info: TensorsInfo) -> EngineResult<()> {
        self.with_graph(graph, |g| {
            let node = *g
                .by_name
                .get(name)
                .ok_or_else(|| EngineError::Rejected(format!("no element named '{}'", name)))?;
            g.node_mut(node)?.tensors_info = Some(info);
            Ok(())
        })
    }

    /// How many times `graph_destroy` was called for `graph`
    pub fn destroy_calls(&self, graph: GraphId) -> u32 {
        self.lock().get(&graph).map(|g| g.destroy_calls).unwrap_or(0)
    }

    pub fn is_destroyed(&self, graph: GraphId) -> bool {
        self.lock().get(&graph).map(|g| g.destroyed).unwrap_or(false)
    }

    /// Number of event subscribers attached to `graph`
    pub fn subscriber_count(&self, graph: GraphId) -> usize {
        self.lock().get(&graph).map(|g| g.subscribers.len()).unwrap_or(0)
    }

    pub fn valve_is_open(&self, graph: GraphId, name: &str) -> Option<bool> {
        self.read_graph(graph, |g| {
            let node = g.by_name.get(name)?;
            g.node(*node).map(|n| n.valve_open)
        })
    }

    pub fn selected_pad(&self, graph: GraphId, name: &str) -> Option<String> {
        self.read_graph(graph, |g| {
            let node = g.by_name.get(name)?;
            g.node(*node).and_then(|n| n.selected_pad.clone())
        })
    }

    /// Frames pushed into an application source so far
    pub fn pushed_frames(&self, graph: GraphId, name: &str) -> u64 {
        self.read_graph(graph, |g| {
            let node = g.by_name.get(name)?;
            g.node(*node).map(|n| n.pushed_frames)
        })
        .unwrap_or(0)
    }
}

impl DataflowEngine for MemoryEngine {
    fn lookup_node_by_name(&self, graph: GraphId, name: &str) -> Option<NodeId> {
        self.read_graph(graph, |g| {
            let node = *g.by_name.get(name)?;
            g.node(node).map(|_| node)
        })
    }

    fn node_role(&self, graph: GraphId, node: NodeId) -> Option<ElementRole> {
        self.read_graph(graph, |g| g.node(node).and_then(|n| n.role))
    }

    fn list_nodes(&self, graph: GraphId) -> Vec<(String, NodeId)> {
        self.read_graph(graph, |g| {
            Some(
                g.nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| !n.removed)
                    .map(|(i, n)| (n.name.clone(), NodeId(i as u32)))
                    .collect(),
            )
        })
        .unwrap_or_default()
    }

    fn node_pads(&self, graph: GraphId, node: NodeId) -> NodePads {
        self.read_graph(graph, |g| g.node(node).map(|n| n.pads.clone()))
            .unwrap_or_default()
    }

    fn node_tensors_info(&self, graph: GraphId, node: NodeId) -> Option<TensorsInfo> {
        self.read_graph(graph, |g| g.node(node).and_then(|n| n.tensors_info.clone()))
    }

    fn current_state(&self, graph: GraphId) -> EngineResult<PipelineState> {
        self.with_graph(graph, |g| Ok(g.state))
    }

    fn subscribe(&self, graph: GraphId, sink: Arc<dyn EventSink>) -> EngineResult<()> {
        self.with_graph(graph, |g| {
            g.subscribers.push(sink);
            Ok(())
        })
    }

    fn set_state(&self, graph: GraphId, state: PipelineState) -> EngineResult<()> {
        if state == PipelineState::Unknown {
            return Err(EngineError::StateChange(
                "cannot switch to unknown state".to_string(),
            ));
        }

        let (subscribers, sources) = self.with_graph(graph, |g| {
            let entering_playing = state == PipelineState::Playing && g.state != state;
            g.state = state;
            let sources: Vec<NodeId> = if entering_playing {
                g.nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| !n.removed && n.role == Some(ElementRole::AppSrc))
                    .map(|(i, _)| NodeId(i as u32))
                    .collect()
            } else {
                Vec::new()
            };
            Ok((g.subscribers.clone(), sources))
        })?;

        tracing::debug!("Graph {} -> {}", graph, state);
        let empty = Arc::new(TensorsData::default());
        for node in sources {
            Self::publish(&subscribers, node, ElementEvent::NeedData, &empty);
        }
        Ok(())
    }

    fn remove_node(&self, graph: GraphId, node: NodeId) -> EngineResult<()> {
        self.with_graph(graph, |g| {
            g.node_mut(node)?.removed = true;
            g.links.retain(|l| l.from != node && l.to != node);
            Ok(())
        })
    }

    fn graph_destroy(&self, graph: GraphId) {
        let mut graphs = self.lock();
        let Some(g) = graphs.get_mut(&graph) else {
            tracing::error!("graph_destroy on unknown graph {}", graph);
            return;
        };
        g.destroy_calls += 1;
        if g.destroyed {
            tracing::error!("Graph {} destroyed {} times", graph, g.destroy_calls);
            return;
        }
        g.destroyed = true;
        g.state = PipelineState::Null;
        g.subscribers.clear();
        tracing::debug!("Destroyed graph {}", graph);
    }

    fn push_data(&self, graph: GraphId, node: NodeId, data: TensorsData) -> EngineResult<()> {
        let (subscribers, sinks) = self.with_graph(graph, |g| {
            let src = g.node_mut(node)?;
            if src.role != Some(ElementRole::AppSrc) {
                return Err(EngineError::Unsupported {
                    node,
                    operation: "push_data".to_string(),
                });
            }
            src.pushed_frames += 1;
            let sinks = if g.state == PipelineState::Playing {
                g.route(node)
            } else {
                Vec::new()
            };
            Ok((g.subscribers.clone(), sinks))
        })?;

        if !sinks.is_empty() {
            let payload = Arc::new(data);
            for sink in sinks {
                Self::publish(&subscribers, sink, ElementEvent::NewData, &payload);
            }
        }
        Ok(())
    }

    fn set_valve_open(&self, graph: GraphId, node: NodeId, open: bool) -> EngineResult<()> {
        self.with_graph(graph, |g| {
            let valve = g.node_mut(node)?;
            if valve.role != Some(ElementRole::Valve) {
                return Err(EngineError::Unsupported {
                    node,
                    operation: "set_valve_open".to_string(),
                });
            }
            valve.valve_open = open;
            Ok(())
        })
    }

    fn pad_names(&self, graph: GraphId, node: NodeId) -> EngineResult<Vec<String>> {
        self.with_graph(graph, |g| {
            let switch = g.node_mut(node)?;
            match switch.role {
                Some(ElementRole::SwitchInput) | Some(ElementRole::SwitchOutput) => {
                    Ok(switch.switch_pads.clone())
                }
                _ => Err(EngineError::Unsupported {
                    node,
                    operation: "pad_names".to_string(),
                }),
            }
        })
    }

    fn select_pad(&self, graph: GraphId, node: NodeId, pad: &str) -> EngineResult<()> {
        self.with_graph(graph, |g| {
            let switch = g.node_mut(node)?;
            match switch.role {
                Some(ElementRole::SwitchInput) | Some(ElementRole::SwitchOutput) => {}
                _ => {
                    return Err(EngineError::Unsupported {
                        node,
                        operation: "select_pad".to_string(),
                    })
                }
            }
            if !switch.switch_pads.iter().any(|p| p == pad) {
                return Err(EngineError::UnknownPad {
                    node,
                    pad: pad.to_string(),
                });
            }
            switch.selected_pad = Some(pad.to_string());
            Ok(())
        })
    }
}
