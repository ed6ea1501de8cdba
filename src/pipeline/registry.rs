//! Pipeline registry: the owner of one engine graph and its element entries.
//!
//! # Main Types
//!
//! - [`Pipeline`]: cheap-to-clone handle to a wrapped graph. The graph is
//!   released by [`Pipeline::destroy`] or when the last clone drops.
//! - [`RegistrySnapshot`]: serializable view of the registry
//!
//! # Locking
//!
//! The registry lock guards the name map, the destroyed flag and every
//! structural engine call (`set_state`, `remove_node`, `graph_destroy`).
//! Entry locks are only ever taken while holding the registry lock, never
//! the other way round.

use crate::backend::DataflowEngine;
use crate::config::RegistryConfig;
use crate::pipeline::bridge::{DispatchBridge, DispatchStats};
use crate::pipeline::element::{ElementEntry, EntrySnapshot};
use crate::pipeline::error::{RegistryError, RegistryResult};
use crate::pipeline::id::{GraphId, NodeId};
use crate::types::{ElementRole, HandleKind, PipelineState, TensorsInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct RegistryState {
    destroyed: bool,
    entries: HashMap<String, Arc<ElementEntry>>,
}

pub(crate) struct PipelineShared {
    engine: Arc<dyn DataflowEngine>,
    graph: GraphId,
    registry: Mutex<RegistryState>,
    bridge: DispatchBridge,
    config: RegistryConfig,
    span: tracing::Span,
}

impl PipelineShared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_live(&self) -> RegistryResult<MutexGuard<'_, RegistryState>> {
        let state = self.lock();
        if state.destroyed {
            return Err(RegistryError::AlreadyDestroyed);
        }
        Ok(state)
    }

    pub(crate) fn engine(&self) -> &dyn DataflowEngine {
        self.engine.as_ref()
    }

    pub(crate) fn graph(&self) -> GraphId {
        self.graph
    }

    pub(crate) fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub(crate) fn bridge(&self) -> &DispatchBridge {
        &self.bridge
    }

    /// Look up or create the entry for `name`, checking its role with `accepts`.
    fn resolve(
        &self,
        name: &str,
        accepts: impl Fn(ElementRole) -> bool,
        requested: &dyn fmt::Display,
    ) -> RegistryResult<Arc<ElementEntry>> {
        let _span = self.span.enter();
        let mut state = self.lock_live()?;

        if let Some(entry) = state.entries.get(name) {
            if accepts(entry.role()) {
                return Ok(Arc::clone(entry));
            }
            return Err(RegistryError::RoleMismatch {
                name: name.to_string(),
                actual: entry.role(),
                requested: requested.to_string(),
            });
        }

        let node = self
            .engine
            .lookup_node_by_name(self.graph, name)
            .ok_or_else(|| RegistryError::ElementNotFound(name.to_string()))?;
        let Some(actual) = self.engine.node_role(self.graph, node) else {
            tracing::debug!(element = name, "Element exists but is not controllable");
            return Err(RegistryError::ElementNotFound(name.to_string()));
        };
        if !accepts(actual) {
            return Err(RegistryError::RoleMismatch {
                name: name.to_string(),
                actual,
                requested: requested.to_string(),
            });
        }

        Ok(self.insert_entry(&mut state, name, node, actual))
    }

    fn insert_entry(
        &self,
        state: &mut RegistryState,
        name: &str,
        node: NodeId,
        role: ElementRole,
    ) -> Arc<ElementEntry> {
        let entry = Arc::new(ElementEntry::new(
            name,
            role,
            node,
            self.engine.node_pads(self.graph, node),
            self.engine
                .node_tensors_info(self.graph, node)
                .filter(TensorsInfo::is_valid),
        ));
        state.entries.insert(name.to_string(), Arc::clone(&entry));
        self.bridge.register(&entry);
        tracing::debug!(element = name, %role, %node, "Registered element");
        entry
    }

    fn populate(&self) {
        let _span = self.span.enter();
        let mut state = self.lock();
        for (name, node) in self.engine.list_nodes(self.graph) {
            if state.entries.contains_key(&name) {
                continue;
            }
            if let Some(role) = self.engine.node_role(self.graph, node) {
                self.insert_entry(&mut state, &name, node, role);
            }
        }
        tracing::debug!(entries = state.entries.len(), "Eager registration done");
    }

    /// Invalidate everything, then release the graph exactly once.
    fn teardown(&self) -> RegistryResult<()> {
        let _span = self.span.enter();
        let mut state = self.lock_live()?;
        state.destroyed = true;
        self.bridge.begin_close();

        let mut invalidated = 0;
        for entry in state.entries.values() {
            invalidated += entry.invalidate_all();
        }
        let entries = state.entries.len();
        state.entries.clear();
        self.bridge.clear();

        self.engine.graph_destroy(self.graph);
        tracing::info!(entries, handles = invalidated, "Pipeline destroyed");
        Ok(())
    }
}

impl Drop for PipelineShared {
    fn drop(&mut self) {
        if self.teardown().is_ok() {
            tracing::debug!(parent: &self.span, "Pipeline torn down on drop");
        }
    }
}

/// Serializable view of a pipeline registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub graph: GraphId,
    pub destroyed: bool,
    pub dispatch: DispatchStats,
    /// Entries sorted by name
    pub elements: Vec<EntrySnapshot>,
}

/// A wrapped engine graph and its element registry
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) shared: Arc<PipelineShared>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("graph", &self.shared.graph)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Pipeline {
    /// Wrap an instantiated graph with the default configuration
    pub fn create(engine: Arc<dyn DataflowEngine>, graph: GraphId) -> RegistryResult<Self> {
        Self::with_config(engine, graph, RegistryConfig::default())
    }

    /// Wrap an instantiated graph and subscribe to its events
    pub fn with_config(
        engine: Arc<dyn DataflowEngine>,
        graph: GraphId,
        config: RegistryConfig,
    ) -> RegistryResult<Self> {
        let span = tracing::info_span!("pipeline", graph = %graph);
        let bridge = DispatchBridge::new(config.dispatch.clone(), span.clone());

        engine
            .subscribe(graph, Arc::new(bridge.clone()))
            .map_err(RegistryError::from_engine)?;

        let shared = Arc::new(PipelineShared {
            engine,
            graph,
            registry: Mutex::new(RegistryState {
                destroyed: false,
                entries: HashMap::new(),
            }),
            bridge,
            config,
            span,
        });

        if shared.config.eager_entries {
            shared.populate();
        }

        tracing::info!(parent: &shared.span, mode = ?shared.config.dispatch.mode, "Pipeline created");
        Ok(Self { shared })
    }

    pub fn graph(&self) -> GraphId {
        self.shared.graph
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    pub fn bridge(&self) -> &DispatchBridge {
        &self.shared.bridge
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    /// Look up or lazily create the entry for `name` with exactly `role`.
    ///
    /// # Errors
    ///
    /// - `AlreadyDestroyed` after [`destroy`](Self::destroy)
    /// - `ElementNotFound` if no controllable element has that name
    /// - `RoleMismatch` if the element has a different role
    pub fn find_or_create_entry(
        &self,
        name: &str,
        role: ElementRole,
    ) -> RegistryResult<Arc<ElementEntry>> {
        self.shared.resolve(name, |actual| actual == role, &role)
    }

    /// Like [`find_or_create_entry`](Self::find_or_create_entry), but accepts
    /// any role a handle of `kind` can attach to.
    pub fn entry_for_kind(&self, name: &str, kind: HandleKind) -> RegistryResult<Arc<ElementEntry>> {
        self.shared.resolve(name, |actual| actual.accepts(kind), &kind)
    }

    /// Entry for `name` if one is registered
    pub fn entry(&self, name: &str) -> Option<Arc<ElementEntry>> {
        self.shared.lock().entries.get(name).cloned()
    }

    /// Registered element names, sorted
    pub fn element_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every entry and release the graph.
    ///
    /// Fails with `AlreadyDestroyed` on the second call.
    pub fn destroy(&self) -> RegistryResult<()> {
        self.shared.teardown()
    }

    pub fn start(&self) -> RegistryResult<()> {
        self.set_state(PipelineState::Playing)
    }

    pub fn stop(&self) -> RegistryResult<()> {
        self.set_state(PipelineState::Paused)
    }

    pub fn set_state(&self, target: PipelineState) -> RegistryResult<()> {
        let _span = self.shared.span.enter();
        let _state = self.shared.lock_live()?;
        self.shared
            .engine
            .set_state(self.shared.graph, target)
            .map_err(RegistryError::from_engine)?;
        tracing::info!(state = %target, "Pipeline state changed");
        Ok(())
    }

    pub fn state(&self) -> RegistryResult<PipelineState> {
        let _state = self.shared.lock_live()?;
        self.shared
            .engine
            .current_state(self.shared.graph)
            .map_err(RegistryError::from_engine)
    }

    /// Invalidate the entry for `name` and remove its node from the graph.
    ///
    /// Not atomic: the entry is dropped and its handles invalidated before the
    /// engine is asked, so no handle can reach a node the engine has already
    /// removed. If the engine then refuses, the error is returned, the old
    /// handles stay invalidated and the next lookup of `name` registers a
    /// fresh entry for the surviving node.
    pub fn remove_element(&self, name: &str) -> RegistryResult<()> {
        let _span = self.shared.span.enter();
        let mut state = self.shared.lock_live()?;

        let node = match state.entries.remove(name) {
            Some(entry) => {
                self.shared.bridge.unregister(entry.node());
                let handles = entry.invalidate_all();
                tracing::debug!(element = name, handles, "Entry invalidated for removal");
                entry.node()
            }
            None => self
                .shared
                .engine
                .lookup_node_by_name(self.shared.graph, name)
                .ok_or_else(|| RegistryError::ElementNotFound(name.to_string()))?,
        };

        self.shared
            .engine
            .remove_node(self.shared.graph, node)
            .map_err(RegistryError::from_engine)?;
        tracing::info!(element = name, "Element removed");
        Ok(())
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.shared.bridge.stats()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let (destroyed, mut entries): (bool, Vec<Arc<ElementEntry>>) = {
            let state = self.shared.lock();
            (state.destroyed, state.entries.values().cloned().collect())
        };
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        RegistrySnapshot {
            taken_at: Utc::now(),
            graph: self.shared.graph,
            destroyed,
            dispatch: self.shared.bridge.stats(),
            elements: entries.iter().map(|e| e.snapshot()).collect(),
        }
    }
}
