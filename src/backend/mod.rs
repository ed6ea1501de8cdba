//! Engine boundary
//!
//! The registry talks to the dataflow engine only through the traits in
//! [`engine_trait`]. The engine executes buffers and negotiates formats; the
//! registry only tracks elements and handles.
//!
//! # Components
//!
//! - [`DataflowEngine`] - queries, structural calls and control calls on a graph
//! - [`EventSink`] - receiver of element events raised on engine threads
//! - [`MemoryEngine`] - in-process engine for tests, benches and the demo binary
//!
//! # Example
//!
//! ```ignore
//! use mlpipe_rs::backend::{MemoryEngine, MemoryGraphBuilder};
//! use mlpipe_rs::pipeline::Pipeline;
//! use mlpipe_rs::types::ElementRole;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let graph = engine.instantiate(
//!     MemoryGraphBuilder::new()
//!         .element("src", ElementRole::AppSrc)
//!         .element("sink", ElementRole::Sink)
//!         .link("src", "sink"),
//! );
//! let pipeline = Pipeline::create(engine, graph)?;
//! ```

pub mod engine_trait;
pub mod memory_engine;

pub use engine_trait::{
    DataflowEngine, ElementEvent, EngineError, EngineResult, EventSink, NodePads,
};
#[cfg(test)]
pub use engine_trait::MockDataflowEngine;
pub use memory_engine::{MemoryEngine, MemoryGraphBuilder};
