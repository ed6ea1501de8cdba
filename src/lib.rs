//! # mlpipe-rs: handle registry for media pipelines
//!
//! Tracks the named elements of a running dataflow graph (sources, sinks,
//! valves, stream switches) and the handles applications hold on them. Any
//! number of threads may attach, detach and receive callbacks while the graph
//! is changed or torn down, without dangling references or double release.
//!
//! ## Architecture
//!
//! - **Pipeline**: element registry, handle manager and dispatch bridge
//!   (see [`pipeline`])
//! - **Backend**: the [`backend::DataflowEngine`] boundary and an in-process
//!   [`backend::MemoryEngine`]
//! - **Ambient**: configuration, logging setup and error types
//!
//! ## Configuration
//!
//! Settings are read from `registry.toml` in the platform config directory
//! under `dev.mlpipe.registry`, or from the file named by `MLPIPE_CONFIG`.
//!
//! ## Example
//!
//! ```ignore
//! use mlpipe_rs::{
//!     backend::{MemoryEngine, MemoryGraphBuilder},
//!     pipeline::Pipeline,
//!     types::{ElementRole, TensorsData},
//! };
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let graph = engine.instantiate(
//!     MemoryGraphBuilder::new()
//!         .element("src", ElementRole::AppSrc)
//!         .element("sink", ElementRole::Sink)
//!         .link("src", "sink"),
//! );
//!
//! let pipeline = Pipeline::create(engine, graph)?;
//! let _sink = pipeline.register_sink("sink", |frame| println!("{} bytes", frame.total_bytes()))?;
//! let src = pipeline.src_handle("src")?;
//!
//! pipeline.start()?;
//! src.input_data(TensorsData::single(vec![0u8; 16]))?;
//! pipeline.destroy()?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use backend::{DataflowEngine, MemoryEngine, MemoryGraphBuilder};
pub use config::RegistryConfig;
pub use error::{MlPipeError, Result};
pub use pipeline::{Pipeline, RegistryError, RegistryResult};
pub use types::{ElementRole, HandleKind, TensorsData, TensorsInfo};
