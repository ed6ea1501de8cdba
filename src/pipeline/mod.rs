//! Handle and registry subsystem.
//!
//! Applications ask a [`Pipeline`] for handles to named elements of a running
//! graph. Engine events flow back through the [`DispatchBridge`] to whichever
//! handles are still attached.
//!
//! # Architecture
//!
//! ```text
//! application ──► Pipeline (registry lock) ──► ElementEntry (entry lock) ──► handle set
//!                                                      ▲
//! engine thread ──► DispatchBridge ──► node index ─────┘
//! ```
//!
//! # Design
//!
//! - **Two lock tiers**: registry before entry, never the reverse. The node
//!   index is a leaf lock.
//! - **Relation, not ownership**: entries hold a `NodeId` and an alive flag;
//!   handles hold a `Weak` pipeline and an `Arc` entry.
//! - **Teardown once**: `destroy` (or dropping the last clone) invalidates
//!   every handle before the graph is released, exactly once.

pub mod bridge;
pub mod element;
pub mod error;
pub mod handle;
pub mod id;
pub mod registry;

pub use bridge::{DispatchBridge, DispatchStats};
pub use element::{
    DeliveryOutcome, ElementEntry, EntrySnapshot, FnListener, HandleListener, HandleSnapshot,
    HandleStatus,
};
pub use error::{RegistryError, RegistryResult};
pub use handle::{SinkHandle, SrcHandle, SwitchHandle, ValveHandle};
pub use id::{GraphId, HandleId, NodeId};
pub use registry::{Pipeline, RegistrySnapshot};
