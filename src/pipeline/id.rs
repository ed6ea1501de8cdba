//! Identity types for the registry.
//!
//! `GraphId` and `NodeId` are opaque references into the dataflow engine;
//! the registry never owns what they point at. `HandleId` is allocated by
//! each `ElementEntry` from a counter that only moves forward.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-side identifier of one instantiated graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GraphId(pub u32);

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphId({})", self.0)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Engine-side identifier of a node within a graph.
///
/// Used by the dispatch bridge to resolve events without a name lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle identifier, scoped to one element entry.
///
/// Ids start at 1 and are never reused while the entry is alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl HandleId {
    pub const FIRST: HandleId = HandleId(1);

    #[inline]
    pub fn next(self) -> HandleId {
        HandleId(self.0 + 1)
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId(42);
        assert_eq!(id.index(), 42);
        assert_eq!(id.to_string(), "NodeId(42)");
    }

    #[test]
    fn test_graph_id_debug() {
        assert_eq!(format!("{:?}", GraphId(3)), "GraphId(3)");
    }

    #[test]
    fn test_handle_id_ordering() {
        let first = HandleId::FIRST;
        let second = first.next();
        assert!(second > first);
        assert_eq!(second, HandleId(2));
        assert_eq!(second.to_string(), "#2");
    }
}
