//! Edge (directed typed relation) in the property graph.

use serde::{Deserialize, Serialize};
use super::VertexId;

/// Opaque edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A directed edge between two vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: VertexId,
    pub dst: VertexId,
    pub edge_type: String,
}

impl Edge {
    pub fn new(id: EdgeId, src: VertexId, dst: VertexId, edge_type: impl Into<String>) -> Self {
        Self { id, src, dst, edge_type: edge_type.into() }
    }

    pub fn touches(&self, vertex: VertexId) -> bool {
        self.src == vertex || self.dst == vertex
    }

    /// Whether this edge leaves/enters `vertex` in the given direction.
    pub fn matches(&self, vertex: VertexId, dir: Direction, edge_type: Option<&str>) -> bool {
        let matches_dir = match dir {
            Direction::Outgoing => self.src == vertex,
            Direction::Incoming => self.dst == vertex,
            Direction::Both => self.touches(vertex),
        };
        matches_dir && edge_type.is_none_or(|t| self.edge_type == t)
    }
}
