//! # Property Graph Model
//!
//! Plain DTOs for the graph layer: vertices, edges and their primitive values.
//! This module is pure data with no I/O and no async.

pub mod vertex;
pub mod edge;
pub mod value;
pub mod property_map;

pub use vertex::{Vertex, VertexId};
pub use edge::{Edge, EdgeId, Direction};
pub use value::Value;
pub use property_map::{PropertyMap, property_map};
