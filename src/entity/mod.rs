//! # Typed entity views
//!
//! Each domain entity is a projection over one vertex. A view holds the
//! loaded vertex and nothing else: named getters read its property map,
//! setters write through a [`Session`] and keep the local copy in step, and
//! relations are answered by walking edges in the store. Two views over the
//! same vertex id are interchangeable.
//!
//! | Entity | Class | Outgoing edges |
//! |--------|-------|----------------|
//! | Aspect | `Aspect` | `HAS_PROPERTY` → AspectProperty, `OF_SUBJECT` → Subject |
//! | AspectProperty | `AspectProperty` | `REFERENCES` → Aspect |
//! | Subject | `Subject` | (none) |
//! | Object | `Object` | `OF_SUBJECT` → Subject, `HAS_PROPERTY` → ObjectProperty |
//! | ObjectProperty | `ObjectProperty` | `OF_ASPECT` → Aspect, `HAS_VALUE` → root ObjectValue |
//! | ObjectValue | `ObjectValue` | `OF_PROPERTY` → ObjectProperty, `PARENT_VALUE` → ObjectValue, `OF_ASPECT_PROPERTY` → AspectProperty |

/// Declare a view struct over one vertex class.
macro_rules! entity_view {
    ($(#[$meta:meta])* $view:ident, $class:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $view {
            vertex: $crate::model::Vertex,
        }

        impl $crate::entity::EntityView for $view {
            const CLASS: &'static str = $class;

            fn wrap_unchecked(vertex: $crate::model::Vertex) -> Self {
                Self { vertex }
            }

            fn vertex(&self) -> &$crate::model::Vertex {
                &self.vertex
            }

            fn vertex_mut(&mut self) -> &mut $crate::model::Vertex {
                &mut self.vertex
            }
        }
    };
}
pub(crate) use entity_view;

pub mod aspect;
pub mod aspect_property;
pub mod base_type;
pub mod object;
pub mod object_property;
pub mod object_value;
pub mod subject;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Value, Vertex, VertexId};
use crate::storage::StorageBackend;
use crate::{Error, Result, Session};

pub use aspect::{Aspect, AspectData, AspectView};
pub use aspect_property::{AspectProperty, AspectPropertyData, AspectPropertyView};
pub use base_type::BaseType;
pub use object::{Object, ObjectData, ObjectView};
pub use object_property::{ObjectProperty, ObjectPropertyData, ObjectPropertyView};
pub use object_value::{ObjectValue, ObjectValueView, ValueData};
pub use subject::{Subject, SubjectData, SubjectView};

// ============================================================================
// Classes, edge types and shared field names
// ============================================================================

pub const ASPECT_CLASS: &str = "Aspect";
pub const ASPECT_PROPERTY_CLASS: &str = "AspectProperty";
pub const SUBJECT_CLASS: &str = "Subject";
pub const OBJECT_CLASS: &str = "Object";
pub const OBJECT_PROPERTY_CLASS: &str = "ObjectProperty";
pub const OBJECT_VALUE_CLASS: &str = "ObjectValue";

pub const HAS_PROPERTY: &str = "HAS_PROPERTY";
pub const REFERENCES: &str = "REFERENCES";
pub const OF_SUBJECT: &str = "OF_SUBJECT";
pub const OF_ASPECT: &str = "OF_ASPECT";
pub const HAS_VALUE: &str = "HAS_VALUE";
pub const OF_PROPERTY: &str = "OF_PROPERTY";
pub const PARENT_VALUE: &str = "PARENT_VALUE";
pub const OF_ASPECT_PROPERTY: &str = "OF_ASPECT_PROPERTY";

pub const NAME: &str = "name";
pub const DESCRIPTION: &str = "description";
pub const DELETED: &str = "deleted";
pub const VERSION: &str = "version";

// ============================================================================
// Cardinality
// ============================================================================

/// How many values a property may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    /// Structure only: exactly one implicit value, never a scalar.
    Zero,
    /// At most one value.
    One,
    /// Any number of sibling values.
    Infinity,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::Zero => "ZERO",
            Cardinality::One => "ONE",
            Cardinality::Infinity => "INFINITY",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ZERO" => Ok(Cardinality::Zero),
            "ONE" => Ok(Cardinality::One),
            "INFINITY" => Ok(Cardinality::Infinity),
            other => Err(Error::InvalidValue(format!("unknown cardinality '{other}'"))),
        }
    }
}

// ============================================================================
// EntityView trait
// ============================================================================

/// A typed projection over a vertex of one class.
pub trait EntityView: Sized + Send + Sync {
    /// The vertex class tag this view accepts.
    const CLASS: &'static str;

    /// Wrap a vertex without checking its class.
    fn wrap_unchecked(vertex: Vertex) -> Self;

    fn vertex(&self) -> &Vertex;

    fn vertex_mut(&mut self) -> &mut Vertex;

    /// Wrap a vertex, failing with `TypeMismatch` on the wrong class.
    fn from_vertex(vertex: Vertex) -> Result<Self> {
        if !vertex.is_class(Self::CLASS) {
            return Err(Error::TypeMismatch {
                id: vertex.id,
                expected: Self::CLASS.to_string(),
                got: vertex.class,
            });
        }
        Ok(Self::wrap_unchecked(vertex))
    }

    fn id(&self) -> VertexId {
        self.vertex().id
    }

    /// History version; 0 before the first record is appended.
    fn version(&self) -> u64 {
        self.vertex().get_int(VERSION).unwrap_or(0).max(0) as u64
    }
}

// ============================================================================
// Field helpers
// ============================================================================

/// Write one field through the session and mirror it on the local vertex.
pub(crate) async fn write_field<B: StorageBackend>(
    session: &mut Session<'_, B>,
    vertex: &mut Vertex,
    key: &str,
    value: Value,
) -> Result<()> {
    session.set_property(vertex.id, key, value.clone()).await?;
    if value.is_null() {
        vertex.properties.remove(key);
    } else {
        vertex.properties.insert(key.to_string(), value);
    }
    Ok(())
}

pub(crate) fn owned_str(vertex: &Vertex, key: &str) -> Option<String> {
    vertex.get_str(key).map(str::to_string)
}

/// Trim a mandatory name; blank names are rejected.
pub fn normalize_name(class: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidValue(format!("{class} name must not be blank")));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank becomes `None`.
pub fn normalize_optional(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_parse_and_display() {
        assert_eq!("zero".parse::<Cardinality>().unwrap(), Cardinality::Zero);
        assert_eq!(" INFINITY ".parse::<Cardinality>().unwrap(), Cardinality::Infinity);
        assert_eq!(Cardinality::One.to_string(), "ONE");
        assert!("MANY".parse::<Cardinality>().is_err());
    }

    #[test]
    fn test_wrong_class_is_type_mismatch() {
        let vertex = Vertex::new(VertexId(9), SUBJECT_CLASS);
        match AspectView::from_vertex(vertex) {
            Err(Error::TypeMismatch { id, expected, got }) => {
                assert_eq!(id, VertexId(9));
                assert_eq!(expected, ASPECT_CLASS);
                assert_eq!(got, SUBJECT_CLASS);
            }
            other => panic!("expected TypeMismatch, got {:?}", other.map(|v| v.id())),
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Aspect", "  Length ").unwrap(), "Length");
        assert!(matches!(normalize_name("Aspect", "   "), Err(Error::InvalidValue(_))));
        assert_eq!(normalize_optional(Some("  ")), None);
        assert_eq!(normalize_optional(Some(" x ")), Some("x".to_string()));
    }
}
