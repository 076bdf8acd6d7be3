//! Detached value trees.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::{ObjectProperty, ObjectValue};
use crate::model::VertexId;

/// One value and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueNode {
    pub value: ObjectValue,
    pub children: Vec<ValueNode>,
}

impl ValueNode {
    /// Number of values in this subtree, itself included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ValueNode::size).sum::<usize>()
    }

    /// Children created for `aspect_property`, in creation order.
    pub fn children_of(&self, aspect_property: VertexId) -> impl Iterator<Item = &ValueNode> {
        self.children
            .iter()
            .filter(move |c| c.value.aspect_property_id == Some(aspect_property))
    }
}

/// An object property with its whole value tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTree {
    pub property: ObjectProperty,
    pub roots: Vec<ValueNode>,
}

impl ValueTree {
    /// Assemble from a flat list of values in creation order.
    pub(crate) fn assemble(property: ObjectProperty, values: Vec<ObjectValue>) -> Self {
        let mut children: HashMap<VertexId, Vec<ObjectValue>> = HashMap::new();
        let mut roots = Vec::new();
        for value in values {
            match value.parent_value_id {
                Some(parent) => children.entry(parent).or_default().push(value),
                None => roots.push(value),
            }
        }
        let roots = roots.into_iter().map(|v| attach(v, &mut children)).collect();
        Self { property, roots }
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.roots.iter().map(ValueNode::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first search for a value by id.
    pub fn find(&self, id: VertexId) -> Option<&ValueNode> {
        let mut stack: Vec<&ValueNode> = self.roots.iter().collect();
        while let Some(node) = stack.pop() {
            if node.value.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }
}

fn attach(value: ObjectValue, children: &mut HashMap<VertexId, Vec<ObjectValue>>) -> ValueNode {
    let kids = children.remove(&value.id).unwrap_or_default();
    ValueNode {
        children: kids.into_iter().map(|k| attach(k, children)).collect(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Cardinality;

    fn value(id: u64, parent: Option<u64>, ap: Option<u64>) -> ObjectValue {
        ObjectValue {
            id: VertexId(id),
            object_property_id: VertexId(1),
            parent_value_id: parent.map(VertexId),
            aspect_property_id: ap.map(VertexId),
            scalar: None,
            measure_id: None,
            cardinality: Cardinality::Infinity,
            version: 1,
        }
    }

    fn property() -> ObjectProperty {
        ObjectProperty {
            id: VertexId(1),
            object_id: VertexId(2),
            aspect_id: VertexId(3),
            cardinality: Cardinality::Infinity,
            role_name: None,
            description: None,
            version: 1,
        }
    }

    #[test]
    fn test_assemble_nests_children_in_order() {
        let tree = ValueTree::assemble(
            property(),
            vec![
                value(10, None, None),
                value(11, Some(10), Some(5)),
                value(12, Some(10), Some(6)),
                value(13, Some(11), Some(7)),
                value(20, None, None),
            ],
        );
        assert_eq!(tree.roots.len(), 2);
        assert_eq!(tree.len(), 5);
        let first = &tree.roots[0];
        assert_eq!(first.children.iter().map(|c| c.value.id.0).collect::<Vec<_>>(), vec![11, 12]);
        assert_eq!(first.children_of(VertexId(6)).count(), 1);
        assert_eq!(tree.find(VertexId(13)).map(|n| n.value.parent_value_id), Some(Some(VertexId(11))));
        assert!(tree.find(VertexId(99)).is_none());
    }
}
