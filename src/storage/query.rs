//! Parameterized vertex patterns.
//!
//! A [`Pattern`] selects vertices of one class whose properties satisfy a list
//! of conditions. Operands are either literals or `$name` parameters bound at
//! execution time, so the same pattern can be reused with different inputs.
//! Results come back as a single-pass [`Cursor`]; re-run the query to restart.

use crate::model::{PropertyMap, Value, Vertex};
use crate::{Error, Result};

/// Comparison applied to one vertex property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Property equals the operand.
    Eq,
    /// Trimmed, case-insensitive string equality.
    EqIgnoreCase,
    /// Property differs from the operand. A missing property differs from anything but `Null`.
    Ne,
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub key: String,
    pub op: CompareOp,
    pub operand: Operand,
}

/// A class-scoped vertex pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub class: String,
    pub conditions: Vec<Condition>,
}

impl Pattern {
    pub fn class(class: impl Into<String>) -> Self {
        Self { class: class.into(), conditions: Vec::new() }
    }

    pub fn filter(mut self, key: impl Into<String>, op: CompareOp, operand: Operand) -> Self {
        self.conditions.push(Condition { key: key.into(), op, operand });
        self
    }

    /// `key = $param`
    pub fn eq_param(self, key: impl Into<String>, param: impl Into<String>) -> Self {
        self.filter(key, CompareOp::Eq, Operand::Param(param.into()))
    }

    /// `lower(trim(key)) = lower(trim($param))`
    pub fn eq_ignore_case_param(self, key: impl Into<String>, param: impl Into<String>) -> Self {
        self.filter(key, CompareOp::EqIgnoreCase, Operand::Param(param.into()))
    }

    /// `key = literal`
    pub fn eq_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(key, CompareOp::Eq, Operand::Literal(value.into()))
    }

    /// `key <> literal`
    pub fn ne_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(key, CompareOp::Ne, Operand::Literal(value.into()))
    }

    /// Resolve every `$param` against `params`.
    pub fn bind(&self, params: &PropertyMap) -> Result<BoundPattern> {
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            let value = match &cond.operand {
                Operand::Literal(v) => v.clone(),
                Operand::Param(name) => params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::StorageError(format!("missing query parameter ${name}")))?,
            };
            conditions.push((cond.key.clone(), cond.op, value));
        }
        Ok(BoundPattern { class: self.class.clone(), conditions })
    }
}

/// A pattern with all parameters substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPattern {
    class: String,
    conditions: Vec<(String, CompareOp, Value)>,
}

impl BoundPattern {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn matches(&self, vertex: &Vertex) -> bool {
        if !vertex.is_class(&self.class) {
            return false;
        }
        self.conditions.iter().all(|(key, op, expected)| {
            let actual = vertex.properties.get(key).unwrap_or(&Value::Null);
            match op {
                CompareOp::Eq => actual == expected,
                CompareOp::EqIgnoreCase => actual.eq_ignore_case(expected),
                CompareOp::Ne => actual != expected,
            }
        })
    }
}

/// Single-pass result sequence. Filtering happens lazily as the cursor advances.
pub struct Cursor {
    candidates: std::vec::IntoIter<Vertex>,
    pattern: BoundPattern,
}

impl Cursor {
    pub fn new(candidates: Vec<Vertex>, pattern: BoundPattern) -> Self {
        Self { candidates: candidates.into_iter(), pattern }
    }
}

impl Iterator for Cursor {
    type Item = Vertex;

    fn next(&mut self) -> Option<Vertex> {
        let pattern = &self.pattern;
        self.candidates.by_ref().find(|v| pattern.matches(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VertexId, property_map};

    fn aspect(id: u64, name: &str, deleted: bool) -> Vertex {
        Vertex::new(VertexId(id), "Aspect")
            .with_property("name", name)
            .with_property("deleted", deleted)
    }

    #[test]
    fn test_bind_and_match() {
        let pattern = Pattern::class("Aspect")
            .eq_ignore_case_param("name", "name")
            .ne_value("deleted", true);
        let bound = pattern.bind(&property_map([("name", "length")])).unwrap();

        assert!(bound.matches(&aspect(1, "Length", false)));
        assert!(!bound.matches(&aspect(2, "Length", true)));
        assert!(!bound.matches(&aspect(3, "Width", false)));
        assert!(!bound.matches(&Vertex::new(VertexId(4), "Subject").with_property("name", "Length")));
    }

    #[test]
    fn test_missing_param_is_an_error() {
        let pattern = Pattern::class("Aspect").eq_param("name", "name");
        assert!(matches!(pattern.bind(&PropertyMap::new()), Err(Error::StorageError(_))));
    }

    #[test]
    fn test_ne_matches_missing_property() {
        let bound = Pattern::class("Aspect").ne_value("deleted", true).bind(&PropertyMap::new()).unwrap();
        assert!(bound.matches(&Vertex::new(VertexId(1), "Aspect")));
    }

    #[test]
    fn test_cursor_is_single_pass() {
        let bound = Pattern::class("Aspect").ne_value("deleted", true).bind(&PropertyMap::new()).unwrap();
        let mut cursor = Cursor::new(
            vec![aspect(1, "a", false), aspect(2, "b", true), aspect(3, "c", false)],
            bound,
        );
        assert_eq!(cursor.next().map(|v| v.id), Some(VertexId(1)));
        assert_eq!(cursor.next().map(|v| v.id), Some(VertexId(3)));
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
    }
}
